use crate::command::{self, Command};
use crate::config::{Config, SharedConfig};
use crate::connection::{ClientRegistry, ClientState, SharedClients};
use crate::error::{NsError, NsResult};
use crate::namespace::{self, AuthResult, NamespaceRegistry, SharedNamespaces};
use crate::replication::{MigrationFlags, ReplicationState, SharedReplicationState};
use crate::resp::{RespParser, RespValue};
use crate::slowlog::{SharedSlowLog, SlowLog};
use crate::store::{MemoryStorage, SharedStore};
use bytes::BytesMut;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Registry, reload};

/// Handle that swaps the live tracing filter when `loglevel` changes.
pub type LogFilterHandle = reload::Handle<EnvFilter, Registry>;

/// Shared state handed to every connection and every command.
///
/// Locks are always taken in the order config, namespaces, replication,
/// clients, slowlog, store, and released before a lock earlier in that order
/// is taken.
#[derive(Clone)]
pub struct ServerContext {
    pub store: SharedStore,
    pub config: SharedConfig,
    pub namespaces: SharedNamespaces,
    pub replication: SharedReplicationState,
    pub migration: Arc<MigrationFlags>,
    pub clients: SharedClients,
    pub slowlog: SharedSlowLog,
    /// Cancelled by SHUTDOWN; stops the accept loop and every session.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
    log_filter: Option<LogFilterHandle>,
}

impl ServerContext {
    /// Build the context for `config`, registering its namespaces and
    /// master address.
    pub fn new(config: Config) -> NsResult<Self> {
        let registry =
            NamespaceRegistry::from_entries(config.namespaces.iter().cloned(), config.requirepass.as_deref())?;
        let mut replication = ReplicationState::new();
        if let Some((host, port)) = &config.slaveof {
            replication.set_master(host.clone(), *port);
        }
        let slowlog = SlowLog::new(config.slowlog_max_len);
        Ok(ServerContext {
            store: Arc::new(RwLock::new(MemoryStorage::new())),
            config: Arc::new(RwLock::new(config)),
            namespaces: Arc::new(RwLock::new(registry)),
            replication: Arc::new(RwLock::new(replication)),
            migration: Arc::new(MigrationFlags::new()),
            clients: Arc::new(RwLock::new(ClientRegistry::new())),
            slowlog: Arc::new(Mutex::new(slowlog)),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            log_filter: None,
        })
    }

    /// Let CONFIG SET loglevel reach the installed subscriber.
    pub fn with_log_filter(mut self, handle: LogFilterHandle) -> Self {
        self.log_filter = Some(handle);
        self
    }

    /// Swap the tracing filter for the one `config` asks for.
    pub fn reload_log_filter(&self, config: &Config) {
        let Some(handle) = &self.log_filter else {
            return;
        };
        if let Err(e) = handle.reload(config.log_filter()) {
            warn!("Failed to apply loglevel {}: {e}", config.loglevel);
        }
    }

    /// Record `args` in the slow log if running them took long enough.
    pub async fn log_if_slow(&self, args: &[Vec<u8>], elapsed: Duration, client: &ClientState) {
        let threshold = self.config.read().await.slowlog_log_slower_than;
        let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
        if threshold < 0 || micros < threshold as u64 {
            return;
        }
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        self.slowlog.lock().await.add(now, micros, args, client);
    }

    /// Bind `client` to the namespace selected by `secret`.
    pub async fn authenticate(&self, client: &mut ClientState, secret: &str) -> AuthResult {
        let requirepass = self.config.read().await.requirepass.clone();
        let registry = self.namespaces.read().await;
        namespace::authenticate(&registry, requirepass.as_deref(), client, secret)
    }

    /// Write the config file back with the current namespace map.
    pub async fn rewrite_config(&self) -> NsResult<()> {
        let config = self.config.read().await;
        let namespaces: Vec<(String, String)> = self
            .namespaces
            .read()
            .await
            .list()
            .into_iter()
            .map(|(token, name)| (name, token))
            .collect();
        config.rewrite(&namespaces)?;
        Ok(())
    }
}

pub async fn run_server(ctx: ServerContext) -> std::io::Result<()> {
    let (bind, port) = {
        let cfg = ctx.config.read().await;
        (cfg.bind.clone(), cfg.port)
    };

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("nskv server listening on {addr}");

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                debug!("New connection from {peer_addr}");

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr.to_string(), ctx).await {
                        debug!("Connection error from {peer_addr}: {e}");
                    }
                    debug!("Connection closed: {peer_addr}");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                return Ok(());
            }
            _ = ctx.shutdown.cancelled() => {
                info!("Shutting down on request...");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, addr: String, ctx: ServerContext) -> std::io::Result<()> {
    let requires_auth = ctx.config.read().await.requirepass.is_some();
    let mut client = ClientState::new(addr, requires_auth);
    ctx.clients.write().await.register(&client);

    let result = serve(&mut stream, &ctx, &mut client).await;
    ctx.clients.write().await.unregister(client.id);
    result
}

async fn serve(stream: &mut TcpStream, ctx: &ServerContext, client: &mut ClientState) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    let cancel = client.cancel.clone();

    loop {
        loop {
            match RespParser::parse_request(&mut buf) {
                Ok(Some(args)) if args.is_empty() => {}
                Ok(Some(args)) => {
                    let reply = process_command(args, ctx, client).await;
                    stream.write_all(&reply.serialize()).await?;
                    if client.should_close || cancel.is_cancelled() || ctx.shutdown.is_cancelled() {
                        return Ok(());
                    }
                    ctx.clients.write().await.register(client);
                }
                Ok(None) => break,
                Err(e) => {
                    let reply = RespValue::error(format!("ERR Protocol error: {e}"));
                    stream.write_all(&reply.serialize()).await?;
                    return Ok(());
                }
            }
        }

        let timeout = {
            let cfg = ctx.config.read().await;
            (cfg.timeout > 0).then(|| Duration::from_secs(cfg.timeout))
        };

        tokio::select! {
            result = async {
                match timeout {
                    Some(dur) => tokio::time::timeout(dur, stream.read_buf(&mut buf))
                        .await
                        .unwrap_or(Ok(0)),
                    None => stream.read_buf(&mut buf).await,
                }
            } => {
                if result? == 0 {
                    return Ok(());
                }
            }
            _ = cancel.cancelled() => {
                debug!("Client {} killed", client.id);
                return Ok(());
            }
            _ = ctx.shutdown.cancelled() => {
                return Ok(());
            }
        }
    }
}

async fn process_command(args: Vec<Vec<u8>>, ctx: &ServerContext, client: &mut ClientState) -> RespValue {
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    if !client.authenticated && !command::allowed_before_auth(&name) {
        return RespValue::error(NsError::NoAuth.to_resp_error());
    }

    let result = match Command::parse(&name, &args[1..]) {
        Ok(cmd) => {
            let started = Instant::now();
            let result = cmd.execute(ctx, client).await;
            if !command::hidden_from_slowlog(&name) {
                ctx.log_if_slow(&args, started.elapsed(), client).await;
            }
            result
        }
        Err(e) => Err(e),
    };
    match result {
        Ok(reply) => reply,
        Err(e) => {
            if matches!(e, NsError::Storage(_) | NsError::Io(_)) {
                warn!("{name} failed for {}: {e}", client.addr);
            }
            RespValue::error(e.to_resp_error())
        }
    }
}
