use crate::command::{COMMAND_TABLE, arg_eq, arg_to_i64, arg_to_string, require_admin, wrong_arg_count};
use crate::config::{Config, ConfigError};
use crate::connection::{ClientState, ClientType, KillFilter};
use crate::error::{NsError, NsResult};
use crate::namespace::AuthResult;
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::Database;
use crate::store::database::flush_all;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub async fn auth(ctx: &ServerContext, client: &mut ClientState, password: &str) -> NsResult<RespValue> {
    match ctx.authenticate(client, password).await {
        AuthResult::Ok => Ok(RespValue::ok()),
        AuthResult::InvalidPassword => Err(NsError::InvalidPassword),
        AuthResult::NoRequirePass => Err(NsError::NoPasswordSet),
    }
}

/// The AUTH option of HELLO rejects the same outcomes as AUTH, but
/// through its own mapping.
fn hello_auth(result: AuthResult) -> NsResult<()> {
    match result {
        AuthResult::Ok => Ok(()),
        AuthResult::InvalidPassword => Err(NsError::generic("invalid password")),
        AuthResult::NoRequirePass => Err(NsError::generic("Client sent AUTH, but no password is set")),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelloArgs {
    pub protover: Option<i64>,
    pub auth: Option<String>,
    pub setname: Option<String>,
}

/// `HELLO [protover [AUTH [default] password] [SETNAME name]]`
pub fn parse_hello(args: &[Vec<u8>]) -> NsResult<HelloArgs> {
    let mut hello = HelloArgs::default();
    let Some((protover, options)) = args.split_first() else {
        return Ok(hello);
    };
    let version = arg_to_i64(protover)
        .map_err(|_| NsError::generic("Protocol version is not an integer or out of range"))?;
    if !(2..=3).contains(&version) {
        return Err(NsError::NoProto);
    }
    hello.protover = Some(version);

    let mut i = 0;
    while i < options.len() {
        let more = options.len() - i - 1;
        let opt = &options[i];
        if arg_eq(opt, "auth") && more != 0 {
            // A username is only present when it leaves a password behind.
            if more == 2 || more == 4 {
                if options[i + 1] != b"default" {
                    return Err(NsError::InvalidPassword);
                }
                i += 1;
            }
            hello.auth = Some(arg_to_string(&options[i + 1]));
            i += 1;
        } else if arg_eq(opt, "setname") && more != 0 {
            hello.setname = Some(arg_to_string(&options[i + 1]));
            i += 1;
        } else {
            return Err(NsError::generic(format!(
                "Syntax error in HELLO option {}",
                arg_to_string(opt)
            )));
        }
        i += 1;
    }
    Ok(hello)
}

pub async fn hello(ctx: &ServerContext, client: &mut ClientState, hello: HelloArgs) -> NsResult<RespValue> {
    if let Some(password) = &hello.auth {
        hello_auth(ctx.authenticate(client, password).await)?;
    }
    if !client.authenticated {
        return Err(NsError::NoAuth);
    }
    if let Some(name) = hello.setname {
        client.name = Some(name).filter(|n| !n.is_empty());
    }

    let mode = if ctx.config.read().await.cluster_enabled {
        "cluster"
    } else {
        "standalone"
    };
    // Replies are always RESP2, whatever version was asked for.
    Ok(RespValue::array(vec![
        RespValue::bulk_string("server"),
        RespValue::bulk_string("redis"),
        RespValue::bulk_string("proto"),
        RespValue::integer(2),
        RespValue::bulk_string("mode"),
        RespValue::bulk_string(mode),
    ]))
}

pub fn time() -> RespValue {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    RespValue::bulk_array([now.as_secs().to_string(), now.subsec_micros().to_string()])
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOp {
    Get(String),
    Set(String, String),
    Rewrite,
}

pub fn parse_config(args: &[Vec<u8>]) -> NsResult<ConfigOp> {
    let sub = arg_to_string(&args[0]).to_ascii_lowercase();
    match (sub.as_str(), args.len()) {
        ("rewrite", 1) => Ok(ConfigOp::Rewrite),
        ("get", 2) => Ok(ConfigOp::Get(arg_to_string(&args[1]))),
        ("set", 3) => Ok(ConfigOp::Set(arg_to_string(&args[1]), arg_to_string(&args[2]))),
        ("rewrite" | "get" | "set", _) => Err(wrong_arg_count("config")),
        _ => Err(NsError::generic("CONFIG subcommand must be one of GET, SET, REWRITE")),
    }
}

pub async fn config(ctx: &ServerContext, client: &ClientState, op: ConfigOp) -> NsResult<RespValue> {
    require_admin(client)?;
    match op {
        ConfigOp::Get(pattern) => {
            let pairs = ctx.config.read().await.get_matching(&pattern);
            Ok(RespValue::bulk_array(pairs.into_iter().flat_map(|(k, v)| [k, v])))
        }
        ConfigOp::Set(key, value) => {
            let key = key.to_ascii_lowercase();
            let set_error = |e: ConfigError| NsError::generic(format!("CONFIG SET '{key}' error: {e}"));
            if key == "slaveof" {
                let master = Config::parse_master(&value).map_err(set_error)?;
                return slaveof(ctx, client, master).await;
            }

            let mut cfg = ctx.config.write().await;
            if key == "requirepass" && ctx.namespaces.read().await.resolve(&value).is_ok() {
                return Err(NsError::generic(format!(
                    "CONFIG SET '{key}' error: requirepass can't be the same as a namespace token"
                )));
            }
            cfg.set(&key, &value).map_err(set_error)?;
            match key.as_str() {
                "loglevel" => ctx.reload_log_filter(&cfg),
                "slowlog-max-len" => ctx.slowlog.lock().await.set_max_len(cfg.slowlog_max_len),
                _ => {}
            }
            info!("CONFIG SET {key} by {}", client.addr);
            Ok(RespValue::ok())
        }
        ConfigOp::Rewrite => {
            ctx.rewrite_config().await?;
            info!("# CONFIG REWRITE executed with success");
            Ok(RespValue::ok())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Id,
    GetName,
    SetName(String),
    List,
    Info,
    /// `legacy` is the `CLIENT KILL addr` form, which replies OK instead
    /// of a count.
    Kill { filter: KillFilter, legacy: bool },
}

pub fn parse_client(args: &[Vec<u8>]) -> NsResult<ClientOp> {
    let sub = arg_to_string(&args[0]).to_ascii_lowercase();
    match (sub.as_str(), args.len()) {
        ("id", 1) => Ok(ClientOp::Id),
        ("getname", 1) => Ok(ClientOp::GetName),
        ("list", 1) => Ok(ClientOp::List),
        ("info", 1) => Ok(ClientOp::Info),
        ("setname", 2) => {
            if !args[1].iter().all(|c| (b'!'..=b'~').contains(c)) {
                return Err(NsError::generic(
                    "Client names cannot contain spaces, newlines or special characters",
                ));
            }
            Ok(ClientOp::SetName(arg_to_string(&args[1])))
        }
        ("kill", _) => parse_kill(&args[1..]),
        _ => Err(NsError::generic(
            "Syntax error, try CLIENT LIST|INFO|KILL ip:port|GETNAME|SETNAME",
        )),
    }
}

fn parse_kill(args: &[Vec<u8>]) -> NsResult<ClientOp> {
    match args {
        [] => return Err(NsError::SyntaxError),
        [addr] => {
            let filter = KillFilter {
                addr: Some(arg_to_string(addr)),
                skip_me: false,
                ..Default::default()
            };
            return Ok(ClientOp::Kill { filter, legacy: true });
        }
        _ if args.len() % 2 != 0 => return Err(NsError::SyntaxError),
        _ => {}
    }

    let mut filter = KillFilter::default();
    for pair in args.chunks(2) {
        let value = &pair[1];
        match arg_to_string(&pair[0]).to_ascii_lowercase().as_str() {
            "addr" => filter.addr = Some(arg_to_string(value)),
            "id" => {
                let id = u64::try_from(arg_to_i64(value)?).map_err(|_| NsError::NotInteger)?;
                filter.id = Some(id);
            }
            "skipme" => {
                filter.skip_me = if arg_eq(value, "yes") {
                    true
                } else if arg_eq(value, "no") {
                    false
                } else {
                    return Err(NsError::SyntaxError);
                };
            }
            "type" => {
                let kind = ClientType::parse(&arg_to_string(value)).ok_or(NsError::SyntaxError)?;
                filter.kind = Some(kind);
            }
            _ => return Err(NsError::SyntaxError),
        }
    }
    Ok(ClientOp::Kill { filter, legacy: false })
}

pub async fn client(ctx: &ServerContext, client: &mut ClientState, op: ClientOp) -> NsResult<RespValue> {
    match op {
        ClientOp::Id => Ok(RespValue::integer(client.id as i64)),
        ClientOp::GetName => Ok(match &client.name {
            Some(name) => RespValue::bulk_string(name.as_bytes()),
            None => RespValue::null_bulk_string(),
        }),
        ClientOp::SetName(name) => {
            client.name = Some(name).filter(|n| !n.is_empty());
            Ok(RespValue::ok())
        }
        ClientOp::List => {
            let clients = ctx.clients.read().await;
            let text: String = clients.list().iter().map(|c| c.describe() + "\n").collect();
            Ok(RespValue::bulk_string(text))
        }
        ClientOp::Info => Ok(RespValue::bulk_string(client.info().describe() + "\n")),
        ClientOp::Kill { filter, legacy } => {
            require_admin(client)?;
            let killed = ctx.clients.write().await.kill(&filter, client.id);
            warn!("CLIENT KILL by {}: {killed} client(s) killed", client.addr);
            if !legacy {
                Ok(RespValue::integer(killed as i64))
            } else if killed == 0 {
                Err(NsError::generic("No such client"))
            } else {
                Ok(RespValue::ok())
            }
        }
    }
}

pub fn parse_slaveof(args: &[Vec<u8>]) -> NsResult<Option<(String, u16)>> {
    if arg_eq(&args[0], "no") && arg_eq(&args[1], "one") {
        return Ok(None);
    }
    let port = arg_to_string(&args[1])
        .parse::<u16>()
        .map_err(|_| NsError::generic("port should be number"))?;
    Ok(Some((arg_to_string(&args[0]), port)))
}

pub async fn slaveof(
    ctx: &ServerContext,
    client: &ClientState,
    master: Option<(String, u16)>,
) -> NsResult<RespValue> {
    let mut cfg = ctx.config.write().await;
    if cfg.cluster_enabled {
        return Err(NsError::generic("can't change to slave in cluster mode"));
    }
    require_admin(client)?;

    cfg.slaveof = master.clone();
    let mut repl = ctx.replication.write().await;
    match master {
        None => {
            repl.clear_master();
            warn!("MASTER MODE enabled (user request from '{}')", client.addr);
        }
        Some((host, port)) => {
            repl.set_master(host.clone(), port);
            warn!("SLAVE OF {host}:{port} enabled (user request from '{}')", client.addr);
        }
    }
    Ok(RespValue::ok())
}

pub async fn role(ctx: &ServerContext) -> RespValue {
    let repl = ctx.replication.read().await;
    match (&repl.master_host, repl.master_port) {
        (Some(host), Some(port)) if repl.is_replica() => RespValue::array(vec![
            RespValue::bulk_string("slave"),
            RespValue::bulk_string(host.as_bytes()),
            RespValue::integer(port as i64),
            RespValue::bulk_string("connect"),
            RespValue::integer(repl.master_repl_offset),
        ]),
        _ => RespValue::array(vec![
            RespValue::bulk_string("master"),
            RespValue::integer(repl.master_repl_offset),
            RespValue::array(Vec::new()),
        ]),
    }
}

pub async fn dbsize(ctx: &ServerContext, client: &ClientState, scan: bool) -> NsResult<RespValue> {
    // The count is always computed live, so there is nothing to refresh.
    if scan {
        return Ok(RespValue::ok());
    }
    let store = ctx.store.read().await;
    let size = Database::new(&client.namespace).dbsize(&*store)?;
    Ok(RespValue::integer(size as i64))
}

/// Ask a running slot migration to stop before keys disappear under it.
async fn stop_migration(ctx: &ServerContext, command: &str) {
    if ctx.config.read().await.cluster_enabled && ctx.migration.stop_if_running() {
        info!("Stop migration task for {command}");
    }
}

pub async fn flushdb(ctx: &ServerContext, client: &ClientState) -> NsResult<RespValue> {
    stop_migration(ctx, "flushdb").await;
    let mut store = ctx.store.write().await;
    Database::new(&client.namespace).flush_db(&mut *store)?;
    warn!(
        "DB keys in namespace: {} was flushed, addr: {}",
        client.namespace, client.addr
    );
    Ok(RespValue::ok())
}

pub async fn flushall(ctx: &ServerContext, client: &ClientState) -> NsResult<RespValue> {
    require_admin(client)?;
    stop_migration(ctx, "flushall").await;
    let mut store = ctx.store.write().await;
    flush_all(&mut *store)?;
    warn!("All DB keys was flushed, addr: {}", client.addr);
    Ok(RespValue::ok())
}

/// Sections INFO prints when none (or `all`, `default`, `everything`) is asked for.
const INFO_SECTIONS: &[&str] = &["server", "clients", "replication", "cluster", "keyspace"];

/// `INFO [section]`. The keyspace section only counts the caller's namespace.
pub async fn info(ctx: &ServerContext, client: &ClientState, section: Option<&str>) -> NsResult<RespValue> {
    let show = |name: &str| match section {
        None | Some("all" | "default" | "everything") => true,
        Some(wanted) => wanted == name,
    };
    let mut out = String::new();

    if show("server") {
        let cfg = ctx.config.read().await;
        let uptime = ctx.started_at.elapsed().as_secs();
        out.push_str("# Server\r\n");
        let _ = write!(out, "nskv_version:{}\r\n", env!("CARGO_PKG_VERSION"));
        out.push_str("redis_version:7.0.0\r\n");
        let _ = write!(out, "os:{} {}\r\n", std::env::consts::OS, std::env::consts::ARCH);
        let _ = write!(out, "arch_bits:{}\r\n", usize::BITS);
        let _ = write!(out, "process_id:{}\r\n", std::process::id());
        let _ = write!(out, "tcp_port:{}\r\n", cfg.port);
        let _ = write!(out, "uptime_in_seconds:{uptime}\r\n");
        let _ = write!(out, "uptime_in_days:{}\r\n", uptime / 86_400);
        let config_file = cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
        let _ = write!(out, "config_file:{config_file}\r\n\r\n");
    }

    if show("clients") {
        let connected = ctx.clients.read().await.len();
        out.push_str("# Clients\r\n");
        let _ = write!(out, "connected_clients:{connected}\r\n\r\n");
    }

    if show("replication") {
        let repl = ctx.replication.read().await;
        out.push_str("# Replication\r\n");
        match (&repl.master_host, repl.master_port) {
            (Some(host), Some(port)) if repl.is_replica() => {
                out.push_str("role:slave\r\n");
                let _ = write!(out, "master_host:{host}\r\nmaster_port:{port}\r\n");
            }
            _ => out.push_str("role:master\r\nconnected_slaves:0\r\n"),
        }
        let _ = write!(out, "master_replid:{}\r\n", repl.master_replid);
        let _ = write!(out, "master_repl_offset:{}\r\n\r\n", repl.master_repl_offset);
    }

    if show("cluster") {
        let enabled = ctx.config.read().await.cluster_enabled;
        out.push_str("# Cluster\r\n");
        let _ = write!(out, "cluster_enabled:{}\r\n\r\n", u8::from(enabled));
    }

    if show("keyspace") {
        let store = ctx.store.read().await;
        let stats = Database::new(&client.namespace).key_stats(&*store)?;
        out.push_str("# Keyspace\r\n");
        let _ = write!(out, "db0:keys={},expires={}\r\n\r\n", stats.keys, stats.expires);
    }

    Ok(RespValue::bulk_string(out.trim_end()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOp {
    All,
    Count,
    Info(Vec<String>),
}

pub fn parse_command(args: &[Vec<u8>]) -> NsResult<CommandOp> {
    let Some((sub, rest)) = args.split_first() else {
        return Ok(CommandOp::All);
    };
    if arg_eq(sub, "count") {
        if !rest.is_empty() {
            return Err(wrong_arg_count("command"));
        }
        Ok(CommandOp::Count)
    } else if arg_eq(sub, "info") {
        if rest.is_empty() {
            return Err(wrong_arg_count("command"));
        }
        Ok(CommandOp::Info(rest.iter().map(|a| arg_to_string(a).to_ascii_uppercase()).collect()))
    } else {
        Err(NsError::generic("Command subcommand must be one of COUNT, INFO"))
    }
}

fn command_entry(name: &str, arity: i32) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(name.to_ascii_lowercase()),
        RespValue::integer(arity as i64),
        RespValue::array(Vec::new()),
        RespValue::integer(0),
        RespValue::integer(0),
        RespValue::integer(0),
    ])
}

/// `COMMAND [COUNT | INFO name...]`, answered from the command table.
pub fn command(op: &CommandOp) -> RespValue {
    match op {
        CommandOp::All => RespValue::array(
            COMMAND_TABLE
                .iter()
                .map(|&(name, arity)| command_entry(name, arity))
                .collect(),
        ),
        CommandOp::Count => RespValue::integer(COMMAND_TABLE.len() as i64),
        CommandOp::Info(names) => RespValue::array(
            names
                .iter()
                .map(|wanted| match COMMAND_TABLE.iter().find(|(name, _)| name == wanted) {
                    Some(&(name, arity)) => command_entry(name, arity),
                    None => RespValue::null_bulk_string(),
                })
                .collect(),
        ),
    }
}

/// Entries SLOWLOG GET returns when no count is given.
const DEFAULT_SLOWLOG_GET: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum SlowLogOp {
    /// `None` returns every entry (`SLOWLOG GET *`).
    Get(Option<usize>),
    Len,
    Reset,
}

pub fn parse_slowlog(args: &[Vec<u8>]) -> NsResult<SlowLogOp> {
    let sub = arg_to_string(&args[0]).to_ascii_lowercase();
    match (sub.as_str(), &args[1..]) {
        ("get", []) => Ok(SlowLogOp::Get(Some(DEFAULT_SLOWLOG_GET))),
        ("get", [count]) if count.as_slice() == b"*" => Ok(SlowLogOp::Get(None)),
        ("get", [count]) => {
            let count = usize::try_from(arg_to_i64(count)?).map_err(|_| NsError::NotInteger)?;
            Ok(SlowLogOp::Get(Some(count)))
        }
        ("len", []) => Ok(SlowLogOp::Len),
        ("reset", []) => Ok(SlowLogOp::Reset),
        ("get" | "len" | "reset", _) => Err(wrong_arg_count("slowlog")),
        _ => Err(NsError::generic("SLOWLOG subcommand must be one of RESET, LEN, GET")),
    }
}

/// Admin sessions see every entry; a namespace session only its own.
pub async fn slowlog(ctx: &ServerContext, client: &ClientState, op: SlowLogOp) -> NsResult<RespValue> {
    let scope = (!client.is_admin).then_some(client.namespace.as_str());
    match op {
        SlowLogOp::Get(count) => {
            let log = ctx.slowlog.lock().await;
            Ok(RespValue::array(log.get(count, scope).into_iter().map(|e| e.to_resp()).collect()))
        }
        SlowLogOp::Len => Ok(RespValue::integer(ctx.slowlog.lock().await.len(scope) as i64)),
        SlowLogOp::Reset => {
            require_admin(client)?;
            ctx.slowlog.lock().await.reset();
            Ok(RespValue::ok())
        }
    }
}

/// Stop accepting connections and close every session, this one after
/// its reply.
pub fn shutdown(ctx: &ServerContext, client: &mut ClientState) -> NsResult<RespValue> {
    require_admin(client)?;
    warn!("SHUTDOWN requested by {}", client.addr);
    ctx.shutdown.cancel();
    client.should_close = true;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::namespace::DEFAULT_NAMESPACE;
    use crate::store::entry::Entry;
    use crate::types::RedisValue;

    fn args(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    fn context() -> ServerContext {
        let config = Config {
            requirepass: Some("admin-secret".to_string()),
            namespaces: vec![("tenant".to_string(), "tenant-token".to_string())],
            ..Default::default()
        };
        ServerContext::new(config).unwrap()
    }

    fn session() -> ClientState {
        ClientState::new("127.0.0.1:4000".to_string(), true)
    }

    #[test]
    fn test_parse_hello() {
        assert_eq!(parse_hello(&[]).unwrap(), HelloArgs::default());
        let hello = parse_hello(&args(&["3", "AUTH", "default", "pw", "SETNAME", "app"])).unwrap();
        assert_eq!(hello.protover, Some(3));
        assert_eq!(hello.auth.as_deref(), Some("pw"));
        assert_eq!(hello.setname.as_deref(), Some("app"));

        let hello = parse_hello(&args(&["2", "AUTH", "pw"])).unwrap();
        assert_eq!(hello.auth.as_deref(), Some("pw"));

        assert!(matches!(parse_hello(&args(&["4"])), Err(NsError::NoProto)));
        assert_eq!(
            parse_hello(&args(&["x"])).unwrap_err().to_string(),
            "ERR Protocol version is not an integer or out of range"
        );
        assert!(matches!(
            parse_hello(&args(&["2", "AUTH", "bob", "pw"])),
            Err(NsError::InvalidPassword)
        ));
        assert_eq!(
            parse_hello(&args(&["2", "FOO"])).unwrap_err().to_string(),
            "ERR Syntax error in HELLO option FOO"
        );
    }

    #[test]
    fn test_parse_client_kill() {
        let legacy = parse_client(&args(&["kill", "10.0.0.1:5"])).unwrap();
        let ClientOp::Kill { filter, legacy: true } = legacy else {
            panic!("expected legacy kill");
        };
        assert!(!filter.skip_me);
        assert_eq!(filter.addr.as_deref(), Some("10.0.0.1:5"));

        let op = parse_client(&args(&["KILL", "ID", "7", "SKIPME", "no", "TYPE", "normal"])).unwrap();
        let ClientOp::Kill { filter, legacy: false } = op else {
            panic!("expected filtered kill");
        };
        assert_eq!(filter.id, Some(7));
        assert!(!filter.skip_me);
        assert_eq!(filter.kind, Some(ClientType::Normal));

        assert!(matches!(parse_client(&args(&["kill"])), Err(NsError::SyntaxError)));
        assert!(matches!(parse_client(&args(&["kill", "id", "x"])), Err(NsError::NotInteger)));
        assert!(matches!(parse_client(&args(&["kill", "skipme", "maybe"])), Err(NsError::SyntaxError)));
        assert!(matches!(parse_client(&args(&["kill", "id", "1", "addr"])), Err(NsError::SyntaxError)));
    }

    #[test]
    fn test_parse_client_setname() {
        assert_eq!(
            parse_client(&args(&["setname", "worker-1"])).unwrap(),
            ClientOp::SetName("worker-1".to_string())
        );
        assert!(parse_client(&args(&["setname", "has space"])).is_err());
        assert!(parse_client(&args(&["list", "extra"])).is_err());
    }

    #[test]
    fn test_parse_config_and_slaveof() {
        assert_eq!(parse_config(&args(&["REWRITE"])).unwrap(), ConfigOp::Rewrite);
        assert!(matches!(parse_config(&args(&["get"])), Err(NsError::WrongArgCount(_))));
        assert_eq!(
            parse_config(&args(&["reset"])).unwrap_err().to_string(),
            "ERR CONFIG subcommand must be one of GET, SET, REWRITE"
        );
        assert_eq!(parse_slaveof(&args(&["NO", "ONE"])).unwrap(), None);
        assert_eq!(
            parse_slaveof(&args(&["10.0.0.9", "6379"])).unwrap(),
            Some(("10.0.0.9".to_string(), 6379))
        );
        assert_eq!(
            parse_slaveof(&args(&["host", "port"])).unwrap_err().to_string(),
            "ERR port should be number"
        );
    }

    #[tokio::test]
    async fn test_auth_mappings() {
        let ctx = context();
        let mut client = session();
        assert!(matches!(auth(&ctx, &mut client, "wrong").await, Err(NsError::InvalidPassword)));
        assert!(!client.authenticated);

        auth(&ctx, &mut client, "tenant-token").await.unwrap();
        assert_eq!(client.namespace, "tenant");
        assert!(!client.is_admin);

        auth(&ctx, &mut client, "admin-secret").await.unwrap();
        assert_eq!(client.namespace, DEFAULT_NAMESPACE);
        assert!(client.is_admin);

        let open = ServerContext::new(Config::default()).unwrap();
        let mut client = session();
        assert!(matches!(auth(&open, &mut client, "x").await, Err(NsError::NoPasswordSet)));
        assert!(client.is_admin);
        let err = hello(&open, &mut client, HelloArgs { auth: Some("x".to_string()), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ERR Client sent AUTH, but no password is set");
    }

    #[tokio::test]
    async fn test_config_set_rejects_namespace_token_as_requirepass() {
        let ctx = context();
        let mut client = session();
        auth(&ctx, &mut client, "admin-secret").await.unwrap();

        let op = ConfigOp::Set("requirepass".to_string(), "tenant-token".to_string());
        assert!(config(&ctx, &client, op).await.is_err());

        let op = ConfigOp::Set("port".to_string(), "7000".to_string());
        let err = config(&ctx, &client, op).await.unwrap_err();
        assert!(err.to_string().starts_with("ERR CONFIG SET 'port' error:"));

        let op = ConfigOp::Set("timeout".to_string(), "30".to_string());
        config(&ctx, &client, op).await.unwrap();
        assert_eq!(ctx.config.read().await.timeout, 30);
    }

    #[tokio::test]
    async fn test_admin_only_commands() {
        let ctx = context();
        let mut client = session();
        auth(&ctx, &mut client, "tenant-token").await.unwrap();
        assert!(matches!(flushall(&ctx, &client).await, Err(NsError::AdminRequired)));
        assert!(matches!(
            config(&ctx, &client, ConfigOp::Get("*".to_string())).await,
            Err(NsError::AdminRequired)
        ));
        assert!(matches!(slaveof(&ctx, &client, None).await, Err(NsError::AdminRequired)));
    }

    #[tokio::test]
    async fn test_slaveof_toggles_role() {
        let ctx = context();
        let mut client = session();
        auth(&ctx, &mut client, "admin-secret").await.unwrap();

        slaveof(&ctx, &client, Some(("10.0.0.2".to_string(), 6380))).await.unwrap();
        assert!(ctx.replication.read().await.is_replica());
        assert_eq!(ctx.config.read().await.get("slaveof").unwrap(), "10.0.0.2 6380");

        slaveof(&ctx, &client, None).await.unwrap();
        assert!(!ctx.replication.read().await.is_replica());

        ctx.config.write().await.cluster_enabled = true;
        let err = slaveof(&ctx, &client, None).await.unwrap_err();
        assert_eq!(err.to_string(), "ERR can't change to slave in cluster mode");
    }

    #[tokio::test]
    async fn test_flushdb_stops_running_migration() {
        let ctx = context();
        let client = ClientState::new("127.0.0.1:4001".to_string(), false);
        ctx.config.write().await.cluster_enabled = true;
        ctx.migration.set_in_progress(true);
        flushdb(&ctx, &client).await.unwrap();
        assert!(ctx.migration.is_stopped());
    }

    fn info_text(reply: RespValue) -> String {
        match reply {
            RespValue::BulkString(Some(data)) => String::from_utf8(data).unwrap(),
            other => panic!("unexpected INFO reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_info_keyspace_is_scoped_to_namespace() {
        let ctx = context();
        {
            let mut store = ctx.store.write().await;
            let value = || Entry::new(RedisValue::String(b"v".to_vec()));
            Database::new("tenant").put(&mut *store, b"a", value()).unwrap();
            Database::new("tenant").put(&mut *store, b"b", value()).unwrap();
            Database::new(DEFAULT_NAMESPACE).put(&mut *store, b"c", value()).unwrap();
        }

        let mut client = session();
        auth(&ctx, &mut client, "tenant-token").await.unwrap();
        let text = info_text(info(&ctx, &client, Some("keyspace")).await.unwrap());
        assert_eq!(text, "# Keyspace\r\ndb0:keys=2,expires=0");

        auth(&ctx, &mut client, "admin-secret").await.unwrap();
        let text = info_text(info(&ctx, &client, None).await.unwrap());
        assert!(text.contains("db0:keys=1,expires=0"));
        assert!(text.contains("role:master"));
        let replid = ctx.replication.read().await.master_replid.clone();
        assert!(text.contains(&format!("master_replid:{replid}")));
        assert!(text.contains("cluster_enabled:0"));

        assert_eq!(info_text(info(&ctx, &client, Some("nosuch")).await.unwrap()), "");
    }

    #[test]
    fn test_command_table_introspection() {
        assert_eq!(parse_command(&[]).unwrap(), CommandOp::All);
        assert_eq!(
            command(&parse_command(&args(&["count"])).unwrap()),
            RespValue::integer(COMMAND_TABLE.len() as i64)
        );
        let op = parse_command(&args(&["INFO", "get", "nosuch"])).unwrap();
        let RespValue::Array(Some(items)) = command(&op) else {
            panic!("COMMAND INFO should reply with an array");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], RespValue::null_bulk_string());
        let RespValue::Array(Some(get)) = &items[0] else {
            panic!("expected a command entry");
        };
        assert_eq!(get[0], RespValue::bulk_string("get"));
        assert_eq!(get[1], RespValue::integer(2));

        assert_eq!(
            parse_command(&args(&["docs"])).unwrap_err().to_string(),
            "ERR Command subcommand must be one of COUNT, INFO"
        );
    }

    #[test]
    fn test_parse_slowlog() {
        assert_eq!(parse_slowlog(&args(&["get"])).unwrap(), SlowLogOp::Get(Some(10)));
        assert_eq!(parse_slowlog(&args(&["GET", "*"])).unwrap(), SlowLogOp::Get(None));
        assert_eq!(parse_slowlog(&args(&["get", "3"])).unwrap(), SlowLogOp::Get(Some(3)));
        assert!(matches!(parse_slowlog(&args(&["get", "-1"])), Err(NsError::NotInteger)));
        assert_eq!(parse_slowlog(&args(&["Len"])).unwrap(), SlowLogOp::Len);
        assert!(parse_slowlog(&args(&["reset", "now"])).is_err());
        assert_eq!(
            parse_slowlog(&args(&["help"])).unwrap_err().to_string(),
            "ERR SLOWLOG subcommand must be one of RESET, LEN, GET"
        );
    }

    #[tokio::test]
    async fn test_slowlog_is_scoped_and_reset_needs_admin() {
        let ctx = context();
        let mut tenant = session();
        auth(&ctx, &mut tenant, "tenant-token").await.unwrap();
        let mut admin = session();
        auth(&ctx, &mut admin, "admin-secret").await.unwrap();
        {
            let mut log = ctx.slowlog.lock().await;
            log.add(1, 200_000, &args(&["KEYS", "*"]), &tenant);
            log.add(2, 300_000, &args(&["FLUSHALL"]), &admin);
        }

        assert_eq!(slowlog(&ctx, &tenant, SlowLogOp::Len).await.unwrap(), RespValue::integer(1));
        assert_eq!(slowlog(&ctx, &admin, SlowLogOp::Len).await.unwrap(), RespValue::integer(2));
        let RespValue::Array(Some(entries)) = slowlog(&ctx, &tenant, SlowLogOp::Get(None)).await.unwrap() else {
            panic!("SLOWLOG GET should reply with an array");
        };
        assert_eq!(entries.len(), 1);

        assert!(matches!(
            slowlog(&ctx, &tenant, SlowLogOp::Reset).await,
            Err(NsError::AdminRequired)
        ));
        slowlog(&ctx, &admin, SlowLogOp::Reset).await.unwrap();
        assert!(ctx.slowlog.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_config_set_slowlog_max_len_trims_log() {
        let ctx = context();
        let mut client = session();
        auth(&ctx, &mut client, "admin-secret").await.unwrap();
        {
            let mut log = ctx.slowlog.lock().await;
            for ts in 0..5 {
                log.add(ts, 200_000, &args(&["GET", "k"]), &client);
            }
        }
        let op = ConfigOp::Set("slowlog-max-len".to_string(), "2".to_string());
        config(&ctx, &client, op).await.unwrap();
        assert_eq!(ctx.slowlog.lock().await.len(None), 2);
    }

    #[tokio::test]
    async fn test_config_set_slaveof_updates_replication() {
        let ctx = context();
        let mut client = session();
        auth(&ctx, &mut client, "admin-secret").await.unwrap();

        let op = ConfigOp::Set("SLAVEOF".to_string(), "10.0.0.2 6380".to_string());
        config(&ctx, &client, op).await.unwrap();
        assert!(ctx.replication.read().await.is_replica());
        let RespValue::Array(Some(reply)) = role(&ctx).await else {
            panic!("ROLE should reply with an array");
        };
        assert_eq!(reply[0], RespValue::bulk_string("slave"));
        assert_eq!(reply[2], RespValue::integer(6380));

        let op = ConfigOp::Set("slaveof".to_string(), "no one".to_string());
        config(&ctx, &client, op).await.unwrap();
        assert!(!ctx.replication.read().await.is_replica());
        assert_eq!(ctx.config.read().await.slaveof, None);

        let op = ConfigOp::Set("slaveof".to_string(), "10.0.0.2 port".to_string());
        let err = config(&ctx, &client, op).await.unwrap_err();
        assert!(err.to_string().starts_with("ERR CONFIG SET 'slaveof' error:"));
        assert!(!ctx.replication.read().await.is_replica());
    }

    #[tokio::test]
    async fn test_config_set_loglevel_reloads_filter() {
        use tracing_subscriber::{EnvFilter, Registry, reload};

        let (_layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let ctx = context().with_log_filter(handle.clone());
        let mut client = session();
        auth(&ctx, &mut client, "admin-secret").await.unwrap();

        let op = ConfigOp::Set("loglevel".to_string(), "warning".to_string());
        config(&ctx, &client, op).await.unwrap();
        let filter = handle.with_current(|f| f.to_string()).unwrap();
        assert!(filter.contains("warn"), "filter was {filter}");
    }

    #[tokio::test]
    async fn test_shutdown_is_admin_only() {
        let ctx = context();
        let mut tenant = session();
        auth(&ctx, &mut tenant, "tenant-token").await.unwrap();
        assert!(matches!(shutdown(&ctx, &mut tenant), Err(NsError::AdminRequired)));
        assert!(!ctx.shutdown.is_cancelled());

        let mut admin = session();
        auth(&ctx, &mut admin, "admin-secret").await.unwrap();
        assert_eq!(shutdown(&ctx, &mut admin).unwrap(), RespValue::ok());
        assert!(ctx.shutdown.is_cancelled());
        assert!(admin.should_close);
    }
}
