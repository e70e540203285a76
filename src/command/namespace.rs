use crate::command::{arg_to_string, require_admin};
use crate::connection::ClientState;
use crate::error::{NsError, NsResult};
use crate::namespace::{DEFAULT_NAMESPACE, NamespaceResult};
use crate::resp::RespValue;
use crate::server::ServerContext;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceOp {
    /// `*` lists every namespace.
    Get(String),
    Set { name: String, token: String },
    Add { name: String, token: String },
    Del(String),
}

pub fn parse(args: &[Vec<u8>]) -> NsResult<NamespaceOp> {
    let sub = arg_to_string(&args[0]).to_ascii_lowercase();
    let op = match (sub.as_str(), &args[1..]) {
        ("get", [name]) => NamespaceOp::Get(arg_to_string(name)),
        ("set", [name, token]) => NamespaceOp::Set {
            name: arg_to_string(name),
            token: arg_to_string(token),
        },
        ("add", [name, token]) => NamespaceOp::Add {
            name: arg_to_string(name),
            token: arg_to_string(token),
        },
        ("del", [name]) => NamespaceOp::Del(arg_to_string(name)),
        _ => {
            return Err(NsError::generic(
                "NAMESPACE subcommand must be one of GET, SET, DEL, ADD",
            ));
        }
    };
    Ok(op)
}

pub async fn execute(ctx: &ServerContext, client: &ClientState, op: NamespaceOp) -> NsResult<RespValue> {
    require_admin(client)?;

    let (requirepass, persist, repl_namespace) = {
        let cfg = ctx.config.read().await;
        (cfg.requirepass.clone(), cfg.config_file.is_some(), cfg.repl_namespace_enabled)
    };
    if !matches!(op, NamespaceOp::Get(_)) && repl_namespace && ctx.replication.read().await.is_replica() {
        return Err(NsError::NamespaceReadOnly);
    }

    let requirepass = requirepass.as_deref();
    let (result, audit) = match op {
        NamespaceOp::Get(name) => return get(ctx, &name, requirepass).await,
        NamespaceOp::Set { name, token } => (
            ctx.namespaces.write().await.set(&name, &token, requirepass),
            format!("Updated namespace: {name} with token: {token}"),
        ),
        NamespaceOp::Add { name, token } => (
            ctx.namespaces.write().await.add(&name, &token, requirepass),
            format!("New namespace: {name} with token: {token}"),
        ),
        NamespaceOp::Del(name) => (
            ctx.namespaces.write().await.del(&name),
            format!("Deleted namespace: {name}"),
        ),
    };

    warn!("{audit}, addr: {}, result: {}", client.addr, describe(&result));
    result?;

    if persist {
        ctx.rewrite_config().await?;
    }
    Ok(RespValue::ok())
}

/// `GET *` lists name/token pairs followed by the default namespace and
/// the admin password.
async fn get(ctx: &ServerContext, name: &str, requirepass: Option<&str>) -> NsResult<RespValue> {
    let registry = ctx.namespaces.read().await;
    if name != "*" {
        return Ok(match registry.token_of(name) {
            Some(token) => RespValue::bulk_string(token.as_bytes()),
            None => RespValue::null_bulk_string(),
        });
    }
    let mut reply = Vec::new();
    for (token, name) in registry.list() {
        reply.push(name);
        reply.push(token);
    }
    reply.push(DEFAULT_NAMESPACE.to_string());
    reply.push(requirepass.unwrap_or_default().to_string());
    Ok(RespValue::bulk_array(reply))
}

fn describe(result: &NamespaceResult<()>) -> String {
    match result {
        Ok(()) => "OK".to_string(),
        Err(e) => e.to_string(),
    }
}
