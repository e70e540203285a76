pub mod data;
pub mod key;
pub mod namespace;
pub mod server_cmd;

use crate::connection::ClientState;
use crate::cursor::CursorKind;
use crate::error::{NsError, NsResult};
use crate::rdb::{LoadOptions, RestoreOptions};
use crate::resp::RespValue;
use crate::server::ServerContext;

use data::DataCommand;
use key::ScanArgs;
use namespace::NamespaceOp;
use server_cmd::{ClientOp, CommandOp, ConfigOp, HelloArgs, SlowLogOp};

/// Arity of every supported command, name included. A negative arity is a
/// minimum.
const COMMAND_TABLE: &[(&str, i32)] = &[
    ("AUTH", 2),
    ("HELLO", -1),
    ("PING", -1),
    ("ECHO", 2),
    ("QUIT", 1),
    ("SELECT", 2),
    ("TIME", 1),
    ("INFO", -1),
    ("COMMAND", -1),
    ("SLOWLOG", -2),
    ("SHUTDOWN", 1),
    ("NAMESPACE", -3),
    ("CONFIG", -2),
    ("CLIENT", -2),
    ("SLAVEOF", 3),
    ("REPLICAOF", 3),
    ("ROLE", 1),
    ("DBSIZE", -1),
    ("FLUSHDB", 1),
    ("FLUSHALL", 1),
    ("KEYS", 2),
    ("SCAN", -2),
    ("HSCAN", -3),
    ("SSCAN", -3),
    ("ZSCAN", -3),
    ("RANDOMKEY", 1),
    ("RESTORE", -4),
    ("DUMP", 2),
    ("RDB", -3),
    ("DISK", 3),
    ("MEMORY", 3),
    ("GET", 2),
    ("SET", -3),
    ("DEL", -2),
    ("EXISTS", -2),
    ("TYPE", 2),
    ("TTL", 2),
    ("PTTL", 2),
    ("RPUSH", -3),
    ("LRANGE", 4),
    ("SADD", -3),
    ("SMEMBERS", 2),
    ("HSET", -4),
    ("HGETALL", 2),
    ("ZADD", -4),
    ("ZRANGE", -4),
];

/// Commands a session may run before it has authenticated.
pub fn allowed_before_auth(name: &str) -> bool {
    matches!(name, "AUTH" | "HELLO" | "QUIT")
}

/// Commands whose arguments may carry secrets; they never reach the slow log.
pub fn hidden_from_slowlog(name: &str) -> bool {
    matches!(name, "AUTH" | "HELLO" | "NAMESPACE" | "CONFIG")
}

/// A parsed request, ready to run against the server context.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Auth(String),
    Hello(HelloArgs),
    Ping(Option<Vec<u8>>),
    Echo(Vec<u8>),
    Quit,
    Select,
    Time,
    /// `INFO [section]`
    Info(Option<String>),
    CommandTable(CommandOp),
    SlowLog(SlowLogOp),
    Shutdown,
    Namespace(NamespaceOp),
    Config(ConfigOp),
    Client(ClientOp),
    /// `None` is `SLAVEOF NO ONE`.
    SlaveOf(Option<(String, u16)>),
    Role,
    DbSize { scan: bool },
    FlushDb,
    FlushAll,
    Keys { prefix: Vec<u8> },
    Scan(ScanArgs),
    MemberScan { kind: CursorKind, key: Vec<u8>, args: ScanArgs },
    RandomKey,
    Restore { key: Vec<u8>, payload: Vec<u8>, opts: RestoreOptions },
    Dump(Vec<u8>),
    RdbLoad { path: String, opts: LoadOptions },
    /// DISK USAGE and MEMORY USAGE.
    DiskUsage(Vec<u8>),
    Data(DataCommand),
}

impl Command {
    /// Parse a request. `name` is the upper-cased command name and `args`
    /// the arguments after it.
    pub fn parse(name: &str, args: &[Vec<u8>]) -> NsResult<Command> {
        let Some(&(_, arity)) = COMMAND_TABLE.iter().find(|(n, _)| *n == name) else {
            return Err(unknown_command(name, args));
        };
        let argc = args.len() as i32 + 1;
        if (arity > 0 && argc != arity) || (arity < 0 && argc < -arity) {
            return Err(wrong_arg_count(name));
        }

        let cmd = match name {
            "AUTH" => Command::Auth(arg_to_string(&args[0])),
            "HELLO" => Command::Hello(server_cmd::parse_hello(args)?),
            "PING" => match args {
                [] => Command::Ping(None),
                [msg] => Command::Ping(Some(msg.clone())),
                _ => return Err(wrong_arg_count(name)),
            },
            "ECHO" => Command::Echo(args[0].clone()),
            "QUIT" => Command::Quit,
            "SELECT" => Command::Select,
            "TIME" => Command::Time,
            "INFO" => match args {
                [] => Command::Info(None),
                [section] => Command::Info(Some(arg_to_string(section).to_ascii_lowercase())),
                _ => return Err(NsError::SyntaxError),
            },
            "COMMAND" => Command::CommandTable(server_cmd::parse_command(args)?),
            "SLOWLOG" => Command::SlowLog(server_cmd::parse_slowlog(args)?),
            "SHUTDOWN" => Command::Shutdown,
            "NAMESPACE" => Command::Namespace(namespace::parse(args)?),
            "CONFIG" => Command::Config(server_cmd::parse_config(args)?),
            "CLIENT" => Command::Client(server_cmd::parse_client(args)?),
            "SLAVEOF" | "REPLICAOF" => Command::SlaveOf(server_cmd::parse_slaveof(args)?),
            "ROLE" => Command::Role,
            "DBSIZE" => match args {
                [] => Command::DbSize { scan: false },
                [sub] if arg_eq(sub, "scan") => Command::DbSize { scan: true },
                _ => return Err(NsError::generic("DBSIZE subcommand only supports scan")),
            },
            "FLUSHDB" => Command::FlushDb,
            "FLUSHALL" => Command::FlushAll,
            "KEYS" => Command::Keys {
                prefix: key::parse_prefix_pattern(&args[0])?,
            },
            "SCAN" => Command::Scan(key::parse_scan(args, CursorKind::Scan)?),
            "HSCAN" | "SSCAN" | "ZSCAN" => {
                let kind = match name {
                    "HSCAN" => CursorKind::Hash,
                    "SSCAN" => CursorKind::Set,
                    _ => CursorKind::ZSet,
                };
                Command::MemberScan {
                    kind,
                    key: args[0].clone(),
                    args: key::parse_scan(&args[1..], kind)?,
                }
            }
            "RANDOMKEY" => Command::RandomKey,
            "RESTORE" => key::parse_restore(args)?,
            "DUMP" => Command::Dump(args[0].clone()),
            "RDB" => key::parse_rdb(args)?,
            "DISK" | "MEMORY" => {
                if !arg_eq(&args[0], "usage") {
                    return Err(NsError::generic("Unknown operation"));
                }
                Command::DiskUsage(args[1].clone())
            }
            _ => Command::Data(DataCommand::parse(name, args)?),
        };
        Ok(cmd)
    }

    pub async fn execute(self, ctx: &ServerContext, client: &mut ClientState) -> NsResult<RespValue> {
        match self {
            Command::Auth(password) => server_cmd::auth(ctx, client, &password).await,
            Command::Hello(hello) => server_cmd::hello(ctx, client, hello).await,
            Command::Ping(None) => Ok(RespValue::simple_string("PONG")),
            Command::Ping(Some(msg)) | Command::Echo(msg) => Ok(RespValue::bulk_string(msg)),
            Command::Quit => {
                client.should_close = true;
                Ok(RespValue::ok())
            }
            Command::Select => Ok(RespValue::ok()),
            Command::Time => Ok(server_cmd::time()),
            Command::Info(section) => server_cmd::info(ctx, client, section.as_deref()).await,
            Command::CommandTable(op) => Ok(server_cmd::command(&op)),
            Command::SlowLog(op) => server_cmd::slowlog(ctx, client, op).await,
            Command::Shutdown => server_cmd::shutdown(ctx, client),
            Command::Namespace(op) => namespace::execute(ctx, client, op).await,
            Command::Config(op) => server_cmd::config(ctx, client, op).await,
            Command::Client(op) => server_cmd::client(ctx, client, op).await,
            Command::SlaveOf(master) => server_cmd::slaveof(ctx, client, master).await,
            Command::Role => Ok(server_cmd::role(ctx).await),
            Command::DbSize { scan } => server_cmd::dbsize(ctx, client, scan).await,
            Command::FlushDb => server_cmd::flushdb(ctx, client).await,
            Command::FlushAll => server_cmd::flushall(ctx, client).await,
            Command::Keys { prefix } => key::keys(ctx, client, &prefix).await,
            Command::Scan(args) => key::scan(ctx, client, args).await,
            Command::MemberScan { kind, key, args } => key::member_scan(ctx, client, kind, &key, args).await,
            Command::RandomKey => key::random_key(ctx, client).await,
            Command::Restore { key, payload, opts } => key::restore(ctx, client, &key, &payload, &opts).await,
            Command::Dump(key) => key::dump(ctx, client, &key).await,
            Command::RdbLoad { path, opts } => key::rdb_load(ctx, client, &path, &opts).await,
            Command::DiskUsage(key) => key::disk_usage(ctx, client, &key).await,
            Command::Data(cmd) => cmd.execute(ctx, client).await,
        }
    }
}

pub fn arg_to_string(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

pub fn arg_to_i64(arg: &[u8]) -> NsResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(NsError::NotInteger)
}

/// Case-insensitive comparison of an argument with a keyword.
pub fn arg_eq(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

pub fn wrong_arg_count(cmd: &str) -> NsError {
    NsError::WrongArgCount(cmd.to_ascii_lowercase())
}

pub fn require_admin(client: &ClientState) -> NsResult<()> {
    if client.is_admin {
        Ok(())
    } else {
        Err(NsError::AdminRequired)
    }
}

fn unknown_command(name: &str, args: &[Vec<u8>]) -> NsError {
    let preview: String = args
        .iter()
        .take(3)
        .map(|a| format!("'{}' ", arg_to_string(a)))
        .collect();
    NsError::UnknownCommand(name.to_ascii_lowercase(), preview)
}
