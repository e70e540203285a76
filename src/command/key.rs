use crate::command::{Command, arg_eq, arg_to_i64, arg_to_string, require_admin};
use crate::connection::ClientState;
use crate::cursor::{self, CursorKind};
use crate::error::{NsError, NsResult};
use crate::rdb::stream::FileStream;
use crate::rdb::{self, LoadOptions, LoadStats, RestoreExpiry, RestoreOptions};
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::Database;
use crate::store::database::scan_members;
use crate::store::entry::{Entry, now_millis};
use crate::types::{RedisValue, format_score};
use tracing::{info, warn};

/// Page size when SCAN is given no COUNT.
const DEFAULT_SCAN_COUNT: usize = 20;

/// Parsed arguments of SCAN and the collection scans.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanArgs {
    /// Resume after this key or member; empty to start over.
    pub after: Vec<u8>,
    pub prefix: Vec<u8>,
    pub count: usize,
}

/// Only `*` and `prefix*` patterns are served.
pub fn parse_prefix_pattern(pattern: &[u8]) -> NsResult<Vec<u8>> {
    match pattern.strip_suffix(b"*") {
        Some(prefix) => Ok(prefix.to_vec()),
        None => Err(NsError::PrefixMatchOnly),
    }
}

fn scan_command(kind: CursorKind) -> &'static str {
    match kind {
        CursorKind::Scan => "scan",
        CursorKind::Hash => "hscan",
        CursorKind::Set => "sscan",
        CursorKind::ZSet => "zscan",
    }
}

/// `cursor [MATCH pattern] [COUNT n]`
pub fn parse_scan(args: &[Vec<u8>], kind: CursorKind) -> NsResult<ScanArgs> {
    let Some((cursor, options)) = args.split_first() else {
        return Err(NsError::SyntaxError);
    };
    if options.len() % 2 != 0 {
        return Err(NsError::WrongArgCount(scan_command(kind).to_string()));
    }

    let mut scan = ScanArgs {
        after: Vec::new(),
        prefix: Vec::new(),
        count: DEFAULT_SCAN_COUNT,
    };
    for pair in options.chunks(2) {
        if arg_eq(&pair[0], "match") {
            scan.prefix = parse_prefix_pattern(&pair[1])?;
        } else if arg_eq(&pair[0], "count") {
            scan.count = match arg_to_i64(&pair[1])? {
                n if n > 0 => n as usize,
                _ => return Err(NsError::NotInteger),
            };
        } else {
            return Err(NsError::SyntaxError);
        }
    }
    scan.after = cursor::decode(&arg_to_string(cursor), kind)?;
    Ok(scan)
}

pub async fn keys(ctx: &ServerContext, client: &ClientState, prefix: &[u8]) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    let keys = Database::new(&client.namespace).keys(&*store, prefix)?;
    Ok(RespValue::bulk_array(keys))
}

pub async fn scan(ctx: &ServerContext, client: &ClientState, args: ScanArgs) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    let page = Database::new(&client.namespace).scan(&*store, &args.after, args.count, &args.prefix)?;
    Ok(RespValue::array(vec![
        RespValue::bulk_string(cursor::encode_next(CursorKind::Scan, page.next.as_deref())),
        RespValue::bulk_array(page.keys),
    ]))
}

/// HSCAN, SSCAN and ZSCAN: page through the members of one value.
pub async fn member_scan(
    ctx: &ServerContext,
    client: &ClientState,
    kind: CursorKind,
    key: &[u8],
    args: ScanArgs,
) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    let Some(entry) = Database::new(&client.namespace).get(&*store, key)? else {
        return Ok(RespValue::array(vec![
            RespValue::bulk_string(cursor::START),
            RespValue::array(Vec::new()),
        ]));
    };

    let (items, next) = match (kind, &entry.value) {
        (CursorKind::Hash, RedisValue::Hash(hash)) => {
            let members = hash.iter().map(|(f, v)| (f.as_slice(), v.clone()));
            flatten(scan_members(members, &args.after, args.count, &args.prefix))
        }
        (CursorKind::Set, RedisValue::Set(set)) => {
            let members = set.iter().map(|m| (m.as_slice(), ()));
            let (page, next) = scan_members(members, &args.after, args.count, &args.prefix);
            (page.into_iter().map(|(m, _)| m.to_vec()).collect(), next)
        }
        (CursorKind::ZSet, RedisValue::SortedSet(zset)) => {
            let members = zset.iter().map(|(m, s)| (m.as_slice(), format_score(*s).into_bytes()));
            flatten(scan_members(members, &args.after, args.count, &args.prefix))
        }
        _ => return Err(NsError::WrongType),
    };

    Ok(RespValue::array(vec![
        RespValue::bulk_string(cursor::encode_next(kind, next.as_deref())),
        RespValue::bulk_array(items),
    ]))
}

fn flatten(
    (page, next): (Vec<(&[u8], Vec<u8>)>, Option<Vec<u8>>),
) -> (Vec<Vec<u8>>, Option<Vec<u8>>) {
    let items = page
        .into_iter()
        .flat_map(|(member, extra)| [member.to_vec(), extra])
        .collect();
    (items, next)
}

/// RANDOMKEY resumes sampling after the key this session got last time.
pub async fn random_key(ctx: &ServerContext, client: &mut ClientState) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    let picked = Database::new(&client.namespace).random_key(&*store, &client.last_random_key)?;
    drop(store);
    match picked {
        Some(key) => {
            client.last_random_key = key.clone();
            Ok(RespValue::bulk_string(key))
        }
        None => {
            client.last_random_key.clear();
            Ok(RespValue::bulk_string(Vec::new()))
        }
    }
}

/// `RESTORE key ttl payload [REPLACE] [ABSTTL] [IDLETIME s] [FREQ f]`
pub fn parse_restore(args: &[Vec<u8>]) -> NsResult<Command> {
    let ttl = u64::try_from(arg_to_i64(&args[1])?).map_err(|_| NsError::NotInteger)?;
    let mut opts = RestoreOptions {
        ttl,
        ..Default::default()
    };

    let mut options = args[3..].iter();
    while let Some(opt) = options.next() {
        if arg_eq(opt, "replace") {
            opts.replace = true;
        } else if arg_eq(opt, "absttl") {
            opts.absttl = true;
        } else if arg_eq(opt, "idletime") {
            let value = options.next().ok_or(NsError::SyntaxError)?;
            let idle = arg_to_i64(value)?;
            if idle < 0 {
                return Err(NsError::generic("IDLETIME can't be negative"));
            }
            opts.idletime = Some(idle as u64);
        } else if arg_eq(opt, "freq") {
            let value = options.next().ok_or(NsError::SyntaxError)?;
            let freq = u8::try_from(arg_to_i64(value)?)
                .map_err(|_| NsError::generic("FREQ must be >= 0 and <= 255"))?;
            opts.freq = Some(freq);
        } else {
            return Err(NsError::SyntaxError);
        }
    }

    Ok(Command::Restore {
        key: args[0].clone(),
        payload: args[2].clone(),
        opts,
    })
}

/// The existence check and the write take the store lock separately, so a
/// concurrent writer may slip in between them.
pub async fn restore(
    ctx: &ServerContext,
    client: &ClientState,
    key: &[u8],
    payload: &[u8],
    opts: &RestoreOptions,
) -> NsResult<RespValue> {
    let db = Database::new(&client.namespace);
    if opts.replace {
        db.delete(&mut *ctx.store.write().await, key)?;
    } else if db.get(&*ctx.store.read().await, key)?.is_some() {
        return Err(NsError::KeyExists);
    }

    let entry = match opts.expiry(now_millis()) {
        RestoreExpiry::AlreadyExpired => return Ok(RespValue::ok()),
        RestoreExpiry::Never => Entry::new(rdb::decode_payload(payload)?),
        RestoreExpiry::At(at) => Entry::with_expiry(rdb::decode_payload(payload)?, at),
    };
    db.put(&mut *ctx.store.write().await, key, entry)?;
    Ok(RespValue::ok())
}

pub async fn dump(ctx: &ServerContext, client: &ClientState, key: &[u8]) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    Ok(match Database::new(&client.namespace).get(&*store, key)? {
        Some(entry) => RespValue::bulk_string(rdb::dump_value(&entry.value)),
        None => RespValue::null_bulk_string(),
    })
}

/// `RDB LOAD path [NX] [DB index]`
pub fn parse_rdb(args: &[Vec<u8>]) -> NsResult<Command> {
    if !arg_eq(&args[0], "load") {
        return Err(NsError::generic("unknown subcommand"));
    }
    let path = arg_to_string(&args[1]);
    let mut opts = LoadOptions::default();

    let mut options = args[2..].iter();
    while let Some(opt) = options.next() {
        if arg_eq(opt, "nx") {
            opts.overwrite = false;
        } else if arg_eq(opt, "db") {
            let value = options.next().ok_or(NsError::SyntaxError)?;
            opts.db_index = u64::try_from(arg_to_i64(value)?).map_err(|_| NsError::NotInteger)?;
        } else {
            return Err(NsError::SyntaxError);
        }
    }
    Ok(Command::RdbLoad { path, opts })
}

/// Load an RDB file into the session's namespace. The file is read on the
/// blocking pool, which holds the store write lock for the whole load.
pub async fn rdb_load(
    ctx: &ServerContext,
    client: &ClientState,
    path: &str,
    opts: &LoadOptions,
) -> NsResult<RespValue> {
    require_admin(client)?;
    info!("Loading RDB file {path} into namespace {}", client.namespace);

    let store = ctx.store.clone();
    let namespace = client.namespace.clone();
    let file = path.to_string();
    let opts = opts.clone();
    let result = tokio::task::spawn_blocking(move || -> NsResult<LoadStats> {
        let mut stream = FileStream::open(&file)?;
        let mut store = store.blocking_write();
        Ok(rdb::load_rdb(&mut stream, &mut *store, Database::new(&namespace), &opts)?)
    })
    .await
    .map_err(|e| NsError::generic(format!("RDB load task failed: {e}")))?;

    match result {
        Ok(stats) => {
            warn!(
                "RDB file {path} loaded by {}: {} keys loaded, {} skipped",
                client.addr, stats.loaded, stats.skipped
            );
            Ok(RespValue::ok())
        }
        Err(e) => {
            warn!("Failed to load RDB file {path}: {e}");
            Err(e)
        }
    }
}

/// DISK USAGE / MEMORY USAGE.
pub async fn disk_usage(ctx: &ServerContext, client: &ClientState, key: &[u8]) -> NsResult<RespValue> {
    let store = ctx.store.read().await;
    Ok(match Database::new(&client.namespace).get(&*store, key)? {
        Some(entry) => RespValue::integer(entry.value.estimated_size() as i64),
        None => RespValue::null_bulk_string(),
    })
}
