//! A small data surface: enough to create, inspect and expire every value
//! type that DUMP and RESTORE carry.

use crate::command::{arg_eq, arg_to_i64, arg_to_string};
use crate::connection::ClientState;
use crate::error::{NsError, NsResult};
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::entry::Entry;
use crate::store::{Database, MemoryStorage};
use crate::types::{RedisValue, format_score, zset_by_score};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, PartialEq)]
pub enum DataCommand {
    Get(Vec<u8>),
    /// `ttl_ms` of zero keeps the key forever.
    Set { key: Vec<u8>, value: Vec<u8>, ttl_ms: u64 },
    Del(Vec<Vec<u8>>),
    Exists(Vec<Vec<u8>>),
    Type(Vec<u8>),
    Ttl { key: Vec<u8>, millis: bool },
    RPush { key: Vec<u8>, values: Vec<Vec<u8>> },
    LRange { key: Vec<u8>, start: i64, stop: i64 },
    SAdd { key: Vec<u8>, members: Vec<Vec<u8>> },
    SMembers(Vec<u8>),
    HSet { key: Vec<u8>, pairs: Vec<(Vec<u8>, Vec<u8>)> },
    HGetAll(Vec<u8>),
    ZAdd { key: Vec<u8>, pairs: Vec<(f64, Vec<u8>)> },
    ZRange { key: Vec<u8>, start: i64, stop: i64, with_scores: bool },
}

impl DataCommand {
    /// Arity has already been checked by the caller.
    pub fn parse(name: &str, args: &[Vec<u8>]) -> NsResult<DataCommand> {
        let key = args[0].clone();
        let cmd = match name {
            "GET" => DataCommand::Get(key),
            "SET" => parse_set(args)?,
            "DEL" => DataCommand::Del(args.to_vec()),
            "EXISTS" => DataCommand::Exists(args.to_vec()),
            "TYPE" => DataCommand::Type(key),
            "TTL" => DataCommand::Ttl { key, millis: false },
            "PTTL" => DataCommand::Ttl { key, millis: true },
            "RPUSH" => DataCommand::RPush {
                key,
                values: args[1..].to_vec(),
            },
            "LRANGE" => DataCommand::LRange {
                key,
                start: arg_to_i64(&args[1])?,
                stop: arg_to_i64(&args[2])?,
            },
            "SADD" => DataCommand::SAdd {
                key,
                members: args[1..].to_vec(),
            },
            "SMEMBERS" => DataCommand::SMembers(key),
            "HSET" => {
                let rest = &args[1..];
                if rest.len() % 2 != 0 {
                    return Err(NsError::WrongArgCount("hset".to_string()));
                }
                let pairs = rest.chunks(2).map(|p| (p[0].clone(), p[1].clone())).collect();
                DataCommand::HSet { key, pairs }
            }
            "HGETALL" => DataCommand::HGetAll(key),
            "ZADD" => {
                let rest = &args[1..];
                if rest.len() % 2 != 0 {
                    return Err(NsError::SyntaxError);
                }
                let pairs = rest
                    .chunks(2)
                    .map(|p| Ok((parse_score(&p[0])?, p[1].clone())))
                    .collect::<NsResult<Vec<_>>>()?;
                DataCommand::ZAdd { key, pairs }
            }
            "ZRANGE" => {
                let with_scores = match &args[3..] {
                    [] => false,
                    [opt] if arg_eq(opt, "withscores") => true,
                    _ => return Err(NsError::SyntaxError),
                };
                DataCommand::ZRange {
                    key,
                    start: arg_to_i64(&args[1])?,
                    stop: arg_to_i64(&args[2])?,
                    with_scores,
                }
            }
            _ => return Err(NsError::UnknownCommand(name.to_ascii_lowercase(), String::new())),
        };
        Ok(cmd)
    }

    pub async fn execute(self, ctx: &ServerContext, client: &ClientState) -> NsResult<RespValue> {
        let db = Database::new(&client.namespace);
        match self {
            DataCommand::Get(key) => {
                let store = ctx.store.read().await;
                match db.get(&*store, &key)? {
                    None => Ok(RespValue::null_bulk_string()),
                    Some(entry) => match &entry.value {
                        RedisValue::String(s) => Ok(RespValue::bulk_string(s.clone())),
                        _ => Err(NsError::WrongType),
                    },
                }
            }
            DataCommand::Set { key, value, ttl_ms } => {
                let mut store = ctx.store.write().await;
                db.put(&mut *store, &key, Entry::with_ttl(RedisValue::String(value), ttl_ms))?;
                Ok(RespValue::ok())
            }
            DataCommand::Del(keys) => {
                let mut store = ctx.store.write().await;
                let mut removed = 0;
                for key in &keys {
                    if db.delete(&mut *store, key)? {
                        removed += 1;
                    }
                }
                Ok(RespValue::integer(removed))
            }
            DataCommand::Exists(keys) => {
                let store = ctx.store.read().await;
                let keys: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
                Ok(RespValue::integer(db.exists(&*store, &keys)? as i64))
            }
            DataCommand::Type(key) => {
                let store = ctx.store.read().await;
                let name = db.key_type(&*store, &key)?.unwrap_or("none");
                Ok(RespValue::simple_string(name))
            }
            DataCommand::Ttl { key, millis } => {
                let store = ctx.store.read().await;
                Ok(RespValue::integer(match db.get(&*store, &key)? {
                    None => -2,
                    Some(entry) if millis => entry.ttl_millis(),
                    Some(entry) => entry.ttl_seconds(),
                }))
            }
            DataCommand::RPush { key, values } => {
                let mut store = ctx.store.write().await;
                let len = update(&mut store, db, &key, RedisValue::List(VecDeque::new()), |value| {
                    let RedisValue::List(list) = value else {
                        return Err(NsError::WrongType);
                    };
                    list.extend(values);
                    Ok(list.len())
                })?;
                Ok(RespValue::integer(len as i64))
            }
            DataCommand::LRange { key, start, stop } => {
                let store = ctx.store.read().await;
                let Some(entry) = db.get(&*store, &key)? else {
                    return Ok(RespValue::array(Vec::new()));
                };
                let RedisValue::List(list) = &entry.value else {
                    return Err(NsError::WrongType);
                };
                let items = match index_range(start, stop, list.len()) {
                    Some((from, to)) => list.range(from..=to).cloned().collect(),
                    None => Vec::new(),
                };
                Ok(RespValue::bulk_array(items))
            }
            DataCommand::SAdd { key, members } => {
                let mut store = ctx.store.write().await;
                let added = update(&mut store, db, &key, RedisValue::Set(BTreeSet::new()), |value| {
                    let RedisValue::Set(set) = value else {
                        return Err(NsError::WrongType);
                    };
                    Ok(members.into_iter().filter(|m| set.insert(m.clone())).count())
                })?;
                Ok(RespValue::integer(added as i64))
            }
            DataCommand::SMembers(key) => {
                let store = ctx.store.read().await;
                match db.get(&*store, &key)?.map(|e| &e.value) {
                    None => Ok(RespValue::array(Vec::new())),
                    Some(RedisValue::Set(set)) => Ok(RespValue::bulk_array(set.iter().cloned())),
                    Some(_) => Err(NsError::WrongType),
                }
            }
            DataCommand::HSet { key, pairs } => {
                let mut store = ctx.store.write().await;
                let added = update(&mut store, db, &key, RedisValue::Hash(BTreeMap::new()), |value| {
                    let RedisValue::Hash(hash) = value else {
                        return Err(NsError::WrongType);
                    };
                    Ok(pairs
                        .into_iter()
                        .filter(|(field, v)| hash.insert(field.clone(), v.clone()).is_none())
                        .count())
                })?;
                Ok(RespValue::integer(added as i64))
            }
            DataCommand::HGetAll(key) => {
                let store = ctx.store.read().await;
                match db.get(&*store, &key)?.map(|e| &e.value) {
                    None => Ok(RespValue::array(Vec::new())),
                    Some(RedisValue::Hash(hash)) => Ok(RespValue::bulk_array(
                        hash.iter().flat_map(|(f, v)| [f.clone(), v.clone()]),
                    )),
                    Some(_) => Err(NsError::WrongType),
                }
            }
            DataCommand::ZAdd { key, pairs } => {
                let mut store = ctx.store.write().await;
                let added = update(&mut store, db, &key, RedisValue::SortedSet(BTreeMap::new()), |value| {
                    let RedisValue::SortedSet(zset) = value else {
                        return Err(NsError::WrongType);
                    };
                    Ok(pairs
                        .into_iter()
                        .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                        .count())
                })?;
                Ok(RespValue::integer(added as i64))
            }
            DataCommand::ZRange {
                key,
                start,
                stop,
                with_scores,
            } => {
                let store = ctx.store.read().await;
                let Some(entry) = db.get(&*store, &key)? else {
                    return Ok(RespValue::array(Vec::new()));
                };
                let RedisValue::SortedSet(zset) = &entry.value else {
                    return Err(NsError::WrongType);
                };
                let ordered = zset_by_score(zset);
                let mut items = Vec::new();
                if let Some((from, to)) = index_range(start, stop, ordered.len()) {
                    for (member, score) in &ordered[from..=to] {
                        items.push(member.to_vec());
                        if with_scores {
                            items.push(format_score(*score).into_bytes());
                        }
                    }
                }
                Ok(RespValue::bulk_array(items))
            }
        }
    }
}

fn parse_set(args: &[Vec<u8>]) -> NsResult<DataCommand> {
    let mut ttl_ms = 0u64;
    let mut options = args[2..].iter();
    while let Some(opt) = options.next() {
        let unit = if arg_eq(opt, "px") {
            1
        } else if arg_eq(opt, "ex") {
            1000
        } else {
            return Err(NsError::SyntaxError);
        };
        let value = options.next().ok_or(NsError::SyntaxError)?;
        ttl_ms = match arg_to_i64(value)? {
            n if n > 0 => (n as u64).saturating_mul(unit),
            _ => return Err(NsError::generic("invalid expire time in 'set' command")),
        };
    }
    Ok(DataCommand::Set {
        key: args[0].clone(),
        value: args[1].clone(),
        ttl_ms,
    })
}

fn parse_score(arg: &[u8]) -> NsResult<f64> {
    let text = arg_to_string(arg).to_ascii_lowercase();
    let score = match text.as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        _ => text.parse::<f64>().map_err(|_| NsError::generic("value is not a valid float"))?,
    };
    if score.is_nan() {
        return Err(NsError::generic("value is not a valid float"));
    }
    Ok(score)
}

/// Resolve a Redis-style inclusive index range (negative counts from the
/// end) against `len` elements.
fn index_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Read-modify-write of one value, creating it from `empty` when the key
/// is missing. The expiry of an existing key is kept.
fn update<R>(
    store: &mut MemoryStorage,
    db: Database<'_>,
    key: &[u8],
    empty: RedisValue,
    apply: impl FnOnce(&mut RedisValue) -> NsResult<R>,
) -> NsResult<R> {
    let mut entry = db.get(&*store, key)?.cloned().unwrap_or_else(|| Entry::new(empty));
    let result = apply(&mut entry.value)?;
    db.put(store, key, entry)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn args(list: &[&str]) -> Vec<Vec<u8>> {
        list.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    async fn run(ctx: &ServerContext, client: &ClientState, cmd: &[&str]) -> NsResult<RespValue> {
        let all = args(cmd);
        DataCommand::parse(cmd[0], &all[1..])?.execute(ctx, client).await
    }

    #[test]
    fn test_index_range() {
        assert_eq!(index_range(0, -1, 3), Some((0, 2)));
        assert_eq!(index_range(-2, 10, 3), Some((1, 2)));
        assert_eq!(index_range(2, 1, 3), None);
        assert_eq!(index_range(5, 6, 3), None);
        assert_eq!(index_range(0, -1, 0), None);
        assert_eq!(index_range(-10, -5, 3), None);
    }

    #[test]
    fn test_parse_set_and_zadd() {
        assert_eq!(
            DataCommand::parse("SET", &args(&["k", "v", "PX", "150"])).unwrap(),
            DataCommand::Set {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                ttl_ms: 150
            }
        );
        assert!(DataCommand::parse("SET", &args(&["k", "v", "PX", "0"])).is_err());
        assert!(matches!(
            DataCommand::parse("SET", &args(&["k", "v", "NX"])),
            Err(NsError::SyntaxError)
        ));
        assert!(DataCommand::parse("ZADD", &args(&["z", "nan", "m"])).is_err());
        assert!(DataCommand::parse("ZADD", &args(&["z", "-inf", "m"])).is_ok());
    }

    #[tokio::test]
    async fn test_every_type_round_trip() {
        let ctx = ServerContext::new(Config::default()).unwrap();
        let client = ClientState::new("127.0.0.1:9000".to_string(), false);

        run(&ctx, &client, &["SET", "s", "v"]).await.unwrap();
        assert_eq!(run(&ctx, &client, &["GET", "s"]).await.unwrap(), RespValue::bulk_string("v"));

        assert_eq!(run(&ctx, &client, &["RPUSH", "l", "a", "b", "c"]).await.unwrap(), RespValue::integer(3));
        assert_eq!(
            run(&ctx, &client, &["LRANGE", "l", "1", "-1"]).await.unwrap(),
            RespValue::bulk_array(["b", "c"])
        );

        assert_eq!(run(&ctx, &client, &["SADD", "st", "x", "x", "y"]).await.unwrap(), RespValue::integer(2));
        assert_eq!(run(&ctx, &client, &["SMEMBERS", "st"]).await.unwrap(), RespValue::bulk_array(["x", "y"]));

        assert_eq!(run(&ctx, &client, &["HSET", "h", "f", "1", "g", "2"]).await.unwrap(), RespValue::integer(2));
        assert_eq!(run(&ctx, &client, &["HSET", "h", "f", "3"]).await.unwrap(), RespValue::integer(0));
        assert_eq!(
            run(&ctx, &client, &["HGETALL", "h"]).await.unwrap(),
            RespValue::bulk_array(["f", "3", "g", "2"])
        );

        run(&ctx, &client, &["ZADD", "z", "2", "b", "1", "a"]).await.unwrap();
        assert_eq!(
            run(&ctx, &client, &["ZRANGE", "z", "0", "-1", "WITHSCORES"]).await.unwrap(),
            RespValue::bulk_array(["a", "1", "b", "2"])
        );

        assert_eq!(run(&ctx, &client, &["TYPE", "z"]).await.unwrap(), RespValue::simple_string("zset"));
        assert_eq!(run(&ctx, &client, &["TYPE", "nope"]).await.unwrap(), RespValue::simple_string("none"));
        assert_eq!(run(&ctx, &client, &["EXISTS", "s", "l", "nope", "s"]).await.unwrap(), RespValue::integer(3));
        assert_eq!(run(&ctx, &client, &["DEL", "s", "nope"]).await.unwrap(), RespValue::integer(1));
    }

    #[tokio::test]
    async fn test_wrong_type_and_ttl() {
        let ctx = ServerContext::new(Config::default()).unwrap();
        let client = ClientState::new("127.0.0.1:9001".to_string(), false);
        run(&ctx, &client, &["RPUSH", "l", "a"]).await.unwrap();
        assert!(matches!(run(&ctx, &client, &["GET", "l"]).await, Err(NsError::WrongType)));
        assert!(matches!(run(&ctx, &client, &["SADD", "l", "a"]).await, Err(NsError::WrongType)));

        assert_eq!(run(&ctx, &client, &["TTL", "l"]).await.unwrap(), RespValue::integer(-1));
        assert_eq!(run(&ctx, &client, &["PTTL", "missing"]).await.unwrap(), RespValue::integer(-2));
        run(&ctx, &client, &["SET", "t", "v", "EX", "100"]).await.unwrap();
        assert_eq!(run(&ctx, &client, &["TTL", "t"]).await.unwrap(), RespValue::integer(100));
    }
}
