use crate::connection::ClientState;
use crate::resp::RespValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Arguments kept per entry, the last slot standing in for the rest.
const MAX_ARGS: usize = 32;

/// Bytes kept per argument.
const MAX_ARG_LEN: usize = 128;

/// A single slow log entry.
#[derive(Debug, Clone)]
pub struct SlowLogEntry {
    pub id: u64,
    /// Unix seconds when the command finished.
    pub timestamp: u64,
    pub duration_micros: u64,
    pub args: Vec<Vec<u8>>,
    pub client_addr: String,
    pub client_name: String,
    /// Namespace of the session that ran the command.
    pub namespace: String,
}

impl SlowLogEntry {
    pub fn to_resp(&self) -> RespValue {
        RespValue::array(vec![
            RespValue::integer(self.id as i64),
            RespValue::integer(self.timestamp as i64),
            RespValue::integer(self.duration_micros as i64),
            RespValue::bulk_array(self.args.iter().cloned()),
            RespValue::bulk_string(self.client_addr.as_bytes()),
            RespValue::bulk_string(self.client_name.as_bytes()),
        ])
    }
}

/// Bounded log of slow commands, newest first.
#[derive(Debug)]
pub struct SlowLog {
    entries: VecDeque<SlowLogEntry>,
    max_len: usize,
    next_id: u64,
}

impl SlowLog {
    pub fn new(max_len: usize) -> Self {
        SlowLog {
            entries: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
            next_id: 0,
        }
    }

    pub fn add(&mut self, timestamp: u64, duration_micros: u64, args: &[Vec<u8>], client: &ClientState) {
        let entry = SlowLogEntry {
            id: self.next_id,
            timestamp,
            duration_micros,
            args: trim_args(args),
            client_addr: client.addr.clone(),
            client_name: client.name.clone().unwrap_or_default(),
            namespace: client.namespace.clone(),
        };
        self.next_id += 1;
        if self.max_len == 0 {
            return;
        }
        if self.entries.len() >= self.max_len {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len;
        self.entries.truncate(max_len);
    }

    /// Up to `count` newest entries (all of them for `None`), limited to
    /// `namespace` when one is given.
    pub fn get<'a>(&'a self, count: Option<usize>, namespace: Option<&'a str>) -> Vec<&'a SlowLogEntry> {
        self.visible(namespace).take(count.unwrap_or(usize::MAX)).collect()
    }

    pub fn len(&self, namespace: Option<&str>) -> usize {
        self.visible(namespace).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    fn visible<'a>(&'a self, namespace: Option<&'a str>) -> impl Iterator<Item = &'a SlowLogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| namespace.is_none_or(|ns| e.namespace == ns))
    }
}

fn trim_args(args: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let kept = if args.len() > MAX_ARGS { MAX_ARGS - 1 } else { args.len() };
    let mut out: Vec<Vec<u8>> = args[..kept]
        .iter()
        .map(|arg| {
            if arg.len() > MAX_ARG_LEN {
                let mut short = arg[..MAX_ARG_LEN].to_vec();
                short.extend_from_slice(format!("... ({} more bytes)", arg.len() - MAX_ARG_LEN).as_bytes());
                short
            } else {
                arg.clone()
            }
        })
        .collect();
    if kept < args.len() {
        out.push(format!("... ({} more arguments)", args.len() - kept).into_bytes());
    }
    out
}

pub type SharedSlowLog = Arc<Mutex<SlowLog>>;
