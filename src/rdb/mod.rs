//! RDB snapshot codec: DUMP/RESTORE payloads and whole RDB files.

pub mod encoding;
pub mod stream;

use crate::store::entry::{Entry, now_millis};
use crate::store::{Database, Storage, StorageError};
use crate::types::RedisValue;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{self, Read};

pub use stream::{FileStream, RdbStream, StringStream, crc64};

/// Highest RDB format version understood by the decoder.
pub const RDB_VERSION: u16 = 12;

/// Version stamped into DUMP payloads.
const DUMP_VERSION: u16 = 11;

/// First RDB version whose files end with a CRC-64.
const CHECKSUM_SINCE_VERSION: u16 = 5;

const RDB_MAGIC: &[u8] = b"REDIS";

// RDB opcodes
const RDB_OPCODE_FUNCTION2: u8 = 0xF5;
const RDB_OPCODE_FUNCTION: u8 = 0xF6;
const RDB_OPCODE_MODULE_AUX: u8 = 0xF7;
const RDB_OPCODE_IDLE: u8 = 0xF8;
const RDB_OPCODE_FREQ: u8 = 0xF9;
const RDB_OPCODE_AUX: u8 = 0xFA;
const RDB_OPCODE_RESIZEDB: u8 = 0xFB;
const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const RDB_OPCODE_EXPIRETIME: u8 = 0xFD;
const RDB_OPCODE_SELECTDB: u8 = 0xFE;
const RDB_OPCODE_EOF: u8 = 0xFF;

// RDB type bytes
const RDB_TYPE_STRING: u8 = 0;
const RDB_TYPE_LIST: u8 = 1;
const RDB_TYPE_SET: u8 = 2;
const RDB_TYPE_ZSET: u8 = 3;
const RDB_TYPE_HASH: u8 = 4;
const RDB_TYPE_ZSET_2: u8 = 5;
const RDB_TYPE_LIST_ZIPLIST: u8 = 10;
const RDB_TYPE_SET_INTSET: u8 = 11;
const RDB_TYPE_ZSET_ZIPLIST: u8 = 12;
const RDB_TYPE_HASH_ZIPLIST: u8 = 13;
const RDB_TYPE_LIST_QUICKLIST: u8 = 14;
const RDB_TYPE_HASH_LISTPACK: u8 = 16;
const RDB_TYPE_ZSET_LISTPACK: u8 = 17;
const RDB_TYPE_LIST_QUICKLIST_2: u8 = 18;
const RDB_TYPE_SET_LISTPACK: u8 = 20;

// Special string encodings (length byte 11xxxxxx)
const RDB_ENC_INT8: u64 = 0;
const RDB_ENC_INT16: u64 = 1;
const RDB_ENC_INT32: u64 = 2;
const RDB_ENC_LZF: u64 = 3;

// Quicklist 2 node containers
const QUICKLIST_NODE_PLAIN: u64 = 1;
const QUICKLIST_NODE_PACKED: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum RdbError {
    #[error("invalid payload length")]
    InvalidPayloadLength,

    #[error("invalid or unsupported rdb version: {0}")]
    UnsupportedVersion(u16),

    #[error("incorrect checksum")]
    ChecksumMismatch,

    #[error("wrong signature trying to load DB from file")]
    BadSignature,

    #[error("can't handle RDB format version {0}")]
    BadFileVersion(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(u8),

    #[error("unsupported opcode: {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("bad data format: {0}")]
    Corrupt(&'static str),

    #[error("lzf decompression failed: {0}")]
    Lzf(String),

    #[error("unexpected end of rdb stream")]
    UnexpectedEof,

    #[error("{0}")]
    Io(io::Error),

    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl From<io::Error> for RdbError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RdbError::UnexpectedEof
        } else {
            RdbError::Io(e)
        }
    }
}

pub type RdbResult<T> = Result<T, RdbError>;

/// Reads RDB primitives and typed values off a stream.
pub struct RdbDecoder<'a, S: RdbStream> {
    stream: &'a mut S,
}

impl<'a, S: RdbStream> RdbDecoder<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        RdbDecoder { stream }
    }

    fn read_array<const N: usize>(&mut self) -> RdbResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> RdbResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read exactly `len` bytes without trusting `len` for the allocation.
    fn read_bytes(&mut self, len: u64) -> RdbResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.stream.by_ref().take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(RdbError::UnexpectedEof);
        }
        Ok(buf)
    }

    /// Returns the length and whether it is a special string encoding.
    fn read_length_with_encoding(&mut self) -> RdbResult<(u64, bool)> {
        let first = self.read_u8()?;
        match first >> 6 {
            0 => Ok(((first & 0x3F) as u64, false)),
            1 => {
                let next = self.read_u8()?;
                Ok(((((first & 0x3F) as u64) << 8) | next as u64, false))
            }
            2 => match first {
                0x80 => Ok((u32::from_be_bytes(self.read_array()?) as u64, false)),
                0x81 => Ok((u64::from_be_bytes(self.read_array()?), false)),
                _ => Err(RdbError::Corrupt("unknown length encoding")),
            },
            _ => Ok(((first & 0x3F) as u64, true)),
        }
    }

    fn read_length(&mut self) -> RdbResult<u64> {
        match self.read_length_with_encoding()? {
            (len, false) => Ok(len),
            (_, true) => Err(RdbError::Corrupt("unexpected string encoding")),
        }
    }

    /// Read a string object in any of its encodings.
    pub fn load_string(&mut self) -> RdbResult<Vec<u8>> {
        let (len, encoded) = self.read_length_with_encoding()?;
        if !encoded {
            return self.read_bytes(len);
        }
        match len {
            RDB_ENC_INT8 => Ok((self.read_u8()? as i8).to_string().into_bytes()),
            RDB_ENC_INT16 => Ok(i16::from_le_bytes(self.read_array()?).to_string().into_bytes()),
            RDB_ENC_INT32 => Ok(i32::from_le_bytes(self.read_array()?).to_string().into_bytes()),
            RDB_ENC_LZF => {
                let compressed_len = self.read_length()?;
                let len = self.read_length()?;
                let compressed = self.read_bytes(compressed_len)?;
                let len = usize::try_from(len).map_err(|_| RdbError::Corrupt("lzf length overflow"))?;
                encoding::lzf_decompress(&compressed, len)
            }
            _ => Err(RdbError::Corrupt("unknown string encoding")),
        }
    }

    /// Score of a `ZSET` entry: a length byte then ASCII, with three
    /// reserved lengths for the non-finite values.
    fn load_ascii_score(&mut self) -> RdbResult<f64> {
        match self.read_u8()? {
            253 => Ok(f64::NAN),
            254 => Ok(f64::INFINITY),
            255 => Ok(f64::NEG_INFINITY),
            len => parse_score(&self.read_bytes(len as u64)?),
        }
    }

    fn load_binary_score(&mut self) -> RdbResult<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    fn load_strings(&mut self) -> RdbResult<Vec<Vec<u8>>> {
        let len = self.read_length()?;
        let mut items = Vec::with_capacity(len.min(1024) as usize);
        for _ in 0..len {
            items.push(self.load_string()?);
        }
        Ok(items)
    }

    /// Decode one value of type `rdb_type`.
    pub fn load_value(&mut self, rdb_type: u8) -> RdbResult<RedisValue> {
        match rdb_type {
            RDB_TYPE_STRING => Ok(RedisValue::String(self.load_string()?)),
            RDB_TYPE_LIST => Ok(list_from(self.load_strings()?)),
            RDB_TYPE_SET => Ok(set_from(self.load_strings()?)),
            RDB_TYPE_HASH => {
                let len = self.read_length()?;
                let mut hash = BTreeMap::new();
                for _ in 0..len {
                    let field = self.load_string()?;
                    let value = self.load_string()?;
                    hash.insert(field, value);
                }
                Ok(RedisValue::Hash(hash))
            }
            RDB_TYPE_ZSET | RDB_TYPE_ZSET_2 => {
                let len = self.read_length()?;
                let mut zset = BTreeMap::new();
                for _ in 0..len {
                    let member = self.load_string()?;
                    let score = if rdb_type == RDB_TYPE_ZSET {
                        self.load_ascii_score()?
                    } else {
                        self.load_binary_score()?
                    };
                    zset.insert(member, score);
                }
                Ok(RedisValue::SortedSet(zset))
            }
            RDB_TYPE_LIST_ZIPLIST => Ok(list_from(encoding::ziplist_entries(&self.load_string()?)?)),
            RDB_TYPE_SET_INTSET => Ok(set_from(encoding::intset_members(&self.load_string()?)?)),
            RDB_TYPE_SET_LISTPACK => Ok(set_from(encoding::listpack_entries(&self.load_string()?)?)),
            RDB_TYPE_HASH_ZIPLIST => hash_from_pairs(encoding::ziplist_entries(&self.load_string()?)?),
            RDB_TYPE_HASH_LISTPACK => hash_from_pairs(encoding::listpack_entries(&self.load_string()?)?),
            RDB_TYPE_ZSET_ZIPLIST => zset_from_pairs(encoding::ziplist_entries(&self.load_string()?)?),
            RDB_TYPE_ZSET_LISTPACK => zset_from_pairs(encoding::listpack_entries(&self.load_string()?)?),
            RDB_TYPE_LIST_QUICKLIST => {
                let nodes = self.read_length()?;
                let mut items = Vec::new();
                for _ in 0..nodes {
                    items.extend(encoding::ziplist_entries(&self.load_string()?)?);
                }
                Ok(list_from(items))
            }
            RDB_TYPE_LIST_QUICKLIST_2 => {
                let nodes = self.read_length()?;
                let mut items = Vec::new();
                for _ in 0..nodes {
                    match self.read_length()? {
                        QUICKLIST_NODE_PLAIN => items.push(self.load_string()?),
                        QUICKLIST_NODE_PACKED => {
                            items.extend(encoding::listpack_entries(&self.load_string()?)?)
                        }
                        _ => return Err(RdbError::Corrupt("unknown quicklist node container")),
                    }
                }
                Ok(list_from(items))
            }
            other => Err(RdbError::UnsupportedType(other)),
        }
    }
}

fn parse_score(text: &[u8]) -> RdbResult<f64> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or(RdbError::Corrupt("invalid zset score"))
}

fn list_from(items: Vec<Vec<u8>>) -> RedisValue {
    RedisValue::List(VecDeque::from(items))
}

fn set_from(items: Vec<Vec<u8>>) -> RedisValue {
    RedisValue::Set(items.into_iter().collect::<BTreeSet<_>>())
}

fn hash_from_pairs(items: Vec<Vec<u8>>) -> RdbResult<RedisValue> {
    if items.len() % 2 != 0 {
        return Err(RdbError::Corrupt("hash has an odd number of entries"));
    }
    let mut hash = BTreeMap::new();
    let mut it = items.into_iter();
    while let (Some(field), Some(value)) = (it.next(), it.next()) {
        hash.insert(field, value);
    }
    Ok(RedisValue::Hash(hash))
}

fn zset_from_pairs(items: Vec<Vec<u8>>) -> RdbResult<RedisValue> {
    if items.len() % 2 != 0 {
        return Err(RdbError::Corrupt("zset has an odd number of entries"));
    }
    let mut zset = BTreeMap::new();
    let mut it = items.into_iter();
    while let (Some(member), Some(score)) = (it.next(), it.next()) {
        zset.insert(member, parse_score(&score)?);
    }
    Ok(RedisValue::SortedSet(zset))
}

// --- DUMP / RESTORE payloads ---

/// Check the footer of a DUMP payload and return the serialized value.
///
/// Layout: `[type][value][version: u16 LE][crc64: u64 LE]`, the checksum
/// covering everything before it.
pub fn verify_payload(payload: &[u8]) -> RdbResult<&[u8]> {
    if payload.len() < 10 {
        return Err(RdbError::InvalidPayloadLength);
    }
    let footer = payload.len() - 10;
    let version = u16::from_le_bytes([payload[footer], payload[footer + 1]]);
    if version > RDB_VERSION {
        return Err(RdbError::UnsupportedVersion(version));
    }
    let mut stored = [0u8; 8];
    stored.copy_from_slice(&payload[footer + 2..]);
    if crc64(&payload[..footer + 2]) != u64::from_le_bytes(stored) {
        return Err(RdbError::ChecksumMismatch);
    }
    Ok(&payload[..footer])
}

/// Decode the single value carried by a DUMP payload.
pub fn decode_payload(payload: &[u8]) -> RdbResult<RedisValue> {
    let body = verify_payload(payload)?;
    let mut stream = StringStream::new(body.to_vec());
    let mut decoder = RdbDecoder::new(&mut stream);
    let rdb_type = decoder.read_u8()?;
    let value = decoder.load_value(rdb_type)?;
    if value.is_empty() {
        return Err(RdbError::Corrupt("empty keys"));
    }
    Ok(value)
}

fn write_length(w: &mut Vec<u8>, len: u64) {
    if len < 64 {
        w.push(len as u8);
    } else if len < 16384 {
        w.extend_from_slice(&[0x40 | (len >> 8) as u8, len as u8]);
    } else if len <= u32::MAX as u64 {
        w.push(0x80);
        w.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        w.push(0x81);
        w.extend_from_slice(&len.to_be_bytes());
    }
}

fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    write_length(w, data.len() as u64);
    w.extend_from_slice(data);
}

/// Serialize `value` as a DUMP payload.
pub fn dump_value(value: &RedisValue) -> Vec<u8> {
    let mut w = Vec::with_capacity(value.estimated_size() + 16);
    match value {
        RedisValue::String(s) => {
            w.push(RDB_TYPE_STRING);
            write_string(&mut w, s);
        }
        RedisValue::List(list) => {
            w.push(RDB_TYPE_LIST);
            write_length(&mut w, list.len() as u64);
            for item in list {
                write_string(&mut w, item);
            }
        }
        RedisValue::Set(set) => {
            w.push(RDB_TYPE_SET);
            write_length(&mut w, set.len() as u64);
            for member in set {
                write_string(&mut w, member);
            }
        }
        RedisValue::SortedSet(zset) => {
            w.push(RDB_TYPE_ZSET_2);
            write_length(&mut w, zset.len() as u64);
            for (member, score) in zset {
                write_string(&mut w, member);
                w.extend_from_slice(&score.to_le_bytes());
            }
        }
        RedisValue::Hash(hash) => {
            w.push(RDB_TYPE_HASH);
            write_length(&mut w, hash.len() as u64);
            for (field, v) in hash {
                write_string(&mut w, field);
                write_string(&mut w, v);
            }
        }
    }
    w.extend_from_slice(&DUMP_VERSION.to_le_bytes());
    let crc = crc64(&w);
    w.extend_from_slice(&crc.to_le_bytes());
    w
}

/// Parsed RESTORE options. IDLETIME and FREQ are validated and kept only
/// for completeness; the store has no eviction metadata to apply them to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreOptions {
    /// Milliseconds; relative unless `absttl`. Zero means no expiry.
    pub ttl: u64,
    pub replace: bool,
    pub absttl: bool,
    pub idletime: Option<u64>,
    pub freq: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreExpiry {
    /// An absolute TTL already in the past: nothing is written.
    AlreadyExpired,
    Never,
    At(u64),
}

impl RestoreOptions {
    pub fn expiry(&self, now: u64) -> RestoreExpiry {
        match (self.ttl, self.absttl) {
            (0, _) => RestoreExpiry::Never,
            (ttl, true) if ttl <= now => RestoreExpiry::AlreadyExpired,
            (ttl, true) => RestoreExpiry::At(ttl),
            (ttl, false) => RestoreExpiry::At(now.saturating_add(ttl)),
        }
    }
}

// --- RDB files ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Only entries of this database are loaded.
    pub db_index: u64,
    /// Replace keys that already exist. `NX` turns this off.
    pub overwrite: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            db_index: 0,
            overwrite: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub loaded: usize,
    pub skipped: usize,
}

fn read_header<S: RdbStream>(decoder: &mut RdbDecoder<'_, S>) -> RdbResult<u16> {
    let magic: [u8; 5] = decoder.read_array()?;
    if magic != RDB_MAGIC {
        return Err(RdbError::BadSignature);
    }
    let digits: [u8; 4] = decoder.read_array()?;
    let text = String::from_utf8_lossy(&digits).into_owned();
    match text.parse::<u16>() {
        Ok(v) if digits.iter().all(u8::is_ascii_digit) && (1..=RDB_VERSION).contains(&v) => Ok(v),
        _ => Err(RdbError::BadFileVersion(text)),
    }
}

/// Load an RDB file into `db`.
///
/// Decoding stops at the first error; entries written before it stay.
pub fn load_rdb<S, T>(
    stream: &mut S,
    storage: &mut T,
    db: Database<'_>,
    opts: &LoadOptions,
) -> RdbResult<LoadStats>
where
    S: RdbStream,
    T: Storage + ?Sized,
{
    let mut decoder = RdbDecoder::new(stream);
    let version = read_header(&mut decoder)?;

    let mut stats = LoadStats::default();
    let mut current_db = 0u64;
    let mut expire_at: Option<u64> = None;
    let now = now_millis();

    loop {
        let opcode = decoder.read_u8()?;
        match opcode {
            RDB_OPCODE_EOF => break,
            RDB_OPCODE_SELECTDB => current_db = decoder.read_length()?,
            RDB_OPCODE_RESIZEDB => {
                let _db_size = decoder.read_length()?;
                let _expires_size = decoder.read_length()?;
            }
            RDB_OPCODE_AUX => {
                let _key = decoder.load_string()?;
                let _value = decoder.load_string()?;
            }
            RDB_OPCODE_EXPIRETIME_MS => {
                expire_at = Some(u64::from_le_bytes(decoder.read_array()?));
            }
            RDB_OPCODE_EXPIRETIME => {
                expire_at = Some(u32::from_le_bytes(decoder.read_array()?) as u64 * 1000);
            }
            RDB_OPCODE_IDLE => {
                let _idle = decoder.read_length()?;
            }
            RDB_OPCODE_FREQ => {
                let _freq = decoder.read_u8()?;
            }
            RDB_OPCODE_MODULE_AUX | RDB_OPCODE_FUNCTION | RDB_OPCODE_FUNCTION2 => {
                return Err(RdbError::UnsupportedOpcode(opcode));
            }
            rdb_type => {
                let key = decoder.load_string()?;
                let value = decoder.load_value(rdb_type)?;
                let expiry = expire_at.take();

                let wanted = current_db == opts.db_index
                    && !expiry.is_some_and(|at| at <= now)
                    && !value.is_empty();
                if !wanted || (!opts.overwrite && db.get(&*storage, &key)?.is_some()) {
                    stats.skipped += 1;
                    continue;
                }
                let entry = match expiry {
                    Some(at) => Entry::with_expiry(value, at),
                    None => Entry::new(value),
                };
                db.put(storage, &key, entry)?;
                stats.loaded += 1;
            }
        }
    }

    if version >= CHECKSUM_SINCE_VERSION {
        let expected = decoder.stream.checksum();
        let stored = u64::from_le_bytes(decoder.read_array()?);
        if stored != 0 && stored != expected {
            return Err(RdbError::ChecksumMismatch);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::encoding::tests::{listpack, lp_str, zip_str, ziplist};
    use super::*;
    use crate::store::MemoryStorage;

    fn payload(body: &[u8]) -> Vec<u8> {
        let mut p = body.to_vec();
        p.extend_from_slice(&DUMP_VERSION.to_le_bytes());
        let crc = crc64(&p);
        p.extend_from_slice(&crc.to_le_bytes());
        p
    }

    fn string_blob(data: &[u8]) -> Vec<u8> {
        let mut w = Vec::new();
        write_string(&mut w, data);
        w
    }

    #[test]
    fn test_dump_then_restore_every_type() {
        let values = vec![
            RedisValue::String(b"hello".to_vec()),
            RedisValue::List(VecDeque::from(vec![b"a".to_vec(), b"b".to_vec()])),
            RedisValue::Set(BTreeSet::from([b"x".to_vec(), b"y".to_vec()])),
            RedisValue::Hash(BTreeMap::from([(b"f".to_vec(), b"v".to_vec())])),
            RedisValue::SortedSet(BTreeMap::from([(b"m".to_vec(), 1.5), (b"n".to_vec(), f64::INFINITY)])),
        ];
        for value in values {
            assert_eq!(decode_payload(&dump_value(&value)).unwrap(), value);
        }
    }

    #[test]
    fn test_payload_footer_checks() {
        assert!(matches!(decode_payload(b"short"), Err(RdbError::InvalidPayloadLength)));

        let mut bad_version = string_blob(b"v");
        bad_version.insert(0, RDB_TYPE_STRING);
        bad_version.extend_from_slice(&13u16.to_le_bytes());
        let crc = crc64(&bad_version);
        bad_version.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(decode_payload(&bad_version), Err(RdbError::UnsupportedVersion(13))));

        let mut corrupted = dump_value(&RedisValue::String(b"value".to_vec()));
        corrupted[2] ^= 0xFF;
        assert!(matches!(decode_payload(&corrupted), Err(RdbError::ChecksumMismatch)));
    }

    #[test]
    fn test_integer_encoded_strings() {
        let p = payload(&[RDB_TYPE_STRING, 0xC0, 0xFB]);
        assert_eq!(decode_payload(&p).unwrap(), RedisValue::String(b"-5".to_vec()));
        let p = payload(&[RDB_TYPE_STRING, 0xC1, 0x39, 0x30]);
        assert_eq!(decode_payload(&p).unwrap(), RedisValue::String(b"12345".to_vec()));
        let mut body = vec![RDB_TYPE_STRING, 0xC2];
        body.extend_from_slice(&(-1_000_000i32).to_le_bytes());
        assert_eq!(decode_payload(&payload(&body)).unwrap(), RedisValue::String(b"-1000000".to_vec()));
    }

    #[test]
    fn test_lzf_string() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let compressed = lzf::compress(&data).unwrap();
        let mut body = vec![RDB_TYPE_STRING, 0xC3];
        write_length(&mut body, compressed.len() as u64);
        write_length(&mut body, data.len() as u64);
        body.extend_from_slice(&compressed);
        assert_eq!(decode_payload(&payload(&body)).unwrap(), RedisValue::String(data));
    }

    #[test]
    fn test_lzf_length_is_bounded_before_allocation() {
        let mut body = vec![RDB_TYPE_STRING, 0xC3, 0x01, 0x81];
        body.extend_from_slice(&(1u64 << 50).to_be_bytes());
        body.push(0x00);
        assert!(matches!(
            decode_payload(&payload(&body)),
            Err(RdbError::Corrupt("lzf length out of range"))
        ));

        // Within the hard cap but far beyond what one input byte can expand to.
        let mut body = vec![RDB_TYPE_STRING, 0xC3, 0x01];
        write_length(&mut body, 1 << 20);
        body.push(0x00);
        assert!(decode_payload(&payload(&body)).is_err());
    }

    #[test]
    fn test_ascii_scores() {
        let mut body = vec![RDB_TYPE_ZSET, 3];
        body.extend(string_blob(b"a"));
        body.extend_from_slice(&[3, b'2', b'.', b'5']);
        body.extend(string_blob(b"b"));
        body.push(254);
        body.extend(string_blob(b"c"));
        body.push(255);
        let value = decode_payload(&payload(&body)).unwrap();
        let RedisValue::SortedSet(z) = value else { panic!("expected zset") };
        assert_eq!(z[b"a".as_slice()], 2.5);
        assert_eq!(z[b"b".as_slice()], f64::INFINITY);
        assert_eq!(z[b"c".as_slice()], f64::NEG_INFINITY);
    }

    #[test]
    fn test_compact_encodings() {
        let zl = ziplist(&[zip_str(b"f1"), zip_str(b"v1"), zip_str(b"f2"), vec![0xF3]]);
        let mut body = vec![RDB_TYPE_HASH_ZIPLIST];
        body.extend(string_blob(&zl));
        let RedisValue::Hash(h) = decode_payload(&payload(&body)).unwrap() else { panic!() };
        assert_eq!(h[b"f2".as_slice()], b"2".to_vec());

        let lp = listpack(&[lp_str(b"m"), lp_str(b"1.25")]);
        let mut body = vec![RDB_TYPE_ZSET_LISTPACK];
        body.extend(string_blob(&lp));
        let RedisValue::SortedSet(z) = decode_payload(&payload(&body)).unwrap() else { panic!() };
        assert_eq!(z[b"m".as_slice()], 1.25);

        let mut intset = Vec::new();
        intset.extend_from_slice(&2u32.to_le_bytes());
        intset.extend_from_slice(&2u32.to_le_bytes());
        intset.extend_from_slice(&5i16.to_le_bytes());
        intset.extend_from_slice(&(-5i16).to_le_bytes());
        let mut body = vec![RDB_TYPE_SET_INTSET];
        body.extend(string_blob(&intset));
        let RedisValue::Set(s) = decode_payload(&payload(&body)).unwrap() else { panic!() };
        assert!(s.contains(b"-5".as_slice()) && s.contains(b"5".as_slice()));
    }

    #[test]
    fn test_quicklist_2_nodes() {
        let lp = listpack(&[lp_str(b"b"), lp_str(b"c")]);
        let mut body = vec![RDB_TYPE_LIST_QUICKLIST_2, 2];
        body.push(QUICKLIST_NODE_PLAIN as u8);
        body.extend(string_blob(b"a"));
        body.push(QUICKLIST_NODE_PACKED as u8);
        body.extend(string_blob(&lp));
        let value = decode_payload(&payload(&body)).unwrap();
        assert_eq!(
            value,
            RedisValue::List(VecDeque::from(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]))
        );
    }

    #[test]
    fn test_rejects_unsupported_and_empty() {
        assert!(matches!(decode_payload(&payload(&[15, 0])), Err(RdbError::UnsupportedType(15))));
        assert!(matches!(decode_payload(&payload(&[RDB_TYPE_SET, 0])), Err(RdbError::Corrupt(_))));
        let zl = ziplist(&[zip_str(b"lonely")]);
        let mut body = vec![RDB_TYPE_HASH_ZIPLIST];
        body.extend(string_blob(&zl));
        assert!(matches!(decode_payload(&payload(&body)), Err(RdbError::Corrupt(_))));
    }

    #[test]
    fn test_restore_expiry() {
        let rel = RestoreOptions { ttl: 500, ..Default::default() };
        assert_eq!(rel.expiry(1000), RestoreExpiry::At(1500));
        let abs_past = RestoreOptions { ttl: 900, absttl: true, ..Default::default() };
        assert_eq!(abs_past.expiry(1000), RestoreExpiry::AlreadyExpired);
        let abs = RestoreOptions { ttl: 2000, absttl: true, ..Default::default() };
        assert_eq!(abs.expiry(1000), RestoreExpiry::At(2000));
        assert_eq!(RestoreOptions::default().expiry(1000), RestoreExpiry::Never);
    }

    /// Assemble an RDB file from raw entry records.
    fn rdb_file(version: &str, records: &[u8], checksum: bool) -> Vec<u8> {
        let mut f = b"REDIS".to_vec();
        f.extend_from_slice(version.as_bytes());
        f.extend_from_slice(&[RDB_OPCODE_AUX]);
        f.extend(string_blob(b"redis-ver"));
        f.extend(string_blob(b"7.2.0"));
        f.extend_from_slice(records);
        f.push(RDB_OPCODE_EOF);
        let crc = if checksum { crc64(&f) } else { 0 };
        f.extend_from_slice(&crc.to_le_bytes());
        f
    }

    fn string_record(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut r = vec![RDB_TYPE_STRING];
        r.extend(string_blob(key));
        r.extend(string_blob(value));
        r
    }

    fn load(file: Vec<u8>, storage: &mut MemoryStorage, opts: &LoadOptions) -> RdbResult<LoadStats> {
        let mut stream = StringStream::new(file);
        load_rdb(&mut stream, storage, Database::new("ns"), opts)
    }

    #[test]
    fn test_load_file_with_dbs_and_expiry() {
        let mut records = vec![RDB_OPCODE_SELECTDB, 0, RDB_OPCODE_RESIZEDB, 3, 1];
        records.extend(string_record(b"k1", b"v1"));
        records.push(RDB_OPCODE_EXPIRETIME_MS);
        records.extend_from_slice(&1u64.to_le_bytes());
        records.extend(string_record(b"stale", b"v"));
        records.push(RDB_OPCODE_EXPIRETIME_MS);
        records.extend_from_slice(&(now_millis() + 60_000).to_le_bytes());
        records.extend_from_slice(&[RDB_OPCODE_FREQ, 3, RDB_OPCODE_IDLE, 7]);
        records.extend(string_record(b"k2", b"v2"));
        records.extend_from_slice(&[RDB_OPCODE_SELECTDB, 1]);
        records.extend(string_record(b"other-db", b"v"));

        let mut storage = MemoryStorage::new();
        let stats = load(rdb_file("0011", &records, true), &mut storage, &LoadOptions::default()).unwrap();
        assert_eq!(stats, LoadStats { loaded: 2, skipped: 2 });

        let db = Database::new("ns");
        assert!(db.get(&storage, b"k1").unwrap().is_some());
        assert!(db.get(&storage, b"k2").unwrap().unwrap().expires_at.is_some());
        assert!(db.get(&storage, b"stale").unwrap().is_none());
        assert!(db.get(&storage, b"other-db").unwrap().is_none());

        let db1 = LoadOptions { db_index: 1, overwrite: true };
        let stats = load(rdb_file("0011", &records, true), &mut storage, &db1).unwrap();
        assert_eq!(stats.loaded, 1);
    }

    #[test]
    fn test_load_nx_keeps_existing_keys() {
        let mut storage = MemoryStorage::new();
        let db = Database::new("ns");
        db.put(&mut storage, b"k1", Entry::new(RedisValue::String(b"old".to_vec()))).unwrap();
        let records = [string_record(b"k1", b"new"), string_record(b"k2", b"new")].concat();

        let nx = LoadOptions { db_index: 0, overwrite: false };
        load(rdb_file("0009", &records, true), &mut storage, &nx).unwrap();
        assert_eq!(db.get(&storage, b"k1").unwrap().unwrap().value.as_string(), Some(b"old".as_slice()));

        load(rdb_file("0009", &records, true), &mut storage, &LoadOptions::default()).unwrap();
        assert_eq!(db.get(&storage, b"k1").unwrap().unwrap().value.as_string(), Some(b"new".as_slice()));
    }

    #[test]
    fn test_load_checksum() {
        let records = string_record(b"k", b"v");
        let mut storage = MemoryStorage::new();
        // A zero checksum means the writer did not compute one.
        load(rdb_file("0010", &records, false), &mut storage, &LoadOptions::default()).unwrap();

        let mut file = rdb_file("0010", &records, true);
        let last = file.len() - 1;
        file[last] ^= 0x01;
        assert!(matches!(
            load(file, &mut storage, &LoadOptions::default()),
            Err(RdbError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_load_bad_header() {
        let mut storage = MemoryStorage::new();
        let opts = LoadOptions::default();
        assert!(matches!(load(b"RUBIS0011".to_vec(), &mut storage, &opts), Err(RdbError::BadSignature)));
        assert!(matches!(load(rdb_file("0013", &[], true), &mut storage, &opts), Err(RdbError::BadFileVersion(_))));
        assert!(matches!(load(rdb_file("00x1", &[], true), &mut storage, &opts), Err(RdbError::BadFileVersion(_))));
    }

    #[test]
    fn test_load_error_keeps_applied_entries() {
        let mut records = string_record(b"first", b"v");
        records.extend_from_slice(&[RDB_OPCODE_MODULE_AUX, 0]);
        records.extend(string_record(b"second", b"v"));
        let mut storage = MemoryStorage::new();
        let err = load(rdb_file("0011", &records, true), &mut storage, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, RdbError::UnsupportedOpcode(RDB_OPCODE_MODULE_AUX)));

        let db = Database::new("ns");
        assert!(db.get(&storage, b"first").unwrap().is_some());
        assert!(db.get(&storage, b"second").unwrap().is_none());
    }

    #[test]
    fn test_truncated_file() {
        let mut file = rdb_file("0011", &string_record(b"key", b"value"), true);
        file.truncate(20);
        let mut storage = MemoryStorage::new();
        assert!(matches!(
            load(file, &mut storage, &LoadOptions::default()),
            Err(RdbError::UnexpectedEof)
        ));
    }
}
