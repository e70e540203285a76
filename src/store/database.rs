use super::entry::{Entry, now_millis};
use super::{Storage, StorageResult, WriteBatch, compose_key};
use std::ops::Bound;

/// Number of keys RANDOMKEY samples from its resume point.
const RANDOM_KEY_SAMPLE: usize = 60;

/// One page of an enumeration: the keys found and, when the range is not
/// exhausted, the last key returned (the resume point for the next page).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanPage {
    pub keys: Vec<Vec<u8>>,
    pub next: Option<Vec<u8>>,
}

/// Keyspace figures of one namespace, as reported by INFO.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KeyStats {
    pub keys: usize,
    pub expires: usize,
}

/// A view of the store confined to one namespace.
///
/// Every key handed in or out is a user key; the namespace prefix is added
/// and stripped here and nowhere else. Expired entries are invisible.
#[derive(Debug, Clone, Copy)]
pub struct Database<'a> {
    namespace: &'a str,
}

impl<'a> Database<'a> {
    pub fn new(namespace: &'a str) -> Self {
        Database { namespace }
    }

    fn header_len(&self) -> usize {
        1 + self.namespace.len()
    }

    /// Live entry for `key`, if any.
    pub fn get<'s, S: Storage + ?Sized>(
        &self,
        storage: &'s S,
        key: &[u8],
    ) -> StorageResult<Option<&'s Entry>> {
        let entry = storage.get(&compose_key(self.namespace, key))?;
        Ok(entry.filter(|e| !e.is_expired()))
    }

    /// Count how many of `keys` are live. Repeated keys count repeatedly.
    pub fn exists<S: Storage + ?Sized>(&self, storage: &S, keys: &[&[u8]]) -> StorageResult<usize> {
        let mut count = 0;
        for key in keys {
            if self.get(storage, key)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn put<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        key: &[u8],
        entry: Entry,
    ) -> StorageResult<()> {
        storage.put(compose_key(self.namespace, key), entry)
    }

    /// Delete `key`. Returns whether a live key was removed; deleting a
    /// missing key is not an error.
    pub fn delete<S: Storage + ?Sized>(&self, storage: &mut S, key: &[u8]) -> StorageResult<bool> {
        let existed = self.get(&*storage, key)?.is_some();
        storage.delete(compose_key(self.namespace, key))?;
        Ok(existed)
    }

    pub fn key_type<S: Storage + ?Sized>(
        &self,
        storage: &S,
        key: &[u8],
    ) -> StorageResult<Option<&'static str>> {
        Ok(self.get(storage, key)?.map(|e| e.value.type_name()))
    }

    /// Enumerate up to `limit` live keys starting with `prefix`, strictly
    /// after `cursor` (an empty cursor starts at the beginning).
    ///
    /// The iterator never leaves this namespace's key range, whatever the
    /// cursor holds. An engine error discards the partial page.
    pub fn scan<S: Storage + ?Sized>(
        &self,
        storage: &S,
        cursor: &[u8],
        limit: usize,
        prefix: &[u8],
    ) -> StorageResult<ScanPage> {
        let limit = limit.max(1);
        let range_prefix = compose_key(self.namespace, prefix);
        let start_key = compose_key(self.namespace, cursor);
        let start = if cursor.is_empty() || start_key < range_prefix {
            Bound::Included(range_prefix.as_slice())
        } else {
            Bound::Excluded(start_key.as_slice())
        };

        let now = now_millis();
        let mut keys = Vec::new();
        let mut has_more = false;
        for item in storage.iter_from(start) {
            let (raw, entry) = item?;
            if !raw.starts_with(&range_prefix) {
                break;
            }
            if entry.is_expired_at(now) {
                continue;
            }
            if keys.len() == limit {
                has_more = true;
                break;
            }
            keys.push(raw[self.header_len()..].to_vec());
        }

        let next = if has_more { keys.last().cloned() } else { None };
        Ok(ScanPage { keys, next })
    }

    /// All live keys starting with `prefix`.
    pub fn keys<S: Storage + ?Sized>(&self, storage: &S, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let range_prefix = compose_key(self.namespace, prefix);
        let now = now_millis();
        let mut keys = Vec::new();
        for item in storage.iter_from(Bound::Included(range_prefix.as_slice())) {
            let (raw, entry) = item?;
            if !raw.starts_with(&range_prefix) {
                break;
            }
            if !entry.is_expired_at(now) {
                keys.push(raw[self.header_len()..].to_vec());
            }
        }
        Ok(keys)
    }

    /// Pick a random live key near `cursor`, wrapping to the start of the
    /// namespace when nothing follows it.
    pub fn random_key<S: Storage + ?Sized>(
        &self,
        storage: &S,
        cursor: &[u8],
    ) -> StorageResult<Option<Vec<u8>>> {
        use rand::seq::SliceRandom;

        let mut page = self.scan(storage, cursor, RANDOM_KEY_SAMPLE, b"")?;
        if page.keys.is_empty() && !cursor.is_empty() {
            page = self.scan(storage, b"", RANDOM_KEY_SAMPLE, b"")?;
        }
        let mut rng = rand::thread_rng();
        Ok(page.keys.choose(&mut rng).cloned())
    }

    /// Number of live keys in this namespace.
    pub fn dbsize<S: Storage + ?Sized>(&self, storage: &S) -> StorageResult<usize> {
        Ok(self.key_stats(storage)?.keys)
    }

    /// Live key count and how many of those keys carry a TTL.
    pub fn key_stats<S: Storage + ?Sized>(&self, storage: &S) -> StorageResult<KeyStats> {
        let range_prefix = compose_key(self.namespace, b"");
        let now = now_millis();
        let mut stats = KeyStats::default();
        for item in storage.iter_from(Bound::Included(range_prefix.as_slice())) {
            let (raw, entry) = item?;
            if !raw.starts_with(&range_prefix) {
                break;
            }
            if entry.is_expired_at(now) {
                continue;
            }
            stats.keys += 1;
            if entry.expires_at.is_some() {
                stats.expires += 1;
            }
        }
        Ok(stats)
    }

    /// Remove every key of this namespace, expired ones included.
    pub fn flush_db<S: Storage + ?Sized>(&self, storage: &mut S) -> StorageResult<usize> {
        let range_prefix = compose_key(self.namespace, b"");
        let mut batch = WriteBatch::new();
        for item in storage.iter_from(Bound::Included(range_prefix.as_slice())) {
            let (raw, _) = item?;
            if !raw.starts_with(&range_prefix) {
                break;
            }
            batch.delete(raw.to_vec());
        }
        let removed = batch.len();
        storage.write(batch)?;
        Ok(removed)
    }
}

/// Remove every key of every namespace.
pub fn flush_all<S: Storage + ?Sized>(storage: &mut S) -> StorageResult<usize> {
    let mut batch = WriteBatch::new();
    for item in storage.iter_from(Bound::Unbounded) {
        let (raw, _) = item?;
        batch.delete(raw.to_vec());
    }
    let removed = batch.len();
    storage.write(batch)?;
    Ok(removed)
}

/// Page through the members of one collection value, in member order.
///
/// Same contract as [`Database::scan`]: members strictly after `cursor`,
/// filtered by `prefix`, at most `limit`, with the resume point set only
/// when more members remain.
pub fn scan_members<'v, T, I>(
    members: I,
    cursor: &[u8],
    limit: usize,
    prefix: &[u8],
) -> (Vec<(&'v [u8], T)>, Option<Vec<u8>>)
where
    I: IntoIterator<Item = (&'v [u8], T)>,
{
    let limit = limit.max(1);
    let mut page = Vec::new();
    let mut has_more = false;
    for (member, extra) in members {
        if !cursor.is_empty() && member <= cursor {
            continue;
        }
        if !member.starts_with(prefix) {
            continue;
        }
        if page.len() == limit {
            has_more = true;
            break;
        }
        page.push((member, extra));
    }
    let next = if has_more {
        page.last().map(|(m, _)| m.to_vec())
    } else {
        None
    };
    (page, next)
}
