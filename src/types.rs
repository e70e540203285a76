use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// The core value type stored in the data store.
///
/// Set members, hash fields and sorted set members are kept in member order
/// so collection scans can resume from the last member they returned.
#[derive(Debug, Clone, PartialEq)]
pub enum RedisValue {
    String(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
    SortedSet(BTreeMap<Vec<u8>, f64>),
}

impl RedisValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            RedisValue::String(_) => "string",
            RedisValue::List(_) => "list",
            RedisValue::Hash(_) => "hash",
            RedisValue::Set(_) => "set",
            RedisValue::SortedSet(_) => "zset",
        }
    }

    /// Number of elements; a string counts as one.
    pub fn len(&self) -> usize {
        match self {
            RedisValue::String(_) => 1,
            RedisValue::List(l) => l.len(),
            RedisValue::Hash(h) => h.len(),
            RedisValue::Set(s) => s.len(),
            RedisValue::SortedSet(z) => z.len(),
        }
    }

    /// True for collections without elements. Strings are never empty values.
    pub fn is_empty(&self) -> bool {
        !matches!(self, RedisValue::String(_)) && self.len() == 0
    }

    /// Rough byte footprint used by DISK USAGE / MEMORY USAGE.
    pub fn estimated_size(&self) -> usize {
        match self {
            RedisValue::String(s) => s.len(),
            RedisValue::List(l) => l.iter().map(|v| v.len() + 8).sum(),
            RedisValue::Hash(h) => h.iter().map(|(f, v)| f.len() + v.len() + 16).sum(),
            RedisValue::Set(s) => s.iter().map(|m| m.len() + 8).sum(),
            RedisValue::SortedSet(z) => z.keys().map(|m| m.len() + 16).sum(),
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            RedisValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Sorted set members ordered by (score, member), the order ZRANGE reports.
pub fn zset_by_score(zset: &BTreeMap<Vec<u8>, f64>) -> Vec<(&[u8], f64)> {
    let mut items: Vec<(&[u8], f64)> = zset.iter().map(|(m, s)| (m.as_slice(), *s)).collect();
    items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    items
}

/// Format a score the way Redis replies with it.
pub fn format_score(score: f64) -> String {
    if score.is_infinite() {
        if score > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if score.fract() == 0.0 && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zset_by_score_orders_ties_by_member() {
        let mut z = BTreeMap::new();
        z.insert(b"b".to_vec(), 1.0);
        z.insert(b"a".to_vec(), 1.0);
        z.insert(b"c".to_vec(), -2.5);
        let ordered: Vec<&[u8]> = zset_by_score(&z).into_iter().map(|(m, _)| m).collect();
        assert_eq!(ordered, vec![b"c".as_slice(), b"a", b"b"]);
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(3.0), "3");
        assert_eq!(format_score(1.5), "1.5");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_empty_collections() {
        assert!(RedisValue::Set(BTreeSet::new()).is_empty());
        assert!(!RedisValue::String(Vec::new()).is_empty());
    }
}
