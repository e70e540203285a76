use crate::types::RedisValue;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored value plus its optional expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: RedisValue,
    /// Expiry time as milliseconds since UNIX epoch. None = no expiry.
    pub expires_at: Option<u64>,
}

impl Entry {
    pub fn new(value: RedisValue) -> Self {
        Entry {
            value,
            expires_at: None,
        }
    }

    pub fn with_expiry(value: RedisValue, expires_at: u64) -> Self {
        Entry {
            value,
            expires_at: Some(expires_at),
        }
    }

    /// Entry expiring `ttl_ms` from now; zero means no expiry.
    pub fn with_ttl(value: RedisValue, ttl_ms: u64) -> Self {
        if ttl_ms == 0 {
            Entry::new(value)
        } else {
            Entry::with_expiry(value, now_millis().saturating_add(ttl_ms))
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Time-to-live in milliseconds, or -1 if no expiry, or -2 if expired.
    pub fn ttl_millis(&self) -> i64 {
        match self.expires_at {
            None => -1,
            Some(exp) => {
                let now = now_millis();
                if now >= exp { -2 } else { (exp - now) as i64 }
            }
        }
    }

    /// Time-to-live in seconds, rounded, with the same -1/-2 conventions.
    pub fn ttl_seconds(&self) -> i64 {
        match self.ttl_millis() {
            ms if ms < 0 => ms,
            ms => (ms + 500) / 1000,
        }
    }
}

/// Get current time in milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
