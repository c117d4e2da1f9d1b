use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;

/// One cached resource: the serialized value plus when it was written and how
/// long it stays valid.
///
/// The payload is the value's JSON text, embedded verbatim in the on-disk file,
/// so a `put` followed by a `get` sees exactly the bytes that were written.
/// Entries are never mutated; a new write replaces the whole entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    payload: Box<RawValue>,
    written_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new<T: Serialize + ?Sized>(
        value: &T,
        written_at: DateTime<Utc>,
        ttl: Duration,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            payload: serde_json::value::to_raw_value(value)?,
            written_at,
            ttl,
        })
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }

    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// `now - written_at >= ttl`. A TTL too large for chrono never expires.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now - self.written_at >= ttl,
            Err(_) => false,
        }
    }

    pub fn value<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.payload.get())
    }

    /// Serialize the entry for the disk tier.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// A typed cache read, carrying the metadata callers use for staleness display.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CachedData<T> {
    pub fn age_minutes_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        self.age_display_at(Utc::now())
    }

    pub fn age_display_at(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes_at(now);
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
