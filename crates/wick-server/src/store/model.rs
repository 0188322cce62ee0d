use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

/// Stored in redb as bincode-encoded bytes, keyed by handle.
/// The payload is zeroized on drop; all metadata stays plaintext so the
/// background sweep can evict without touching the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ZeroizeOnDrop)]
pub struct SecretRecord {
    /// The secret payload exactly as supplied at creation.
    pub payload: String,
    /// Unix timestamp (milliseconds) when the record was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) after which the record is expired.
    pub expires_at: i64,
    /// Views left before the record self-destructs. Never goes below zero;
    /// mutated only through the store's conditional decrement.
    pub remaining_views: u32,
}

impl SecretRecord {
    /// True once the time window has passed. Expiry is checked with `>=` so a
    /// record whose `expires_at` equals `now` is already dead.
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// True when the view budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_views == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: i64, remaining_views: u32) -> SecretRecord {
        SecretRecord {
            payload: "s".into(),
            created_at: 0,
            expires_at,
            remaining_views,
        }
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let r = record(1_000, 1);
        assert!(!r.is_expired(999));
        assert!(r.is_expired(1_000));
        assert!(r.is_expired(1_001));
    }

    #[test]
    fn zero_views_is_exhausted() {
        assert!(record(1_000, 0).is_exhausted());
        assert!(!record(1_000, 1).is_exhausted());
    }
}
