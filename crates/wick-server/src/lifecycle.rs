use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::SecretRecord;

/// Largest accepted payload, matching the HTTP body cap.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// Largest accepted TTL: 100 years in minutes. Keeps `expires_at` far from
/// i64 overflow; anything above this is a caller mistake, not a secret.
pub const MAX_TTL_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

// ── Collaborator contracts ───────────────────────────────────────────────────

/// The four operations the lifecycle manager needs from durable storage.
///
/// `decrement_views` must be indivisible: decrement iff the stored counter is
/// currently > 0, reporting whether it applied and the resulting value. The
/// manager never does read-modify-write on the counter itself; that is the
/// store's one transactional duty.
pub trait RecordStore: Send + Sync {
    fn insert(&self, handle: &str, record: &SecretRecord) -> Result<()>;
    fn get(&self, handle: &str) -> Result<Option<SecretRecord>>;
    /// `Ok(Some(n))` — applied, `n` is the post-decrement value.
    /// `Ok(None)` — precondition failed: counter already zero or row absent.
    fn decrement_views(&self, handle: &str) -> Result<Option<u32>>;
    /// Idempotent; deleting an absent handle is `Ok(false)`.
    fn delete(&self, handle: &str) -> Result<bool>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn insert(&self, handle: &str, record: &SecretRecord) -> Result<()> {
        (**self).insert(handle, record)
    }
    fn get(&self, handle: &str) -> Result<Option<SecretRecord>> {
        (**self).get(handle)
    }
    fn decrement_views(&self, handle: &str) -> Result<Option<u32>> {
        (**self).decrement_views(handle)
    }
    fn delete(&self, handle: &str) -> Result<bool> {
        (**self).delete(handle)
    }
}

/// Supplies the current time. Injected so tests can freeze and advance it.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock time in unix milliseconds.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

/// Terminal outcomes of the two lifecycle operations. The first four are
/// legitimate record states returned to the caller, never retried; `Storage`
/// is a collaborator I/O fault surfaced as-is.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Handle unknown, or the record was already deleted.
    #[error("not found")]
    NotFound,
    /// The time window has passed.
    #[error("expired")]
    Expired,
    /// The view budget is spent.
    #[error("view budget exhausted")]
    Exhausted,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Returned by `create`: everything the caller needs to share the secret.
#[derive(Debug, PartialEq)]
pub struct Receipt {
    pub handle: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub remaining_views: u32,
}

/// Returned by a successful `consume`. `remaining_views` is the
/// post-decrement value; zero means this was the final view.
#[derive(Debug, PartialEq)]
pub struct Consumed {
    pub payload: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub remaining_views: u32,
}

// ── Manager ──────────────────────────────────────────────────────────────────

/// Owns the create/consume/expire/evict state machine for one-time secrets.
///
/// Stateless between calls: the store is the only shared mutable resource, so
/// correctness under concurrent callers (even in separate processes) rests
/// entirely on the store's conditional decrement being atomic. The commit
/// point of a consume is that store mutation; a caller that abandons the call
/// afterwards has still spent the view.
#[derive(Clone)]
pub struct Lifecycle<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: RecordStore> Lifecycle<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Store a new secret. `ttl_minutes` may be fractional; `view_budget` of
    /// zero is legal and yields a record that is exhausted on first consume.
    /// Creation is all-or-nothing: an insert failure leaves no record behind.
    pub fn create(
        &self,
        payload: String,
        ttl_minutes: f64,
        view_budget: u32,
    ) -> Result<Receipt, LifecycleError> {
        if payload.is_empty() {
            return Err(LifecycleError::InvalidArgument(
                "payload must not be empty".into(),
            ));
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(LifecycleError::InvalidArgument(
                "payload exceeds 1 MiB limit".into(),
            ));
        }
        if !ttl_minutes.is_finite() || ttl_minutes <= 0.0 {
            return Err(LifecycleError::InvalidArgument(
                "ttl_minutes must be a positive number".into(),
            ));
        }
        if ttl_minutes > MAX_TTL_MINUTES {
            return Err(LifecycleError::InvalidArgument(
                "ttl_minutes exceeds the 100-year maximum".into(),
            ));
        }

        let created_at = self.clock.now_millis();
        let expires_at = created_at + (ttl_minutes * 60_000.0).round() as i64;
        let handle = generate_handle();

        let record = SecretRecord {
            payload,
            created_at,
            expires_at,
            remaining_views: view_budget,
        };
        self.store.insert(&handle, &record)?;

        debug!(%handle, expires_at, view_budget, "created secret");
        Ok(Receipt {
            handle,
            created_at,
            expires_at,
            remaining_views: view_budget,
        })
    }

    /// Read a secret and spend one view.
    ///
    /// Race-safe under any number of concurrent callers on the same handle:
    /// the only mutation is the store's conditional decrement, so for a view
    /// budget of N exactly N calls ever succeed. Deletion on expiry or on the
    /// final view is best-effort; a record that fails to delete is re-checked
    /// on every later access and stays unconsumable.
    pub fn consume(&self, handle: &str) -> Result<Consumed, LifecycleError> {
        let record = self.store.get(handle)?.ok_or(LifecycleError::NotFound)?;

        if record.is_expired(self.clock.now_millis()) {
            self.delete_best_effort(handle, "expired");
            return Err(LifecycleError::Expired);
        }

        // The atomic check-and-decrement. A concurrent consumer that took the
        // last view between our `get` and here makes this return `None`.
        let remaining_views = match self.store.decrement_views(handle)? {
            Some(n) => n,
            None => return Err(LifecycleError::Exhausted),
        };

        if remaining_views == 0 {
            self.delete_best_effort(handle, "final view");
        }

        Ok(Consumed {
            payload: record.payload.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            remaining_views,
        })
    }

    /// Opportunistic deletion. Failure is logged and swallowed: the record is
    /// re-evaluated against time and views on every access, so leaving it
    /// behind is safe.
    fn delete_best_effort(&self, handle: &str, reason: &str) {
        match self.store.delete(handle) {
            Ok(true) => debug!(%handle, reason, "deleted dead secret"),
            Ok(false) => {}
            Err(e) => warn!(%handle, reason, error = %e, "failed to delete dead secret"),
        }
    }
}

/// Generate a fresh handle: 16 random bytes as 32 hex chars. Uniqueness is
/// the generator's responsibility; collisions at this size are not a concern.
pub fn generate_handle() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
