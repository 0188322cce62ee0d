pub mod handlers;
pub mod lifecycle;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: lifecycle::Lifecycle<store::Store>,
}

pub use lifecycle::{Clock, Consumed, Lifecycle, LifecycleError, Receipt, RecordStore, SystemClock};
pub use server::{run, ServerConfig};

/// Production clock shared across the server and the background sweep.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
