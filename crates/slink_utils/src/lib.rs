pub mod atomic;
pub mod auth;
pub mod error;
pub mod log_assert;
pub mod net_async;
pub mod net_protocol;
pub mod retry;
pub mod server_shutdown;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
