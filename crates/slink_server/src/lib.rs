//! The server side of slink: authenticates backend services and binds each authenticated
//! connection to exactly one invocation group.

mod prelude;

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod observer;
pub mod registry;
pub mod secret_store;
pub mod server;
pub mod session;
