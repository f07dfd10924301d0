//! The service side of slink: authenticates to a slink server and invokes operations in the
//! granted invocation group.

pub mod connection;
pub mod error;
pub mod hosts;
pub mod login_manager;

pub use connection::{AuthenticatedConnection, ServiceClient};
pub use error::ClientError;
pub use hosts::{GameHost, HostRepo, StaticHosts};
pub use login_manager::{LoginConfig, LoginManager};
