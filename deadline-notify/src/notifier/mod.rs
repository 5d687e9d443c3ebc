// Deadline notification daemon and client
// Shared between the daemon binary, the watch CLI, and the tests

pub mod config;
pub mod logging;
pub mod notifications;
pub mod notify;
pub mod protocol;
pub mod scanner;
pub mod server;
pub mod session;
pub mod store;
pub mod task;

// Blocking daemon client (Unix only for now)
#[cfg(unix)]
pub mod client;
