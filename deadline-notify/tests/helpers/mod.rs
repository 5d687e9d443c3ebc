// Shared helpers for integration tests; not every test binary uses all of them
#![allow(dead_code)]

pub mod daemon_guard;
pub mod in_process;
pub mod polling;
