// Deadline notification module (shared between daemon, CLI, and tests)
pub mod notifier;

// Polling assertions and task fixtures for async/daemon tests
// (only compiled for unit tests or with the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
