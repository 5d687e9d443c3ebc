//! Test utilities for async/daemon tests
//!
//! Polling assertions that replace arbitrary sleeps, plus small task
//! fixtures shared by the unit and integration tests.

use crate::notifier::store::{JsonFileTaskStore, StoreError};
use crate::notifier::task::{Task, TaskStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

/// Assert that an async condition eventually becomes true within a timeout.
///
/// Retries `f` every `interval` until it returns `Ok`, panicking with the
/// last error once `timeout` has elapsed.
///
/// # Example
///
/// ```rust,ignore
/// # use std::time::Duration;
/// # async fn example() {
/// use deadline_notify_lib::test_utils::assert_eventually;
///
/// // Wait up to 3 seconds for the first notify frame
/// let batch = assert_eventually(
///     "first notify frame",
///     Duration::from_secs(3),
///     Duration::from_millis(50),
///     || async {
///         match received.lock().await.first() {
///             Some(batch) => Ok(batch.clone()),
///             None => Err("nothing pushed yet"),
///         }
///     },
/// )
/// .await;
/// # }
/// ```
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = std::time::Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }

                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Boolean form of [`assert_eventually`]
pub async fn assert_eventually_bool<F, Fut>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, interval, || {
        let check = f();
        async move {
            if check.await {
                Ok(())
            } else {
                Err("condition never became true")
            }
        }
    })
    .await
}

/// Task whose deadline is `hours` from now (negative for past due)
pub fn task_due_in(id: &str, hours: i64, status: TaskStatus) -> Task {
    Task::new(
        id,
        format!("Task {}", id),
        Utc::now() + ChronoDuration::hours(hours),
        status,
    )
}

/// Seed a task file the way the daemon expects to find it
pub fn write_tasks_file(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    JsonFileTaskStore::new(path).save_all(tasks)
}
