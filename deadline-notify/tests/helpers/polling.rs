use std::fmt;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY: Duration = Duration::from_millis(25);
const MAX_DELAY: Duration = Duration::from_millis(500);

/// A blocking wait that ran out of time
#[derive(Debug)]
pub struct WaitError {
    desc: String,
    attempts: u32,
    waited: Duration,
    last_seen: Option<String>,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last seen: {}",
            self.attempts,
            self.waited,
            self.desc,
            self.last_seen.as_deref().unwrap_or("<nothing>")
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `check` with exponential backoff until it yields `Ok`.
///
/// `Err(note)` means "not yet"; the last note ends up in the timeout error.
pub fn wait_until<T, F>(desc: &str, timeout: Duration, mut check: F) -> Result<T, WaitError>
where
    F: FnMut() -> Result<T, String>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;
    let mut attempts = 0;
    let mut last_seen = None;

    loop {
        attempts += 1;
        match check() {
            Ok(value) => return Ok(value),
            Err(note) => last_seen = Some(note),
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(WaitError {
                desc: desc.to_string(),
                attempts,
                waited: start.elapsed(),
                last_seen,
            });
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll a file until its content satisfies `predicate`
pub fn wait_for_file_content<F>(path: &Path, predicate: F, timeout: Duration) -> Result<String, WaitError>
where
    F: Fn(&str) -> bool,
{
    wait_until(&path.display().to_string(), timeout, || {
        match fs::read_to_string(path) {
            Ok(content) if predicate(&content) => Ok(content),
            Ok(content) => Err(content.trim().to_string()),
            Err(err) => Err(err.to_string()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wait_for_file_content_returns_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("daemon.pid");
        fs::write(&file, "4242").unwrap();

        let content = wait_for_file_content(&file, |text| !text.is_empty(), Duration::from_secs(1))
            .expect("should read file immediately");
        assert_eq!(content, "4242");
    }

    #[test]
    fn wait_until_times_out_with_context() {
        let err = wait_until("the impossible", Duration::from_millis(30), || {
            Err::<(), _>("still impossible".to_string())
        })
        .expect_err("should time out");

        let message = err.to_string();
        assert!(message.contains("the impossible"));
        assert!(message.contains("still impossible"));
    }
}
