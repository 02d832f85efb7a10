//! Retry policy for connection-establishment commands.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::{CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY_MS};
use super::error::{CameraError, CameraResult};

/// Fixed-delay retry policy.
///
/// `max_attempts` counts the first try, so `3` means one try plus two retries.
/// [`run`](Self::run) retries only errors that report
/// [`is_retriable`](super::error::CameraError::is_retriable);
/// [`run_any`](Self::run_any) also retries device status errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CONNECT_ATTEMPTS,
            delay_ms: CONNECT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay_ms: 0,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// attempts run out.
    pub fn run<T, F>(&self, name: &str, op: F) -> CameraResult<T>
    where
        F: FnMut() -> CameraResult<T>,
    {
        self.run_while(name, CameraError::is_retriable, op)
    }

    /// Like [`run`](Self::run), but a non-zero device status is retried too.
    /// Used for commands the firmware may reject while it is still busy.
    /// A closed connection is never retried.
    pub fn run_any<T, F>(&self, name: &str, op: F) -> CameraResult<T>
    where
        F: FnMut() -> CameraResult<T>,
    {
        self.run_while(name, |e| !matches!(e, CameraError::NotConnected), op)
    }

    fn run_while<T, F>(
        &self,
        name: &str,
        retry: impl Fn(&CameraError) -> bool,
        mut op: F,
    ) -> CameraResult<T>
    where
        F: FnMut() -> CameraResult<T>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = name, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if retry(&e) && attempt < attempts => {
                    warn!(op = name, attempt, error = %e, "transient failure, retrying");
                    if self.delay_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.delay_ms));
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
