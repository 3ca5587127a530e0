//! Retries for optimistic-concurrency conflicts.

use crate::error::Result;
use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::debug;

const MAX_ATTEMPTS: u32 = 5;
const INITIAL_DELAY: Duration = Duration::from_millis(10);

/// Runs `op` until it succeeds, fails with something other than a conflict, or runs out of
/// attempts. `op` must re-read the object it writes on every attempt.
pub async fn retry_on_conflict<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(error) if error.is_conflict() && attempt < MAX_ATTEMPTS => {
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let wait = delay.mul_f64(jitter);
                debug!(%what, attempt, ?wait, %error, "Conflict; retrying");
                tokio::time::sleep(wait).await;
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}
