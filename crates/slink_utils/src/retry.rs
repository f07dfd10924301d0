use std::{future::Future, time::Duration};

/// Runs `operation` up to `max_attempts` times, sleeping `delay` between attempts, for as long as
/// it fails with an error that `should_retry` accepts.
///
/// The attempt number (starting at 1) is passed to `operation`.
pub async fn async_retry_n<O, R, E, F, P>(
    max_attempts: usize,
    delay: Duration,
    operation: O,
    should_retry: P,
) -> Result<R, E>
where
    F: Future<Output = Result<R, E>>,
    O: Fn(usize) -> F,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }
                tracing::debug!(attempt, max_attempts, ?delay, "retrying after error: {}", e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
