//! Bounded retry for Steam operations.

use crate::steam::SteamError;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Run `op` up to `attempts` times, sleeping `delay` between attempts.
///
/// Terminal auth errors short-circuit immediately; retrying cannot fix
/// them. The last transient error is returned once the budget runs out.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    delay: Duration,
    label: &str,
    mut op: F,
) -> Result<T, SteamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SteamError>>,
{
    let mut last_error = None;
    for attempt in 1..=attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_terminal_auth() => return Err(e),
            Err(e) => {
                debug!(attempt, label, error = %e, "operation failed, will retry");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error.unwrap_or_else(|| SteamError::Rpc(format!("{label}: retry budget exhausted"))))
}
