//! Timeout enforcement.
//!
//! # Responsibilities
//! - Pick the deadline for a call
//! - Wrap transport calls with that deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other transport errors, since they
//!   count as "server down" for failover

use std::future::Future;
use std::time::Duration;

use crate::config::HttpConfig;
use crate::error::{ClientError, ClientResult, TransportErrorKind};

/// Descriptor override, then context override, then the long-request
/// timeout when asked for, then the configured default.
pub fn resolve_timeout(
    descriptor: Option<Duration>,
    context: Option<Duration>,
    long_request: bool,
    config: &HttpConfig,
) -> Duration {
    descriptor.or(context).unwrap_or_else(|| {
        if long_request {
            config.long_request_timeout()
        } else {
            config.request_timeout()
        }
    })
}

/// Run `fut`, failing with a timeout transport error after `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, url: &str, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::transport(
            url,
            TransportErrorKind::Timeout,
            format!("no response within {:?}", deadline),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence() {
        let config = HttpConfig::default();
        let one = Duration::from_secs(1);
        let two = Duration::from_secs(2);

        assert_eq!(resolve_timeout(Some(one), Some(two), true, &config), one);
        assert_eq!(resolve_timeout(None, Some(two), true, &config), two);
        assert_eq!(
            resolve_timeout(None, None, true, &config),
            Duration::from_secs(6 * 3600)
        );
        assert_eq!(
            resolve_timeout(None, None, false, &config),
            Duration::from_secs(100)
        );
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let result: ClientResult<()> = with_deadline(Duration::from_millis(10), "http://h", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_server_down());
    }

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), "http://h", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
