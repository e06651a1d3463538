use std::future::Future;

use crate::gateway::GatewayError;

/// Run a gateway call, retrying it once on any error
///
/// The second failure is returned to the caller, which skips the action
/// for this cycle and reports it.
pub async fn retry_once<T, F, Fut>(action: &str, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!("🔁 {} failed ({}), retrying once", action, first);
            op().await.map_err(|second| {
                tracing::error!("❌ {} failed after retry: {}", action, second);
                second
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_second_time() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_once("get_ticker", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GatewayError::Connectivity("reset".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_one_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry_once("place_order", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::Rejected("insufficient margin".to_string()))
        })
        .await;

        assert_eq!(
            result,
            Err(GatewayError::Rejected("insufficient margin".to_string()))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_on_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_once("get_balance", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, GatewayError>("ok")
        })
        .await;

        tokio_test::assert_ok!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
