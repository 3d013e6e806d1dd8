//! Polling fetch of a machine's plan secret.
//!
//! The watch-based lookup is what connect requests use; this fetch is for
//! callers that only need to wait for the plan body itself to be written.

use std::future::Future;
use std::time::Duration;

use capr_client::StoreError;
use crds::PLAN_SECRET_DATA_KEY;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::error::DeliveryError;

/// Exponential backoff between plan secret reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanBackoff {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub attempts: usize,
}

impl Default for PlanBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(2),
            attempts: 10,
        }
    }
}

impl PlanBackoff {
    /// Delay after the given zero-based attempt
    pub fn delay(&self, attempt: usize) -> Duration {
        let mut delay = self.initial;
        for _ in 0..attempt {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.cap {
                return self.cap;
            }
        }
        delay.min(self.cap)
    }
}

fn has_plan(secret: &Secret) -> bool {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(PLAN_SECRET_DATA_KEY))
        .is_some_and(|p| !p.0.is_empty())
}

/// Read the plan secret through `fetch` until it carries a non-empty plan.
///
/// NotFound and an empty plan are retried; any other error aborts.
pub async fn wait_for_plan_secret<F, Fut>(backoff: PlanBackoff, mut fetch: F) -> Result<Secret, DeliveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Secret, StoreError>>,
{
    for attempt in 0..backoff.attempts {
        match fetch().await {
            Ok(secret) if has_plan(&secret) => return Ok(secret),
            Ok(_) => debug!(attempt, "Plan secret has no plan yet"),
            Err(e) if e.is_not_found() => debug!(attempt, "Plan secret not found yet"),
            Err(e) => return Err(e.into()),
        }
        if attempt + 1 < backoff.attempts {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }
    Err(DeliveryError::PlanTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plan_secret(plan: &str) -> Secret {
        Secret {
            data: Some(BTreeMap::from([(
                PLAN_SECRET_DATA_KEY.to_string(),
                ByteString(plan.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = PlanBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(7), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_plan_written() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let secret = wait_for_plan_secret(PlanBackoff::default(), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(StoreError::not_found("Secret", "ns", "plan-m1")),
                    1 => Ok(plan_secret("")),
                    _ => Ok(plan_secret("{\"instructions\":[]}")),
                }
            }
        })
        .await
        .unwrap();

        assert!(has_plan(&secret));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_error_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = wait_for_plan_secret(PlanBackoff::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<Secret, _>(StoreError::Conflict("boom".to_string())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DeliveryError::Store(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_times_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let err = wait_for_plan_secret(PlanBackoff::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(plan_secret("")) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DeliveryError::PlanTimeout));
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
