//! Paced, sequential batch dispatch.
//!
//! Sends an ordered batch of [`PersonalizedMessage`]s through a
//! [`Delivery`] capability one at a time:
//!
//! ```text
//! Idle ──▶ Running ─┬─▶ Dispatching ──▶ Recording ──▶ Pacing ─┐
//!                   │        ▲                                │
//!                   │        └────────────────────────────────┘
//!                   └─▶ Complete (after the last Recording)
//! ```
//!
//! - The batch is rejected up front when empty or over `max_batch_size`.
//! - At most one delivery is in flight; `results[i]` belongs to `messages[i]`.
//! - A failed (or panicking) delivery becomes a failed [`DispatchResult`] and
//!   the batch moves on. There are no retries.
//! - The progress observer runs after each result, before pacing.
//! - `pacing_interval` separates every consecutive pair of deliveries; there
//!   is no wait after the last one.
//!
//! Cancellation and per-call timeouts are the delivery implementation's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::error::{DeliveryError, DispatchError};
use crate::personalize::PersonalizedMessage;

/// Default delay between two deliveries.
pub const DEFAULT_PACING_MS: u64 = 500;

/// Default ceiling on messages per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// What the delivery service returns on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub delivery_id: Option<String>,
}

impl DeliveryReceipt {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            delivery_id: Some(id.into()),
        }
    }
}

/// Capability that delivers (or stores) one message.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, message: &PersonalizedMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Adapts an async closure into a [`Delivery`].
///
/// ```rust,ignore
/// let delivery = DeliveryFn(|message: PersonalizedMessage| async move {
///     Ok(DeliveryReceipt::with_id(format!("local-{}", message.recipient_address)))
/// });
/// ```
pub struct DeliveryFn<F>(pub F);

#[async_trait]
impl<F, Fut> Delivery for DeliveryFn<F>
where
    F: Fn(PersonalizedMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<DeliveryReceipt, DeliveryError>> + Send,
{
    async fn deliver(&self, message: &PersonalizedMessage) -> Result<DeliveryReceipt, DeliveryError> {
        (self.0)(message.clone()).await
    }
}

/// Whether a batch is sent or stored as drafts.
///
/// `"schedule"` is accepted on the wire and means draft: nothing is ever
/// sent later by this system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Now,
    #[serde(alias = "schedule")]
    Draft,
}

impl DeliveryMode {
    /// Mode actually used: any requested send time turns the batch into drafts.
    pub fn effective(self, scheduled_at: Option<DateTime<Utc>>) -> Self {
        if scheduled_at.is_some() {
            DeliveryMode::Draft
        } else {
            self
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Delay between consecutive deliveries
    pub pacing_interval: Duration,
    /// Largest accepted batch
    pub max_batch_size: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            pacing_interval: Duration::from_millis(DEFAULT_PACING_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Outcome for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub succeeded: bool,
    pub delivery_id: Option<String>,
    pub error_detail: Option<String>,
    pub recipient_address: String,
}

impl DispatchResult {
    pub fn success(recipient_address: impl Into<String>, delivery_id: Option<String>) -> Self {
        Self {
            succeeded: true,
            delivery_id,
            error_detail: None,
            recipient_address: recipient_address.into(),
        }
    }

    pub fn failure(recipient_address: impl Into<String>, error_detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            delivery_id: None,
            error_detail: Some(error_detail.into()),
            recipient_address: recipient_address.into(),
        }
    }
}

/// Running count for one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub completed_count: usize,
    pub total_count: usize,
}

impl BatchProgress {
    /// Completion in percent (0-100).
    pub fn percent(&self) -> u8 {
        if self.total_count == 0 {
            return 100;
        }
        ((self.completed_count * 100) / self.total_count) as u8
    }
}

/// Aggregate counts over a finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub sent_count: usize,
    pub failed_count: usize,
    pub results: Vec<DispatchResult>,
}

impl BatchSummary {
    pub fn from_results(results: Vec<DispatchResult>) -> Self {
        let sent_count = results.iter().filter(|r| r.succeeded).count();
        Self {
            total: results.len(),
            sent_count,
            failed_count: results.len() - sent_count,
            results,
        }
    }
}

/// Reject batches that must not start.
pub fn check_batch_size(size: usize, max_batch_size: usize) -> Result<(), DispatchError> {
    if size == 0 {
        return Err(DispatchError::EmptyBatch);
    }
    if size > max_batch_size {
        return Err(DispatchError::BatchTooLarge {
            size,
            max: max_batch_size,
        });
    }
    Ok(())
}

/// Dispatch without a progress observer.
pub async fn dispatch<D>(
    messages: &[PersonalizedMessage],
    delivery: &D,
    options: &DispatchOptions,
) -> Result<Vec<DispatchResult>, DispatchError>
where
    D: Delivery + ?Sized,
{
    dispatch_with_progress(messages, delivery, options, |_, _| {}).await
}

/// Dispatch `messages` in order, calling `on_progress` after each result.
///
/// Returns [`DispatchError`] only for rejected batches, before any delivery.
pub async fn dispatch_with_progress<D, F>(
    messages: &[PersonalizedMessage],
    delivery: &D,
    options: &DispatchOptions,
    mut on_progress: F,
) -> Result<Vec<DispatchResult>, DispatchError>
where
    D: Delivery + ?Sized,
    F: FnMut(BatchProgress, &DispatchResult),
{
    check_batch_size(messages.len(), options.max_batch_size)?;

    let total_count = messages.len();
    let mut results = Vec::with_capacity(total_count);

    for (i, message) in messages.iter().enumerate() {
        let result = deliver_one(delivery, message).await;

        results.push(result);
        let progress = BatchProgress {
            completed_count: results.len(),
            total_count,
        };
        if let Some(last) = results.last() {
            on_progress(progress, last);
        }

        if i + 1 < total_count && !options.pacing_interval.is_zero() {
            tokio::time::sleep(options.pacing_interval).await;
        }
    }

    Ok(results)
}

/// One attempt; every failure mode ends up in the result.
async fn deliver_one<D>(delivery: &D, message: &PersonalizedMessage) -> DispatchResult
where
    D: Delivery + ?Sized,
{
    let address = message.recipient_address.clone();

    match AssertUnwindSafe(delivery.deliver(message)).catch_unwind().await {
        Ok(Ok(receipt)) => DispatchResult::success(address, receipt.delivery_id),
        Ok(Err(e)) => DispatchResult::failure(address, e.to_string()),
        Err(panic) => DispatchResult::failure(address, panic_message(panic.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Delivery panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Delivery panicked: {}", s)
    } else {
        "Delivery panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn message(address: &str) -> PersonalizedMessage {
        PersonalizedMessage {
            recipient_address: address.to_string(),
            subject: format!("Hi {}", address),
            body: "Body".to_string(),
            source_row: Default::default(),
        }
    }

    fn batch(n: usize) -> Vec<PersonalizedMessage> {
        (1..=n).map(|i| message(&format!("user{}@x.com", i))).collect()
    }

    /// Records calls, tracks concurrency, fails for chosen addresses.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Instant)>>,
        fail_for: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl Recorder {
        fn failing(addresses: &[&str]) -> Self {
            Self {
                fail_for: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Delivery for Recorder {
        async fn deliver(&self, message: &PersonalizedMessage) -> Result<DeliveryReceipt, DeliveryError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls
                .lock()
                .unwrap()
                .push((message.recipient_address.clone(), Instant::now()));

            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.contains(&message.recipient_address) {
                Err(DeliveryError::ApiError("Recipient address rejected".into()))
            } else {
                Ok(DeliveryReceipt::with_id(format!("id-{}", message.recipient_address)))
            }
        }
    }

    fn options(pacing_ms: u64) -> DispatchOptions {
        DispatchOptions {
            pacing_interval: Duration::from_millis(pacing_ms),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_without_delivery() {
        let recorder = Recorder::default();
        let result = dispatch(&[], &recorder, &options(0)).await;

        assert_eq!(result, Err(DispatchError::EmptyBatch));
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_without_delivery() {
        let recorder = Recorder::default();
        let result = dispatch(&batch(101), &recorder, &options(0)).await;

        assert_eq!(
            result,
            Err(DispatchError::BatchTooLarge { size: 101, max: 100 })
        );
        assert_eq!(recorder.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_size_batch_accepted() {
        let recorder = Recorder::default();
        let results = dispatch(&batch(100), &recorder, &options(0)).await.unwrap();

        assert_eq!(results.len(), 100);
        assert_eq!(recorder.call_count(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_in_order_with_progress() {
        let recorder = Recorder::default();
        let messages = batch(5);
        let mut seen = Vec::new();

        let results = dispatch_with_progress(&messages, &recorder, &options(100), |progress, result| {
            seen.push((progress, result.recipient_address.clone()));
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 5);
        for (message, result) in messages.iter().zip(&results) {
            assert_eq!(result.recipient_address, message.recipient_address);
            assert!(result.succeeded);
            assert_eq!(
                result.delivery_id.as_deref(),
                Some(format!("id-{}", message.recipient_address).as_str())
            );
        }

        let counts: Vec<_> = seen.iter().map(|(p, _)| p.completed_count).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert!(seen.iter().all(|(p, _)| p.total_count == 5));
        assert_eq!(seen[2].1, "user3@x.com");

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_every_pair_not_after_last() {
        let recorder = Recorder::default();
        let start = Instant::now();

        dispatch(&batch(3), &recorder, &options(500)).await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        for pair in calls.windows(2) {
            let gap = pair[1].1 - pair[0].1;
            // 20ms delivery + 500ms pacing
            assert!(gap >= Duration::from_millis(520), "gap was {:?}", gap);
        }

        // 3 deliveries, 2 pacing waits
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3 * 20 + 2 * 500));
        assert!(elapsed < Duration::from_millis(3 * 20 + 3 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_isolated() {
        let recorder = Recorder::failing(&["user2@x.com", "user4@x.com"]);

        let results = dispatch(&batch(5), &recorder, &options(10)).await.unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(recorder.call_count(), 5);

        let succeeded: Vec<_> = results.iter().map(|r| r.succeeded).collect();
        assert_eq!(succeeded, vec![true, false, true, false, true]);

        assert_eq!(results[1].delivery_id, None);
        assert!(results[1]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("Recipient address rejected"));
        assert_eq!(results[1].recipient_address, "user2@x.com");
    }

    #[tokio::test]
    async fn test_panicking_delivery_is_recorded_and_batch_continues() {
        let delivery = DeliveryFn(|message: PersonalizedMessage| async move {
            if message.recipient_address == "user2@x.com" {
                panic!("connection reset");
            }
            Ok::<_, DeliveryError>(DeliveryReceipt::with_id("ok"))
        });

        let results = dispatch(&batch(3), &delivery, &options(0)).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].succeeded);
        assert!(!results[1].succeeded);
        assert_eq!(
            results[1].error_detail.as_deref(),
            Some("Delivery panicked: connection reset")
        );
        assert!(results[2].succeeded);
    }

    #[test]
    fn test_summary_reconciles() {
        let summary = BatchSummary::from_results(vec![
            DispatchResult::success("a@x.com", Some("1".into())),
            DispatchResult::failure("b@x.com", "quota exceeded"),
            DispatchResult::success("c@x.com", None),
        ]);

        assert_eq!(summary.total, 3);
        assert_eq!(summary.sent_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.sent_count + summary.failed_count, summary.total);
    }

    #[test]
    fn test_mode_resolution() {
        let mode: DeliveryMode = serde_json::from_str("\"schedule\"").unwrap();
        assert_eq!(mode, DeliveryMode::Draft);

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(DeliveryMode::Now.effective(Some(later)), DeliveryMode::Draft);
        assert_eq!(DeliveryMode::Now.effective(None), DeliveryMode::Now);
    }

    #[test]
    fn test_progress_percent() {
        let progress = BatchProgress {
            completed_count: 1,
            total_count: 3,
        };
        assert_eq!(progress.percent(), 33);
    }
}
