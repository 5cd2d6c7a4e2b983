//! Context augmentation: attach LLM-generated situating context to chunks.
//!
//! Chunks are processed in contiguous batches of `batch_size`. Every chunk
//! in a batch is an independent request on its own task, and the whole
//! batch is joined before the next one starts, which bounds in-flight
//! requests to `batch_size`.
//!
//! A request that errors, times out, or returns only whitespace is retried
//! with exponential backoff (`retry_base × 2^n`, exponent capped at 5). A
//! chunk that exhausts its retries gets an empty-string context and an
//! [`AugmentationFailure`] in the report; other chunks are unaffected.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use scripture_harness_core::error::AugmentationFailure;
use scripture_harness_core::models::Chunk;

use crate::config::ContextConfig;
use crate::llm::{context_prompt, ContextGenerator};
use crate::progress::{AugmentProgressEvent, AugmentProgressReporter};

/// Runtime parameters for [`ContextAugmenter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base: Duration,
    pub request_timeout: Duration,
    pub batch_delay: Duration,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for AugmentConfig {
    fn from(config: &ContextConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            request_timeout: Duration::from_secs(config.timeout_secs),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

/// Outcome counts for one augmentation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AugmentReport {
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<AugmentationFailure>,
    pub elapsed: Duration,
}

impl AugmentReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct ContextAugmenter {
    generator: Arc<dyn ContextGenerator>,
    config: AugmentConfig,
}

impl ContextAugmenter {
    pub fn new(generator: Arc<dyn ContextGenerator>, config: AugmentConfig) -> Self {
        Self { generator, config }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Return copies of `chunks` with `context` set, in input order.
    pub async fn augment(
        &self,
        chunks: &[Chunk],
        progress: &dyn AugmentProgressReporter,
    ) -> (Vec<Chunk>, AugmentReport) {
        let started = Instant::now();
        let total = chunks.len();
        let batch_size = self.config.batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        let mut contexts: Vec<Option<Result<String, AugmentationFailure>>> = vec![None; total];
        let mut failed = 0usize;

        info!(chunks = total, batches, generator = self.generator.name(), "augmenting chunks");

        for (batch_idx, batch) in chunks.chunks(batch_size).enumerate() {
            progress.report(AugmentProgressEvent::BatchStarted {
                batch: batch_idx + 1,
                batches,
            });
            let offset = batch_idx * batch_size;

            let mut set = JoinSet::new();
            for (i, chunk) in batch.iter().enumerate() {
                let generator = Arc::clone(&self.generator);
                let prompt = context_prompt(&chunk.text);
                let chunk_id = chunk.id.clone();
                let config = self.config;
                set.spawn(async move {
                    let outcome =
                        generate_with_retry(generator.as_ref(), &prompt, &chunk_id, &config).await;
                    (offset + i, outcome)
                });
            }

            // Completion order is arbitrary; results are placed by slot.
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((slot, outcome)) => {
                        if let Err(failure) = &outcome {
                            warn!(
                                chunk_id = %failure.chunk_id,
                                attempts = failure.attempts,
                                reason = %failure.reason,
                                "context generation failed"
                            );
                            failed += 1;
                        }
                        contexts[slot] = Some(outcome);
                    }
                    Err(e) => {
                        warn!(error = %e, "context generation task aborted");
                        failed += 1;
                    }
                }
            }

            progress.report(AugmentProgressEvent::ChunksDone {
                done: (offset + batch.len()).min(total),
                total,
                failed,
            });

            if batch_idx + 1 < batches && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        let mut report = AugmentReport {
            total,
            ..AugmentReport::default()
        };
        let augmented = chunks
            .iter()
            .zip(contexts)
            .map(|(chunk, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    Err(AugmentationFailure {
                        chunk_id: chunk.id.clone(),
                        attempts: 0,
                        reason: "generation task aborted".to_string(),
                    })
                });
                let context = match outcome {
                    Ok(context) => {
                        report.succeeded += 1;
                        context
                    }
                    Err(failure) => {
                        report.failures.push(failure);
                        String::new()
                    }
                };
                Chunk {
                    context: Some(context),
                    ..chunk.clone()
                }
            })
            .collect();

        report.elapsed = started.elapsed();
        info!(
            succeeded = report.succeeded,
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "augmentation finished"
        );
        (augmented, report)
    }
}

/// Delay before retry number `retry` (1-based).
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(1u32 << (retry.saturating_sub(1)).min(5))
}

async fn generate_with_retry(
    generator: &dyn ContextGenerator,
    prompt: &str,
    chunk_id: &str,
    config: &AugmentConfig,
) -> Result<String, AugmentationFailure> {
    let mut reason = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(config.retry_base, attempt)).await;
        }

        match tokio::time::timeout(config.request_timeout, generator.generate(prompt)).await {
            Ok(Ok(text)) => {
                let text = text.trim();
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
                reason = "empty response".to_string();
            }
            Ok(Err(e)) => reason = format!("{:#}", e),
            Err(_) => reason = format!("timed out after {:?}", config.request_timeout),
        }
        debug!(chunk_id, attempt, %reason, "generation attempt failed");
    }

    Err(AugmentationFailure {
        chunk_id: chunk_id.to_string(),
        attempts: config.max_retries + 1,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;
    use scripture_harness_core::chunk::chunk_verses;
    use scripture_harness_core::models::Verse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fast_config(batch_size: usize, max_retries: u32) -> AugmentConfig {
        AugmentConfig {
            batch_size,
            max_retries,
            retry_base: Duration::from_millis(1),
            request_timeout: Duration::from_millis(200),
            batch_delay: Duration::ZERO,
        }
    }

    fn chunks(n: u32) -> Vec<Chunk> {
        let verses: Vec<Verse> = (1..=n)
            .map(|c| Verse::new("Psalms", c, 1, format!("psalm {} verse one", c), Vec::new()))
            .collect();
        chunk_verses(&verses, 7, 0.5, 15).unwrap()
    }

    /// Echoes the chunk text back, failing forever for texts containing `poison`.
    struct EchoGenerator {
        poison: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContextGenerator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(p) = &self.poison {
                if prompt.contains(p.as_str()) {
                    anyhow::bail!("model crashed");
                }
            }
            let text = prompt
                .split("<passage>\n")
                .nth(1)
                .and_then(|rest| rest.split("\n</passage>").next())
                .unwrap_or_default();
            Ok(format!("  context for {}  ", text))
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct FlakyGenerator {
        failures_left: Mutex<u32>,
    }

    #[async_trait]
    impl ContextGenerator for FlakyGenerator {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Ok("   ".to_string());
            }
            Ok("recovered".to_string())
        }
    }

    /// Records call start/finish order and the peak number of calls in flight.
    #[derive(Default)]
    struct TrackingGenerator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        // (psalm number, started)
        events: Mutex<Vec<(u32, bool)>>,
    }

    #[async_trait]
    impl ContextGenerator for TrackingGenerator {
        fn name(&self) -> &str {
            "tracking"
        }
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            let psalm: u32 = prompt
                .split("psalm ")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            {
                let mut events = self.events.lock().unwrap();
                events.push((psalm, true));
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            {
                let mut events = self.events.lock().unwrap();
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                events.push((psalm, false));
            }
            Ok(format!("psalm {}", psalm))
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl ContextGenerator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test]
    async fn test_all_chunks_receive_context_in_order() {
        let input = chunks(7);
        let generator = Arc::new(EchoGenerator {
            poison: None,
            calls: AtomicUsize::new(0),
        });
        let augmenter = ContextAugmenter::new(generator.clone(), fast_config(3, 2));

        let (out, report) = augmenter.augment(&input, &NoProgress).await;

        assert_eq!(out.len(), 7);
        assert_eq!(report.total, 7);
        assert_eq!(report.succeeded, 7);
        assert_eq!(report.failed(), 0);
        for (before, after) in input.iter().zip(&out) {
            assert_eq!(before.id, after.id);
            assert_eq!(
                after.context.as_deref(),
                Some(format!("context for {}", before.text).as_str())
            );
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 7);
        // Input is untouched.
        assert!(input.iter().all(|c| c.context.is_none()));
    }

    #[tokio::test]
    async fn test_failed_chunk_is_isolated() {
        let input = chunks(9);
        let generator = Arc::new(EchoGenerator {
            poison: Some("psalm 2 verse".to_string()),
            calls: AtomicUsize::new(0),
        });
        let augmenter = ContextAugmenter::new(generator.clone(), fast_config(3, 2));

        let (out, report) = augmenter.augment(&input, &NoProgress).await;

        assert_eq!(report.succeeded, 8);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].chunk_id, "psalms_2_1");
        assert_eq!(report.failures[0].attempts, 3);
        assert!(report.failures[0].reason.contains("model crashed"));

        assert_eq!(out[1].context.as_deref(), Some(""));
        for (i, chunk) in out.iter().enumerate() {
            if i != 1 {
                assert!(chunk.has_context(), "chunk {} lost its context", chunk.id);
            }
        }
        // 8 successes + 3 attempts for the poisoned chunk.
        assert_eq!(generator.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_blank_responses_are_retried() {
        let input = chunks(1);
        let generator = Arc::new(FlakyGenerator {
            failures_left: Mutex::new(2),
        });
        let augmenter = ContextAugmenter::new(generator, fast_config(5, 3));
        let (out, report) = augmenter.augment(&input, &NoProgress).await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(out[0].context.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn test_retries_exhausted_on_blank_responses() {
        let input = chunks(1);
        let generator = Arc::new(FlakyGenerator {
            failures_left: Mutex::new(10),
        });
        let augmenter = ContextAugmenter::new(generator, fast_config(5, 1));
        let (out, report) = augmenter.augment(&input, &NoProgress).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].reason, "empty response");
        assert_eq!(out[0].context.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let input = chunks(2);
        let augmenter = ContextAugmenter::new(Arc::new(SlowGenerator), fast_config(2, 0));
        let (out, report) = augmenter.augment(&input, &NoProgress).await;
        assert_eq!(report.failed(), 2);
        assert!(report.failures[0].reason.contains("timed out"));
        assert!(out.iter().all(|c| c.context.as_deref() == Some("")));
    }

    #[tokio::test]
    async fn test_batches_bound_in_flight_requests() {
        let input = chunks(10);
        let generator = Arc::new(TrackingGenerator::default());
        let augmenter = ContextAugmenter::new(generator.clone(), fast_config(3, 0));

        let (out, report) = augmenter.augment(&input, &NoProgress).await;
        assert_eq!(report.succeeded, 10);
        assert_eq!(out[9].context.as_deref(), Some("psalm 10"));

        // Batches of 3 run concurrently, never more.
        assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
        assert_eq!(generator.in_flight.load(Ordering::SeqCst), 0);

        // Psalm n is chunk n-1, in batch (n-1)/3. No call may start before
        // every call of the earlier batches has finished.
        let events = generator.events.lock().unwrap();
        assert_eq!(events.len(), 20);
        let mut finished = std::collections::HashSet::new();
        for &(psalm, started) in events.iter() {
            assert!(psalm >= 1, "unrecognised prompt");
            if started {
                let batch = (psalm - 1) / 3;
                for earlier in 1..=batch * 3 {
                    assert!(
                        finished.contains(&earlier),
                        "psalm {} started before psalm {} finished",
                        psalm,
                        earlier
                    );
                }
            } else {
                finished.insert(psalm);
            }
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let augmenter = ContextAugmenter::new(
            Arc::new(SlowGenerator),
            fast_config(5, 3),
        );
        let (out, report) = augmenter.augment(&[], &NoProgress).await;
        assert!(out.is_empty());
        assert_eq!(report.total, 0);
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 6), Duration::from_millis(3200));
        assert_eq!(backoff_delay(base, 12), Duration::from_millis(3200));
    }
}
