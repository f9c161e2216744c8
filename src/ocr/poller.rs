//! Bounded exponential backoff polling of an analysis operation.
//!
//! State machine: `pending -> {succeeded, failed, timed_out}`. Each attempt
//! queries the job handle once; a terminal status stops the loop immediately,
//! otherwise the poller sleeps `min(base * 2^attempt, cap)` and tries again,
//! up to a fixed attempt budget. The sleeps are the only suspension points,
//! so concurrent requests' polling loops never block each other.

use metrics::counter;
use std::time::Duration;

use super::{AnalysisJob, AnalysisSource, JobStatus, OcrError};
use crate::config::PollingConfig;
use crate::ocr::extract::AnalyzeOutcome;

/// Backoff parameters for [`poll_until_terminal`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Wait after the first attempt; doubled after each subsequent one
    pub base: Duration,
    /// Ceiling on the per-attempt wait
    pub cap: Duration,
    /// Attempt budget; exhausting it reports a timeout
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Wait applied after attempt `attempt` (0-based): `min(base * 2^attempt, cap)`.
    /// Monotonically non-decreasing in `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponential = self.base.saturating_mul(2u32.saturating_pow(attempt));
        exponential.min(self.cap)
    }
}

impl From<&PollingConfig> for BackoffPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self {
            base: config.base,
            cap: config.cap,
            max_attempts: config.max_attempts,
        }
    }
}

/// Poll `job` until it reaches a terminal state or the attempt budget runs out.
///
/// Terminal outcomes are distinguishable: success returns the analysis
/// payload, a remote-reported failure returns [`OcrError::RemoteFailed`], and
/// an exhausted budget returns [`OcrError::TimedOut`]. No wait is inserted
/// after the final attempt.
pub async fn poll_until_terminal<S>(source: &S, job: &AnalysisJob, policy: &BackoffPolicy) -> Result<AnalyzeOutcome, OcrError>
where
    S: AnalysisSource + ?Sized,
{
    for attempt in 0..policy.max_attempts {
        counter!("scanrelay_ocr_polls_total").increment(1);

        match source.fetch_status(job).await? {
            JobStatus::Succeeded(outcome) => {
                counter!("scanrelay_ocr_jobs_total", "outcome" => "succeeded").increment(1);
                tracing::info!(attempt, "Analysis succeeded");
                return Ok(outcome);
            }
            JobStatus::Failed(message) => {
                counter!("scanrelay_ocr_jobs_total", "outcome" => "failed").increment(1);
                tracing::warn!(attempt, error = %message, "Analysis reported failure");
                return Err(OcrError::RemoteFailed { message });
            }
            JobStatus::Pending => {}
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.delay_after(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Analysis still pending, backing off");
            tokio::time::sleep(delay).await;
        }
    }

    counter!("scanrelay_ocr_jobs_total", "outcome" => "timed_out").increment(1);
    tracing::warn!(attempts = policy.max_attempts, "Analysis polling exhausted its attempt budget");

    Err(OcrError::TimedOut {
        attempts: policy.max_attempts,
    })
}
