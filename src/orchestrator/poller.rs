//! Submit-and-poll state machine for one optimization job.
//!
//! One call to [`run_job`] owns one job lifecycle: a single creation call,
//! then status polls on a fixed interval until a terminal status, the
//! cancel flag, or the wall-clock bound stops it. Transient poll failures
//! are retried with capped backoff; only the server can fail a job.

use crate::api::OptimizeApi;
use crate::model::{JobEvent, JobOutcome, OptimizeError, OptimizeParams};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

/// Cap for the error backoff between failed poll requests.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub poll_interval: Duration,
    /// Wall-clock bound for the whole job; `None` polls until terminal.
    pub job_timeout: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// Discrete states of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Submitting,
    Polling,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Backoff for the n-th consecutive poll-request failure (n >= 1). The RNG
/// is scoped to this call: holding one across the poll awaits would keep
/// the job future pinned to a single thread.
fn error_backoff(interval: Duration, consecutive_errors: u32) -> Duration {
    let doubled = interval.saturating_mul(2u32.saturating_pow(consecutive_errors - 1));
    let capped = doubled.min(MAX_POLL_BACKOFF);
    capped.mul_f64(rand::thread_rng().gen_range(0.75..1.25))
}

/// Run one job to its terminal outcome.
///
/// The caller decides what to do with the outcome; this function never
/// touches the history store. The prompt must already be non-empty after
/// trimming (the controller enforces the no-op rule before spawning).
pub(crate) async fn run_job(
    api: Arc<dyn OptimizeApi>,
    cfg: JobConfig,
    token: String,
    prompt: String,
    params: OptimizeParams,
    event_tx: UnboundedSender<JobEvent>,
    cancel: Arc<AtomicBool>,
) -> JobOutcome {
    let mut phase = JobPhase::Idle;
    tracing::debug!(?phase, "job run starting");

    if cancel.load(Ordering::Relaxed) {
        return JobOutcome::Failed {
            error: OptimizeError::Cancelled,
        };
    }
    phase = JobPhase::Submitting;
    tracing::debug!(?phase, "submitting job");

    let job_id = match api.submit_job(&token, &prompt, &params).await {
        Ok(resp) => resp.job_id,
        Err(e) => {
            tracing::warn!(error = %e, "job submission failed");
            phase = JobPhase::Failed;
            tracing::debug!(?phase, "job run finished");
            return JobOutcome::Failed {
                error: OptimizeError::SubmissionFailed,
            };
        }
    };
    let _ = event_tx.send(JobEvent::Submitted {
        job_id: job_id.clone(),
    });

    phase = JobPhase::Polling;
    tracing::debug!(?phase, job_id, "job created; polling for completion");
    let deadline = cfg.job_timeout.map(|t| Instant::now() + t);
    let mut consecutive_errors: u32 = 0;

    let outcome = loop {
        if cancel.load(Ordering::Relaxed) {
            break JobOutcome::Failed {
                error: OptimizeError::Cancelled,
            };
        }

        match api.job_status(&job_id).await {
            Ok(resp) => {
                // A response that lands after cancellation is discarded,
                // never applied.
                if cancel.load(Ordering::Relaxed) {
                    break JobOutcome::Failed {
                        error: OptimizeError::Cancelled,
                    };
                }
                consecutive_errors = 0;
                let _ = event_tx.send(JobEvent::Polled {
                    status: resp.status.clone(),
                });
                match resp.status.as_str() {
                    "completed" if resp.final_prompt.is_some() => {
                        break JobOutcome::Improved {
                            final_prompt: resp.final_prompt.unwrap_or_default(),
                        };
                    }
                    "failed" => {
                        let detail = resp.error.unwrap_or_else(|| "unknown error".to_string());
                        break JobOutcome::Failed {
                            error: OptimizeError::JobFailed(detail),
                        };
                    }
                    // `pending`, `running`, a bare `completed` without a
                    // final prompt, or anything unknown: not terminal yet.
                    _ => {}
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!(
                    job_id,
                    consecutive_errors,
                    error = %e,
                    "poll request failed; will retry"
                );
            }
        }

        let delay = if consecutive_errors == 0 {
            cfg.poll_interval
        } else {
            error_backoff(cfg.poll_interval, consecutive_errors)
        };
        tokio::time::sleep(delay).await;

        if let Some(d) = deadline {
            if Instant::now() >= d {
                break JobOutcome::Failed {
                    error: OptimizeError::TimedOut,
                };
            }
        }
    };

    phase = match &outcome {
        JobOutcome::Improved { .. } => JobPhase::Succeeded,
        JobOutcome::Failed {
            error: OptimizeError::Cancelled,
        } => JobPhase::Cancelled,
        JobOutcome::Failed { .. } => JobPhase::Failed,
    };
    debug_assert!(phase.is_terminal());
    tracing::debug!(?phase, job_id, "job run finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::api::ApiError;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    #[test]
    fn job_future_moves_across_worker_threads() {
        fn assert_send<T: Send>(_: &T) {}
        let api: Arc<dyn OptimizeApi> = Arc::new(FakeApi::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let fut = run_job(
            api,
            JobConfig::default(),
            "tok".into(),
            "p".into(),
            OptimizeParams::default(),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        assert_send(&fut);
    }

    #[test]
    fn backoff_is_capped_with_bounded_jitter() {
        let interval = Duration::from_secs(1);
        for n in 1..=10 {
            let d = error_backoff(interval, n);
            assert!(d <= MAX_POLL_BACKOFF.mul_f64(1.25));
            assert!(d >= interval.mul_f64(0.75));
        }
        // Deep into the error run the base is pinned at the cap.
        let d = error_backoff(interval, 10);
        assert!(d >= MAX_POLL_BACKOFF.mul_f64(0.75));
    }

    #[test]
    fn only_finished_phases_are_terminal() {
        assert!(!JobPhase::Idle.is_terminal());
        assert!(!JobPhase::Submitting.is_terminal());
        assert!(!JobPhase::Polling.is_terminal());
        assert!(JobPhase::Succeeded.is_terminal());
        assert!(JobPhase::Failed.is_terminal());
        assert!(JobPhase::Cancelled.is_terminal());
    }

    fn cfg() -> JobConfig {
        JobConfig {
            poll_interval: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(60)),
        }
    }

    async fn run(
        api: Arc<FakeApi>,
        cfg: JobConfig,
        prompt: &str,
    ) -> (JobOutcome, Vec<JobEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = run_job(
            api,
            cfg,
            "tok".into(),
            prompt.into(),
            OptimizeParams::default(),
            tx,
            cancel,
        )
        .await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (outcome, events)
    }

    #[tokio::test(start_paused = true)]
    async fn submits_once_before_any_poll() {
        let api = Arc::new(FakeApi::new());
        api.push_poll(Ok(FakeApi::completed("better")));
        let (outcome, _) = run(api.clone(), cfg(), "explain gravity").await;
        assert_eq!(api.submit_count(), 1);
        assert_eq!(api.poll_count(), 1);
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: "better".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_completed_yields_exact_final_prompt() {
        let final_prompt =
            "Explain gravity using Newtonian and general-relativistic frameworks...";
        let api = Arc::new(FakeApi::new());
        api.push_submit(Ok(crate::model::SubmitResponse {
            job_id: "j1".into(),
        }));
        api.push_poll(Ok(FakeApi::pending()));
        api.push_poll(Ok(FakeApi::completed(final_prompt)));

        let (outcome, events) = run(api.clone(), cfg(), "explain gravity").await;
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: final_prompt.into()
            }
        );
        assert_eq!(api.poll_count(), 2);
        assert_eq!(api.poll_calls.lock().unwrap()[0], "j1");
        assert!(matches!(&events[0], JobEvent::Submitted { job_id } if job_id == "j1"));
    }

    #[tokio::test(start_paused = true)]
    async fn server_reported_failure_carries_detail() {
        let api = Arc::new(FakeApi::new());
        api.push_submit(Ok(crate::model::SubmitResponse {
            job_id: "j2".into(),
        }));
        api.push_poll(Ok(FakeApi::failed("prompt too short")));

        let (outcome, _) = run(api, cfg(), "x").await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: OptimizeError::JobFailed("prompt too short".into())
            }
        );
        assert_eq!(outcome.display_text(), "Error: prompt too short");
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failure_is_terminal_without_polling() {
        let api = Arc::new(FakeApi::new());
        api.push_submit(Err(ApiError::Malformed));
        let (outcome, events) = run(api.clone(), cfg(), "explain gravity").await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: OptimizeError::SubmissionFailed
            }
        );
        assert_eq!(api.poll_count(), 0);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_without_final_prompt_is_not_terminal() {
        let api = Arc::new(FakeApi::new());
        api.push_poll(Ok(crate::model::PollResponse {
            status: "completed".into(),
            final_prompt: None,
            error: None,
        }));
        api.push_poll(Ok(FakeApi::completed("done")));
        let (outcome, _) = run(api.clone(), cfg(), "p").await;
        assert_eq!(api.poll_count(), 2);
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: "done".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_poll_failure_is_retried_not_fatal() {
        let api = Arc::new(FakeApi::new());
        api.push_poll(Err(ApiError::Malformed));
        api.push_poll(Err(ApiError::Rejected("503".into())));
        api.push_poll(Ok(FakeApi::completed("done")));
        let (outcome, _) = run(api.clone(), cfg(), "p").await;
        assert_eq!(api.poll_count(), 3);
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: "done".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_bound_times_the_job_out() {
        let api = Arc::new(FakeApi::new());
        let cfg = JobConfig {
            poll_interval: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(3)),
        };
        // No scripted polls: the fake answers "pending" forever.
        let (outcome, _) = run(api, cfg, "p").await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: OptimizeError::TimedOut
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_submit_issues_no_network_calls() {
        let api = Arc::new(FakeApi::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = run_job(
            api.clone(),
            cfg(),
            "tok".into(),
            "p".into(),
            OptimizeParams::default(),
            tx,
            cancel,
        )
        .await;
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: OptimizeError::Cancelled
            }
        );
        assert_eq!(api.submit_count(), 0);
        assert_eq!(api.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_loop_stops_further_polls() {
        let api = Arc::new(FakeApi::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run_job(
            api.clone(),
            cfg(),
            "tok".into(),
            "p".into(),
            OptimizeParams::default(),
            tx,
            cancel.clone(),
        ));
        // Let a couple of polls happen, then cancel.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.store(true, Ordering::Relaxed);
        let outcome = handle.await.unwrap();
        let polls_at_cancel = api.poll_count();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.poll_count(), polls_at_cancel);
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: OptimizeError::Cancelled
            }
        );
    }
}
