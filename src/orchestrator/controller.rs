//! Job lifecycle controller.
//!
//! Owns submit/cancel/resubmit orchestration and relays job events to
//! presentation layers. At most one poll loop is live at a time: a new
//! submission cancels the previous loop before its own submit call goes
//! out, and events from a superseded loop can never reach the UI because
//! each run gets its own event channel which is dropped on supersession.

use crate::api::OptimizeApi;
use crate::model::{JobEvent, JobOutcome, OptimizeError, OptimizeParams};
use crate::orchestrator::poller::{run_job, JobConfig};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Commands emitted by UI layers to control job activity.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Submit {
        token: String,
        prompt: String,
        params: OptimizeParams,
    },
    CancelJob,
    Quit,
}

/// Handle for the currently live job task.
struct RunCtx {
    cancel: Arc<AtomicBool>,
    generation: u64,
    job_rx: Option<UnboundedReceiver<JobEvent>>,
    handle: Option<tokio::task::JoinHandle<JobOutcome>>,
}

/// What the live run produced on this select round.
enum RunMsg {
    Event(JobEvent),
    ChannelClosed,
    Done(Result<JobOutcome, tokio::task::JoinError>),
}

/// Await the next message from the live run, preferring queued progress
/// events over task completion so nothing is lost when both are ready.
async fn next_run_msg(ctx: &mut RunCtx) -> RunMsg {
    let rx_opt = &mut ctx.job_rx;
    let handle_opt = &mut ctx.handle;
    tokio::select! {
        biased;
        ev = async {
            match rx_opt.as_mut() {
                Some(rx) => rx.recv().await,
                None => futures::future::pending().await,
            }
        } => {
            match ev {
                Some(ev) => RunMsg::Event(ev),
                None => RunMsg::ChannelClosed,
            }
        }
        join_res = async {
            match handle_opt.as_mut() {
                Some(h) => h.await,
                None => futures::future::pending().await,
            }
        } => {
            RunMsg::Done(join_res)
        }
    }
}

/// Orchestrate job runs based on UI commands and forward events from the
/// current run only.
pub(crate) async fn run_controller(
    api: Arc<dyn OptimizeApi>,
    cfg: JobConfig,
    event_tx: UnboundedSender<JobEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut generation: u64 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Submit { token, prompt, params }) => {
                        // Empty input is a no-op: no network call, no state change.
                        if prompt.trim().is_empty() {
                            continue;
                        }
                        // Cancel the previous loop before the new submit is
                        // issued. Its task is left to notice the flag and wind
                        // down on its own; its channel is dropped here, so any
                        // late event it emits goes nowhere.
                        if let Some(prev) = run_ctx.take() {
                            prev.cancel.store(true, Ordering::Relaxed);
                            tracing::debug!(generation = prev.generation, "superseded running job");
                        }
                        generation += 1;
                        let cancel = Arc::new(AtomicBool::new(false));
                        let (job_tx, job_rx) = mpsc::unbounded_channel::<JobEvent>();
                        let handle = tokio::spawn(run_job(
                            api.clone(),
                            cfg.clone(),
                            token,
                            prompt,
                            params,
                            job_tx,
                            cancel.clone(),
                        ));
                        run_ctx = Some(RunCtx {
                            cancel,
                            generation,
                            job_rx: Some(job_rx),
                            handle: Some(handle),
                        });
                    }
                    Some(UiCommand::CancelJob) => {
                        if let Some(ctx) = run_ctx.take() {
                            ctx.cancel.store(true, Ordering::Relaxed);
                            tracing::debug!(generation = ctx.generation, "job cancelled by user");
                            let _ = event_tx.send(JobEvent::Finished {
                                outcome: JobOutcome::Failed {
                                    error: OptimizeError::Cancelled,
                                },
                            });
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        if let Some(ctx) = run_ctx.take() {
                            ctx.cancel.store(true, Ordering::Relaxed);
                        }
                        break;
                    }
                }
            }
            // Do not take the JoinHandle before completion is observed here;
            // dropping it in another branch would lose the terminal outcome.
            msg = async {
                match run_ctx.as_mut() {
                    Some(ctx) => next_run_msg(ctx).await,
                    None => futures::future::pending().await,
                }
            } => {
                match msg {
                    RunMsg::Event(ev) => {
                        let _ = event_tx.send(ev);
                    }
                    RunMsg::ChannelClosed => {
                        // Sender dropped at task end; stop selecting on the
                        // channel so it cannot spin while the handle resolves.
                        if let Some(ctx) = run_ctx.as_mut() {
                            ctx.job_rx.take();
                        }
                    }
                    RunMsg::Done(join_res) => {
                        // Drain progress events the run emitted before finishing.
                        if let Some(mut rx) = run_ctx.as_mut().and_then(|c| c.job_rx.take()) {
                            while let Ok(ev) = rx.try_recv() {
                                let _ = event_tx.send(ev);
                            }
                        }
                        run_ctx = None;
                        let outcome = match join_res {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                tracing::warn!(error = %e, "job task join failed");
                                JobOutcome::Failed {
                                    error: OptimizeError::SubmissionFailed,
                                }
                            }
                        };
                        let _ = event_tx.send(JobEvent::Finished { outcome });
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeApi;
    use crate::model::SubmitResponse;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(60);

    struct Harness {
        api: Arc<FakeApi>,
        cmd_tx: UnboundedSender<UiCommand>,
        event_rx: UnboundedReceiver<JobEvent>,
        controller: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(api: FakeApi) -> Harness {
        let api = Arc::new(api);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cfg = JobConfig {
            poll_interval: Duration::from_secs(1),
            job_timeout: Some(Duration::from_secs(120)),
        };
        let controller = tokio::spawn(run_controller(api.clone(), cfg, event_tx, cmd_rx));
        Harness {
            api,
            cmd_tx,
            event_rx,
            controller,
        }
    }

    fn submit(h: &Harness, prompt: &str) {
        h.cmd_tx
            .send(UiCommand::Submit {
                token: "tok".into(),
                prompt: prompt.into(),
                params: OptimizeParams::default(),
            })
            .unwrap();
    }

    async fn next_event(h: &mut Harness) -> JobEvent {
        timeout(WAIT, h.event_rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn next_finished(h: &mut Harness) -> JobOutcome {
        loop {
            if let JobEvent::Finished { outcome } = next_event(h).await {
                return outcome;
            }
        }
    }

    async fn shutdown(h: Harness) {
        h.cmd_tx.send(UiCommand::Quit).unwrap();
        let _ = timeout(WAIT, h.controller).await;
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_prompt_is_a_noop() {
        let mut h = start(FakeApi::new());
        submit(&h, "   \n\t ");
        h.cmd_tx.send(UiCommand::Quit).unwrap();
        timeout(WAIT, h.controller).await.unwrap().unwrap().unwrap();
        assert_eq!(h.api.submit_count(), 0);
        assert!(h.event_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_job_reports_terminal_result() {
        let api = FakeApi::new();
        api.push_poll(Ok(FakeApi::pending()));
        api.push_poll(Ok(FakeApi::completed("much better prompt")));
        let mut h = start(api);
        submit(&h, "explain gravity");
        let outcome = next_finished(&mut h).await;
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: "much better prompt".into()
            }
        );
        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_resubmission_applies_only_the_newer_job() {
        let api = FakeApi::new();
        api.push_submit(Ok(SubmitResponse { job_id: "jA".into() }));
        api.push_poll(Ok(FakeApi::pending()));
        api.push_submit(Ok(SubmitResponse { job_id: "jB".into() }));
        api.push_poll(Ok(FakeApi::completed("B result")));
        let mut h = start(api);

        submit(&h, "prompt A");
        // Wait until A is live (submitted and polled once), then supersede it.
        loop {
            match next_event(&mut h).await {
                JobEvent::Polled { .. } => break,
                _ => {}
            }
        }
        submit(&h, "prompt B");

        let outcome = next_finished(&mut h).await;
        assert_eq!(
            outcome,
            JobOutcome::Improved {
                final_prompt: "B result".into()
            }
        );
        // A's loop was cancelled: it never polled again after supersession.
        let polls = h.api.poll_calls.lock().unwrap().clone();
        assert_eq!(polls.iter().filter(|id| id.as_str() == "jA").count(), 1);
        // Exactly one terminal result ever surfaced.
        assert!(h.event_rx.try_recv().is_err());
        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_after_cancel_is_discarded() {
        let gate = Arc::new(Semaphore::new(0));
        let mut api = FakeApi::new();
        api.poll_gate = Some(gate.clone());
        api.push_poll(Ok(FakeApi::completed("late result")));
        let mut h = start(api);

        submit(&h, "explain gravity");
        // The first poll is now parked on the gate.
        loop {
            if let JobEvent::Submitted { .. } = next_event(&mut h).await {
                break;
            }
        }
        h.cmd_tx.send(UiCommand::CancelJob).unwrap();
        let outcome = next_finished(&mut h).await;
        assert!(outcome.is_cancelled());

        // Release the in-flight response after cancellation; it must not
        // produce any further event or state change.
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.event_rx.try_recv().is_err());
        assert_eq!(h.api.poll_count(), 1);
        shutdown(h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_without_running_job_is_silent() {
        let mut h = start(FakeApi::new());
        h.cmd_tx.send(UiCommand::CancelJob).unwrap();
        h.cmd_tx.send(UiCommand::Quit).unwrap();
        timeout(WAIT, h.controller).await.unwrap().unwrap().unwrap();
        assert!(h.event_rx.try_recv().is_err());
    }
}
