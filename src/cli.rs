use crate::api::{ApiClient, OptimizeApi};
use crate::history::HistoryStore;
use crate::model::{JobEvent, JobOutcome, OptimizeParams};
use crate::orchestrator::{run_job, JobConfig};
use crate::session::SessionStore;
use crate::storage::CredentialStore;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "promptx",
    version,
    about = "PromptX prompt optimization with optional TUI"
)]
pub struct Cli {
    /// Base URL for the PromptX service
    #[arg(long, default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Print JSON result and exit (no TUI); requires --prompt
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI); requires --prompt
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Prompt to optimize in non-TUI modes
    #[arg(long)]
    pub prompt: Option<String>,

    /// Maximum improvement iterations per job
    #[arg(long, default_value_t = 3)]
    pub max_iterations: u32,

    /// Minimum consecutive improvements before a job stops early
    #[arg(long, default_value_t = 1)]
    pub min_consecutive_improvements: u32,

    /// Interval between job status polls
    #[arg(long, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Maximum wall-clock time to wait for one job ("0s" disables the bound)
    #[arg(long, default_value = "10m")]
    pub job_timeout: humantime::Duration,

    /// Sign in (prompts for credentials), save the session, and exit
    #[arg(long)]
    pub login: bool,

    /// Register a new account, save the session, and exit
    #[arg(long)]
    pub register: bool,

    /// Sign out and clear the stored credential
    #[arg(long)]
    pub logout: bool,
}

/// Build a `JobConfig` from CLI arguments.
pub fn build_job_config(args: &Cli) -> JobConfig {
    let timeout = Duration::from(args.job_timeout);
    JobConfig {
        poll_interval: Duration::from(args.poll_interval),
        job_timeout: (!timeout.is_zero()).then_some(timeout),
    }
}

pub fn build_params(args: &Cli) -> OptimizeParams {
    OptimizeParams {
        max_iterations: args.max_iterations,
        min_consecutive_improvements: args.min_consecutive_improvements,
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    if args.logout {
        return run_logout(&args);
    }
    if args.login || args.register {
        return run_auth(&args).await;
    }

    if args.silent {
        return run_job_once(args, true).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_job_once(args, false).await;
    }

    run_text(args).await
}

fn make_stores(args: &Cli) -> Result<(Arc<dyn OptimizeApi>, SessionStore)> {
    let api: Arc<dyn OptimizeApi> = Arc::new(ApiClient::new(&args.base_url)?);
    let creds = CredentialStore::default_location()?;
    Ok((api.clone(), SessionStore::new(api, creds)))
}

/// Shared setup for the one-shot modes: restore the session or fail with a
/// hint to sign in first.
async fn restored_session(args: &Cli) -> Result<(Arc<dyn OptimizeApi>, SessionStore)> {
    let (api, mut session) = make_stores(args)?;
    if !session.restore().await {
        anyhow::bail!("not signed in. Run `promptx --login` first.");
    }
    Ok((api, session))
}

fn run_logout(args: &Cli) -> Result<()> {
    let (_, mut session) = make_stores(args)?;
    let mut history = HistoryStore::new();
    session.logout(&mut history);
    println!("Signed out.");
    Ok(())
}

async fn run_auth(args: &Cli) -> Result<()> {
    let (_, mut session) = make_stores(args)?;
    let email = inquire::Text::new("Email:").prompt()?;
    let password = inquire::Password::new("Password:")
        .with_display_mode(inquire::PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()?;

    let result = if args.register {
        session.register(&email, &password).await
    } else {
        session.login(&email, &password).await
    };
    match result {
        Ok(()) => {
            let email = session
                .session()
                .map(|s| s.user.email.clone())
                .unwrap_or(email);
            println!("Signed in as {email}.");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("{e}")),
    }
}

fn required_prompt(args: &Cli) -> Result<String> {
    let prompt = args
        .prompt
        .clone()
        .context("--prompt is required in --json/--text mode")?;
    if prompt.trim().is_empty() {
        anyhow::bail!("--prompt must not be empty");
    }
    Ok(prompt)
}

/// JSON shape for `--json` output. Exactly one of `final_prompt`/`error`
/// is populated.
#[derive(Debug, Serialize)]
struct JsonResult<'a> {
    timestamp_utc: String,
    initial_prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Common function to run one job and print its result.
/// `silent` controls whether progress output is suppressed.
async fn run_job_once(args: Cli, silent: bool) -> Result<()> {
    let prompt = required_prompt(&args)?;
    let (api, session) = restored_session(&args).await?;
    let token = session.token().unwrap_or_default().to_string();

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let cancel = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(run_job(
        api,
        build_job_config(&args),
        token,
        prompt.clone(),
        build_params(&args),
        evt_tx,
        cancel,
    ));

    // Consume events; nothing to show in json/silent modes.
    while evt_rx.recv().await.is_some() {}

    let outcome = handle.await.context("job task failed")?;

    let json = JsonResult {
        timestamp_utc: crate::session::now_rfc3339(),
        initial_prompt: &prompt,
        final_prompt: match &outcome {
            JobOutcome::Improved { final_prompt } => Some(final_prompt),
            JobOutcome::Failed { .. } => None,
        },
        error: match &outcome {
            JobOutcome::Improved { .. } => None,
            failed => Some(failed.display_text()),
        },
    };
    let rendered = serde_json::to_string_pretty(&json)?;

    match &outcome {
        JobOutcome::Improved { .. } => {
            println!("{rendered}");
            Ok(())
        }
        failed if silent => {
            // Silent contract: errors only, then exit code 1 from main's
            // error path.
            Err(anyhow::anyhow!("{}", failed.display_text()))
        }
        failed => {
            println!("{rendered}");
            Err(anyhow::anyhow!("{}", failed.display_text()))
        }
    }
}

async fn run_text(args: Cli) -> Result<()> {
    let prompt = required_prompt(&args)?;
    let (api, session) = restored_session(&args).await?;
    let token = session.token().unwrap_or_default().to_string();

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let cancel = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(run_job(
        api,
        build_job_config(&args),
        token,
        prompt.clone(),
        build_params(&args),
        evt_tx,
        cancel,
    ));

    while let Some(ev) = evt_rx.recv().await {
        match ev {
            JobEvent::Submitted { job_id } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Submitted job {job_id}")));
            }
            JobEvent::Polled { status } => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Status: {status}")));
            }
            JobEvent::Info(msg) => {
                let _ = out_tx.send(OutputLine::Stderr(msg));
            }
            JobEvent::Finished { .. } => {}
        }
    }

    let outcome = handle.await.context("job task failed")?;
    let summary = crate::text_summary::build_text_summary(&prompt, &outcome);
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    drop(out_tx);
    let _ = out_handle.await;

    match outcome {
        JobOutcome::Improved { .. } => Ok(()),
        failed => Err(anyhow::anyhow!("{}", failed.display_text())),
    }
}
