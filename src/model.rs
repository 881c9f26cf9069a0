use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Parameters sent with a job submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizeParams {
    pub max_iterations: u32,
    pub min_consecutive_improvements: u32,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            min_consecutive_improvements: 1,
        }
    }
}

/// Authenticated user descriptor as returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub total_prompts: u64,
    #[serde(default)]
    pub total_jobs: u64,
}

/// The current authenticated session. A token is present exactly when a
/// user is present; "no session" is modeled as `Option<Session>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub token: String,
    pub issued_at: String,
}

/// One completed optimization, as listed in the history sidebar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: String,
    // The history endpoint has shipped both field spellings.
    #[serde(alias = "original_prompt")]
    pub initial_prompt: String,
    #[serde(alias = "improved_prompt")]
    pub final_prompt: String,
    /// 0-100.
    #[serde(default)]
    pub optimization_score: u8,
    pub created_at: String,
}

/// Response to `POST /improve-prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

/// Response to `POST /auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: User,
}

/// Response to `GET /job/{job_id}`.
///
/// Statuses other than `completed`/`failed` (including ones this client does
/// not know about) mean the job is still in flight.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub final_prompt: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal failure modes of one optimization job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OptimizeError {
    /// The job creation call failed or returned an unusable response.
    #[error("could not submit the optimization job")]
    SubmissionFailed,
    /// The server reported the job as failed; carries the server detail verbatim.
    #[error("{0}")]
    JobFailed(String),
    /// The poll loop was stopped by its caller. Never rendered as a user error.
    #[error("optimization cancelled")]
    Cancelled,
    /// The configured wall-clock bound elapsed before a terminal status.
    #[error("optimization timed out")]
    TimedOut,
}

/// Terminal value of one job: exactly one of an improved prompt or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Improved { final_prompt: String },
    Failed { error: OptimizeError },
}

impl JobOutcome {
    /// Render the outcome the way the result pane shows it.
    pub fn display_text(&self) -> String {
        match self {
            JobOutcome::Improved { final_prompt } => final_prompt.clone(),
            JobOutcome::Failed {
                error: OptimizeError::JobFailed(detail),
            } => format!("Error: {detail}"),
            JobOutcome::Failed { error } => error.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            JobOutcome::Failed {
                error: OptimizeError::Cancelled
            }
        )
    }
}

/// Events emitted over the job lifetime and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Submitted { job_id: String },
    Polled { status: String },
    Info(String),
    /// Sent exactly once per run that is still current when it finishes.
    Finished { outcome: JobOutcome },
}

/// Rejected login/register attempt. Non-terminal: the user stays on the
/// auth screen and may retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct AuthError(pub String);
