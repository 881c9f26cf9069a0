use crate::model::{JobOutcome, OptimizeError, User};

/// Top-level screen, driven by session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// `restore()` in flight: a loading indicator and nothing else.
    Restoring,
    Auth,
    Dashboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthField {
    Email,
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Prompt,
    History,
}

pub struct UiState {
    pub screen: Screen,

    // Auth form
    pub auth_email: String,
    pub auth_password: String,
    pub auth_field: AuthField,
    pub auth_register_mode: bool,
    pub auth_error: Option<String>,

    // Dashboard
    pub focus: Focus,
    pub prompt_input: String,
    /// Improved prompt or rendered error; mutually exclusive with
    /// `job_running` as a display state.
    pub result: Option<String>,
    pub result_is_error: bool,
    pub job_running: bool,
    pub current_job_id: Option<String>,
    /// Prompt text of the in-flight job, kept for the history entry.
    pub pending_prompt: Option<String>,
    pub last_status: String,
    pub info: String,
    pub user: Option<User>,
    pub history_selected: usize,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            screen: Screen::Restoring,
            auth_email: String::new(),
            auth_password: String::new(),
            auth_field: AuthField::Email,
            auth_register_mode: false,
            auth_error: None,
            focus: Focus::Prompt,
            prompt_input: String::new(),
            result: None,
            result_is_error: false,
            job_running: false,
            current_job_id: None,
            pending_prompt: None,
            last_status: String::new(),
            info: String::new(),
            user: None,
            history_selected: 0,
        }
    }
}

impl UiState {
    /// The submit control is enabled only when no job is in flight and the
    /// input is non-empty after trimming.
    pub fn can_submit(&self) -> bool {
        !self.job_running && !self.prompt_input.trim().is_empty()
    }

    /// Move to the loading display state for a freshly submitted prompt.
    pub fn begin_job(&mut self, prompt: String) {
        self.result = None;
        self.result_is_error = false;
        self.job_running = true;
        self.current_job_id = None;
        self.pending_prompt = Some(prompt);
        self.last_status = "submitting".into();
        self.info.clear();
    }

    /// Apply a terminal outcome. Returns the (initial, final) prompt pair
    /// when the caller should append a history entry.
    pub fn finish_job(&mut self, outcome: &JobOutcome) -> Option<(String, String)> {
        self.job_running = false;
        self.last_status.clear();
        let pending = self.pending_prompt.take();
        match outcome {
            JobOutcome::Improved { final_prompt } => {
                self.result = Some(final_prompt.clone());
                self.result_is_error = false;
                pending.map(|initial| (initial, final_prompt.clone()))
            }
            JobOutcome::Failed {
                error: OptimizeError::Cancelled,
            } => {
                // Not an error to the user; just back to idle.
                self.info = "Cancelled".into();
                None
            }
            failed => {
                self.result = Some(failed.display_text());
                self.result_is_error = true;
                None
            }
        }
    }

    /// Leave the dashboard after logout: form, result, and selection reset.
    pub fn reset_to_auth(&mut self) {
        *self = UiState {
            screen: Screen::Auth,
            ..UiState::default()
        };
    }

    pub fn history_select_next(&mut self, len: usize) {
        if len > 0 && self.history_selected + 1 < len {
            self.history_selected += 1;
        }
    }

    pub fn history_select_prev(&mut self) {
        self.history_selected = self.history_selected.saturating_sub(1);
    }

    /// Clamp selection after the list changed size.
    pub fn clamp_history_selection(&mut self, len: usize) {
        if len == 0 {
            self.history_selected = 0;
        } else if self.history_selected >= len {
            self.history_selected = len - 1;
        }
    }
}

/// Truncate for sidebar rows, mirroring the ellipsis the web UI used.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn submit_gate_requires_idle_and_nonempty_input() {
        let mut s = UiState::default();
        assert!(!s.can_submit());
        s.prompt_input = "  \t ".into();
        assert!(!s.can_submit());
        s.prompt_input = "explain gravity".into();
        assert!(s.can_submit());
        s.job_running = true;
        assert!(!s.can_submit());
    }

    #[test]
    fn loading_and_result_are_mutually_exclusive() {
        let mut s = UiState::default();
        s.prompt_input = "p".into();
        s.begin_job("p".into());
        assert!(s.job_running);
        assert!(s.result.is_none());

        let pair = s.finish_job(&JobOutcome::Improved {
            final_prompt: "better".into(),
        });
        assert!(!s.job_running);
        assert_eq!(s.result.as_deref(), Some("better"));
        assert_eq!(pair, Some(("p".into(), "better".into())));
    }

    #[test]
    fn failed_job_renders_error_and_appends_nothing() {
        let mut s = UiState::default();
        s.begin_job("x".into());
        let pair = s.finish_job(&JobOutcome::Failed {
            error: OptimizeError::JobFailed("prompt too short".into()),
        });
        assert_eq!(pair, None);
        assert!(s.result_is_error);
        assert_eq!(s.result.as_deref(), Some("Error: prompt too short"));
    }

    #[test]
    fn cancelled_job_is_not_shown_as_an_error() {
        let mut s = UiState::default();
        s.begin_job("p".into());
        let pair = s.finish_job(&JobOutcome::Failed {
            error: OptimizeError::Cancelled,
        });
        assert_eq!(pair, None);
        assert!(s.result.is_none());
        assert!(!s.job_running);
    }

    #[test]
    fn history_selection_stays_in_bounds() {
        let mut s = UiState::default();
        s.history_select_next(0);
        assert_eq!(s.history_selected, 0);
        s.history_select_next(3);
        s.history_select_next(3);
        s.history_select_next(3);
        assert_eq!(s.history_selected, 2);
        s.clamp_history_selection(1);
        assert_eq!(s.history_selected, 0);
        s.history_select_prev();
        assert_eq!(s.history_selected, 0);
    }

    #[test]
    fn truncation_adds_ellipsis_only_when_needed() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("a longer prompt", 8), "a longer...");
    }
}
