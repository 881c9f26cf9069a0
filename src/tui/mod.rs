mod export;
mod help;
mod state;

use crate::api::{ApiClient, OptimizeApi};
use crate::cli::{build_job_config, build_params, Cli};
use crate::history::HistoryStore;
use crate::model::{HistoryEntry, JobEvent, OptimizeParams};
use crate::orchestrator::{run_controller, UiCommand};
use crate::session::{now_rfc3339, SessionStore};
use crate::storage::CredentialStore;
use anyhow::{Context, Result};
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use state::{truncate_text, AuthField, Focus, Screen, UiState};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub async fn run(args: Cli) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, args).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    res
}

async fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, args: Cli) -> Result<()> {
    let api: Arc<dyn OptimizeApi> = Arc::new(ApiClient::new(&args.base_url)?);
    let creds = CredentialStore::default_location()?;
    let mut session = SessionStore::new(api.clone(), creds);
    let mut history = HistoryStore::new();
    let params = build_params(&args);

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<JobEvent>();
    let controller = tokio::spawn(run_controller(
        api.clone(),
        build_job_config(&args),
        event_tx,
        cmd_rx,
    ));

    let mut state = UiState::default();
    let mut show_help = false;

    // One frame of the loading indicator while restore() is in flight.
    terminal.draw(|f| render(f, &state, &history, show_help))?;
    if session.restore().await {
        enter_dashboard(&mut state, &session, &mut history, api.as_ref()).await;
    } else {
        state.screen = Screen::Auth;
    }

    let mut key_events = EventStream::new();
    let mut tick = tokio::time::interval(Duration::from_millis(250));

    loop {
        terminal.draw(|f| render(f, &state, &history, show_help))?;

        tokio::select! {
            ev = event_rx.recv() => {
                match ev {
                    Some(ev) => {
                        if handle_job_event(&mut state, &mut history, ev) {
                            // Pull the canonical list so the placeholder
                            // score is replaced by the server's value.
                            refresh_history(
                                &mut state,
                                session.token(),
                                &mut history,
                                api.as_ref(),
                            )
                            .await;
                        }
                    }
                    None => break,
                }
            }
            maybe_key = key_events.next() => {
                let Some(Ok(Event::Key(key))) = maybe_key else { continue; };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if quit_requested(&key) {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break;
                }
                if key.code == KeyCode::F(1) {
                    show_help = !show_help;
                    continue;
                }
                match state.screen {
                    Screen::Restoring => {}
                    Screen::Auth => {
                        handle_auth_key(&mut state, &mut session, &mut history, api.as_ref(), key)
                            .await;
                    }
                    Screen::Dashboard => {
                        handle_dashboard_key(
                            &mut state,
                            &mut session,
                            &mut history,
                            api.as_ref(),
                            &cmd_tx,
                            &params,
                            key,
                        )
                        .await;
                    }
                }
            }
            _ = tick.tick() => {}
        }
    }

    drop(cmd_tx);
    let _ = controller.await;
    Ok(())
}

fn quit_requested(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
}

/// Switch to the dashboard and pull this user's history from the service.
async fn enter_dashboard(
    state: &mut UiState,
    session: &SessionStore,
    history: &mut HistoryStore,
    api: &dyn OptimizeApi,
) {
    state.screen = Screen::Dashboard;
    state.user = session.session().map(|s| s.user.clone());
    refresh_history(state, session.token(), history, api).await;
}

/// Replace the local history with the canonical server list, which carries
/// the computed optimization scores.
async fn refresh_history(
    state: &mut UiState,
    token: Option<&str>,
    history: &mut HistoryStore,
    api: &dyn OptimizeApi,
) {
    if let Some(token) = token {
        match api.prompt_history(token).await {
            Ok(entries) => history.replace_all(entries),
            Err(e) => {
                tracing::warn!(error = %e, "could not load prompt history");
                state.info = "Could not load history".into();
            }
        }
    }
    state.clamp_history_selection(history.len());
}

/// Apply one job event. Returns true when a job just completed with an
/// improved prompt, signalling the caller to refetch history.
fn handle_job_event(state: &mut UiState, history: &mut HistoryStore, ev: JobEvent) -> bool {
    match ev {
        JobEvent::Submitted { job_id } => {
            state.current_job_id = Some(job_id);
            false
        }
        JobEvent::Polled { status } => {
            state.last_status = status;
            false
        }
        JobEvent::Info(msg) => {
            state.info = msg;
            false
        }
        JobEvent::Finished { outcome } => {
            let job_id = state.current_job_id.take();
            match state.finish_job(&outcome) {
                Some((initial_prompt, final_prompt)) => {
                    // Immediate local row; the score is a placeholder until
                    // the refetch lands.
                    let id = job_id.unwrap_or_else(|| format!("local-{}", now_rfc3339()));
                    history.append(HistoryEntry {
                        id,
                        initial_prompt,
                        final_prompt,
                        optimization_score: 0,
                        created_at: now_rfc3339(),
                    });
                    state.clamp_history_selection(history.len());
                    true
                }
                None => false,
            }
        }
    }
}

async fn handle_auth_key(
    state: &mut UiState,
    session: &mut SessionStore,
    history: &mut HistoryStore,
    api: &dyn OptimizeApi,
    key: KeyEvent,
) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if key.code == KeyCode::Char('t') {
            state.auth_register_mode = !state.auth_register_mode;
            state.auth_error = None;
        }
        return;
    }
    match key.code {
        KeyCode::Tab | KeyCode::Up | KeyCode::Down => {
            state.auth_field = match state.auth_field {
                AuthField::Email => AuthField::Password,
                AuthField::Password => AuthField::Email,
            };
        }
        KeyCode::Backspace => {
            match state.auth_field {
                AuthField::Email => state.auth_email.pop(),
                AuthField::Password => state.auth_password.pop(),
            };
        }
        KeyCode::Char(c) => match state.auth_field {
            AuthField::Email => state.auth_email.push(c),
            AuthField::Password => state.auth_password.push(c),
        },
        KeyCode::Enter => {
            if state.auth_email.trim().is_empty() || state.auth_password.is_empty() {
                state.auth_error = Some("Email and password are required".into());
                return;
            }
            let email = state.auth_email.trim().to_string();
            let password = state.auth_password.clone();
            let result = if state.auth_register_mode {
                session.register(&email, &password).await
            } else {
                session.login(&email, &password).await
            };
            match result {
                Ok(()) => {
                    state.auth_error = None;
                    state.auth_password.clear();
                    enter_dashboard(state, session, history, api).await;
                }
                Err(e) => {
                    state.auth_error = Some(e.to_string());
                }
            }
        }
        _ => {}
    }
}

async fn handle_dashboard_key(
    state: &mut UiState,
    session: &mut SessionStore,
    history: &mut HistoryStore,
    api: &dyn OptimizeApi,
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    params: &OptimizeParams,
    key: KeyEvent,
) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        if key.code == KeyCode::Char('l') {
            // Logout clears session and history before anything else renders.
            if state.job_running {
                let _ = cmd_tx.send(UiCommand::CancelJob);
            }
            session.logout(history);
            state.reset_to_auth();
        }
        return;
    }
    match key.code {
        KeyCode::Esc => {
            if state.job_running {
                let _ = cmd_tx.send(UiCommand::CancelJob);
            }
        }
        KeyCode::Tab => {
            state.focus = match state.focus {
                Focus::Prompt => Focus::History,
                Focus::History => Focus::Prompt,
            };
        }
        _ => match state.focus {
            Focus::Prompt => handle_prompt_key(state, session, cmd_tx, params, key),
            Focus::History => handle_history_key(state, session, history, api, key).await,
        },
    }
}

fn handle_prompt_key(
    state: &mut UiState,
    session: &SessionStore,
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    params: &OptimizeParams,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Enter => {
            if !state.can_submit() {
                return;
            }
            let prompt = state.prompt_input.clone();
            let token = session.token().unwrap_or_default().to_string();
            state.begin_job(prompt.clone());
            let _ = cmd_tx.send(UiCommand::Submit {
                token,
                prompt,
                params: params.clone(),
            });
        }
        KeyCode::Backspace => {
            state.prompt_input.pop();
        }
        KeyCode::Char(c) => {
            state.prompt_input.push(c);
        }
        _ => {}
    }
}

async fn handle_history_key(
    state: &mut UiState,
    session: &SessionStore,
    history: &mut HistoryStore,
    api: &dyn OptimizeApi,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => state.history_select_prev(),
        KeyCode::Down | KeyCode::Char('j') => state.history_select_next(history.len()),
        KeyCode::Enter => {
            if state.job_running {
                state.info = "Wait for the running job to finish".into();
                return;
            }
            let selected_id = history
                .list()
                .get(state.history_selected)
                .map(|e| e.id.clone());
            if let Some(id) = selected_id {
                // Pure projection: repopulates the editor and the result
                // pane without re-running anything.
                if let Some((initial, final_prompt)) = history.load_into_form(&id) {
                    state.prompt_input = initial;
                    state.result = Some(final_prompt);
                    state.result_is_error = false;
                    state.info = "Loaded from history".into();
                }
            }
        }
        KeyCode::Char('r') => {
            if let Some(token) = session.token() {
                match api.prompt_history(token).await {
                    Ok(entries) => {
                        history.replace_all(entries);
                        state.clamp_history_selection(history.len());
                        state.info = "History refreshed".into();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "history refresh failed");
                        state.info = "Could not refresh history".into();
                    }
                }
            }
        }
        KeyCode::Char('y') => {
            if let Some(result) = state.result.as_deref().filter(|_| !state.result_is_error) {
                match export::copy_to_clipboard(result) {
                    Ok(()) => state.info = "Copied to clipboard".into(),
                    Err(e) => state.info = format!("Copy failed: {e:#}"),
                }
            }
        }
        _ => {}
    }
}

fn render(f: &mut Frame, state: &UiState, history: &HistoryStore, show_help: bool) {
    if show_help {
        help::draw_help(f.area(), f);
        return;
    }
    match state.screen {
        Screen::Restoring => render_restoring(f),
        Screen::Auth => render_auth(f, state),
        Screen::Dashboard => render_dashboard(f, state, history),
    }
}

fn render_restoring(f: &mut Frame) {
    let area = centered_rect(40, 20, f.area());
    let p = Paragraph::new("Restoring session…")
        .block(Block::default().borders(Borders::ALL).title("PromptX"));
    f.render_widget(p, area);
}

fn render_auth(f: &mut Frame, state: &UiState) {
    let area = centered_rect(60, 50, f.area());
    let title = if state.auth_register_mode {
        "PromptX — Create account"
    } else {
        "PromptX — Sign in"
    };

    let field_style = |active: bool| {
        if active {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default()
        }
    };
    let masked: String = "•".repeat(state.auth_password.chars().count());

    let mut lines = vec![
        Line::from(""),
        Line::from(vec![
            Span::styled("Email:    ", field_style(state.auth_field == AuthField::Email)),
            Span::raw(state.auth_email.clone()),
            Span::raw(if state.auth_field == AuthField::Email { "▏" } else { "" }),
        ]),
        Line::from(vec![
            Span::styled(
                "Password: ",
                field_style(state.auth_field == AuthField::Password),
            ),
            Span::raw(masked),
            Span::raw(if state.auth_field == AuthField::Password { "▏" } else { "" }),
        ]),
        Line::from(""),
    ];
    if let Some(err) = &state.auth_error {
        lines.push(Line::from(Span::styled(
            err.clone(),
            Style::default().fg(Color::Red),
        )));
        lines.push(Line::from(""));
    }
    lines.push(Line::from(Span::styled(
        "enter submit · tab switch field · ctrl-t toggle register · ctrl-c quit",
        Style::default().fg(Color::DarkGray),
    )));

    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn render_dashboard(f: &mut Frame, state: &UiState, history: &HistoryStore) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(30)])
        .split(f.area());

    render_sidebar(f, cols[0], state, history);
    render_main(f, cols[1], state);
}

fn render_sidebar(f: &mut Frame, area: Rect, state: &UiState, history: &HistoryStore) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(4), Constraint::Length(3)])
        .split(area);

    // User header
    let (email, counters) = match &state.user {
        Some(u) => (
            u.email.clone(),
            format!("{} prompts · {} jobs", u.total_prompts, u.total_jobs),
        ),
        None => ("—".to_string(), String::new()),
    };
    let header = Paragraph::new(vec![
        Line::from(Span::styled(email, Style::default().add_modifier(Modifier::BOLD))),
        Line::from(Span::styled(counters, Style::default().fg(Color::DarkGray))),
    ])
    .block(Block::default().borders(Borders::ALL).title("Account"));
    f.render_widget(header, rows[0]);

    // History list: two lines per entry, selection kept visible.
    let list_area = rows[1];
    let visible = (list_area.height.saturating_sub(2) / 2).max(1) as usize;
    let offset = state.history_selected.saturating_sub(visible.saturating_sub(1));
    let mut lines: Vec<Line> = Vec::new();
    if history.is_empty() {
        lines.push(Line::from(Span::styled(
            "No prompts yet.",
            Style::default().fg(Color::DarkGray),
        )));
        lines.push(Line::from(Span::styled(
            "Optimize your first prompt!",
            Style::default().fg(Color::DarkGray),
        )));
    }
    for (i, entry) in history
        .list()
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
    {
        let selected = i == state.history_selected && state.focus == Focus::History;
        let row_style = if selected {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(truncate_text(&entry.initial_prompt, 26), row_style),
            Span::raw(" "),
            Span::styled(
                format!("{}%", entry.optimization_score),
                Style::default().fg(Color::Green),
            ),
        ]));
        lines.push(Line::from(Span::styled(
            format!("  {}", format_date(&entry.created_at)),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let title = format!("Prompt History ({})", history.len());
    let border_style = if state.focus == Focus::History {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style)
            .title(title),
    );
    f.render_widget(list, list_area);

    let hints = Paragraph::new(Line::from(Span::styled(
        "F1 help · ctrl-l sign out",
        Style::default().fg(Color::DarkGray),
    )))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(hints, rows[2]);
}

fn render_main(f: &mut Frame, area: Rect, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(area);

    // Prompt editor
    let input_border = if state.focus == Focus::Prompt {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };
    let submit_hint = if state.job_running {
        "improving…"
    } else if state.can_submit() {
        "enter to improve"
    } else {
        "type a prompt"
    };
    let input = Paragraph::new(state.prompt_input.as_str())
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(input_border)
                .title(format!("Your prompt — {submit_hint}")),
        );
    f.render_widget(input, rows[0]);

    // Result pane: loading and result are mutually exclusive.
    let result = if state.job_running {
        let status = if state.last_status.is_empty() {
            "working".to_string()
        } else {
            state.last_status.clone()
        };
        Paragraph::new(vec![
            Line::from("Improving…"),
            Line::from(Span::styled(
                format!("status: {status}"),
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .block(Block::default().borders(Borders::ALL).title("Improved Prompt"))
    } else if let Some(text) = &state.result {
        let style = if state.result_is_error {
            Style::default().fg(Color::Red)
        } else {
            Style::default()
        };
        Paragraph::new(Span::styled(text.clone(), style))
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Improved Prompt"))
    } else {
        Paragraph::new(Span::styled(
            "The optimized prompt appears here.",
            Style::default().fg(Color::DarkGray),
        ))
        .block(Block::default().borders(Borders::ALL).title("Improved Prompt"))
    };
    f.render_widget(result, rows[1]);

    let status = Paragraph::new(Line::from(vec![
        Span::raw(state.info.clone()),
    ]))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(status, rows[2]);
}

fn format_date(rfc3339: &str) -> String {
    use time::format_description::well_known::Rfc3339;
    match time::OffsetDateTime::parse(rfc3339, &Rfc3339) {
        Ok(dt) => {
            let fmt = time::macros::format_description!("[month repr:short] [day] [hour]:[minute]");
            dt.format(&fmt).unwrap_or_else(|_| rfc3339.to_string())
        }
        Err(_) => truncate_text(rfc3339, 16),
    }
}

/// Centered sub-rectangle, in percent of the outer area.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vert = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vert[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobOutcome, OptimizeError};
    use pretty_assertions::assert_eq;

    fn finished(outcome: JobOutcome) -> JobEvent {
        JobEvent::Finished { outcome }
    }

    #[test]
    fn completed_job_appends_exactly_one_history_entry() {
        let mut state = UiState::default();
        let mut history = HistoryStore::new();
        state.begin_job("explain gravity".into());
        handle_job_event(
            &mut state,
            &mut history,
            JobEvent::Submitted { job_id: "j1".into() },
        );
        handle_job_event(
            &mut state,
            &mut history,
            finished(JobOutcome::Improved {
                final_prompt: "a better prompt".into(),
            }),
        );
        assert_eq!(history.len(), 1);
        let entry = &history.list()[0];
        assert_eq!(entry.id, "j1");
        assert_eq!(entry.initial_prompt, "explain gravity");
        assert_eq!(entry.final_prompt, "a better prompt");
        assert!(!state.job_running);
    }

    #[test]
    fn failed_job_appends_no_history_entry() {
        let mut state = UiState::default();
        let mut history = HistoryStore::new();
        state.begin_job("x".into());
        handle_job_event(
            &mut state,
            &mut history,
            finished(JobOutcome::Failed {
                error: OptimizeError::JobFailed("prompt too short".into()),
            }),
        );
        assert!(history.is_empty());
        assert_eq!(state.result.as_deref(), Some("Error: prompt too short"));
    }

    #[test]
    fn duplicate_finish_does_not_duplicate_history() {
        let mut state = UiState::default();
        let mut history = HistoryStore::new();
        state.begin_job("p".into());
        handle_job_event(
            &mut state,
            &mut history,
            JobEvent::Submitted { job_id: "j1".into() },
        );
        let outcome = JobOutcome::Improved {
            final_prompt: "f".into(),
        };
        handle_job_event(&mut state, &mut history, finished(outcome.clone()));
        // A second terminal event for the same job (cannot happen through the
        // controller, but the store stays idempotent regardless).
        state.begin_job("p".into());
        state.current_job_id = Some("j1".into());
        handle_job_event(&mut state, &mut history, finished(outcome));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn only_an_improved_finish_requests_a_history_refresh() {
        let mut state = UiState::default();
        let mut history = HistoryStore::new();
        state.begin_job("p".into());
        assert!(!handle_job_event(
            &mut state,
            &mut history,
            JobEvent::Polled { status: "pending".into() },
        ));
        assert!(handle_job_event(
            &mut state,
            &mut history,
            finished(JobOutcome::Improved { final_prompt: "f".into() }),
        ));
        state.begin_job("p2".into());
        assert!(!handle_job_event(
            &mut state,
            &mut history,
            finished(JobOutcome::Failed {
                error: OptimizeError::Cancelled,
            }),
        ));
    }

    #[tokio::test]
    async fn refresh_replaces_placeholder_score_with_server_value() {
        use crate::api::testing::FakeApi;

        let api = FakeApi::new();
        api.history_results.lock().unwrap().push_back(Ok(vec![HistoryEntry {
            id: "j1".into(),
            initial_prompt: "explain gravity".into(),
            final_prompt: "a better prompt".into(),
            optimization_score: 85,
            created_at: "2026-08-29T00:00:00Z".into(),
        }]));

        let mut state = UiState::default();
        let mut history = HistoryStore::new();
        state.begin_job("explain gravity".into());
        handle_job_event(
            &mut state,
            &mut history,
            JobEvent::Submitted { job_id: "j1".into() },
        );
        handle_job_event(
            &mut state,
            &mut history,
            finished(JobOutcome::Improved {
                final_prompt: "a better prompt".into(),
            }),
        );
        assert_eq!(history.list()[0].optimization_score, 0);

        refresh_history(&mut state, Some("tok"), &mut history, &api).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history.list()[0].optimization_score, 85);
    }

    #[test]
    fn date_formatting_falls_back_on_unparseable_input() {
        assert_eq!(format_date("not a date"), "not a date");
        assert!(format_date("2026-08-29T14:03:00Z").starts_with("Aug 29"));
    }
}
