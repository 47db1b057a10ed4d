//! Full-screen live dashboard.
//!
//! Persistent panes for each pipeline step plus a log pane. The dashboard is
//! driven from the orchestrating thread only; engine workers never touch it.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use tracing::info;

use crate::ui::components::{render_footer, render_log, render_panel};
use crate::ui::log_layer::{lock_log, SharedLog};

const KEY_POLL: Duration = Duration::from_millis(100);
const DEFAULT_FOOTER: &str = "Press Ctrl+C to cancel at any time";

/// Surface the orchestrator drives.
pub trait Frontend {
    fn set_overview(&mut self, lines: Vec<String>);
    fn set_discovery(&mut self, lines: Vec<String>, percent: Option<f64>);
    fn set_checking(&mut self, lines: Vec<String>, percent: Option<f64>);
    fn set_upload(&mut self, lines: Vec<String>, percent: Option<f64>);
    fn set_summary(&mut self, lines: Vec<String>);
    fn set_footer(&mut self, text: &str);

    /// Append a plain line to the log pane.
    fn log(&mut self, line: &str);

    fn redraw(&mut self) -> Result<()>;

    /// Ask a yes/no question in the log pane and wait for the answer.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Hold the final screen until the user presses `q`.
    fn wait_for_quit(&mut self) -> Result<()>;

    /// Non-blocking check for Ctrl+C or Esc while a stage is running.
    fn cancel_requested(&mut self) -> Result<bool>;
}

/// Keys understood by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Cancel,
}

/// Source of key presses.
pub trait KeySource {
    /// Wait up to `timeout` for a key.
    fn next_key(&mut self, timeout: Duration) -> Result<Option<Key>>;

    /// Consume pending input without blocking and report whether it held a
    /// cancel key.
    fn cancel_requested(&mut self) -> Result<bool>;
}

fn map_key(code: KeyCode, modifiers: KeyModifiers) -> Option<Key> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Cancel),
        KeyCode::Char(c) => Some(Key::Char(c.to_ascii_lowercase())),
        KeyCode::Esc => Some(Key::Cancel),
        _ => None,
    }
}

/// Reads keys from the terminal through crossterm.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn next_key(&mut self, timeout: Duration) -> Result<Option<Key>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(map_key(key.code, key.modifiers)),
            _ => Ok(None),
        }
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        // Other keys typed mid-stage are dropped.
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && map_key(key.code, key.modifiers) == Some(Key::Cancel) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Pre-recorded keys, for tests and non-interactive runs. `'\u{3}'` (ETX,
/// what Ctrl+C sends) stands for a cancel key.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    keys: VecDeque<Key>,
}

impl ScriptedKeys {
    pub fn new(keys: &str) -> Self {
        Self {
            keys: keys
                .chars()
                .map(|c| if c == '\u{3}' { Key::Cancel } else { Key::Char(c) })
                .collect(),
        }
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self, _timeout: Duration) -> Result<Option<Key>> {
        // An exhausted script behaves like Ctrl+C so nothing blocks forever.
        Ok(Some(self.keys.pop_front().unwrap_or(Key::Cancel)))
    }

    /// Only a scripted cancel at the head of the queue counts. Plain keys stay
    /// queued for the next prompt.
    fn cancel_requested(&mut self) -> Result<bool> {
        if self.keys.front() == Some(&Key::Cancel) {
            self.keys.pop_front();
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaneContent {
    pub lines: Vec<String>,
    pub percent: Option<f64>,
}

impl PaneContent {
    fn waiting(text: &str) -> Self {
        Self {
            lines: vec![text.to_string()],
            percent: None,
        }
    }
}

/// Everything shown on screen except the log.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    pub overview: Vec<String>,
    pub discovery: PaneContent,
    pub checking: PaneContent,
    pub upload: PaneContent,
    pub summary: Vec<String>,
    pub footer: String,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            overview: Vec::new(),
            discovery: PaneContent::waiting("Waiting..."),
            checking: PaneContent::waiting("Waiting..."),
            upload: PaneContent::waiting("Waiting..."),
            summary: vec!["Pending...".to_string()],
            footer: DEFAULT_FOOTER.to_string(),
        }
    }
}

/// ratatui implementation of [`Frontend`].
pub struct LiveDashboard<B: Backend, K: KeySource> {
    terminal: Terminal<B>,
    keys: K,
    log: SharedLog,
    state: DashboardState,
}

impl<B: Backend, K: KeySource> LiveDashboard<B, K> {
    pub fn new(terminal: Terminal<B>, keys: K, log: SharedLog) -> Self {
        Self {
            terminal,
            keys,
            log,
            state: DashboardState::default(),
        }
    }

    pub fn state(&self) -> &DashboardState {
        &self.state
    }

    pub fn terminal(&self) -> &Terminal<B> {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<B> {
        &mut self.terminal
    }

    fn draw(&mut self) -> Result<()> {
        let state = &self.state;
        let height = self.terminal.size()?.height as usize;
        // Copy the tail out so the log lock is not held while drawing.
        let log_lines = lock_log(&self.log).tail(height);

        self.terminal.draw(|f| {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(4), // Overview
                    Constraint::Min(0),    // Panes + log
                    Constraint::Length(1), // Footer
                ])
                .split(f.area());

            render_panel(f, rows[0], "OVERVIEW", &state.overview, None);

            let body = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(rows[1]);

            let panes = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Fill(1),
                    Constraint::Fill(1),
                    Constraint::Fill(2),
                    Constraint::Fill(1),
                ])
                .split(body[0]);

            render_panel(f, panes[0], "DISCOVERY", &state.discovery.lines, state.discovery.percent);
            render_panel(f, panes[1], "CHECKING", &state.checking.lines, state.checking.percent);
            render_panel(f, panes[2], "UPLOAD", &state.upload.lines, state.upload.percent);
            render_panel(f, panes[3], "SUMMARY", &state.summary, None);
            render_log(f, body[1], &log_lines);
            render_footer(f, rows[2], &state.footer);
        })?;
        Ok(())
    }

    fn wait_key(&mut self) -> Result<Key> {
        loop {
            if let Some(key) = self.keys.next_key(KEY_POLL)? {
                return Ok(key);
            }
            // Keep log lines from other threads flowing while idle.
            self.draw()?;
        }
    }
}

impl<B: Backend, K: KeySource> Frontend for LiveDashboard<B, K> {
    fn set_overview(&mut self, lines: Vec<String>) {
        self.state.overview = lines;
    }

    fn set_discovery(&mut self, lines: Vec<String>, percent: Option<f64>) {
        self.state.discovery = PaneContent { lines, percent };
    }

    fn set_checking(&mut self, lines: Vec<String>, percent: Option<f64>) {
        self.state.checking = PaneContent { lines, percent };
    }

    fn set_upload(&mut self, lines: Vec<String>, percent: Option<f64>) {
        self.state.upload = PaneContent { lines, percent };
    }

    fn set_summary(&mut self, lines: Vec<String>) {
        self.state.summary = lines;
    }

    fn set_footer(&mut self, text: &str) {
        self.state.footer = text.to_string();
    }

    fn log(&mut self, line: &str) {
        lock_log(&self.log).push(line, false);
    }

    fn redraw(&mut self) -> Result<()> {
        self.draw()
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let prompt_id = lock_log(&self.log).push(format!("PROMPT: {} (y/n)", question), true);
        self.draw()?;

        let decision = loop {
            match self.wait_key()? {
                Key::Char('y') => break true,
                Key::Char('n') | Key::Cancel => break false,
                Key::Char(_) => {}
            }
        };

        let answer = if decision { "yes" } else { "no" };
        lock_log(&self.log).update(prompt_id, format!("PROMPT: {} ({})", question, answer), false);
        info!("CONFIRM: {}", answer);
        self.draw()?;
        Ok(decision)
    }

    fn wait_for_quit(&mut self) -> Result<()> {
        self.set_footer("Press q to quit…");
        self.draw()?;
        loop {
            match self.wait_key()? {
                Key::Char('q') | Key::Cancel => return Ok(()),
                Key::Char(_) => {}
            }
        }
    }

    fn cancel_requested(&mut self) -> Result<bool> {
        self.keys.cancel_requested()
    }
}
