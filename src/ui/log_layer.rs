//! `tracing` layer feeding the dashboard log pane.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Lines kept for the log pane.
pub const MAX_LOG_LINES: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub id: u64,
    pub text: String,
    /// Rendered emphasized (pending prompts).
    pub highlighted: bool,
}

/// Bounded ring of log lines. Ids stay valid while the line is retained.
#[derive(Debug)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    next_id: u64,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_LOG_LINES)
    }
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            next_id: 0,
        }
    }

    pub fn push(&mut self, text: impl Into<String>, highlighted: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.lines.push_back(LogLine {
            id,
            text: text.into(),
            highlighted,
        });
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        id
    }

    /// Replace a line in place. Returns false if it already scrolled out.
    pub fn update(&mut self, id: u64, text: impl Into<String>, highlighted: bool) -> bool {
        match self.lines.iter_mut().find(|line| line.id == id) {
            Some(line) => {
                line.text = text.into();
                line.highlighted = highlighted;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }
}

pub type SharedLog = Arc<Mutex<LogBuffer>>;

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(LogBuffer::default()))
}

pub(crate) fn lock_log(log: &SharedLog) -> MutexGuard<'_, LogBuffer> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Formats events as `"<HH:MM:SS> <LEVEL>: <message> k=v..."`.
pub struct DashboardLogLayer {
    buffer: SharedLog,
    min_level: Level,
}

impl DashboardLogLayer {
    pub fn new(buffer: SharedLog) -> Self {
        Self {
            buffer,
            min_level: Level::INFO,
        }
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<S: Subscriber> Layer<S> for DashboardLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        // Level ordering: TRACE > DEBUG > INFO > WARN > ERROR.
        if level > self.min_level {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{} {}: {}{}",
            chrono::Local::now().format("%H:%M:%S"),
            level,
            visitor.message,
            visitor.fields
        );
        lock_log(&self.buffer).push(line, false);
    }
}
