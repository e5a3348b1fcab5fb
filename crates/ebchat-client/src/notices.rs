//! Transient user-facing notices (toast style).
//!
//! Store failures are caught where they happen and surfaced here instead of
//! propagating to a global handler. Nothing in this module is modal.

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Info(String),
    Error(String),
}

impl Notice {
    pub fn text(&self) -> &str {
        match self {
            Notice::Success(s) | Notice::Info(s) | Notice::Error(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error(_))
    }
}

/// Sending half of the notice channel, shared by every component.
#[derive(Debug, Clone)]
pub struct NoticeSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn success(&self, text: impl Into<String>) {
        self.emit(Notice::Success(text.into()));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(Notice::Info(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(Notice::Error(text.into()));
    }

    pub fn emit(&self, notice: Notice) {
        if let Err(e) = self.tx.send(notice) {
            tracing::debug!(notice = ?e.0, "No notice receiver, dropping notice");
        }
    }
}
