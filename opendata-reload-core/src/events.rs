//! Run notes: the accumulated, timestamped record of what a run did.
//!
//! Every component that has something to say receives the run's [`EventLog`] explicitly. Each
//! [`Note`] is flagged independently as printable (shown to an operator watching the run) and
//! reportable (included in the report sent after the run). The log is also mirrored into
//! `tracing` as notes are added.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoteLevel {
    Info,
    /// Needs operator attention but did not stop the run.
    Alert,
    /// Stopped the run.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub at: DateTime<Local>,
    pub text: String,
    pub level: NoteLevel,
    pub printable: bool,
    pub reportable: bool,
}

impl Note {
    /// `YYYYMMDD-HHMM  text`
    pub fn render(&self) -> String {
        format!("{}  {}", self.at.format("%Y%m%d-%H%M"), self.text)
    }
}

#[derive(Debug, Default)]
pub struct EventLog {
    notes: Vec<Note>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log-only note: neither printed nor reported.
    pub fn trace(&mut self, text: impl Into<String>) {
        self.push(text.into(), NoteLevel::Info, false, false);
    }

    /// Printed, not reported.
    pub fn note(&mut self, text: impl Into<String>) {
        self.push(text.into(), NoteLevel::Info, true, false);
    }

    /// Printed and reported.
    pub fn report(&mut self, text: impl Into<String>) {
        self.push(text.into(), NoteLevel::Info, true, true);
    }

    pub fn alert(&mut self, text: impl Into<String>) {
        self.push(text.into(), NoteLevel::Alert, true, true);
    }

    pub fn fatal(&mut self, text: impl Into<String>) {
        self.push(text.into(), NoteLevel::Fatal, true, true);
    }

    fn push(&mut self, text: String, level: NoteLevel, printable: bool, reportable: bool) {
        match level {
            NoteLevel::Info if printable => info!(reportable, "{text}"),
            NoteLevel::Info => debug!(reportable, "{text}"),
            NoteLevel::Alert => warn!(reportable, "{text}"),
            NoteLevel::Fatal => error!(reportable, "{text}"),
        }
        self.notes.push(Note {
            at: Local::now(),
            text,
            level,
            printable,
            reportable,
        });
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn reportable(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.reportable)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| n.level == NoteLevel::Alert)
    }

    pub fn has_fatal(&self) -> bool {
        self.notes.iter().any(|n| n.level == NoteLevel::Fatal)
    }

    pub fn into_notes(self) -> Vec<Note> {
        self.notes
    }
}
