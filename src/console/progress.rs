//! Progress trackers
//!
//! A tracker owns one line of stderr: `<message>...` followed by a spinner
//! when the stream is a terminal. Finishing replaces the line with the
//! outcome.

use super::Console;
use crate::error::Result;
use crossterm::{cursor, terminal, QueueableCommand};
use std::io::Write;

const SPIN_MARKS: [char; 4] = ['|', '/', '-', '\\'];

/// Single-line progress indicator on the error stream.
pub struct ProgressTracker {
    console: Console,
    message: String,
    ticks: usize,
    finished: bool,
}

impl ProgressTracker {
    /// Print `<message>...` and start tracking.
    pub fn start(console: &Console, message: impl Into<String>) -> Result<Self> {
        let message = message.into();
        if console.user_output_enabled() {
            console.write_err(&format!("{message}..."))?;
        }
        Ok(Self {
            console: console.clone(),
            message,
            ticks: 0,
            finished: false,
        })
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Advance the spinner. No-op on a non-terminal stream.
    pub fn tick(&mut self) -> Result<()> {
        self.ticks += 1;
        if !self.console.user_output_enabled() || !self.console.is_fancy() {
            return Ok(());
        }
        let mark = SPIN_MARKS[self.ticks % SPIN_MARKS.len()];
        let message = &self.message;
        self.console.with_err(|err| {
            err.queue(cursor::MoveToColumn(0))?;
            err.queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
            write!(err, "{message}...{mark}")?;
            err.flush()
        })
    }

    /// Replace the tracker line with `done_line`.
    pub fn finish(mut self, done_line: &str) -> Result<()> {
        self.finished = true;
        self.end(done_line)
    }

    /// Mark the tracker as failed.
    pub fn fail(mut self) -> Result<()> {
        self.finished = true;
        self.end("failed.")
    }

    fn end(&self, tail: &str) -> Result<()> {
        if !self.console.user_output_enabled() {
            return Ok(());
        }
        if self.console.is_fancy() {
            let message = &self.message;
            self.console.with_err(|err| {
                err.queue(cursor::MoveToColumn(0))?;
                err.queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
                writeln!(err, "{message}...{tail}")?;
                err.flush()
            })
        } else {
            self.console.write_err(&format!("{tail}\n"))
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.end("failed.") {
                tracing::debug!("Failed to close progress line: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_tracker_output() {
        let (console, captured) = Console::captured("", false);
        let mut tracker = ProgressTracker::start(&console, "Waiting for operation [op]").unwrap();
        tracker.tick().unwrap();
        tracker.finish("done.").unwrap();
        assert_eq!(captured.err.contents(), "Waiting for operation [op]...done.\n");
    }

    #[test]
    fn test_dropped_tracker_reports_failure() {
        let (console, captured) = Console::captured("", false);
        {
            let _tracker = ProgressTracker::start(&console, "Deleting").unwrap();
        }
        assert_eq!(captured.err.contents(), "Deleting...failed.\n");
    }

    #[test]
    fn test_silent_without_user_output() {
        let (mut console, captured) = Console::captured("", false);
        console.set_user_output_enabled(false);
        let tracker = ProgressTracker::start(&console, "Working").unwrap();
        tracker.finish("done.").unwrap();
        assert!(captured.err.contents().is_empty());
    }
}
