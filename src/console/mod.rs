//! Console I/O
//!
//! Every byte a command prints goes through a [`Console`]: formatted
//! resources to the output stream, prompts, status lines and progress
//! trackers to the error stream. Streams are injectable so that tests can
//! script input and capture output.
//!
//! # Module Structure
//!
//! - [`prompt`] - Confirmation prompts and unattended detection
//! - [`progress`] - Single-line progress trackers
//! - [`scoped`] - Deterministic acquire/release helpers and online edit

pub mod progress;
pub mod prompt;
pub mod scoped;

use crate::error::{Error, Result};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;
type SharedReader = Arc<Mutex<Box<dyn BufRead + Send>>>;

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory sink that can be read back after writing.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captured streams of a [`Console::captured`] console.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub out: SharedBuffer,
    pub err: SharedBuffer,
}

/// Process console: input, output and error streams plus the flags that
/// govern prompting and status output.
#[derive(Clone)]
pub struct Console {
    input: SharedReader,
    out: SharedWriter,
    err: SharedWriter,
    interactive: bool,
    quiet: bool,
    user_output_enabled: bool,
    fancy: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("interactive", &self.interactive)
            .field("quiet", &self.quiet)
            .field("user_output_enabled", &self.user_output_enabled)
            .finish()
    }
}

impl Console {
    /// Console over the process stdio. Prompts are possible only when both
    /// stdin and stderr are terminals.
    pub fn stdio() -> Self {
        let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
        Self {
            input: Arc::new(Mutex::new(Box::new(std::io::BufReader::new(std::io::stdin())))),
            out: Arc::new(Mutex::new(Box::new(std::io::stdout()))),
            err: Arc::new(Mutex::new(Box::new(std::io::stderr()))),
            interactive,
            quiet: false,
            user_output_enabled: true,
            fancy: std::io::stderr().is_terminal(),
        }
    }

    /// Console reading `input` and writing into in-memory buffers.
    pub fn captured(input: &str, interactive: bool) -> (Self, Captured) {
        Self::scripted(Box::new(std::io::Cursor::new(input.as_bytes().to_vec())), interactive)
    }

    /// Console reading from `input` and writing into in-memory buffers.
    pub fn scripted(input: Box<dyn BufRead + Send>, interactive: bool) -> (Self, Captured) {
        let captured = Captured::default();
        let console = Self {
            input: Arc::new(Mutex::new(input)),
            out: Arc::new(Mutex::new(Box::new(captured.out.clone()))),
            err: Arc::new(Mutex::new(Box::new(captured.err.clone()))),
            interactive,
            quiet: false,
            user_output_enabled: true,
            fancy: false,
        };
        (console, captured)
    }

    /// Same console with an error stream that fails every write.
    #[cfg(test)]
    pub(crate) fn with_broken_err(mut self) -> Self {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
        }
        self.err = Arc::new(Mutex::new(Box::new(Broken)));
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// `--quiet` / `core/disable_prompts`: every prompt takes its default.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn user_output_enabled(&self) -> bool {
        self.user_output_enabled
    }

    pub fn set_user_output_enabled(&mut self, enabled: bool) {
        self.user_output_enabled = enabled;
    }

    /// Whether the error stream can take cursor movement.
    pub fn is_fancy(&self) -> bool {
        self.fancy
    }

    /// Write command output. Suppressed by `--no-user-output-enabled`.
    pub fn write_out(&self, text: &str) -> Result<()> {
        if !self.user_output_enabled {
            return Ok(());
        }
        let mut out = lock(&self.out);
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| Error::io("Failed to write output", e))
    }

    pub fn out_line(&self, line: &str) -> Result<()> {
        self.write_out(&format!("{line}\n"))
    }

    /// Write to the error stream unconditionally (errors, prompts).
    pub fn write_err(&self, text: &str) -> Result<()> {
        let mut err = lock(&self.err);
        err.write_all(text.as_bytes())
            .and_then(|_| err.flush())
            .map_err(|e| Error::io("Failed to write to stderr", e))
    }

    pub fn err_line(&self, line: &str) -> Result<()> {
        self.write_err(&format!("{line}\n"))
    }

    /// Status message on stderr. Suppressed by `--no-user-output-enabled`.
    pub fn status(&self, line: &str) -> Result<()> {
        if !self.user_output_enabled {
            return Ok(());
        }
        self.err_line(line)
    }

    /// `WARNING: <message>` on stderr.
    pub fn warn(&self, message: &str) -> Result<()> {
        self.err_line(&format!("WARNING: {message}"))
    }

    /// Run `f` with exclusive access to the error stream.
    pub(crate) fn with_err<R>(&self, f: impl FnOnce(&mut dyn Write) -> std::io::Result<R>) -> Result<R> {
        let mut err = lock(&self.err);
        f(err.as_mut()).map_err(|e| Error::io("Failed to write to stderr", e))
    }

    /// One line of input without the trailing newline; `None` on EOF.
    ///
    /// The read runs on the blocking pool so a pending prompt never stalls
    /// the runtime (the interrupt handler in particular).
    pub async fn read_line(&self) -> Result<Option<String>> {
        let input = Arc::clone(&self.input);
        let read = tokio::task::spawn_blocking(move || {
            let mut line = String::new();
            lock(&input).read_line(&mut line).map(|n| (n, line))
        })
        .await
        .map_err(|e| Error::Internal(format!("Input reader stopped: {e}")))?;
        let (n, line) = read.map_err(|e| Error::io("Failed to read input", e))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}
