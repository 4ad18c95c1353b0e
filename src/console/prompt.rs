//! Confirmation prompts

use super::Console;
use crate::error::{Error, Result};

/// Message carried by [`Error::OperationCancelled`] when the user says no.
pub const ABORTED_BY_USER: &str = "Aborted by user.";

const DEFAULT_PROMPT: &str = "Do you want to continue";

/// Options for [`Console::prompt_continue`].
#[derive(Debug, Clone)]
pub struct PromptContinue {
    pub message: Option<String>,
    pub prompt_string: Option<String>,
    pub default: bool,
    /// Turn a "no" into [`Error::OperationCancelled`].
    pub cancel_on_no: bool,
    pub cancel_string: Option<String>,
}

impl Default for PromptContinue {
    fn default() -> Self {
        Self {
            message: None,
            prompt_string: None,
            default: true,
            cancel_on_no: false,
            cancel_string: None,
        }
    }
}

impl PromptContinue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn default_answer(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn cancel_on_no(mut self) -> Self {
        self.cancel_on_no = true;
        self
    }

    pub fn prompt_string(mut self, prompt: impl Into<String>) -> Self {
        self.prompt_string = Some(prompt.into());
        self
    }

    fn answered(&self, answer: bool) -> Result<bool> {
        if !answer && self.cancel_on_no {
            let message = self
                .cancel_string
                .clone()
                .unwrap_or_else(|| ABORTED_BY_USER.to_string());
            return Err(Error::OperationCancelled(message));
        }
        Ok(answer)
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

impl Console {
    /// Ask a yes/no question on stderr.
    ///
    /// `--quiet` takes the default without printing. Without a terminal the
    /// default is taken when it is "yes"; otherwise the prompt fails with
    /// [`Error::UnattendedPrompt`].
    pub async fn prompt_continue(&self, opts: &PromptContinue) -> Result<bool> {
        if self.is_quiet() {
            tracing::debug!("Prompt skipped (quiet), answering {}", opts.default);
            return opts.answered(opts.default);
        }
        if !self.is_interactive() {
            if opts.default {
                return Ok(true);
            }
            return Err(Error::UnattendedPrompt(
                "Re-run the command with --quiet to accept the default.".to_string(),
            ));
        }

        let mut text = String::new();
        if let Some(message) = &opts.message {
            text.push_str(message);
            text.push_str("\n\n");
        }
        text.push_str(opts.prompt_string.as_deref().unwrap_or(DEFAULT_PROMPT));
        text.push_str(if opts.default { " (Y/n)?  " } else { " (y/N)?  " });
        self.write_err(&text)?;

        loop {
            let Some(line) = self.read_line().await? else {
                self.write_err("\n")?;
                return opts.answered(opts.default);
            };
            if line.trim().is_empty() {
                return opts.answered(opts.default);
            }
            match parse_answer(&line) {
                Some(answer) => return opts.answered(answer),
                None => self.write_err("Please enter 'y' or 'n':  ")?,
            }
        }
    }
}
