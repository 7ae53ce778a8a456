//! Operator confirmation for destructive steps.

use dialoguer::Confirm as Prompt;
use log::warn;

pub trait Confirm: Send + Sync {
    /// Returns true only on an explicit affirmative answer.
    fn confirm(&self, prompt: &str) -> bool;
}

/// Asks on the terminal, defaulting to "no".
#[derive(Debug, Default)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        match Prompt::new()
            .with_prompt(prompt)
            .default(false)
            .interact_opt()
        {
            Ok(answer) => answer.unwrap_or(false),
            Err(e) => {
                // No terminal (CI, piped stdin) counts as a decline.
                warn!("Confirmation prompt unavailable ({}), treating as no", e);
                false
            }
        }
    }
}

/// Fixed answer, for tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct Answer(pub bool);

#[cfg(test)]
impl Confirm for Answer {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}
