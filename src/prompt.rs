use crate::error::DevError;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use std::io::{self, IsTerminal};
use tracing::warn;

pub trait Prompter {
    /// Yes/no question whose empty answer is "no".
    fn confirm(&self, prompt: &str) -> Result<bool, DevError>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, prompt: &str) -> Result<bool, DevError> {
        if !io::stdin().is_terminal() {
            warn!(prompt, "stdin is not a terminal; answering no (pass --force to skip the prompt)");
            return Ok(false);
        }
        let answer = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()?;
        Ok(answer)
    }
}

#[cfg(test)]
pub struct FixedAnswer(pub bool);

#[cfg(test)]
impl Prompter for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool, DevError> {
        Ok(self.0)
    }
}
