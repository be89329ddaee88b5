use anyhow::{Context, Result};
use inquire::Confirm;

/// Ask before deleting `targets`. Defaults to "no".
pub fn confirm_delete(targets: &[String]) -> Result<bool> {
    let help = format!("deleting: {}", targets.join(", "));
    Confirm::new("Really delete?")
        .with_default(false)
        .with_help_message(&help)
        .prompt()
        .context("Failed to read confirmation")
}
