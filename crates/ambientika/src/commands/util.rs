//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use ambientika_core::{RunRecord, RunStatus, RunStep, StepStatus};

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
///
/// Without a terminal there is nobody to ask, so `--yes` is required.
pub fn confirm(action: &str, message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// A stderr spinner, or `None` when quiet or not attached to a terminal.
pub fn spinner(message: &str, quiet: bool) -> Option<ProgressBar> {
    if quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.set_message(message.to_owned());
    bar.enable_steady_tick(Duration::from_millis(100));
    Some(bar)
}

/// Map a finished run to the command's outcome.
///
/// A failed run carries the cause of the failed topology fetch. A partial
/// one reports the steps that did not make it.
pub fn check_record(record: &RunRecord, profile: &str) -> Result<(), CliError> {
    match record.status {
        RunStatus::Succeeded | RunStatus::Running => Ok(()),
        // A fatal error is only ever recorded for rejected credentials
        RunStatus::Failed if record.error.is_some() => Err(CliError::AuthFailed {
            profile: profile.into(),
        }),
        RunStatus::Failed => Err(CliError::Unavailable {
            message: step_error(record, RunStep::Topology).unwrap_or_else(|| "run failed".into()),
        }),
        RunStatus::Partial => Err(CliError::PartialRun {
            summary: failed_steps(record),
        }),
    }
}

fn step_error(record: &RunRecord, step: RunStep) -> Option<String> {
    record.step(step).and_then(|s| s.error.clone())
}

/// "roles: <error>; reconcile: <error>" for every failed step.
pub fn failed_steps(record: &RunRecord) -> String {
    let failed: Vec<String> = record
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| match &s.error {
            Some(e) => format!("{}: {e}", s.step),
            None => s.step.to_string(),
        })
        .collect();
    if failed.is_empty() && record.cancelled {
        return "cancelled".into();
    }
    failed.join("; ")
}
