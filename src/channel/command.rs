//! External-command submission channel
//!
//! `CommandChannel` hands each record to an external program: the record is
//! written as one JSON object to the program's stdin, and the exit status
//! decides the outcome.
//!
//! | Exit status         | Outcome   |
//! |---------------------|-----------|
//! | 0                   | `Success` |
//! | 75 (`EX_TEMPFAIL`)  | `Retry`   |
//! | anything else       | `Failed`  |
//!
//! A program that cannot be started, or whose pipes fail, yields a
//! `ChannelError`. There is no timeout on the program.

use crate::core::traits::{SubmissionChannel, SubmissionOutcome};
use crate::types::{ChannelError, TransactionRecord};
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Exit status asking for the record to be retried later
pub const EX_TEMPFAIL: i32 = 75;

/// Channel running one external program per submission
#[derive(Debug, Clone)]
pub struct CommandChannel {
    program: String,
    args: Vec<String>,
}

impl CommandChannel {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn outcome_for(code: Option<i32>) -> SubmissionOutcome {
        match code {
            Some(0) => SubmissionOutcome::Success,
            Some(EX_TEMPFAIL) => SubmissionOutcome::Retry,
            _ => SubmissionOutcome::Failed,
        }
    }
}

impl SubmissionChannel for CommandChannel {
    async fn submit(&self, record: &TransactionRecord) -> Result<SubmissionOutcome, ChannelError> {
        let payload = serde_json::to_vec(record).map_err(|e| ChannelError::Encode {
            id: record.id.to_string(),
            message: e.to_string(),
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ChannelError::Spawn {
                program: self.program.clone(),
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                // The program may exit without reading its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    log::debug!("Submitter closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            log::debug!("Submitter output for {}: {}", record.id, stdout.trim());
        }

        let outcome = Self::outcome_for(output.status.code());
        if outcome == SubmissionOutcome::Failed {
            log::warn!(
                "Submitter rejected transaction {} ({})",
                record.id,
                output.status
            );
        }
        Ok(outcome)
    }
}
