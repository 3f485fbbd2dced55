//! Submission channel implementations
//!
//! This module provides the concrete [`SubmissionChannel`] implementations and
//! the factory that picks one at runtime:
//!
//! - **dry-run**: logs each record and reports success
//! - **command**: runs an external program per record
//!
//! The trait's async methods make it unusable as a trait object, so runtime
//! selection goes through the [`AnyChannel`] enum instead of a `Box<dyn _>`.

use crate::cli::ChannelType;
use crate::core::traits::{SubmissionChannel, SubmissionOutcome};
use crate::types::{ChannelError, TransactionRecord};

pub mod command;
pub mod dry_run;

pub use command::{CommandChannel, EX_TEMPFAIL};
pub use dry_run::DryRunChannel;

/// One of the built-in channels, chosen at runtime
#[derive(Debug)]
pub enum AnyChannel {
    DryRun(DryRunChannel),
    Command(CommandChannel),
}

impl SubmissionChannel for AnyChannel {
    async fn submit(&self, record: &TransactionRecord) -> Result<SubmissionOutcome, ChannelError> {
        match self {
            AnyChannel::DryRun(channel) => channel.submit(record).await,
            AnyChannel::Command(channel) => channel.submit(record).await,
        }
    }
}

/// Create a submission channel based on the specified channel type
///
/// # Arguments
///
/// * `channel_type` - Which channel to build
/// * `command` - Program to run for the command channel (ignored for dry-run)
/// * `args` - Arguments passed to that program
///
/// # Errors
///
/// Returns an error if the command channel is requested without a program.
pub fn create_channel(
    channel_type: ChannelType,
    command: Option<&str>,
    args: &[String],
) -> Result<AnyChannel, String> {
    match channel_type {
        ChannelType::DryRun => Ok(AnyChannel::DryRun(DryRunChannel::new())),
        ChannelType::Command => {
            let program = command
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| "--channel command requires --submit-command".to_string())?;
            Ok(AnyChannel::Command(CommandChannel::new(
                program,
                args.to_vec(),
            )))
        }
    }
}
