use crate::core::ProcessorConfig;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Import 1099-B transactions from CSV and submit them one at a time
#[derive(Parser, Debug)]
#[command(name = "tax-import")]
#[command(
    about = "Import 1099-B transactions from CSV and submit them one at a time",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// JSON file holding the queue between runs
    #[arg(
        long = "state",
        value_name = "PATH",
        global = true,
        default_value = "tax-import-state.json",
        help = "Path of the persisted queue state"
    )]
    pub state: PathBuf,

    /// Extra column-name synonyms
    #[arg(
        long = "mapping",
        value_name = "PATH",
        global = true,
        help = "JSON file with extra column-name synonyms per field"
    )]
    pub mapping: Option<PathBuf>,

    /// Submission channel used when processing
    #[arg(
        long = "channel",
        value_name = "CHANNEL",
        global = true,
        default_value = "dry-run",
        help = "Submission channel: 'dry-run' logs records, 'command' runs --submit-command"
    )]
    pub channel: ChannelType,

    /// Program run once per record by the command channel
    #[arg(long = "submit-command", value_name = "PROGRAM", global = true)]
    pub submit_command: Option<String>,

    /// Argument passed to the submit command (repeatable)
    #[arg(
        long = "submit-arg",
        value_name = "ARG",
        global = true,
        allow_hyphen_values = true
    )]
    pub submit_args: Vec<String>,

    #[arg(
        long = "lock-timeout-ms",
        value_name = "MS",
        global = true,
        help = "Age after which a processing lock is taken over (default: 30000)"
    )]
    pub lock_timeout_ms: Option<u64>,

    #[arg(
        long = "retry-delay-ms",
        value_name = "MS",
        global = true,
        help = "Pause between two submissions (default: 1000)"
    )]
    pub retry_delay_ms: Option<u64>,

    #[arg(
        long = "max-attempts",
        value_name = "COUNT",
        global = true,
        help = "Submissions per record before it is marked failed (default: 3)"
    )]
    pub max_attempts: Option<u32>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Interpret a CSV file and print the canonical records as CSV
    Interpret {
        #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
        input: PathBuf,
    },

    /// Interpret a CSV file, queue its records and drain the queue
    Import {
        #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
        input: PathBuf,

        /// Only queue the records
        #[arg(long = "no-process")]
        no_process: bool,
    },

    /// Drain the persisted queue
    Process {
        /// Submit only the head record
        #[arg(long = "once")]
        once: bool,
    },

    /// Print the queue status as JSON
    Status,

    /// Forget the queue and the failed list
    Clear,

    /// Requeue failed records with a fresh retry budget
    RetryFailed,

    /// Answer JSON requests read line by line from stdin
    Serve,
}

/// Available submission channels
#[derive(Clone, Debug, PartialEq, ValueEnum)]
pub enum ChannelType {
    DryRun,
    Command,
}

impl CliArgs {
    /// Create a ProcessorConfig from CLI arguments
    ///
    /// Missing values take the defaults; zero values are rejected by
    /// `ProcessorConfig::new` with a warning.
    pub fn to_processor_config(&self) -> ProcessorConfig {
        if self.max_attempts.is_none()
            && self.lock_timeout_ms.is_none()
            && self.retry_delay_ms.is_none()
        {
            return ProcessorConfig::default();
        }

        let default = ProcessorConfig::default();
        ProcessorConfig::new(
            self.max_attempts.unwrap_or(default.max_attempts),
            self.lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default.lock_timeout),
            self.retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(default.retry_delay),
        )
    }
}
