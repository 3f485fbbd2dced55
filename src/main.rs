//! Tax Import Engine CLI
//!
//! Command-line interface for importing 1099-B transactions from CSV files and
//! submitting them one at a time through an external channel.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- interpret export.csv > canonical.csv
//! cargo run -- import export.csv
//! cargo run -- --channel command --submit-command ./submit.sh import export.csv
//! cargo run -- status
//! cargo run -- retry-failed
//! cargo run -- serve < requests.jsonl
//! ```
//!
//! The queue survives between runs in the `--state` file; every queue command
//! first recovers whatever a previous, interrupted run left behind.
//!
//! # Logging
//!
//! Diagnostics go to stderr through `env_logger` (default level `info`,
//! override with `RUST_LOG`), keeping stdout for results.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, unreadable mapping, state not writable, etc.)

use rust_tax_import_engine::cli;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command-line arguments using clap
    let args = cli::parse_args();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    // Results go to stdout
    let mut output = std::io::stdout();
    if let Err(e) = runtime.block_on(cli::run(&args, &mut output)) {
        log::error!("{}", e);
        process::exit(1);
    }
}
