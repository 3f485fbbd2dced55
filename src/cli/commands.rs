//! Command execution
//!
//! Wires the parsed [`CliArgs`] to the library: builds the interpreter, the
//! file-backed queue store, the selected channel and the processor, runs
//! crash recovery, and then executes the subcommand.
//!
//! Results go to the provided writer (stdout in the binary): canonical CSV
//! for `interpret`, a JSON status summary for the queue commands, and one
//! JSON response per line for `serve`. Diagnostics go through `log`.

use crate::channel::{create_channel, AnyChannel};
use crate::cli::{CliArgs, Command};
use crate::core::{
    Coordinator, CoordinatorHandle, JsonFileStore, QueueStore, Request, Response,
    TransactionProcessor,
};
use crate::io::{write_records_csv, ColumnMapping, InterpretResult, Interpreter};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

type Processor = TransactionProcessor<JsonFileStore, AnyChannel>;

/// Execute the parsed command, writing results to `output`
///
/// # Errors
///
/// Returns an error if:
/// - The input or mapping file cannot be read
/// - The command channel is selected without a program
/// - The queue state cannot be written
/// - Output cannot be written
///
/// Individual rows that fail to import and records the channel rejects are
/// reported through the log and the status summary, not as errors.
pub async fn run(args: &CliArgs, output: &mut dyn Write) -> Result<(), String> {
    let interpreter = build_interpreter(args)?;

    if let Command::Interpret { input } = &args.command {
        let result = interpret_file(&interpreter, input).await?;
        return write_records_csv(&result.records, output);
    }

    let processor = build_processor(args)?;
    let report = processor.recover().await.map_err(|e| e.to_string())?;
    log::debug!("Recovery: {:?}", report);

    match &args.command {
        Command::Import { input, no_process } => {
            let result = interpret_file(&interpreter, input).await?;
            let parsed = result.records.len();
            let added = processor
                .enqueue(result.records)
                .await
                .map_err(|e| e.to_string())?;
            log::info!("Queued {} new of {} parsed transaction(s)", added, parsed);
            if !no_process {
                processor.start_processing().await;
            }
        }
        Command::Process { once } => {
            if *once {
                let outcome = processor.process_next().await;
                log::info!("Processed head of queue: {:?}", outcome);
            } else {
                processor.start_processing().await;
            }
        }
        Command::Status | Command::Interpret { .. } => {}
        Command::Clear => processor.clear().await.map_err(|e| e.to_string())?,
        Command::RetryFailed => {
            processor.retry_failed().await.map_err(|e| e.to_string())?;
        }
        Command::Serve => {
            let (handle, task) = Coordinator::new(Arc::new(processor), interpreter).spawn();
            serve(&handle, BufReader::new(tokio::io::stdin()), output).await?;
            drop(handle);
            return task
                .await
                .map_err(|e| format!("Coordinator task failed: {}", e));
        }
    }

    write_status(&processor, output).await
}

/// Answer newline-delimited JSON requests until `input` ends
///
/// Every non-blank line produces exactly one JSON response line, including
/// lines that are not valid requests.
pub async fn serve<R>(
    handle: &CoordinatorHandle,
    input: R,
    output: &mut dyn Write,
) -> Result<(), String>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| format!("Failed to read request: {}", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => Response::from_result(handle.request(request).await),
            Err(e) => Response::Error {
                message: format!("Invalid request: {}", e),
            },
        };

        serde_json::to_writer(&mut *output, &response)
            .map_err(|e| format!("Failed to write response: {}", e))?;
        writeln!(output).map_err(|e| format!("Failed to write response: {}", e))?;
        output
            .flush()
            .map_err(|e| format!("Failed to write response: {}", e))?;
    }
    Ok(())
}

fn build_interpreter(args: &CliArgs) -> Result<Interpreter, String> {
    let mapping = match &args.mapping {
        Some(path) => ColumnMapping::load(path).map_err(|e| e.to_string())?,
        None => ColumnMapping::default(),
    };
    Ok(Interpreter::new(mapping))
}

fn build_processor(args: &CliArgs) -> Result<Processor, String> {
    let channel = create_channel(
        args.channel.clone(),
        args.submit_command.as_deref(),
        &args.submit_args,
    )?;
    let store = QueueStore::new(JsonFileStore::new(&args.state));
    Ok(TransactionProcessor::new(
        store,
        channel,
        args.to_processor_config(),
    ))
}

async fn interpret_file(interpreter: &Interpreter, input: &Path) -> Result<InterpretResult, String> {
    let bytes = tokio::fs::read(input)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;

    let result = interpreter.interpret_bytes(&bytes);
    for error in &result.errors {
        log::warn!("{}: {}", input.display(), error);
    }
    Ok(result)
}

async fn write_status(processor: &Processor, output: &mut dyn Write) -> Result<(), String> {
    let summary = processor.status().await;
    serde_json::to_writer_pretty(&mut *output, &summary)
        .map_err(|e| format!("Failed to write status: {}", e))?;
    writeln!(output).map_err(|e| format!("Failed to write status: {}", e))
}
