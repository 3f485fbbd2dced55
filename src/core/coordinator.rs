//! Request/response coordinator
//!
//! The coordinator is the message boundary between a submitting context (the
//! page side) and the processing core. Each [`Request`] is answered with
//! exactly one [`Response`] or a [`CoordinatorError`].
//!
//! # Architecture
//!
//! ```text
//! CoordinatorHandle ──mpsc(Request, oneshot)──▶ coordinator task
//!                                                  ├── Interpreter
//!                                                  └── Arc<TransactionProcessor>
//!                                                        └── background drain tasks
//! ```
//!
//! Imports only enqueue and answer immediately; draining runs in a spawned
//! task so a long queue never delays the reply.

use crate::core::processor::TransactionProcessor;
use crate::core::state_machine::ProcessOutcome;
use crate::core::traits::{KeyValueStore, SubmissionChannel};
use crate::io::Interpreter;
use crate::types::{CoordinatorError, QueueSummary, TransactionId, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message from the submitting side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    /// Interpret CSV text and queue the resulting records
    ProcessCsv { content: String },

    /// Queue one already-canonical record
    ProcessTransaction { transaction: TransactionRecord },

    /// The page side reports the result of a submission it performed
    TransactionProcessed {
        transaction_id: TransactionId,
        success: bool,
    },

    GetProcessingStatus,

    /// Run one `process_next` step
    ProcessNextTransaction,

    ClearState,
}

/// Reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Response {
    /// CSV was interpreted; `queued` of `parsed` records were new
    Imported {
        parsed: usize,
        queued: usize,
        diagnostics: Vec<String>,
    },

    Queued { queued: usize },

    Processed { outcome: ProcessOutcome },

    Status(QueueSummary),

    Cleared,

    /// Request failed; only produced by [`Response::from_result`]
    Error { message: String },
}

impl Response {
    /// Fold a handler result into a single wire response
    pub fn from_result(result: Result<Response, CoordinatorError>) -> Response {
        result.unwrap_or_else(|e| Response::Error {
            message: e.to_string(),
        })
    }
}

/// Routes requests to the interpreter and the processor
pub struct Coordinator<S, C> {
    processor: Arc<TransactionProcessor<S, C>>,
    interpreter: Interpreter,
    drains: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, C> Coordinator<S, C>
where
    S: KeyValueStore + 'static,
    C: SubmissionChannel + 'static,
{
    pub fn new(processor: Arc<TransactionProcessor<S, C>>, interpreter: Interpreter) -> Self {
        Self {
            processor,
            interpreter,
            drains: Mutex::new(Vec::new()),
        }
    }

    pub fn processor(&self) -> &Arc<TransactionProcessor<S, C>> {
        &self.processor
    }

    /// Answer one request
    pub async fn handle(&self, request: Request) -> Result<Response, CoordinatorError> {
        match request {
            Request::ProcessCsv { content } => {
                let result = self.interpreter.interpret(&content);
                for error in &result.errors {
                    log::warn!("Import: {}", error);
                }
                let parsed = result.records.len();
                let queued = self.processor.enqueue(result.records).await?;
                self.spawn_drain();
                Ok(Response::Imported {
                    parsed,
                    queued,
                    diagnostics: result.errors.iter().map(ToString::to_string).collect(),
                })
            }
            Request::ProcessTransaction { transaction } => {
                let queued = self.processor.enqueue(vec![transaction]).await?;
                self.spawn_drain();
                Ok(Response::Queued { queued })
            }
            Request::TransactionProcessed {
                transaction_id,
                success,
            } => self
                .processor
                .transaction_processed(transaction_id, success)
                .await?
                .map(|outcome| Response::Processed { outcome })
                .ok_or_else(|| CoordinatorError::UnknownTransaction {
                    id: transaction_id.to_string(),
                }),
            Request::GetProcessingStatus => Ok(Response::Status(self.processor.status().await)),
            Request::ProcessNextTransaction => Ok(Response::Processed {
                outcome: self.processor.process_next().await,
            }),
            Request::ClearState => {
                self.processor.clear().await?;
                Ok(Response::Cleared)
            }
        }
    }

    /// Start a background drain
    ///
    /// If a drain is already running the new task waits for it to end and
    /// then drains once more, so records queued while the old loop was
    /// finishing are not left behind.
    fn spawn_drain(&self) {
        let processor = Arc::clone(&self.processor);
        let handle = tokio::spawn(async move {
            while processor.start_processing().await.is_none() {
                tokio::time::sleep(processor.config().retry_delay).await;
            }
        });

        match self.drains.lock() {
            Ok(mut drains) => {
                drains.retain(|h| !h.is_finished());
                drains.push(handle);
            }
            Err(e) => log::error!("Drain registry poisoned: {}", e),
        }
    }

    /// Wait for every background drain started so far
    pub async fn settle(&self) {
        let pending: Vec<_> = match self.drains.lock() {
            Ok(mut drains) => drains.drain(..).collect(),
            Err(e) => {
                log::error!("Drain registry poisoned: {}", e);
                return;
            }
        };
        for result in futures::future::join_all(pending).await {
            if let Err(e) = result {
                log::error!("Drain task panicked: {:?}", e);
            }
        }
    }

    /// Move the coordinator onto its own task
    ///
    /// Requests sent through the returned handle are answered in order. The
    /// task ends once every handle is dropped and the background drains have
    /// finished.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(32);
        let task = tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                let response = self.handle(request).await;
                if reply.send(response).is_err() {
                    log::debug!("Requester went away before the reply");
                }
            }
            self.settle().await;
            log::debug!("Coordinator stopped");
        });
        (CoordinatorHandle { tx }, task)
    }
}

type Envelope = (
    Request,
    oneshot::Sender<Result<Response, CoordinatorError>>,
);

/// Cloneable sender side of a spawned [`Coordinator`]
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CoordinatorHandle {
    /// Send a request and wait for its response
    pub async fn request(&self, request: Request) -> Result<Response, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| CoordinatorError::Disconnected)?;
        reply_rx.await.map_err(|_| CoordinatorError::Disconnected)?
    }
}
