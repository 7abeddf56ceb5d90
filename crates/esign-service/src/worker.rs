//! Bounded completion worker pool.
//!
//! Callbacks must answer the browser immediately, so the retrieval
//! pipeline runs on a small worker pool behind a bounded queue. A full
//! queue pushes back on the callback rather than buffering without limit.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use esign_core::completion::{CallbackOutcome, CompletionPipeline, HashApproval};
use esign_core::SignError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_WORKERS: usize = 4;

/// One unit of completion work.
#[derive(Debug)]
pub enum CompletionTask {
    Document {
        process_id: String,
        outcome: CallbackOutcome,
    },
    Hash {
        owner: Uuid,
        approval: HashApproval,
    },
}

#[derive(Clone)]
pub struct CompletionQueue {
    sender: mpsc::Sender<CompletionTask>,
}

impl CompletionQueue {
    /// Spawn `workers` tasks draining a queue of `capacity` entries.
    pub fn spawn(pipeline: Arc<CompletionPipeline>, capacity: usize, workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                loop {
                    let task = { receiver.lock().await.recv().await };
                    let Some(task) = task else {
                        info!(worker, "completion queue closed, worker exiting");
                        break;
                    };
                    run_task(&pipeline, task).await;
                }
            });
        }

        Self { sender }
    }

    /// Enqueue without waiting. A full queue is reported as back-pressure.
    pub fn enqueue(&self, task: CompletionTask) -> Result<(), SignError> {
        self.sender
            .try_send(task)
            .map_err(|_| SignError::unavailable("completion_queue"))
    }
}

async fn run_task(pipeline: &CompletionPipeline, task: CompletionTask) {
    let result = match task {
        CompletionTask::Document {
            process_id,
            outcome,
        } => pipeline
            .complete_document_job(&process_id, outcome)
            .await
            .map(|job| job.id),
        CompletionTask::Hash { owner, approval } => pipeline
            .complete_hash_job(owner, approval)
            .await
            .map(|job| job.id),
    };
    match result {
        Ok(job_id) => info!(%job_id, "completion task finished"),
        // The job row carries the terminal status; here we only log.
        Err(err) => error!(error = %err, "completion task failed"),
    }
}
