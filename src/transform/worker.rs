//! Transformer workers.
//!
//! Each worker is a tokio task owning a capacity-1 job channel. A job is
//! executed in two steps: the source bytes are fetched asynchronously, then
//! the CPU-bound pipeline runs on a blocking thread. Each job runs in its own
//! task, so a panic anywhere in the fetch or the pipeline is reported back to
//! the manager as `Internal` and the worker keeps serving jobs.
//!
//! Workers have no access to the cache or the pending table.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TransformError;
use crate::source::ImageSource;

use super::fingerprint::Fingerprint;
use super::imaging::{run_pipeline, ImagingLibrary};
use super::request::TransformRequest;

/// Index of a worker in the pool.
pub type WorkerId = usize;

/// One unit of work handed to a worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub fingerprint: Fingerprint,
    pub request: Arc<TransformRequest>,
}

/// Encoded result of a successful transform.
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub data: Bytes,
    pub transform_time: Duration,
    pub encode_time: Duration,
}

/// Report sent from a worker to the manager when a job finishes.
#[derive(Debug)]
pub struct Completion {
    pub worker: WorkerId,
    pub fingerprint: Fingerprint,
    pub outcome: Result<TransformedImage, TransformError>,
}

/// Executes transforms against a source and an imaging library.
#[derive(Clone)]
pub struct Worker {
    id: WorkerId,
    source: Arc<dyn ImageSource>,
    imaging: Arc<dyn ImagingLibrary>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        source: Arc<dyn ImageSource>,
        imaging: Arc<dyn ImagingLibrary>,
    ) -> Self {
        Self {
            id,
            source,
            imaging,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Fetch the source image and run the pipeline for one request.
    ///
    /// # Errors
    ///
    /// - `SourceNotFound` if the source does not hold the image
    /// - `TransformFailure` for other source failures and any imaging error
    /// - `Internal` if the blocking task panicked
    pub async fn execute(
        &self,
        request: &Arc<TransformRequest>,
    ) -> Result<TransformedImage, TransformError> {
        let data = self
            .source
            .fetch(&request.source_id)
            .await
            .map_err(|e| TransformError::from_source(&request.source_id, e))?;

        let imaging = Arc::clone(&self.imaging);
        let request = Arc::clone(request);
        let output =
            tokio::task::spawn_blocking(move || run_pipeline(imaging.as_ref(), &data, &request))
                .await
                .map_err(|e| TransformError::internal(format!("transform task failed: {}", e)))??;

        Ok(TransformedImage {
            data: output.data,
            transform_time: output.transform_time,
            encode_time: output.encode_time,
        })
    }

    /// Run [`execute`](Self::execute) in its own task so a panic becomes an
    /// `Internal` error instead of ending the worker.
    pub async fn execute_isolated(
        &self,
        request: Arc<TransformRequest>,
    ) -> Result<TransformedImage, TransformError> {
        let worker = self.clone();
        tokio::spawn(async move { worker.execute(&request).await })
            .await
            .map_err(|e| TransformError::internal(format!("transform task failed: {}", e)))?
    }

    /// Process jobs until the job channel or the completion channel closes.
    pub async fn run(self, mut jobs: mpsc::Receiver<Job>, completions: mpsc::Sender<Completion>) {
        while let Some(job) = jobs.recv().await {
            debug!(worker = self.id, fingerprint = %job.fingerprint, request = %job.request, "Transform started");

            let outcome = self.execute_isolated(Arc::clone(&job.request)).await;
            if let Err(ref e) = outcome {
                warn!(worker = self.id, fingerprint = %job.fingerprint, error = %e, "Transform failed");
            }

            let completion = Completion {
                worker: self.id,
                fingerprint: job.fingerprint,
                outcome,
            };
            if completions.send(completion).await.is_err() {
                break;
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }
}

/// Spawn a worker task and return the sending half of its job channel.
pub fn spawn_worker(worker: Worker, completions: mpsc::Sender<Completion>) -> mpsc::Sender<Job> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(worker.run(rx, completions));
    tx
}
