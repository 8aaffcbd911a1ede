use crate::{
    models::{ClassifyRequest, ClassifyResponse},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job worker is not available")]
    Unavailable,
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<JobStore>>,
}

/// Job states; only the newest `retain` finished jobs are kept.
struct JobStore {
    states: HashMap<Uuid, JobState>,
    finished: VecDeque<Uuid>,
    retain: usize,
}

impl JobStore {
    fn new(retain: usize) -> Self {
        Self {
            states: HashMap::new(),
            finished: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    fn set(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
    }

    fn finish(&mut self, id: Uuid, state: JobState) {
        self.states.insert(id, state);
        self.finished.push_back(id);
        while self.finished.len() > self.retain {
            if let Some(oldest) = self.finished.pop_front() {
                self.states.remove(&oldest);
                debug!(target = "classifier.jobs", job_id = %oldest, "job evicted");
            }
        }
    }
}

struct Job {
    id: Uuid,
    listings: Vec<ClassifyRequest>,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { results: Vec<ClassifyResponse> },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    /// Starts the worker. `retain` bounds how many finished jobs stay pollable.
    pub fn spawn(pipeline: Pipeline, capacity: usize, retain: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(JobStore::new(retain)));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.set(job.id, JobState::Running);
                }

                let count = job.listings.len();
                let result = pipeline.run_batch(job.listings).await;
                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(results) => {
                        info!(target = "classifier.jobs", job_id = %job.id, count, "job completed");
                        guard.finish(job.id, JobState::Completed { results });
                    }
                    Err(err) => {
                        warn!(target = "classifier.jobs", job_id = %job.id, "job failed: {err}");
                        guard.finish(
                            job.id,
                            JobState::Failed {
                                error: err.detail().to_string(),
                                stage: Some(err.stage().to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, listings: Vec<ClassifyRequest>) -> Result<Uuid, JobError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.set(id, JobState::Queued);
        }
        if self.tx.send(Job { id, listings }).await.is_err() {
            self.statuses.lock().await.states.remove(&id);
            return Err(JobError::Unavailable);
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.states.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}
