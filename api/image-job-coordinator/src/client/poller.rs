use super::{ClientError, StatusSource};
use crate::module::image_job::schema::{JobStatus, JobStatusView};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl Progress {
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SlideState {
    Loading,
    Ready {
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    Failed { reason: String },
}

#[derive(Debug, Clone)]
struct TrackedJob {
    status: JobStatus,
    image_url: Option<String>,
    error_message: Option<String>,
    /// Omitted from a successful status response: unknown or not ours.
    missing: bool,
}

impl TrackedJob {
    fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            image_url: None,
            error_message: None,
            missing: false,
        }
    }

    fn is_settled(&self) -> bool {
        self.missing || self.status.is_terminal()
    }

    fn slide(&self) -> SlideState {
        if self.missing {
            return SlideState::Failed {
                reason: "job not found".to_string(),
            };
        }
        match self.status {
            JobStatus::Completed => match &self.image_url {
                Some(url) if !url.is_empty() => SlideState::Ready {
                    image_url: url.clone(),
                },
                _ => SlideState::Failed {
                    reason: "completed without an image".to_string(),
                },
            },
            JobStatus::Failed => SlideState::Failed {
                reason: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string()),
            },
            JobStatus::Pending | JobStatus::Processing => SlideState::Loading,
        }
    }
}

/// Follows the jobs of one submission until all of them settle.
///
/// Every job starts out PENDING locally. Each poll sends the full id set and
/// merges the answer. Dropping the future returned by [`JobPoller::run`]
/// stops polling.
pub struct JobPoller<S> {
    source: S,
    interval: Duration,
    job_ids: Vec<String>,
    jobs: HashMap<String, TrackedJob>,
    slides: Vec<(usize, String)>,
}

impl<S: StatusSource> JobPoller<S> {
    /// Binds slide `i` to `job_ids[i]`.
    pub fn new(source: S, job_ids: Vec<String>) -> Self {
        let slides = job_ids.into_iter().enumerate().collect();
        Self::with_slides(source, slides)
    }

    pub fn with_slides(source: S, slides: Vec<(usize, String)>) -> Self {
        let mut job_ids = Vec::with_capacity(slides.len());
        let mut jobs = HashMap::with_capacity(slides.len());
        for (_, job_id) in &slides {
            if !jobs.contains_key(job_id) {
                jobs.insert(job_id.clone(), TrackedJob::pending());
                job_ids.push(job_id.clone());
            }
        }
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            job_ids,
            jobs,
            slides,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn is_finished(&self) -> bool {
        self.jobs.values().all(TrackedJob::is_settled)
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress {
            total: self.jobs.len(),
            ..Progress::default()
        };
        for job in self.jobs.values() {
            if job.missing || job.status == JobStatus::Failed {
                progress.failed += 1;
            } else if job.status == JobStatus::Completed {
                progress.completed += 1;
            }
        }
        progress
    }

    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.get(job_id).map(|job| job.status)
    }

    /// Slide states ordered by slide index.
    pub fn slides(&self) -> Vec<(usize, SlideState)> {
        let mut slides: Vec<(usize, SlideState)> = self
            .slides
            .iter()
            .map(|(index, job_id)| {
                let state = self
                    .jobs
                    .get(job_id)
                    .map(TrackedJob::slide)
                    .unwrap_or(SlideState::Loading);
                (*index, state)
            })
            .collect();
        slides.sort_by_key(|(index, _)| *index);
        slides
    }

    /// One status round-trip. A finished poller makes no request.
    pub async fn poll_once(&mut self) -> Result<Progress, ClientError> {
        if self.is_finished() {
            return Ok(self.progress());
        }
        let views = self.source.fetch_status(&self.job_ids).await?;
        self.merge(views);
        Ok(self.progress())
    }

    /// Polls on a fixed interval until every job is settled.
    pub async fn run(&mut self) -> Progress {
        self.run_with(|_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_progress` after each successful poll.
    pub async fn run_with<F: FnMut(&Progress)>(&mut self, mut on_progress: F) -> Progress {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.is_finished() {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(progress) => on_progress(&progress),
                Err(e) => warn!(error = %e, "status poll failed; retrying next tick"),
            }
        }
        self.progress()
    }

    fn merge(&mut self, views: Vec<JobStatusView>) {
        let mut seen = Vec::with_capacity(views.len());
        for view in views {
            let Some(job) = self.jobs.get_mut(&view.id) else {
                debug!(job_id = %view.id, "ignoring untracked job in status response");
                continue;
            };
            job.status = view.status;
            job.image_url = view.image_url;
            job.error_message = view.error_message;
            job.missing = false;
            seen.push(view.id);
        }
        for (job_id, job) in self.jobs.iter_mut() {
            if !job.status.is_terminal() && !seen.contains(job_id) {
                job.missing = true;
            }
        }
    }
}
