use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{Job, JobRequest, JobState, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAdmission {
    New(Job),
    /// A job with the same key is still inside its uniqueness window.
    Duplicate(Ulid),
}

/// In-memory job outbox with a unique-key index.
///
/// Admission and insertion are separate steps; callers serialize them per
/// meeting by holding the owning organizer's write lock.
#[derive(Default)]
pub struct JobLedger {
    jobs: DashMap<Ulid, Job>,
    by_key: DashMap<String, Vec<Ulid>>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn admit(&self, req: &JobRequest, now: Timestamp) -> JobAdmission {
        let key = req.unique_key();
        let window_start = now - req.unique_window;
        let existing = self.by_key.get(&key).and_then(|ids| {
            ids.iter().copied().find(|id| {
                self.jobs.get(id).is_some_and(|job| {
                    req.unique_states.contains(&job.state) && job.enqueued_at > window_start
                })
            })
        });
        match existing {
            Some(id) => JobAdmission::Duplicate(id),
            None => JobAdmission::New(Job {
                id: Ulid::new(),
                action: req.action,
                meeting_id: req.meeting_id,
                queue: req.queue.clone(),
                priority: req.priority,
                payload: req.payload.clone(),
                unique_key: key,
                state: JobState::Available,
                enqueued_at: now,
            }),
        }
    }

    pub fn insert(&self, job: Job) {
        let mut ids = self.by_key.entry(job.unique_key.clone()).or_default();
        if !ids.contains(&job.id) {
            ids.push(job.id);
        }
        drop(ids);
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: &Ulid) -> Option<Job> {
        self.jobs.get(id).map(|j| j.value().clone())
    }

    pub fn set_state(&self, id: &Ulid, state: JobState) -> Option<Job> {
        let mut job = self.jobs.get_mut(id)?;
        job.state = state;
        Some(job.clone())
    }

    /// Available jobs on `queue`, highest priority (lowest number) first,
    /// then oldest first.
    pub fn pending(&self, queue: &str) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.queue == queue && j.state == JobState::Available)
            .map(|j| j.value().clone())
            .collect();
        out.sort_by_key(|j| (j.priority, j.id));
        out
    }

    pub fn for_meeting(&self, meeting_id: &Ulid) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.meeting_id == *meeting_id)
            .map(|j| j.value().clone())
            .collect();
        out.sort_by_key(|j| j.id);
        out
    }

    /// Jobs not yet finished, oldest first.
    pub fn live(&self) -> Vec<Job> {
        let mut out: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Available | JobState::Executing))
            .map(|j| j.value().clone())
            .collect();
        out.sort_by_key(|j| j.id);
        out
    }

    /// Forget completed and discarded jobs. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, j| matches!(j.state, JobState::Available | JobState::Executing));
        self.by_key.retain(|_, ids| {
            ids.retain(|id| self.jobs.contains_key(id));
            !ids.is_empty()
        });
        before - self.jobs.len()
    }
}
