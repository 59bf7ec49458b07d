//! Durable meeting store with an atomic job outbox.
//!
//! State lives in memory, one [`OrganizerBook`] per organizer behind its own
//! lock. Every commit is one WAL record, written by a group-commit task, and
//! applied to memory only after it is durable.

mod book;
mod jobs;
mod wal;
#[cfg(test)]
mod tests;

pub use book::OrganizerBook;
pub use jobs::{JobAdmission, JobLedger};
pub use wal::Wal;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::BookingError;
use crate::feed::JobFeed;
use crate::model::{EnqueueOutcome, Job, JobRequest, JobState, Meeting, OrganizerId, StoreEvent};
use crate::observability::{
    JOBS_DEDUPLICATED_TOTAL, JOBS_ENQUEUED_TOTAL, STORE_CONFLICTS_TOTAL, WAL_FLUSH_BATCH_SIZE,
    WAL_FLUSH_DURATION_SECONDS,
};
use crate::ports::{JobQueue, MeetingMutation, MeetingRepository};

pub type SharedBook = Arc<RwLock<OrganizerBook>>;

// ── Group-commit WAL channel ─────────────────────────────

const WAL_CHANNEL_CAPACITY: usize = 4096;

type Responder = oneshot::Sender<io::Result<()>>;

enum WalCommand {
    Append { event: StoreEvent, response: Responder },
    Compact { events: Vec<StoreEvent>, response: Responder },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL. Takes the first waiting append, drains whatever else is
/// already queued, and makes the whole batch durable with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_command(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_command(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(StoreEvent, Responder)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL flush failed for {} records: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(StoreEvent, Responder)]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes don't ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_command(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Append { event, response } => commit_batch(wal, &mut vec![(event, response)]),
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

// ── Store ────────────────────────────────────────────────

pub struct MeetingStore {
    books: DashMap<OrganizerId, SharedBook>,
    /// Meeting uid → organizer.
    by_uid: DashMap<Ulid, OrganizerId>,
    /// Meeting id → uid.
    by_id: DashMap<Ulid, Ulid>,
    jobs: JobLedger,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Commits hold this shared. Compaction holds it exclusively so its
    /// snapshot contains every record already in the log.
    commit_gate: RwLock<()>,
    feed: Arc<JobFeed>,
    clock: Arc<dyn Clock>,
}

struct Replayed {
    books: HashMap<OrganizerId, OrganizerBook>,
    by_uid: DashMap<Ulid, OrganizerId>,
    by_id: DashMap<Ulid, Ulid>,
    jobs: JobLedger,
}

impl Replayed {
    fn apply(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::MeetingCommitted { meeting, job } => {
                let organizer = meeting.organizer_user_id;
                self.by_uid.insert(meeting.uid, organizer);
                self.by_id.insert(meeting.id, meeting.uid);
                self.books
                    .entry(organizer)
                    .or_insert_with(|| OrganizerBook::new(organizer))
                    .upsert(meeting);
                if let Some(job) = job {
                    self.jobs.insert(job);
                }
            }
            StoreEvent::JobEnqueued { job } => self.jobs.insert(job),
            StoreEvent::JobStateChanged { id, state } => {
                self.jobs.set_state(&id, state);
            }
        }
    }
}

impl MeetingStore {
    /// Replay `wal_path` and start the writer task. Must run inside a Tokio runtime.
    pub fn open(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let record_count = events.len();
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut state = Replayed {
            books: HashMap::new(),
            by_uid: DashMap::new(),
            by_id: DashMap::new(),
            jobs: JobLedger::new(),
        };
        for event in events {
            state.apply(event);
        }
        info!(
            path = %wal_path.display(),
            records = record_count,
            meetings = state.by_uid.len(),
            jobs = state.jobs.len(),
            "meeting store opened"
        );

        Ok(Self {
            books: state
                .books
                .into_iter()
                .map(|(id, book)| (id, Arc::new(RwLock::new(book))))
                .collect(),
            by_uid: state.by_uid,
            by_id: state.by_id,
            jobs: state.jobs,
            wal_tx,
            commit_gate: RwLock::new(()),
            feed: Arc::new(JobFeed::new()),
            clock,
        })
    }

    pub fn feed(&self) -> Arc<JobFeed> {
        self.feed.clone()
    }

    pub fn meeting_count(&self) -> usize {
        self.by_uid.len()
    }

    async fn wal_append(&self, event: StoreEvent) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { event, response: tx })
            .await
            .map_err(|_| BookingError::System("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::System("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::System(format!("WAL append failed: {e}")))
    }

    fn book(&self, organizer: OrganizerId) -> SharedBook {
        self.books
            .entry(organizer)
            .or_insert_with(|| Arc::new(RwLock::new(OrganizerBook::new(organizer))))
            .clone()
    }

    fn organizer_of(&self, uid: &Ulid) -> Option<OrganizerId> {
        self.by_uid.get(uid).map(|e| *e.value())
    }

    pub async fn get(&self, uid: &Ulid) -> Option<Meeting> {
        let organizer = self.organizer_of(uid)?;
        let book = self.books.get(&organizer).map(|e| e.value().clone())?;
        let guard = book.read().await;
        guard.get(uid).cloned()
    }

    /// All of an organizer's meetings, in start order.
    pub async fn meetings_for(&self, organizer: OrganizerId) -> Vec<Meeting> {
        let Some(book) = self.books.get(&organizer).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = book.read().await;
        guard.meetings().to_vec()
    }

    /// Insert a new meeting and enqueue `job` for it in one commit.
    pub async fn create_meeting(
        &self,
        meeting: Meeting,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError> {
        let _gate = self.commit_gate.read().await;
        if self.by_uid.contains_key(&meeting.uid) {
            return Err(BookingError::System(format!("meeting {} already exists", meeting.uid)));
        }
        let book = self.book(meeting.organizer_user_id);
        let mut guard = book.write().await;
        self.check_conflict(&guard, &meeting)?;
        self.commit(&mut guard, meeting, job).await
    }

    /// Re-read the meeting under its organizer's lock, apply `mutate`, and
    /// commit the result with `job`. Identity fields cannot change.
    pub async fn update_meeting(
        &self,
        uid: Ulid,
        mutate: MeetingMutation<'_>,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError> {
        let _gate = self.commit_gate.read().await;
        let organizer = self.organizer_of(&uid).ok_or(BookingError::NotFound(uid))?;
        let book = self.book(organizer);
        let mut guard = book.write().await;
        let current = guard.get(&uid).cloned().ok_or(BookingError::NotFound(uid))?;

        let mut next = mutate(&current)?;
        next.id = current.id;
        next.uid = current.uid;
        next.organizer_user_id = current.organizer_user_id;

        self.check_conflict(&guard, &next)?;
        self.commit(&mut guard, next, job).await
    }

    fn check_conflict(&self, book: &OrganizerBook, meeting: &Meeting) -> Result<(), BookingError> {
        book.check_no_conflict(meeting).inspect_err(|_| {
            metrics::counter!(STORE_CONFLICTS_TOTAL).increment(1);
            debug!(organizer = book.organizer, start = %meeting.start_time, "slot already held");
        })
    }

    /// Admit the job, write one record, then apply. Caller holds the
    /// commit gate and the organizer's write lock.
    async fn commit(
        &self,
        book: &mut OrganizerBook,
        meeting: Meeting,
        mut request: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError> {
        request.meeting_id = meeting.id;
        let (job, outcome) = match self.jobs.admit(&request, self.clock.now()) {
            JobAdmission::New(job) => {
                let id = job.id;
                (Some(job), EnqueueOutcome::Enqueued(id))
            }
            JobAdmission::Duplicate(id) => (None, EnqueueOutcome::Duplicate(id)),
        };

        self.wal_append(StoreEvent::MeetingCommitted { meeting: meeting.clone(), job: job.clone() })
            .await?;

        self.by_uid.insert(meeting.uid, meeting.organizer_user_id);
        self.by_id.insert(meeting.id, meeting.uid);
        book.upsert(meeting.clone());
        self.record_job(job, &request, outcome);
        Ok((meeting, outcome))
    }

    fn record_job(&self, job: Option<Job>, request: &JobRequest, outcome: EnqueueOutcome) {
        match job {
            Some(job) => {
                metrics::counter!(JOBS_ENQUEUED_TOTAL, "queue" => job.queue.clone()).increment(1);
                self.feed.publish(&job);
                self.jobs.insert(job);
            }
            None => {
                metrics::counter!(JOBS_DEDUPLICATED_TOTAL, "queue" => request.queue.clone()).increment(1);
                debug!(key = %request.unique_key(), existing = %outcome.job_id(), "duplicate job suppressed");
            }
        }
    }

    /// Enqueue a job for an existing meeting outside a meeting commit.
    pub async fn enqueue_job(&self, request: JobRequest) -> Result<EnqueueOutcome, BookingError> {
        let _gate = self.commit_gate.read().await;
        let uid = self
            .by_id
            .get(&request.meeting_id)
            .map(|e| *e.value())
            .ok_or(BookingError::NotFound(request.meeting_id))?;
        let organizer = self.organizer_of(&uid).ok_or(BookingError::NotFound(uid))?;
        // Serializes admission with the meeting's other commits.
        let book = self.book(organizer);
        let _guard = book.write().await;

        match self.jobs.admit(&request, self.clock.now()) {
            JobAdmission::Duplicate(id) => {
                let outcome = EnqueueOutcome::Duplicate(id);
                self.record_job(None, &request, outcome);
                Ok(outcome)
            }
            JobAdmission::New(job) => {
                let outcome = EnqueueOutcome::Enqueued(job.id);
                self.wal_append(StoreEvent::JobEnqueued { job: job.clone() }).await?;
                self.record_job(Some(job), &request, outcome);
                Ok(outcome)
            }
        }
    }

    // ── Job execution bookkeeping ────────────────────────────

    pub fn pending_jobs(&self, queue: &str) -> Vec<Job> {
        self.jobs.pending(queue)
    }

    pub fn job(&self, id: &Ulid) -> Option<Job> {
        self.jobs.get(id)
    }

    pub fn jobs_for_meeting(&self, meeting_id: &Ulid) -> Vec<Job> {
        self.jobs.for_meeting(meeting_id)
    }

    /// Mark an available job as taken by an executor.
    pub async fn claim_job(&self, id: Ulid) -> Result<Job, BookingError> {
        self.transition_job(id, JobState::Executing, &[JobState::Available]).await
    }

    pub async fn complete_job(&self, id: Ulid) -> Result<Job, BookingError> {
        self.transition_job(id, JobState::Completed, &[JobState::Available, JobState::Executing])
            .await
    }

    pub async fn discard_job(&self, id: Ulid) -> Result<Job, BookingError> {
        self.transition_job(id, JobState::Discarded, &[JobState::Available, JobState::Executing])
            .await
    }

    async fn transition_job(&self, id: Ulid, to: JobState, from: &[JobState]) -> Result<Job, BookingError> {
        let _gate = self.commit_gate.read().await;
        let job = self.jobs.get(&id).ok_or(BookingError::NotFound(id))?;
        if !from.contains(&job.state) {
            return Err(BookingError::Validation(format!(
                "job {id} is {:?} and cannot become {to:?}",
                job.state
            )));
        }
        self.wal_append(StoreEvent::JobStateChanged { id, state: to }).await?;
        self.jobs.set_state(&id, to).ok_or(BookingError::NotFound(id))
    }

    // ── Compaction ───────────────────────────────────────────

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the WAL as one record per meeting plus unfinished jobs.
    /// Finished jobs are dropped from memory too.
    pub async fn compact(&self) -> Result<(), BookingError> {
        let _gate = self.commit_gate.write().await;
        let pruned = self.jobs.prune_finished();

        let books: Vec<SharedBook> = self.books.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::with_capacity(self.by_uid.len());
        for book in books {
            let guard = book.read().await;
            events.extend(
                guard
                    .meetings()
                    .iter()
                    .map(|m| StoreEvent::MeetingCommitted { meeting: m.clone(), job: None }),
            );
        }
        events.extend(self.jobs.live().into_iter().map(|job| StoreEvent::JobEnqueued { job }));
        let records = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::System("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::System("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::System(format!("WAL compaction failed: {e}")))?;
        info!(records, pruned_jobs = pruned, "compacted WAL");
        Ok(())
    }
}

#[async_trait]
impl MeetingRepository for MeetingStore {
    async fn get_meeting(&self, uid: Ulid) -> Result<Option<Meeting>, BookingError> {
        Ok(self.get(&uid).await)
    }

    async fn create_meeting_with_conflict_check(
        &self,
        meeting: Meeting,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError> {
        self.create_meeting(meeting, job).await
    }

    async fn update_meeting_with_conflict_check(
        &self,
        uid: Ulid,
        mutate: MeetingMutation<'_>,
        job: JobRequest,
    ) -> Result<(Meeting, EnqueueOutcome), BookingError> {
        self.update_meeting(uid, mutate, job).await
    }
}

#[async_trait]
impl JobQueue for MeetingStore {
    async fn enqueue(&self, job: JobRequest) -> Result<EnqueueOutcome, BookingError> {
        self.enqueue_job(job).await
    }
}
