use super::*;
use crate::clock::FixedClock;
use crate::model::fixtures::{at, meeting};
use crate::model::{JobAction, MeetingStatus};
use chrono::Duration;
use futures::future::join_all;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotkeep_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(at(8, 0) - Duration::days(1)))
}

fn open(path: &PathBuf, clock: Arc<FixedClock>) -> MeetingStore {
    MeetingStore::open(path.clone(), clock).unwrap()
}

fn job_for(action: JobAction, m: &Meeting) -> JobRequest {
    JobRequest {
        action,
        meeting_id: m.id,
        queue: action.queue().into(),
        priority: 1,
        payload: String::new(),
        unique_window: Duration::seconds(60),
        unique_states: vec![JobState::Available, JobState::Executing],
    }
}

fn create_job(m: &Meeting) -> JobRequest {
    job_for(JobAction::CreateCalendarEvent, m)
}

fn mutation<F>(f: F) -> F
where
    F: Fn(&Meeting) -> Result<Meeting, BookingError> + Send + Sync,
{
    f
}

// ── Create ───────────────────────────────────────────────

#[tokio::test]
async fn create_commits_meeting_and_job_together() {
    let path = test_wal_path("create_commit.wal");
    let store = open(&path, fixed_clock());

    let m = meeting(1, at(10, 0), 30);
    let (saved, outcome) = store.create_meeting(m.clone(), create_job(&m)).await.unwrap();
    assert_eq!(saved, m);
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));

    assert_eq!(store.get(&m.uid).await, Some(m.clone()));
    let jobs = store.jobs_for_meeting(&m.id);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].action, JobAction::CreateCalendarEvent);
    assert_eq!(jobs[0].unique_key, format!("create:{}", m.id));
    assert_eq!(store.wal_appends_since_compact().await, 1);
}

#[tokio::test]
async fn conflicting_create_writes_nothing() {
    let path = test_wal_path("create_conflict.wal");
    let store = open(&path, fixed_clock());

    let first = meeting(1, at(10, 0), 30);
    store.create_meeting(first.clone(), create_job(&first)).await.unwrap();

    let clash = meeting(1, at(10, 15), 30);
    let err = store.create_meeting(clash.clone(), create_job(&clash)).await.unwrap_err();
    assert_eq!(err, BookingError::TimeConflict);
    assert_eq!(store.get(&clash.uid).await, None);
    assert!(store.jobs_for_meeting(&clash.id).is_empty());
    assert_eq!(store.wal_appends_since_compact().await, 1);
}

#[tokio::test]
async fn other_organizers_do_not_conflict() {
    let path = test_wal_path("create_other_org.wal");
    let store = open(&path, fixed_clock());
    let a = meeting(1, at(10, 0), 30);
    let b = meeting(2, at(10, 0), 30);
    store.create_meeting(a.clone(), create_job(&a)).await.unwrap();
    store.create_meeting(b.clone(), create_job(&b)).await.unwrap();
    assert_eq!(store.meeting_count(), 2);
}

#[tokio::test]
async fn duplicate_uid_rejected() {
    let path = test_wal_path("create_dup_uid.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let mut again = meeting(1, at(15, 0), 30);
    again.uid = m.uid;
    let err = store.create_meeting(again.clone(), create_job(&again)).await.unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::System);
}

#[tokio::test]
async fn concurrent_creates_for_one_slot_yield_one_meeting() {
    let path = test_wal_path("create_race.wal");
    let store = Arc::new(open(&path, fixed_clock()));

    let attempts = (0..16).map(|_| {
        let store = store.clone();
        async move {
            let m = meeting(7, at(10, 0), 30);
            let job = create_job(&m);
            tokio::spawn(async move { store.create_meeting(m, job).await }).await.unwrap()
        }
    });
    let results = join_all(attempts).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == BookingError::TimeConflict)
    );
    let confirmed = store
        .meetings_for(7)
        .await
        .into_iter()
        .filter(|m| m.status == MeetingStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 1);
}

#[tokio::test]
async fn cancelled_meeting_frees_its_slot() {
    let path = test_wal_path("cancel_frees.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let cancel = mutation(|cur| {
        let mut next = cur.clone();
        next.status = MeetingStatus::Cancelled;
        Ok(next)
    });
    store
        .update_meeting(m.uid, &cancel, job_for(JobAction::DeleteCalendarEvent, &m))
        .await
        .unwrap();

    let replacement = meeting(1, at(10, 0), 30);
    store.create_meeting(replacement.clone(), create_job(&replacement)).await.unwrap();
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_into_taken_slot_is_conflict() {
    let path = test_wal_path("update_conflict.wal");
    let store = open(&path, fixed_clock());
    let a = meeting(1, at(10, 0), 30);
    let b = meeting(1, at(14, 0), 30);
    store.create_meeting(a.clone(), create_job(&a)).await.unwrap();
    store.create_meeting(b.clone(), create_job(&b)).await.unwrap();

    let move_onto_a = mutation(|cur| {
        let mut next = cur.clone();
        next.start_time = at(10, 0);
        next.end_time = at(10, 30);
        Ok(next)
    });
    let err = store
        .update_meeting(b.uid, &move_onto_a, job_for(JobAction::UpdateCalendarEvent, &b))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::TimeConflict);
    assert_eq!(store.get(&b.uid).await.unwrap().start_time, at(14, 0));
    assert_eq!(store.jobs_for_meeting(&b.id).len(), 1);
}

#[tokio::test]
async fn update_may_overlap_its_own_old_window() {
    let path = test_wal_path("update_self_overlap.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 60);
    store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let shift = mutation(|cur| {
        let mut next = cur.clone();
        next.start_time = at(10, 30);
        next.end_time = at(11, 30);
        Ok(next)
    });
    let (updated, outcome) = store
        .update_meeting(m.uid, &shift, job_for(JobAction::UpdateCalendarEvent, &m))
        .await
        .unwrap();
    assert_eq!(updated.start_time, at(10, 30));
    assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));
}

#[tokio::test]
async fn update_cannot_change_identity() {
    let path = test_wal_path("update_identity.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let hijack = mutation(|cur| {
        let mut next = cur.clone();
        next.id = Ulid::new();
        next.organizer_user_id = 99;
        next.title = "Renamed".into();
        Ok(next)
    });
    let (updated, _) = store
        .update_meeting(m.uid, &hijack, job_for(JobAction::UpdateCalendarEvent, &m))
        .await
        .unwrap();
    assert_eq!(updated.id, m.id);
    assert_eq!(updated.organizer_user_id, 1);
    assert_eq!(updated.title, "Renamed");
}

#[tokio::test]
async fn failing_mutation_aborts_update() {
    let path = test_wal_path("update_abort.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let refuse = mutation(|_| Err(BookingError::Validation("nope".into())));
    let err = store
        .update_meeting(m.uid, &refuse, job_for(JobAction::UpdateCalendarEvent, &m))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::Validation("nope".into()));
    assert_eq!(store.get(&m.uid).await, Some(m.clone()));
    assert_eq!(store.jobs_for_meeting(&m.id).len(), 1);
}

#[tokio::test]
async fn update_unknown_meeting_is_not_found() {
    let path = test_wal_path("update_missing.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    let keep = mutation(|cur| Ok(cur.clone()));
    let err = store
        .update_meeting(m.uid, &keep, job_for(JobAction::UpdateCalendarEvent, &m))
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::NotFound(m.uid));
}

// ── Job outbox ───────────────────────────────────────────

#[tokio::test]
async fn enqueue_deduplicates_within_window() {
    let path = test_wal_path("enqueue_dedupe.wal");
    let clock = fixed_clock();
    let store = open(&path, clock.clone());
    let m = meeting(1, at(10, 0), 30);
    let (_, created) = store.create_meeting(m.clone(), create_job(&m)).await.unwrap();

    let again = store.enqueue(create_job(&m)).await.unwrap();
    assert_eq!(again, EnqueueOutcome::Duplicate(created.job_id()));

    clock.advance(Duration::seconds(61));
    let later = store.enqueue(create_job(&m)).await.unwrap();
    assert!(matches!(later, EnqueueOutcome::Enqueued(id) if id != created.job_id()));
    assert_eq!(store.jobs_for_meeting(&m.id).len(), 2);
}

#[tokio::test]
async fn enqueue_for_unknown_meeting_fails() {
    let path = test_wal_path("enqueue_unknown.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    assert_eq!(store.enqueue(create_job(&m)).await, Err(BookingError::NotFound(m.id)));
}

#[tokio::test]
async fn job_lifecycle() {
    let path = test_wal_path("job_lifecycle.wal");
    let store = open(&path, fixed_clock());
    let m = meeting(1, at(10, 0), 30);
    let (_, outcome) = store.create_meeting(m.clone(), create_job(&m)).await.unwrap();
    let id = outcome.job_id();

    assert_eq!(store.pending_jobs("calendar_integrations").len(), 1);
    assert!(store.pending_jobs("emails").is_empty());

    assert_eq!(store.claim_job(id).await.unwrap().state, JobState::Executing);
    assert!(store.pending_jobs("calendar_integrations").is_empty());
    assert!(matches!(store.claim_job(id).await, Err(BookingError::Validation(_))));

    assert_eq!(store.complete_job(id).await.unwrap().state, JobState::Completed);
    assert!(store.discard_job(id).await.is_err());
    assert_eq!(store.complete_job(Ulid::new()).await.unwrap_err().kind(), crate::error::ErrorKind::Validation);
}

#[tokio::test]
async fn feed_delivers_committed_jobs() {
    let path = test_wal_path("feed.wal");
    let store = open(&path, fixed_clock());
    let mut rx = store.feed().subscribe("calendar_integrations");

    let m = meeting(1, at(10, 0), 30);
    let (_, outcome) = store.create_meeting(m.clone(), create_job(&m)).await.unwrap();
    let job = rx.recv().await.unwrap();
    assert_eq!(job.id, outcome.job_id());
    assert_eq!(job.meeting_id, m.id);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn reopen_restores_meetings_and_jobs() {
    let path = test_wal_path("reopen.wal");
    let clock = fixed_clock();
    let m = meeting(1, at(10, 0), 30);
    let done_job;
    {
        let store = open(&path, clock.clone());
        let (_, outcome) = store.create_meeting(m.clone(), create_job(&m)).await.unwrap();
        done_job = outcome.job_id();
        store.complete_job(done_job).await.unwrap();
        let other = meeting(1, at(12, 0), 30);
        store.create_meeting(other.clone(), create_job(&other)).await.unwrap();
    }

    let store = open(&path, clock);
    assert_eq!(store.get(&m.uid).await, Some(m.clone()));
    assert_eq!(store.meeting_count(), 2);
    assert_eq!(store.job(&done_job).unwrap().state, JobState::Completed);
    assert_eq!(store.pending_jobs("calendar_integrations").len(), 1);

    // The constraint survives restart.
    let clash = meeting(1, at(10, 0), 30);
    assert_eq!(
        store.create_meeting(clash.clone(), create_job(&clash)).await.unwrap_err(),
        BookingError::TimeConflict
    );
}

#[tokio::test]
async fn compact_preserves_state_and_drops_finished_jobs() {
    let path = test_wal_path("compact.wal");
    let clock = fixed_clock();
    let keep = meeting(1, at(10, 0), 30);
    let moved_uid;
    let finished;
    {
        let store = open(&path, clock.clone());
        let (_, outcome) = store.create_meeting(keep.clone(), create_job(&keep)).await.unwrap();
        finished = outcome.job_id();
        store.complete_job(finished).await.unwrap();

        let churn = meeting(2, at(9, 0), 30);
        moved_uid = churn.uid;
        store.create_meeting(churn.clone(), create_job(&churn)).await.unwrap();
        for hour in 11..15 {
            let shift = mutation(move |cur| {
                let mut next = cur.clone();
                next.start_time = at(hour, 0);
                next.end_time = at(hour, 30);
                Ok(next)
            });
            clock.advance(Duration::minutes(2));
            store
                .update_meeting(churn.uid, &shift, job_for(JobAction::UpdateCalendarEvent, &churn))
                .await
                .unwrap();
        }
        assert_eq!(store.wal_appends_since_compact().await, 7);

        store.compact().await.unwrap();
        assert_eq!(store.wal_appends_since_compact().await, 0);
        assert!(store.job(&finished).is_none());
    }

    let store = open(&path, clock);
    assert_eq!(store.get(&keep.uid).await, Some(keep.clone()));
    assert_eq!(store.get(&moved_uid).await.unwrap().start_time, at(14, 0));
    assert!(store.job(&finished).is_none());
    // One create job plus four update jobs are still available.
    assert_eq!(store.pending_jobs("calendar_integrations").len(), 5);
}
