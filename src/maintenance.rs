use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::MeetingStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(store: Arc<MeetingStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(store: &MeetingStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        debug!(appends, threshold, "compaction not due");
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::fixtures::{at, meeting};
    use crate::model::{JobAction, JobRequest, JobState};
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeep_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn job() -> JobRequest {
        JobRequest {
            action: JobAction::CreateCalendarEvent,
            meeting_id: ulid::Ulid::new(),
            queue: JobAction::CreateCalendarEvent.queue().into(),
            priority: 1,
            payload: String::new(),
            unique_window: chrono::Duration::seconds(60),
            unique_states: vec![JobState::Available, JobState::Executing],
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let clock = Arc::new(FixedClock::new(at(6, 0)));
        let store = MeetingStore::open(path, clock).unwrap();

        for hour in [9, 11, 13] {
            store.create_meeting(meeting(1, at(hour, 0), 30), job()).await.unwrap();
        }
        assert!(!compact_if_due(&store, 5).await);
        assert_eq!(store.wal_appends_since_compact().await, 3);

        assert!(compact_if_due(&store, 3).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        assert_eq!(store.meeting_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_compacts() {
        let path = test_wal_path("loop.wal");
        let clock = Arc::new(FixedClock::new(at(6, 0)));
        let store = Arc::new(MeetingStore::open(path, clock).unwrap());
        store.create_meeting(meeting(1, at(9, 0), 30), job()).await.unwrap();
        store.create_meeting(meeting(1, at(10, 0), 30), job()).await.unwrap();

        let task = tokio::spawn(run_compactor(store.clone(), 2));
        // The first tick fires immediately.
        for _ in 0..50 {
            if store.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(store.wal_appends_since_compact().await, 0);
        task.abort();
    }
}
