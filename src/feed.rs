use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Job;

const CHANNEL_CAPACITY: usize = 256;

/// Push delivery of committed jobs, one broadcast channel per queue.
///
/// Delivery is best-effort: a lagging or absent subscriber misses jobs and
/// must fall back to polling the store's pending list.
#[derive(Default)]
pub struct JobFeed {
    channels: DashMap<String, broadcast::Sender<Job>>,
}

impl JobFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to jobs committed on `queue`. Creates the channel if needed.
    pub fn subscribe(&self, queue: &str) -> broadcast::Receiver<Job> {
        self.channels
            .entry(queue.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening on the job's queue.
    pub fn publish(&self, job: &Job) {
        if let Some(sender) = self.channels.get(&job.queue) {
            let _ = sender.send(job.clone());
        }
    }

    pub fn subscriber_count(&self, queue: &str) -> usize {
        self.channels.get(queue).map_or(0, |s| s.receiver_count())
    }
}
