use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ulid::Ulid;

use slotkeep::clock::{Clock, FixedClock};
use slotkeep::model::{
    AttendeeForm, CalendarEvent, CalendarIntegration, JobAction, JobRequest, JobState, Meeting,
    MeetingStatus, MeetingType, MeetingTypeId, OrganizerId, OrganizerProfile, Reminder, Timestamp,
};
use slotkeep::ports::{Directory, Notifier, VideoRooms};
use slotkeep::providers::{
    CalendarClient, CalendarProviderKind, CalendarProviders, GuardedCalendar, ProviderError,
};
use slotkeep::resilience::{BreakerRegistry, RetryOptions};
use slotkeep::{
    BookingError, BookingOptions, BookingRequest, BookingService, BookingSettings, Collaborators,
    MeetingStore, SlotInput,
};

const ORGANIZERS: u64 = 10;

fn bench_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("slotkeep_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

fn raw_meeting(organizer: OrganizerId, start: Timestamp) -> Meeting {
    Meeting {
        id: Ulid::new(),
        uid: Ulid::new(),
        title: "Bench call".into(),
        start_time: start,
        end_time: start + chrono::Duration::minutes(30),
        duration_minutes: 30,
        attendee_timezone: "UTC".into(),
        status: MeetingStatus::Confirmed,
        organizer_user_id: organizer,
        organizer_name: "Bench".into(),
        organizer_email: "bench@example.com".into(),
        attendee_name: "Load".into(),
        attendee_email: "load@example.com".into(),
        attendee_phone: None,
        attendee_message: None,
        meeting_type_id: None,
        calendar_integration_id: None,
        calendar_path: None,
        video_integration_id: None,
        reminders: vec![Reminder::minutes(30)],
        view_url: String::new(),
        reschedule_url: String::new(),
        cancel_url: String::new(),
        cancelled_at: None,
        cancellation_reason: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

fn sync_job(m: &Meeting) -> JobRequest {
    JobRequest {
        action: JobAction::CreateCalendarEvent,
        meeting_id: m.id,
        queue: JobAction::CreateCalendarEvent.queue().into(),
        priority: 1,
        payload: String::new(),
        unique_window: chrono::Duration::seconds(60),
        unique_states: vec![JobState::Available, JobState::Executing],
    }
}

// ── Collaborators ────────────────────────────────────────────

struct BenchDirectory;

#[async_trait]
impl Directory for BenchDirectory {
    async fn organizer_profile(&self, id: OrganizerId) -> Result<Option<OrganizerProfile>, BookingError> {
        Ok(Some(OrganizerProfile {
            user_id: id,
            full_name: Some(format!("Organizer {id}")),
            username: None,
            email: Some(format!("organizer{id}@example.com")),
            timezone: Some("UTC".into()),
            buffer_minutes: Some(0),
            min_advance_hours: Some(0),
            max_advance_booking_days: Some(365),
            calendar_integrations: vec![CalendarIntegration {
                id,
                provider: CalendarProviderKind::Google,
                calendar_path: None,
            }],
        }))
    }

    async fn meeting_type(&self, _id: MeetingTypeId) -> Result<Option<MeetingType>, BookingError> {
        Ok(None)
    }
}

/// A calendar that answers after a fixed delay with no events.
struct SlowCalendar(Duration);

#[async_trait]
impl CalendarClient for SlowCalendar {
    fn provider(&self) -> CalendarProviderKind {
        CalendarProviderKind::Google
    }

    async fn events_for_range_fresh(
        &self,
        _organizer: OrganizerId,
        _integration: &CalendarIntegration,
        _from: Timestamp,
        _to: Timestamp,
    ) -> Result<Vec<CalendarEvent>, ProviderError> {
        tokio::time::sleep(self.0).await;
        Ok(vec![])
    }
}

struct Quiet;

#[async_trait]
impl Notifier for Quiet {
    async fn meeting_created(&self, _meeting: &Meeting) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn meeting_cancelled(&self, _meeting: &Meeting) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[async_trait]
impl VideoRooms for Quiet {
    async fn schedule_video_room_creation_with_emails(&self, _meeting_id: Ulid) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn service(store: Arc<MeetingStore>, clock: Arc<FixedClock>, calendar_delay: Duration) -> Arc<BookingService> {
    let deps = Collaborators {
        directory: Arc::new(BenchDirectory),
        repository: store,
        calendar: GuardedCalendar::new(
            CalendarProviders::new().with(Arc::new(SlowCalendar(calendar_delay))),
            Arc::new(BreakerRegistry::with_defaults()),
            RetryOptions::default(),
        ),
        notifier: Arc::new(Quiet),
        video: Arc::new(Quiet),
        breakers: Arc::new(BreakerRegistry::with_defaults()),
        clock,
    };
    Arc::new(BookingService::new(deps, BookingSettings::default()))
}

fn request(organizer: OrganizerId, start: Timestamp) -> BookingRequest {
    BookingRequest {
        organizer_id: Some(organizer),
        meeting_type_id: None,
        slot: SlotInput::new(
            &start.format("%Y-%m-%d").to_string(),
            &start.format("%H:%M").to_string(),
            "30",
            "UTC",
        ),
        attendee: AttendeeForm {
            name: "Load Test".into(),
            email: "load@example.com".into(),
            phone: None,
            message: None,
        },
    }
}

// ── Phases ───────────────────────────────────────────────────

async fn phase1_sequential_store(store: &MeetingStore) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let m = raw_meeting(1, epoch() + chrono::Duration::minutes(30 * i as i64));
        let t = Instant::now();
        store.create_meeting(m.clone(), sync_job(&m)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} commits in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("commit latency", &mut latencies);
}

async fn phase2_concurrent_store(store: Arc<MeetingStore>) {
    let n_tasks = ORGANIZERS as usize;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for task in 0..n_tasks {
        let store = store.clone();
        let organizer = 100 + task as u64;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let m = raw_meeting(organizer, epoch() + chrono::Duration::minutes(30 * j as i64));
                store.create_meeting(m.clone(), sync_job(&m)).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} organizers x {n_per_task} commits = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_slot(service: Arc<BookingService>, clock: &FixedClock) {
    let n_rounds = 50;
    let n_contenders = 20;
    let mut latencies = Vec::with_capacity(n_rounds * n_contenders);
    let mut winners = 0;
    let mut conflicts = 0;
    let now = clock.now();

    for round in 0..n_rounds {
        let slot = now + chrono::Duration::days(1) + chrono::Duration::hours(round as i64);
        let mut handles = Vec::new();
        for _ in 0..n_contenders {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let t = Instant::now();
                let result = service
                    .create(request(7, slot), BookingOptions { skip_availability_check: true })
                    .await;
                (t.elapsed(), result)
            }));
        }
        for h in handles {
            let (latency, result) = h.await.unwrap();
            latencies.push(latency);
            match result {
                Ok(_) => winners += 1,
                Err(_) => conflicts += 1,
            }
        }
    }

    println!("  {n_rounds} slots, {n_contenders} contenders each: {winners} confirmed, {conflicts} refused");
    assert_eq!(winners, n_rounds, "each slot must be confirmed exactly once");
    print_latency("booking latency", &mut latencies);
}

async fn phase4_fresh_check(service: Arc<BookingService>, clock: &FixedClock) {
    let n = 200;
    let start = Instant::now();
    let now = clock.now();
    let mut handles = Vec::new();

    for i in 0..n {
        let service = service.clone();
        let organizer = 1000 + i % ORGANIZERS;
        let slot = now + chrono::Duration::days(2) + chrono::Duration::minutes(30 * (i / ORGANIZERS) as i64);
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            service.create(request(organizer, slot), BookingOptions::default()).await.unwrap();
            t.elapsed()
        }));
    }

    let mut latencies = Vec::with_capacity(n as usize);
    for h in handles {
        latencies.push(h.await.unwrap());
    }
    println!("  {n} bookings with a 20ms calendar in {:.2}s", start.elapsed().as_secs_f64());
    print_latency("end-to-end latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let clock = Arc::new(FixedClock::new(epoch()));

    println!("=== slotkeep stress benchmark ===");

    println!("\n[phase 1] sequential commit throughput");
    let store = Arc::new(MeetingStore::open(bench_wal_path("phase1.wal"), clock.clone()).unwrap());
    phase1_sequential_store(&store).await;

    println!("\n[phase 2] concurrent commit throughput");
    phase2_concurrent_store(store.clone()).await;

    println!("\n[phase 3] contended slot");
    let svc = service(store.clone(), clock.clone(), Duration::ZERO);
    phase3_contended_slot(svc, &clock).await;

    println!("\n[phase 4] bookings with fresh calendar check");
    let svc = service(store.clone(), clock.clone(), Duration::from_millis(20));
    phase4_fresh_check(svc, &clock).await;

    println!("\n[compaction]");
    let t = Instant::now();
    store.compact().await.unwrap();
    println!("  {} meetings compacted in {:.2}ms", store.meeting_count(), t.elapsed().as_secs_f64() * 1000.0);

    println!("\n=== benchmark complete ===");
}
