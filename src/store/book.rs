use ulid::Ulid;

use crate::error::BookingError;
use crate::model::{Meeting, OrganizerId, Span};

/// One organizer's meetings, sorted by start time.
#[derive(Debug, Clone, Default)]
pub struct OrganizerBook {
    pub organizer: OrganizerId,
    meetings: Vec<Meeting>,
}

impl OrganizerBook {
    pub fn new(organizer: OrganizerId) -> Self {
        Self { organizer, meetings: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.meetings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meetings.is_empty()
    }

    pub fn meetings(&self) -> &[Meeting] {
        &self.meetings
    }

    pub fn get(&self, uid: &Ulid) -> Option<&Meeting> {
        self.meetings.iter().find(|m| m.uid == *uid)
    }

    /// Insert or replace by `uid`, keeping start order.
    pub fn upsert(&mut self, meeting: Meeting) {
        if let Some(pos) = self.meetings.iter().position(|m| m.uid == meeting.uid) {
            self.meetings.remove(pos);
        }
        let pos = self
            .meetings
            .binary_search_by_key(&meeting.start_time, |m| m.start_time)
            .unwrap_or_else(|e| e);
        self.meetings.insert(pos, meeting);
    }

    /// Meetings whose window overlaps `query`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Meeting> {
        // Nothing at or past this index starts before query.end.
        let right_bound = self.meetings.partition_point(|m| m.start_time < query.end);
        self.meetings[..right_bound]
            .iter()
            .filter(move |m| m.end_time > query.start)
    }

    /// At most one slot-holding meeting may cover any instant. Identical
    /// start times are the degenerate case. The candidate's own row is
    /// ignored so that updates can keep or shift their window.
    pub fn check_no_conflict(&self, candidate: &Meeting) -> Result<(), BookingError> {
        if !candidate.status.holds_slot() {
            return Ok(());
        }
        let clash = self
            .overlapping(&candidate.span())
            .any(|m| m.uid != candidate.uid && m.status.holds_slot());
        if clash { Err(BookingError::TimeConflict) } else { Ok(()) }
    }
}
