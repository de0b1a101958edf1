//! Read-only reporting over stored memory records.

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::memory::types::{unix_ts, MemoryRecord, Turn};

/// How many of the latest turns a participant detail shows.
pub const RECENT_TURNS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub total_participants: usize,
    pub active_participants: usize,
    pub summarized_participants: usize,
    pub total_turns: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub participant_id: String,
    pub last_activity: Option<String>,
    pub short_term_count: usize,
    pub turn_count: u32,
    pub has_long_term_summary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantDetail {
    pub participant_id: String,
    pub last_activity: Option<String>,
    pub turn_count: u32,
    pub long_term_summary: String,
    pub short_term_count: usize,
    pub recent_turns: Vec<Turn>,
}

pub fn system_status(records: &[MemoryRecord]) -> SystemStatus {
    SystemStatus {
        total_participants: records.len(),
        active_participants: records.iter().filter(|r| r.last_updated.is_some()).count(),
        summarized_participants: records
            .iter()
            .filter(|r| !r.long_term_summary.trim().is_empty())
            .count(),
        total_turns: records.iter().map(|r| r.short_term.len()).sum(),
        timestamp: format_ts(unix_ts()).unwrap_or_default(),
    }
}

pub fn memory_stats(records: &[MemoryRecord]) -> Vec<MemoryStats> {
    records
        .iter()
        .map(|r| MemoryStats {
            participant_id: r.participant_id.clone(),
            last_activity: r.last_updated.and_then(format_ts),
            short_term_count: r.short_term.len(),
            turn_count: r.turn_count,
            has_long_term_summary: !r.long_term_summary.trim().is_empty(),
        })
        .collect()
}

pub fn participant_detail(record: &MemoryRecord) -> ParticipantDetail {
    let start = record.short_term.len().saturating_sub(RECENT_TURNS);
    ParticipantDetail {
        participant_id: record.participant_id.clone(),
        last_activity: record.last_updated.and_then(format_ts),
        turn_count: record.turn_count,
        long_term_summary: record.long_term_summary.clone(),
        short_term_count: record.short_term.len(),
        recent_turns: record.short_term[start..].to_vec(),
    }
}

fn format_ts(ts: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
}
