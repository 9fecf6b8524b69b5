//! Interaction/sleep clock transitions and review archival tiering
//!
//! The clocks drive review scheduling without ever reading wall time: every
//! tick carries its own timestamp. Consolidation ("sleep") fires when fatigue
//! or novelty-write load crosses its threshold, when the caller forces it, or
//! when the tick runs in sleep mode. Rebalancing bounds the active review set
//! and buckets overflow into warm/cold/frozen tiers.

use crate::model::{
    ArchiveTier, ArchivedRecord, ProfileState, ReviewStatus, ScheduleEntry,
};
use engram_core::constants::ACTIVE_REVIEW_SET_MAX;
use engram_core::{add_days, age_days, canonical, round6};
use serde_json::json;

/// Clock tick mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Interaction accrual with automatic consolidation checks
    Auto,
    /// Pure interaction accrual
    Interaction,
    /// Consolidation pass; only novelty writes accrue
    Sleep,
}

impl ClockMode {
    /// Parse from the wire form; absent/unknown defaults to `auto`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "interaction" => Self::Interaction,
            "sleep" => Self::Sleep,
            _ => Self::Auto,
        }
    }

    /// Wire form of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Interaction => "interaction",
            Self::Sleep => "sleep",
        }
    }
}

/// Normalized inputs for one clock tick.
#[derive(Debug, Clone)]
pub struct ClockTick {
    /// Tick mode
    pub mode: ClockMode,
    /// Whole interactions added to the interaction tick
    pub interaction_increment: u64,
    /// Sleep ticks added on consolidation; floored at 1
    pub sleep_increment: u64,
    /// Novelty contribution added to both loads
    pub novelty_load: f64,
    /// Direct fatigue adjustment; may be negative
    pub fatigue_delta: f64,
    /// Direct novelty-write accrual
    pub novelty_write_load: f64,
    /// Replacement fatigue threshold, if supplied
    pub fatigue_threshold: Option<f64>,
    /// Replacement novelty-write threshold, if supplied
    pub novelty_write_threshold: Option<f64>,
    /// Force a consolidation regardless of loads
    pub force_sleep: bool,
    /// Tick timestamp
    pub timestamp: String,
}

/// What one clock tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockTickOutcome {
    /// Whether consolidation fired
    pub consolidation_triggered: bool,
    /// Cause by precedence, when it fired
    pub consolidation_cause: Option<String>,
    /// Entry ids that moved scheduled -> due
    pub became_due: Vec<String>,
    /// Entry ids rescheduled out of completed on consolidation
    pub rescheduled: Vec<String>,
}

/// Apply one clock tick to a profile's clocks and review entries.
pub fn apply_clock_tick(state: &mut ProfileState, tick: &ClockTick) -> ClockTickOutcome {
    let clocks = &mut state.clocks;

    if let Some(threshold) = tick.fatigue_threshold {
        clocks.fatigue_threshold = round6(threshold);
    }
    if let Some(threshold) = tick.novelty_write_threshold {
        clocks.novelty_write_threshold = round6(threshold);
    }

    match tick.mode {
        ClockMode::Auto | ClockMode::Interaction => {
            clocks.interaction_tick += tick.interaction_increment;
            clocks.fatigue_load = round6(
                (clocks.fatigue_load
                    + tick.interaction_increment as f64
                    + tick.novelty_load
                    + tick.fatigue_delta)
                    .max(0.0),
            );
            clocks.novelty_write_load = round6(
                (clocks.novelty_write_load + tick.novelty_write_load + tick.novelty_load).max(0.0),
            );
            clocks.last_interaction_at = tick.timestamp.clone();
        }
        ClockMode::Sleep => {
            clocks.novelty_write_load = round6(
                (clocks.novelty_write_load + tick.novelty_write_load + tick.novelty_load).max(0.0),
            );
        }
    }

    let fatigue_hit = clocks.fatigue_load >= clocks.fatigue_threshold;
    let novelty_hit = clocks.novelty_write_load >= clocks.novelty_write_threshold;
    let should_sleep =
        tick.force_sleep || tick.mode == ClockMode::Sleep || fatigue_hit || novelty_hit;

    let cause = if !should_sleep {
        None
    } else if tick.force_sleep {
        Some("forced")
    } else if tick.mode == ClockMode::Sleep {
        Some("sleep_mode")
    } else if fatigue_hit && novelty_hit {
        Some("fatigue_and_novelty_threshold")
    } else if fatigue_hit {
        Some("fatigue_threshold")
    } else {
        Some("novelty_write_threshold")
    };

    let mut rescheduled = Vec::new();
    if should_sleep {
        clocks.sleep_tick += tick.sleep_increment.max(1);
        clocks.consolidation_count += 1;
        let relief = (clocks.fatigue_threshold / 2.0).ceil();
        clocks.fatigue_load = round6((clocks.fatigue_load - relief).max(0.0));
        clocks.novelty_write_load = 0.0;
        clocks.last_sleep_at = tick.timestamp.clone();
        clocks.last_consolidation_cause = cause.map(str::to_string);

        for entry in state.review_entries.values_mut() {
            if entry.status == ReviewStatus::Completed {
                entry.status = ReviewStatus::Scheduled;
                entry.repetition += 1;
                entry.due_at = add_days(&tick.timestamp, entry.interval_days as i64);
                entry.updated_at = tick.timestamp.clone();
                rescheduled.push(entry.schedule_entry_id.clone());
            }
        }
    }

    let mut became_due = Vec::new();
    for entry in state.review_entries.values_mut() {
        if entry.status == ReviewStatus::Scheduled && entry.due_at.as_str() <= tick.timestamp.as_str()
        {
            entry.status = ReviewStatus::Due;
            entry.updated_at = tick.timestamp.clone();
            became_due.push(entry.schedule_entry_id.clone());
        }
    }
    became_due.sort();
    rescheduled.sort();

    ClockTickOutcome {
        consolidation_triggered: should_sleep,
        consolidation_cause: cause.map(str::to_string),
        became_due,
        rescheduled,
    }
}

/// What a rebalance did.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceOutcome {
    /// Active set after the rebalance
    pub active_review_ids: Vec<String>,
    /// Warm tier entry ids
    pub warm: Vec<String>,
    /// Cold tier entry ids
    pub cold: Vec<String>,
    /// Frozen tier entry ids
    pub frozen: Vec<String>,
    /// Newly appended archive record ids
    pub archived: Vec<String>,
}

/// Rebalance the active review set and bucket overflow into tiers.
///
/// Entries order by `(dueAt, status, scheduleEntryId)`; the first
/// `active_limit` scheduled/due entries stay active. Everything else lands in
/// a tier: frozen at 365 days of age, cold when completed or 90 days old,
/// warm otherwise. Each eviction appends a content-addressed archive record.
pub fn rebalance(state: &mut ProfileState, active_limit: usize, timestamp: &str) -> RebalanceOutcome {
    let limit = active_limit.min(ACTIVE_REVIEW_SET_MAX);

    let mut ordered: Vec<&ScheduleEntry> = state.review_entries.values().collect();
    ordered.sort_by(|a, b| {
        (&a.due_at, a.status.as_str(), &a.schedule_entry_id).cmp(&(
            &b.due_at,
            b.status.as_str(),
            &b.schedule_entry_id,
        ))
    });

    let mut active = Vec::new();
    let mut overflow: Vec<(String, ReviewStatus, String)> = Vec::new();
    for entry in ordered {
        let eligible = matches!(entry.status, ReviewStatus::Scheduled | ReviewStatus::Due);
        if eligible && active.len() < limit {
            active.push(entry.schedule_entry_id.clone());
        } else {
            overflow.push((
                entry.schedule_entry_id.clone(),
                entry.status,
                entry.due_at.clone(),
            ));
        }
    }

    let mut warm = Vec::new();
    let mut cold = Vec::new();
    let mut frozen = Vec::new();
    let mut archived = Vec::new();
    for (entry_id, status, due_at) in overflow {
        let age = age_days(&due_at, timestamp);
        let tier = if age >= 365 {
            ArchiveTier::Frozen
        } else if status == ReviewStatus::Completed || age >= 90 {
            ArchiveTier::Cold
        } else {
            ArchiveTier::Warm
        };
        match tier {
            ArchiveTier::Warm => warm.push(entry_id.clone()),
            ArchiveTier::Cold => cold.push(entry_id.clone()),
            ArchiveTier::Frozen => frozen.push(entry_id.clone()),
        }

        let entry_digest = state
            .review_entries
            .get(&entry_id)
            .and_then(|entry| serde_json::to_value(entry).ok())
            .map(|value| canonical::digest(&value))
            .unwrap_or_default();
        let archive_fingerprint = json!({
            "entryDigest": &entry_digest,
            "scheduleEntryId": &entry_id,
            "tier": tier.as_str(),
        });
        let archive_id = canonical::make_id("arc", &canonical::digest(&archive_fingerprint));
        let already = state
            .review_archive
            .archived_records
            .iter()
            .any(|record| record.archive_id == archive_id);
        if !already {
            state.review_archive.archived_records.push(ArchivedRecord {
                archive_id: archive_id.clone(),
                schedule_entry_id: entry_id,
                tier,
                entry_digest,
                archived_at: timestamp.to_string(),
            });
            archived.push(archive_id);
        }
    }

    state.review_archive.active_limit = limit;
    state.review_archive.active_review_ids = active.clone();
    state.review_archive.warm = warm.clone();
    state.review_archive.cold = cold.clone();
    state.review_archive.frozen = frozen.clone();
    state
        .review_archive
        .archived_records
        .sort_by(|a, b| a.archive_id.cmp(&b.archive_id));

    RebalanceOutcome {
        active_review_ids: active,
        warm,
        cold,
        frozen,
        archived,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::EPOCH;

    fn entry(id: &str, status: ReviewStatus, due_at: &str) -> ScheduleEntry {
        ScheduleEntry {
            schedule_entry_id: id.to_string(),
            item_key: id.to_string(),
            status,
            repetition: 0,
            interval_days: 3,
            ease_factor: 0.5,
            due_at: due_at.to_string(),
            source_event_ids: vec!["evt_source000001".to_string()],
            created_at: EPOCH.to_string(),
            updated_at: EPOCH.to_string(),
        }
    }

    fn seeded_state(entries: Vec<ScheduleEntry>) -> ProfileState {
        let mut state = ProfileState::new("coding-agent", "__store_default__");
        for e in entries {
            state.review_entries.insert(e.schedule_entry_id.clone(), e);
        }
        state
    }

    #[test]
    fn fatigue_threshold_fires_on_third_tick() {
        let mut state = seeded_state(Vec::new());
        let tick = ClockTick {
            mode: ClockMode::Auto,
            interaction_increment: 1,
            sleep_increment: 1,
            novelty_load: 0.0,
            fatigue_delta: 0.0,
            novelty_write_load: 0.0,
            fatigue_threshold: Some(3.0),
            novelty_write_threshold: None,
            force_sleep: false,
            timestamp: "2024-03-01T00:00:00.000Z".to_string(),
        };
        let first = apply_clock_tick(&mut state, &tick);
        let second = apply_clock_tick(&mut state, &tick);
        assert!(!first.consolidation_triggered);
        assert!(!second.consolidation_triggered);
        let third = apply_clock_tick(&mut state, &tick);
        assert!(third.consolidation_triggered);
        assert_eq!(third.consolidation_cause.as_deref(), Some("fatigue_threshold"));
        assert_eq!(state.clocks.fatigue_load, 1.0);
        assert_eq!(state.clocks.novelty_write_load, 0.0);
        assert_eq!(
            state.clocks.last_consolidation_cause.as_deref(),
            Some("fatigue_threshold")
        );
    }

    #[test]
    fn forced_sleep_takes_precedence() {
        let mut state = seeded_state(Vec::new());
        let tick = ClockTick {
            mode: ClockMode::Sleep,
            interaction_increment: 0,
            sleep_increment: 2,
            novelty_load: 0.0,
            fatigue_delta: 0.0,
            novelty_write_load: 0.0,
            fatigue_threshold: None,
            novelty_write_threshold: None,
            force_sleep: true,
            timestamp: "2024-03-01T00:00:00.000Z".to_string(),
        };
        let outcome = apply_clock_tick(&mut state, &tick);
        assert_eq!(outcome.consolidation_cause.as_deref(), Some("forced"));
        assert_eq!(state.clocks.sleep_tick, 2);
    }

    #[test]
    fn scheduled_entries_become_due() {
        let mut state = seeded_state(vec![
            entry("rs_a", ReviewStatus::Scheduled, "2024-01-01T00:00:00.000Z"),
            entry("rs_b", ReviewStatus::Scheduled, "2030-01-01T00:00:00.000Z"),
        ]);
        let tick = ClockTick {
            mode: ClockMode::Interaction,
            interaction_increment: 1,
            sleep_increment: 1,
            novelty_load: 0.0,
            fatigue_delta: 0.0,
            novelty_write_load: 0.0,
            fatigue_threshold: None,
            novelty_write_threshold: None,
            force_sleep: false,
            timestamp: "2024-06-01T00:00:00.000Z".to_string(),
        };
        let outcome = apply_clock_tick(&mut state, &tick);
        assert_eq!(outcome.became_due, vec!["rs_a".to_string()]);
        assert_eq!(
            state.review_entries["rs_b"].status,
            ReviewStatus::Scheduled
        );
    }

    #[test]
    fn consolidation_reschedules_completed_entries() {
        let mut state = seeded_state(vec![entry(
            "rs_done",
            ReviewStatus::Completed,
            "2024-01-01T00:00:00.000Z",
        )]);
        let tick = ClockTick {
            mode: ClockMode::Sleep,
            interaction_increment: 0,
            sleep_increment: 1,
            novelty_load: 0.0,
            fatigue_delta: 0.0,
            novelty_write_load: 0.0,
            fatigue_threshold: None,
            novelty_write_threshold: None,
            force_sleep: false,
            timestamp: "2024-06-01T00:00:00.000Z".to_string(),
        };
        let outcome = apply_clock_tick(&mut state, &tick);
        assert_eq!(outcome.rescheduled, vec!["rs_done".to_string()]);
        let entry = &state.review_entries["rs_done"];
        assert_eq!(entry.status, ReviewStatus::Scheduled);
        assert_eq!(entry.repetition, 1);
        assert_eq!(entry.due_at, "2024-06-04T00:00:00.000Z");
    }

    #[test]
    fn rebalance_bounds_active_set_and_tiers_overflow() {
        let mut state = seeded_state(vec![
            entry("rs_a", ReviewStatus::Due, "2024-05-01T00:00:00.000Z"),
            entry("rs_b", ReviewStatus::Scheduled, "2024-05-02T00:00:00.000Z"),
            entry("rs_c", ReviewStatus::Scheduled, "2024-05-03T00:00:00.000Z"),
            entry("rs_old", ReviewStatus::Scheduled, "2020-01-01T00:00:00.000Z"),
            entry("rs_done", ReviewStatus::Completed, "2024-04-01T00:00:00.000Z"),
        ]);
        let outcome = rebalance(&mut state, 2, "2024-05-10T00:00:00.000Z");
        assert_eq!(
            outcome.active_review_ids,
            vec!["rs_old".to_string(), "rs_a".to_string()]
        );
        assert_eq!(outcome.frozen, Vec::<String>::new());
        assert_eq!(outcome.cold, vec!["rs_done".to_string()]);
        assert_eq!(
            outcome.warm,
            vec!["rs_b".to_string(), "rs_c".to_string()]
        );
        assert_eq!(state.review_archive.active_limit, 2);
        assert_eq!(state.review_archive.archived_records.len(), 3);
    }
}
