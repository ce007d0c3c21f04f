//! 04:00 local-time trigger and missed-day catch-up replay for the daily
//! cycle. Weekly/archive cadence is driven by the caller invoking
//! [`super::run_weekly_cycle`]/[`super::run_archive_cycle`] once their own
//! gating period (week boundary, archive window) has elapsed.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, TimeZone};

use crate::config::DigestConfig;

use super::{run_daily_cycle, CatchUpState, DailySummary, DigestSource};

/// Local hour of day the digest cycle triggers at.
const TRIGGER_HOUR: u32 = 4;

/// Whether `now` has crossed today's 04:00 local trigger and the last
/// successful cycle ran before it (or never ran at all).
pub fn should_trigger(now: DateTime<Local>, last_run: Option<DateTime<Local>>) -> bool {
    let Some(today_trigger) = todays_trigger(now) else {
        return false;
    };
    if now < today_trigger {
        return false;
    }
    match last_run {
        Some(last) => last < today_trigger,
        None => true,
    }
}

fn todays_trigger(now: DateTime<Local>) -> Option<DateTime<Local>> {
    let naive = now
        .date_naive()
        .and_time(NaiveTime::from_hms_opt(TRIGGER_HOUR, 0, 0)?);
    Local.from_local_datetime(&naive).single()
}

/// Replay missed daily cycles, capped at `config.catchup_max_days`.
/// `last_success` is the last calendar day a daily digest was successfully
/// written for; `today` is the day the current cycle covers.
///
/// Window boundaries: uncapped, the replay covers exactly the missed days
/// (`last_success + 1` up to yesterday) and leaves today to the regular
/// cycle. When the backlog exceeds the cap, the window slides forward to
/// the `catchup_max_days` most recent days ending at `today` *inclusive* —
/// the oldest backlog is sacrificed for the most actionable recent days,
/// and the regular cycle's own run for today then skips as already
/// written.
///
/// Returns the per-day summaries generated (oldest first, in the order
/// they were run) and the aggregate [`CatchUpState`] to persist.
pub fn catch_up_missed_days(
    source: &dyn DigestSource,
    config: &DigestConfig,
    last_success: Option<NaiveDate>,
    today: NaiveDate,
) -> (Vec<DailySummary>, CatchUpState) {
    if config.catchup_max_days == 0 {
        return (Vec::new(), CatchUpState::default());
    }

    let first_missed = match last_success {
        Some(date) => date.succ_opt().unwrap_or(today),
        None => today,
    };

    if first_missed >= today {
        return (Vec::new(), CatchUpState::default());
    }

    // Days strictly before today that never got a digest.
    let missed_runs = u32::try_from((today - first_missed).num_days()).unwrap_or(u32::MAX);
    let capped = missed_runs > config.catchup_max_days;
    let replay_count = missed_runs.min(config.catchup_max_days);
    let mode = if capped { "cap" } else { "full" };

    let (mut cursor, last_replayed) = if capped {
        (
            today - Duration::days(i64::from(replay_count).saturating_sub(1)),
            today,
        )
    } else {
        (first_missed, today - Duration::days(1))
    };

    let mut summaries = Vec::new();
    while cursor <= last_replayed {
        let catch_up = CatchUpState {
            missed_runs,
            recovered: true,
            generated: u32::try_from(summaries.len()).unwrap_or(u32::MAX) + 1,
            mode: mode.to_owned(),
        };
        summaries.push(run_daily_cycle(source, config, cursor, catch_up));
        let Some(next) = cursor.succ_opt() else { break };
        cursor = next;
    }

    let final_state = CatchUpState {
        missed_runs,
        recovered: !summaries.is_empty(),
        generated: u32::try_from(summaries.len()).unwrap_or(u32::MAX),
        mode: mode.to_owned(),
    };

    (summaries, final_state)
}
