//! Recurring occurrence scheduling
//!
//! Expands each active recurrence into the calendar dates it is expected to
//! occur on within a window, per its frequency and reference anchor.
//! Anchored frequencies (weekly/monthly/yearly) scan the window day by day;
//! anchorless ones (biweekly/quarterly, or a missing anchor) step by their
//! canonical interval from the last known occurrence.

use chrono::{Datelike, Duration, NaiveDate};

use crate::models::{Frequency, ValidatedRecurrence};

/// One expected occurrence inside the simulation window.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledOccurrence {
    /// Day offset from "today", 1-based (day 1 = tomorrow)
    pub day_offset: u32,
    /// Index into the projector's recurrence list
    pub recurrence_index: usize,
}

/// Expand all recurrences over `(today, today + horizon_days]`.
pub fn build_schedule(
    recurrences: &[ValidatedRecurrence],
    today: NaiveDate,
    horizon_days: u32,
) -> Vec<ScheduledOccurrence> {
    let window_start = today + Duration::days(1);
    let window_end = today + Duration::days(horizon_days as i64);

    let mut schedule = Vec::new();
    for (index, recurrence) in recurrences.iter().enumerate() {
        for date in occurrence_dates(recurrence, window_start, window_end) {
            let day_offset = (date - today).num_days() as u32;
            schedule.push(ScheduledOccurrence {
                day_offset,
                recurrence_index: index,
            });
        }
    }

    schedule.sort_by_key(|occ| (occ.day_offset, occ.recurrence_index));
    schedule
}

/// Expected occurrence dates of one recurrence in `[window_start, window_end]`,
/// bounded by its own start/end dates.
pub fn occurrence_dates(
    recurrence: &ValidatedRecurrence,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Vec<NaiveDate> {
    if recurrence.start_date > window_end {
        return vec![];
    }
    if let Some(end) = recurrence.end_date {
        if end < window_start {
            return vec![];
        }
    }

    let lo = window_start.max(recurrence.start_date);
    let hi = match recurrence.end_date {
        Some(end) => window_end.min(end),
        None => window_end,
    };
    if lo > hi {
        return vec![];
    }

    match (recurrence.frequency, recurrence.reference_day) {
        (Frequency::Weekly, Some(weekday)) => {
            scan_days(lo, hi, |d| d.weekday().number_from_monday() == weekday)
        }
        (Frequency::Monthly, Some(day)) => {
            // Clamp so a day-31 anchor still fires in shorter months
            scan_days(lo, hi, |d| d.day() == day.min(days_in_month(d)))
        }
        (Frequency::Yearly, Some(ordinal)) => {
            scan_days(lo, hi, |d| d.ordinal() == ordinal.min(days_in_year(d)))
        }
        _ => step_from_anchor(recurrence, lo, hi),
    }
}

fn scan_days(lo: NaiveDate, hi: NaiveDate, matches: impl Fn(NaiveDate) -> bool) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = lo;
    while current <= hi {
        if matches(current) {
            dates.push(current);
        }
        current = current + Duration::days(1);
    }
    dates
}

/// Interval stepping from the last known occurrence (falling back to the
/// recurrence start date).
fn step_from_anchor(
    recurrence: &ValidatedRecurrence,
    lo: NaiveDate,
    hi: NaiveDate,
) -> Vec<NaiveDate> {
    let interval = Duration::days(recurrence.frequency.interval_days());
    let anchor = recurrence.last_occurrence.unwrap_or(recurrence.start_date);

    let mut dates = Vec::new();
    let mut current = anchor + interval;
    while current <= hi {
        if current >= lo {
            dates.push(current);
        }
        current = current + interval;
    }
    dates
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

fn days_in_year(date: NaiveDate) -> u32 {
    if NaiveDate::from_ymd_opt(date.year(), 2, 29).is_some() {
        366
    } else {
        365
    }
}
