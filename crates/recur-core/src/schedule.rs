//! Due-date calculation for recurrence rules.

use chrono::NaiveDate;

use recur_domain::{RecurrenceRule, RecurrenceUnit};

/// Upper bound on candidates examined for one rule in one pass. Guards against
/// ancient or corrupted start dates, not a business limit.
pub const MAX_DUE_DATE_ITERATIONS: usize = 3650;

/// Lists the occurrences of a rule that fall due on or before `as_of`.
///
/// Dates are strictly increasing, each after `checkpoint` (or on/after `start`
/// when there is none) and never after `as_of`. The walk begins one step past the
/// checkpoint, or at `start`, and ends at the first candidate beyond `as_of` or
/// after [`MAX_DUE_DATE_ITERATIONS`] candidates.
pub fn due_dates(
    start: NaiveDate,
    unit: RecurrenceUnit,
    checkpoint: Option<NaiveDate>,
    as_of: NaiveDate,
) -> Vec<NaiveDate> {
    let mut result = Vec::new();
    if start > as_of {
        return result;
    }

    let first = match checkpoint {
        Some(last) => unit.step(last, start),
        None => Some(start),
    };
    let mut candidate = match first {
        Some(date) => date,
        None => return result,
    };

    let mut guard = 0usize;
    while candidate <= as_of && guard < MAX_DUE_DATE_ITERATIONS {
        result.push(candidate);
        guard += 1;
        match unit.step(candidate, start) {
            Some(next) if next > candidate => candidate = next,
            _ => break,
        }
    }

    result
}

/// Due dates for a stored rule. Rules whose unit was not recognised never fall due.
pub fn rule_due_dates(rule: &RecurrenceRule, as_of: NaiveDate) -> Vec<NaiveDate> {
    match rule.unit {
        Some(unit) => due_dates(rule.start_date, unit, rule.last_occurrence, as_of),
        None => Vec::new(),
    }
}
