// Stage scheduling
//
// Chains planned windows end-to-start: a stage starts the day after the
// previous one ends. Stages without a target duration get no planned end and
// do not move the cursor.

use chrono::{Days, NaiveDate};

use super::error::WorkflowError;

/// Planned window computed for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedWindow {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

/// Compute planned windows for `durations` (in days) starting at `start`.
///
/// Durations are unsigned; negative input must be rejected by the caller
/// before it reaches the scheduler. Windows that run past the supported
/// calendar range are a validation error.
pub fn schedule_stages(start: NaiveDate, durations: &[Option<u32>]) -> Result<Vec<PlannedWindow>, WorkflowError> {
    let mut cursor = start;
    let mut windows = Vec::with_capacity(durations.len());

    for (i, days) in durations.iter().enumerate() {
        let window = match days {
            Some(days) => {
                let end = cursor
                    .checked_add_days(Days::new(u64::from(*days)))
                    .ok_or_else(|| out_of_range(i + 1, *days))?;
                let window = PlannedWindow {
                    start: cursor,
                    end: Some(end),
                };
                cursor = end.succ_opt().ok_or_else(|| out_of_range(i + 1, *days))?;
                window
            }
            None => PlannedWindow {
                start: cursor,
                end: None,
            },
        };
        windows.push(window);
    }

    Ok(windows)
}

fn out_of_range(position: usize, days: u32) -> WorkflowError {
    WorkflowError::Validation(format!(
        "stage {} planned window ({} days) is out of range",
        position, days
    ))
}

/// Latest planned end across all windows
pub fn overall_end(windows: &[PlannedWindow]) -> Option<NaiveDate> {
    windows.iter().filter_map(|w| w.end).max()
}
