use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};

use crate::error::VerdantError;
use crate::Result;

/// Supported recurrence frequencies. Care schedules in the garden are daily,
/// weekly, or monthly; anything else in a rule string is rejected rather than
/// silently approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

/// An iCalendar RRULE frequency expression, e.g. `FREQ=WEEKLY`,
/// `FREQ=DAILY;INTERVAL=3`, `FREQ=MONTHLY;COUNT=6`,
/// `FREQ=WEEKLY;UNTIL=20260901T000000Z`.
///
/// The schedule is anchored at the task's due date (the DTSTART) and expanded
/// lazily at completion time; nothing is pre-materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    freq: Frequency,
    interval: u32,
    count: Option<u32>,
    until: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(malformed(raw, "empty rule"));
        }

        let mut freq = None;
        let mut interval: u32 = 1;
        let mut count = None;
        let mut until = None;

        for part in raw.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| malformed(raw, "expected KEY=VALUE parts"))?;
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => {
                            return Err(malformed(raw, &format!("unsupported FREQ `{other}`")))
                        }
                    });
                }
                "INTERVAL" => {
                    interval = value
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .filter(|v| *v > 0)
                        .ok_or_else(|| malformed(raw, "INTERVAL must be a positive integer"))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .trim()
                            .parse::<u32>()
                            .ok()
                            .filter(|v| *v > 0)
                            .ok_or_else(|| malformed(raw, "COUNT must be a positive integer"))?,
                    );
                }
                "UNTIL" => {
                    until = Some(parse_until(raw, value.trim())?);
                }
                other => {
                    return Err(malformed(raw, &format!("unsupported rule part `{other}`")));
                }
            }
        }

        let freq = freq.ok_or_else(|| malformed(raw, "missing FREQ"))?;
        Ok(Self {
            freq,
            interval,
            count,
            until,
        })
    }

    /// First occurrence strictly after `after`, with the schedule anchored at
    /// `dtstart` (which counts as occurrence #1 toward COUNT). `None` when the
    /// rule is exhausted.
    pub fn next_after(&self, dtstart: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut idx = self.first_candidate_index(dtstart, after);
        loop {
            if let Some(count) = self.count {
                if idx >= count {
                    return None;
                }
            }
            let occurrence = self.occurrence_at(dtstart, idx)?;
            if let Some(until) = self.until {
                if occurrence > until {
                    return None;
                }
            }
            if occurrence > after {
                return Some(occurrence);
            }
            idx = idx.checked_add(1)?;
        }
    }

    fn occurrence_at(&self, dtstart: DateTime<Utc>, idx: u32) -> Option<DateTime<Utc>> {
        let steps = i64::from(idx) * i64::from(self.interval);
        match self.freq {
            Frequency::Daily => dtstart.checked_add_signed(Duration::days(steps)),
            Frequency::Weekly => dtstart.checked_add_signed(Duration::days(steps * 7)),
            // Calendar months, clamped at month ends (Jan 31 + 1 month = Feb 28/29).
            Frequency::Monthly => {
                dtstart.checked_add_months(Months::new(idx.checked_mul(self.interval)?))
            }
        }
    }

    // Daily and weekly steps are fixed-width, so the scan can start at the
    // last occurrence at or before `after` instead of walking from DTSTART.
    // Monthly steps are not, so those scan from the anchor.
    fn first_candidate_index(&self, dtstart: DateTime<Utc>, after: DateTime<Utc>) -> u32 {
        if after <= dtstart {
            return 0;
        }
        let step_days = match self.freq {
            Frequency::Daily => i64::from(self.interval),
            Frequency::Weekly => i64::from(self.interval) * 7,
            Frequency::Monthly => return 0,
        };
        let elapsed = (after - dtstart).num_days();
        u32::try_from(elapsed / step_days).unwrap_or(u32::MAX)
    }
}

impl std::str::FromStr for RecurrenceRule {
    type Err = VerdantError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

fn parse_until(rule: &str, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(stamp) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%SZ") {
        return Ok(stamp.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        if let Some(stamp) = date.and_hms_opt(0, 0, 0) {
            return Ok(stamp.and_utc());
        }
    }
    Err(malformed(rule, "UNTIL must be YYYYMMDD or YYYYMMDDTHHMMSSZ"))
}

fn malformed(rule: &str, detail: &str) -> VerdantError {
    VerdantError::Recurrence(format!("malformed rule `{rule}`: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn weekly_watering_advances_seven_days() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").unwrap();
        let next = rule.next_after(utc(2024, 6, 1), utc(2024, 6, 2)).unwrap();
        assert_eq!(next, utc(2024, 6, 8));
    }

    #[test]
    fn next_is_strictly_after_the_reference_point() {
        let rule = RecurrenceRule::parse("FREQ=DAILY").unwrap();
        // Completing exactly at an occurrence instant must skip to the next one.
        let next = rule.next_after(utc(2024, 6, 1), utc(2024, 6, 3)).unwrap();
        assert_eq!(next, utc(2024, 6, 4));
    }

    #[test]
    fn completion_long_after_the_due_date_skips_missed_occurrences() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").unwrap();
        let next = rule.next_after(utc(2024, 6, 1), utc(2024, 7, 20)).unwrap();
        assert_eq!(next, utc(2024, 7, 27));
    }

    #[test]
    fn interval_stretches_the_step() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;INTERVAL=3").unwrap();
        let next = rule.next_after(utc(2024, 6, 1), utc(2024, 6, 1)).unwrap();
        assert_eq!(next, utc(2024, 6, 4));
    }

    #[test]
    fn monthly_clamps_at_short_month_ends() {
        let rule = RecurrenceRule::parse("FREQ=MONTHLY").unwrap();
        let next = rule.next_after(utc(2024, 1, 31), utc(2024, 2, 1)).unwrap();
        assert_eq!(next, utc(2024, 2, 29));
    }

    #[test]
    fn count_includes_the_anchor_occurrence() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;COUNT=2").unwrap();
        let dtstart = utc(2024, 6, 1);
        assert_eq!(rule.next_after(dtstart, dtstart), Some(utc(2024, 6, 8)));
        // Occurrences are 6-01 and 6-08; past the second the rule is exhausted.
        assert_eq!(rule.next_after(dtstart, utc(2024, 6, 8)), None);
    }

    #[test]
    fn until_bounds_the_schedule() {
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=20240603T000000Z").unwrap();
        let dtstart = utc(2024, 6, 1);
        assert_eq!(rule.next_after(dtstart, utc(2024, 6, 2)), Some(utc(2024, 6, 3)));
        assert_eq!(rule.next_after(dtstart, utc(2024, 6, 3)), None);
    }

    #[test]
    fn until_accepts_a_bare_date() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY;UNTIL=20240608").unwrap();
        assert_eq!(
            rule.next_after(utc(2024, 6, 1), utc(2024, 6, 2)),
            Some(utc(2024, 6, 8))
        );
    }

    #[test]
    fn due_dates_in_the_future_still_yield_the_first_occurrence() {
        let rule = RecurrenceRule::parse("FREQ=WEEKLY").unwrap();
        let dtstart = utc(2024, 6, 15);
        assert_eq!(rule.next_after(dtstart, utc(2024, 6, 2)), Some(dtstart));
    }

    #[test]
    fn lowercase_input_is_tolerated() {
        let rule = RecurrenceRule::parse("freq=weekly;interval=2").unwrap();
        assert_eq!(
            rule.next_after(utc(2024, 6, 1), utc(2024, 6, 2)),
            Some(utc(2024, 6, 15))
        );
    }

    #[test]
    fn malformed_rules_fail_loudly() {
        for raw in [
            "",
            "water weekly",
            "FREQ=YEARLY",
            "FREQ=DAILY;BYDAY=MO",
            "FREQ=DAILY;INTERVAL=0",
            "FREQ=DAILY;COUNT=0",
            "FREQ=WEEKLY;UNTIL=next-tuesday",
            "INTERVAL=2",
        ] {
            let err = RecurrenceRule::parse(raw).unwrap_err();
            assert!(
                matches!(err, VerdantError::Recurrence(_)),
                "`{raw}` should be a recurrence error, got {err:?}"
            );
        }
    }
}
