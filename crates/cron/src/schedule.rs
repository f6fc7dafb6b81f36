//! Fire-time computation for all trigger kinds.

use {
    chrono::{DateTime, Utc},
    cron::Schedule,
};

use crate::{Error, Result, types::Trigger};

/// Compute the first fire time strictly after `now_ms` (epoch millis).
///
/// Returns `None` if the trigger has no future fires (e.g. a past one-shot).
pub fn compute_next_run(trigger: &Trigger, now_ms: u64) -> Result<Option<u64>> {
    match trigger {
        Trigger::At { at_ms } => Ok((*at_ms > now_ms).then_some(*at_ms)),
        Trigger::Every {
            every_ms,
            anchor_ms,
        } => {
            if *every_ms == 0 {
                return Err(Error::invalid_trigger("every_ms must be > 0"));
            }
            let anchor = anchor_ms.unwrap_or(now_ms);
            if anchor > now_ms {
                return Ok(Some(anchor));
            }
            let intervals = (now_ms - anchor) / every_ms;
            Ok(Some(anchor + (intervals + 1) * every_ms))
        },
        Trigger::Cron { expr, tz } => {
            let schedule = parse_cron(expr)?;
            let now_dt = DateTime::<Utc>::from_timestamp_millis(now_ms as i64).unwrap_or_default();

            let next = match tz {
                Some(tz_name) => {
                    let tz: chrono_tz::Tz = tz_name
                        .parse()
                        .map_err(|_| Error::unknown_timezone(tz_name))?;
                    schedule
                        .after(&now_dt.with_timezone(&tz))
                        .next()
                        .map(|dt| dt.timestamp_millis() as u64)
                },
                None => schedule
                    .after(&now_dt)
                    .next()
                    .map(|dt| dt.timestamp_millis() as u64),
            };
            Ok(next)
        },
    }
}

/// Fire times in `[first_due_ms, now_ms]`, oldest first, at most `limit`.
///
/// `first_due_ms` is the persisted next-run time; any later fire times that
/// also elapsed (slow tick, process downtime) are included so the caller can
/// apply its coalescing policy.
pub fn due_fires(trigger: &Trigger, first_due_ms: u64, now_ms: u64, limit: usize) -> Vec<u64> {
    let mut fires = Vec::new();
    let mut at = first_due_ms;
    while at <= now_ms && fires.len() < limit.max(1) {
        fires.push(at);
        match compute_next_run(trigger, at) {
            Ok(Some(next)) if next > at => at = next,
            _ => break,
        }
    }
    fires
}

/// Validate that a trigger is well-formed without computing a fire time.
pub fn validate_trigger(trigger: &Trigger) -> Result<()> {
    match trigger {
        Trigger::At { .. } => Ok(()),
        Trigger::Every { every_ms, .. } if *every_ms == 0 => {
            Err(Error::invalid_trigger("every_ms must be > 0"))
        },
        Trigger::Every { .. } => Ok(()),
        Trigger::Cron { expr, tz } => {
            parse_cron(expr)?;
            if let Some(tz_name) = tz {
                tz_name
                    .parse::<chrono_tz::Tz>()
                    .map_err(|_| Error::unknown_timezone(tz_name))?;
            }
            Ok(())
        },
    }
}

fn parse_cron(expr: &str) -> Result<Schedule> {
    // The `cron` crate wants sec min hour dom month dow [year]; users usually
    // write the 5-field form.
    expr.parse::<Schedule>()
        .or_else(|_| format!("0 {expr} *").parse::<Schedule>())
        .map_err(|e| Error::invalid_trigger(format!("invalid cron expression '{expr}': {e}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case::future(2000, 1000, Some(2000))]
    #[case::past(500, 1000, None)]
    #[case::exactly_now(1000, 1000, None)]
    fn at_trigger(#[case] at_ms: u64, #[case] now: u64, #[case] expected: Option<u64>) {
        let t = Trigger::At { at_ms };
        assert_eq!(compute_next_run(&t, now).unwrap(), expected);
    }

    #[test]
    fn every_without_anchor_counts_from_now() {
        let t = Trigger::Every {
            every_ms: 60_000,
            anchor_ms: None,
        };
        assert_eq!(compute_next_run(&t, 100_000).unwrap(), Some(160_000));
    }

    #[test]
    fn every_with_past_anchor() {
        let t = Trigger::Every {
            every_ms: 60_000,
            anchor_ms: Some(10_000),
        };
        // elapsed = 120_000, intervals = 2, next = 10_000 + 3*60_000
        assert_eq!(compute_next_run(&t, 130_000).unwrap(), Some(190_000));
    }

    #[test]
    fn every_with_future_anchor() {
        let t = Trigger::Every {
            every_ms: 60_000,
            anchor_ms: Some(200_000),
        };
        assert_eq!(compute_next_run(&t, 100_000).unwrap(), Some(200_000));
    }

    #[test]
    fn every_zero_interval_is_invalid() {
        let t = Trigger::Every {
            every_ms: 0,
            anchor_ms: None,
        };
        assert!(matches!(
            compute_next_run(&t, 1000),
            Err(Error::InvalidTrigger { .. })
        ));
        assert!(validate_trigger(&t).is_err());
    }

    #[test]
    fn cron_five_field() {
        let t = Trigger::Cron {
            expr: "0 9 * * *".into(),
            tz: None,
        };
        let now_ms = 1_706_745_600_000; // 2024-02-01T00:00:00Z
        let next = compute_next_run(&t, now_ms).unwrap().unwrap();
        let dt = DateTime::from_timestamp_millis(next as i64).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-02-01 09:00");
    }

    #[test]
    fn cron_with_timezone() {
        let t = Trigger::Cron {
            expr: "0 9 * * *".into(),
            tz: Some("Europe/Paris".into()),
        };
        let now_ms = 1_706_745_600_000;
        let next = compute_next_run(&t, now_ms).unwrap().unwrap();
        // 9:00 Paris = 08:00 UTC in winter
        let dt = DateTime::from_timestamp_millis(next as i64).unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "08:00");
    }

    #[test]
    fn cron_invalid_expr_and_tz() {
        let bad_expr = Trigger::Cron {
            expr: "not valid".into(),
            tz: None,
        };
        assert!(compute_next_run(&bad_expr, 1000).is_err());

        let bad_tz = Trigger::Cron {
            expr: "0 9 * * *".into(),
            tz: Some("Mars/Olympus".into()),
        };
        assert!(matches!(
            validate_trigger(&bad_tz),
            Err(Error::UnknownTimezone { .. })
        ));
    }

    #[test]
    fn due_fires_lists_every_missed_interval() {
        let t = Trigger::Every {
            every_ms: 1_000,
            anchor_ms: Some(0),
        };
        assert_eq!(due_fires(&t, 1_000, 4_500, 10), vec![1_000, 2_000, 3_000, 4_000]);
    }

    #[test]
    fn due_fires_is_bounded() {
        let t = Trigger::Every {
            every_ms: 1_000,
            anchor_ms: Some(0),
        };
        assert_eq!(due_fires(&t, 1_000, 100_000, 3), vec![1_000, 2_000, 3_000]);
    }

    #[test]
    fn due_fires_one_shot_fires_once() {
        let t = Trigger::At { at_ms: 1_000 };
        assert_eq!(due_fires(&t, 1_000, 9_000, 10), vec![1_000]);
    }

    #[test]
    fn due_fires_nothing_before_due() {
        let t = Trigger::At { at_ms: 5_000 };
        assert!(due_fires(&t, 5_000, 1_000, 10).is_empty());
    }
}
