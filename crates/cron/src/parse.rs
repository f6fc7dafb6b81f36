//! Parsing of operator-supplied durations, timestamps and trigger specs.

use chrono::{DateTime, Utc};

use crate::{Error, Result, types::Trigger};

/// Parse a human-friendly duration string into milliseconds.
///
/// Supported suffixes: `s`, `m`, `h`, `d`. Examples: `"30s"`, `"5m"`, `"1d"`.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::message("empty duration string"));
    }

    let Some(split) = input.find(|c: char| c.is_alphabetic()) else {
        return Err(Error::message(format!(
            "duration missing unit suffix (s/m/h/d): {input}"
        )));
    };
    let (num_str, suffix) = input.split_at(split);

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::message(format!("invalid number in duration: {num_str}")))?;
    if value == 0 {
        return Err(Error::message("duration must be > 0"));
    }

    let unit = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(Error::message(format!(
                "unknown duration suffix: {suffix} (expected s/m/h/d)"
            )));
        },
    };
    value
        .checked_mul(unit)
        .ok_or_else(|| Error::message(format!("duration too large: {input}")))
}

/// Parse an ISO 8601 timestamp into epoch milliseconds.
pub fn parse_absolute_time_ms(input: &str) -> Result<u64> {
    let dt: DateTime<Utc> = input.trim().parse()?;
    u64::try_from(dt.timestamp_millis())
        .map_err(|_| Error::message("timestamp is before epoch"))
}

/// Parse a trigger spec as typed by an operator.
///
/// - `in <duration>`: one-shot relative to `now_ms`
/// - `at <iso8601>`: one-shot at an absolute time
/// - `every <duration>`: interval anchored at `now_ms`
/// - `cron <expr> [tz=<Area/City>]`: cron expression
pub fn parse_trigger(input: &str, now_ms: u64) -> Result<Trigger> {
    let input = input.trim();
    let (keyword, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    let rest = rest.trim();

    let trigger = match keyword {
        "in" => Trigger::At {
            at_ms: now_ms.saturating_add(parse_duration_ms(rest)?),
        },
        "at" => Trigger::At {
            at_ms: parse_absolute_time_ms(rest)?,
        },
        "every" => Trigger::Every {
            every_ms: parse_duration_ms(rest)?,
            anchor_ms: Some(now_ms),
        },
        "cron" => {
            let (expr, tz) = match rest.rsplit_once(" tz=") {
                Some((expr, tz)) => (expr.trim(), Some(tz.trim().to_string())),
                None => (rest, None),
            };
            Trigger::Cron {
                expr: expr.to_string(),
                tz,
            }
        },
        other => {
            return Err(Error::invalid_trigger(format!(
                "unknown trigger kind '{other}' (expected in/at/every/cron)"
            )));
        },
    };
    crate::schedule::validate_trigger(&trigger)?;
    Ok(trigger)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("30s", 30_000)]
    #[case("5m", 300_000)]
    #[case("2h", 7_200_000)]
    #[case("1d", 86_400_000)]
    #[case("  10m  ", 600_000)]
    fn durations(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(parse_duration_ms(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("100")]
    #[case("0s")]
    #[case("10x")]
    #[case("abc")]
    fn bad_durations(#[case] input: &str) {
        assert!(parse_duration_ms(input).is_err());
    }

    #[test]
    fn iso_timestamps_with_and_without_offset_agree() {
        let utc = parse_absolute_time_ms("2026-01-12T18:00:00Z").unwrap();
        let offset = parse_absolute_time_ms("2026-01-12T19:00:00+01:00").unwrap();
        assert_eq!(utc, offset);
        assert!(parse_absolute_time_ms("not a date").is_err());
    }

    #[test]
    fn trigger_specs() {
        assert_eq!(
            parse_trigger("in 30s", 1_000).unwrap(),
            Trigger::At { at_ms: 31_000 }
        );
        assert_eq!(
            parse_trigger("every 5m", 1_000).unwrap(),
            Trigger::Every {
                every_ms: 300_000,
                anchor_ms: Some(1_000),
            }
        );
        assert_eq!(
            parse_trigger("cron 0 9 * * * tz=Europe/Paris", 0).unwrap(),
            Trigger::Cron {
                expr: "0 9 * * *".into(),
                tz: Some("Europe/Paris".into()),
            }
        );
        assert!(matches!(
            parse_trigger("at 2026-01-12T18:00:00Z", 0).unwrap(),
            Trigger::At { .. }
        ));
    }

    #[test]
    fn trigger_spec_errors() {
        assert!(matches!(
            parse_trigger("sometimes 5m", 0),
            Err(Error::InvalidTrigger { .. })
        ));
        assert!(parse_trigger("cron not a cron", 0).is_err());
        assert!(parse_trigger("every", 0).is_err());
    }
}
