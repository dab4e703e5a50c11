//! Schedule expression parsing for `Target::fetch_interval`.
//!
//! Accepts a 6-field cron (`second minute hour day month weekday`), a 5-field
//! cron (second implicitly `*`), and a small set of predefined tokens. This
//! module only parses and validates — dispatching a parsed schedule onto a
//! recurring or one-shot task is the scheduler's job (`crate::scheduler`).
//!
//! A total function over its grammar: every input either parses to a
//! [`Schedule`] or returns a `Configuration` error; there is no third outcome.

use crate::error::SyncerError;

/// A validated schedule, ready to be handed to the dispatch backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Six cron fields: second, minute, hour, day, month, weekday.
    Cron([String; 6]),
    /// Runs exactly once, at process start.
    OneShot,
}

pub fn parse(expr: &str) -> Result<Schedule, SyncerError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(SyncerError::Configuration(
            "fetch_interval must not be empty".to_string(),
        ));
    }

    if let Some(token) = expr.strip_prefix('@') {
        return parse_token(token);
    }

    parse_cron_fields(expr)
}

fn parse_token(token: &str) -> Result<Schedule, SyncerError> {
    let mut parts = token.split_whitespace();
    let head = parts.next().unwrap_or("");

    match head {
        "yearly" | "annually" => cron(["0", "0", "0", "1", "1", "*"]),
        "monthly" => cron(["0", "0", "0", "1", "*", "*"]),
        "weekly" => cron(["0", "0", "0", "*", "*", "0"]),
        "daily" | "midnight" => cron(["0", "0", "0", "*", "*", "*"]),
        "hourly" => cron(["0", "0", "*", "*", "*", "*"]),
        "reboot" => Ok(Schedule::OneShot),
        "every" => {
            let spec = parts.next().ok_or_else(|| {
                SyncerError::Configuration("@every requires a duration, e.g. @every 30s".to_string())
            })?;
            parse_every(spec)
        }
        other => Err(SyncerError::Configuration(format!(
            "unknown schedule token: @{other}"
        ))),
    }
}

fn parse_every(spec: &str) -> Result<Schedule, SyncerError> {
    let (digits, unit) = spec.split_at(
        spec.find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| SyncerError::Configuration(format!("invalid @every duration: {spec}")))?,
    );
    let n: u64 = digits
        .parse()
        .map_err(|_| SyncerError::Configuration(format!("invalid @every duration: {spec}")))?;
    if n == 0 {
        return Err(SyncerError::Configuration(
            "@every duration must be positive".to_string(),
        ));
    }

    match unit {
        "h" => cron(["0", "0", &format!("*/{n}"), "*", "*", "*"]),
        "m" => cron(["0", &format!("*/{n}"), "*", "*", "*", "*"]),
        "s" => cron([&format!("*/{n}"), "*", "*", "*", "*", "*"]),
        other => Err(SyncerError::Configuration(format!(
            "invalid @every unit: {other} (expected h, m, or s)"
        ))),
    }
}

fn cron(fields: [&str; 6]) -> Result<Schedule, SyncerError> {
    Ok(Schedule::Cron(fields.map(String::from)))
}

fn parse_cron_fields(expr: &str) -> Result<Schedule, SyncerError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let six: [String; 6] = match fields.len() {
        6 => fields
            .try_into()
            .map(|a: [&str; 6]| a.map(String::from))
            .expect("length checked"),
        5 => {
            let mut with_seconds = vec!["*"];
            with_seconds.extend(fields);
            with_seconds
                .try_into()
                .map(|a: [&str; 6]| a.map(String::from))
                .expect("length checked")
        }
        n => {
            return Err(SyncerError::Configuration(format!(
                "expected 5 or 6 cron fields, got {n}: {expr}"
            )))
        }
    };

    for field in &six {
        validate_field(field)?;
    }

    Ok(Schedule::Cron(six))
}

/// Accepts `*`, `*/N`, a bare integer, or a comma-separated list of those —
/// the subset of cron grammar this system actually needs to validate; the
/// dispatch backend does its own, stricter parsing when the job is registered.
fn validate_field(field: &str) -> Result<(), SyncerError> {
    for part in field.split(',') {
        let ok = part == "*"
            || part.parse::<u32>().is_ok()
            || part
                .strip_prefix("*/")
                .map(|n| n.parse::<u32>().is_ok())
                .unwrap_or(false);
        if !ok {
            return Err(SyncerError::Configuration(format!(
                "invalid cron field: {field}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_field_cron_parses_verbatim() {
        let s = parse("0 0 0 1 1 *").unwrap();
        assert_eq!(
            s,
            Schedule::Cron(["0", "0", "0", "1", "1", "*"].map(String::from))
        );
    }

    #[test]
    fn five_field_cron_gets_second_prepended() {
        let s = parse("0 0 1 1 *").unwrap();
        assert_eq!(
            s,
            Schedule::Cron(["*", "0", "0", "1", "1", "*"].map(String::from))
        );
    }

    #[test]
    fn every_30_seconds_expands_to_slash_cron() {
        let s = parse("@every 30s").unwrap();
        assert_eq!(
            s,
            Schedule::Cron(["*/30", "*", "*", "*", "*", "*"].map(String::from))
        );
    }

    #[test]
    fn every_hour_and_minute_variants() {
        assert_eq!(
            parse("@every 2h").unwrap(),
            Schedule::Cron(["0", "0", "*/2", "*", "*", "*"].map(String::from))
        );
        assert_eq!(
            parse("@every 5m").unwrap(),
            Schedule::Cron(["0", "*/5", "*", "*", "*", "*"].map(String::from))
        );
    }

    #[test]
    fn named_tokens_match_table() {
        assert_eq!(
            parse("@hourly").unwrap(),
            Schedule::Cron(["0", "0", "*", "*", "*", "*"].map(String::from))
        );
        assert_eq!(
            parse("@daily").unwrap(),
            Schedule::Cron(["0", "0", "0", "*", "*", "*"].map(String::from))
        );
        assert_eq!(parse("@midnight").unwrap(), parse("@daily").unwrap());
        assert_eq!(parse("@yearly").unwrap(), parse("@annually").unwrap());
    }

    #[test]
    fn reboot_is_one_shot() {
        assert_eq!(parse("@reboot").unwrap(), Schedule::OneShot);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse("* * *").is_err());
        assert!(parse("* * * * * * *").is_err());
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse("@fortnightly").is_err());
    }

    #[test]
    fn rejects_malformed_every() {
        assert!(parse("@every 30x").is_err());
        assert!(parse("@every 0s").is_err());
        assert!(parse("@every").is_err());
    }

    #[test]
    fn rejects_non_numeric_field() {
        assert!(parse("a 0 0 1 1 *").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }
}
