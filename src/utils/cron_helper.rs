//! Cron expression parsing
//!
//! The `cron` crate expects a leading seconds field. Classic five-field
//! expressions (`*/5 * * * *`) are accepted and normalized by prepending `0`.

use cron::Schedule;
use std::str::FromStr;

/// Normalize a cron expression to the seconds-first form
pub fn normalize_cron_expression(cron_expression: &str) -> String {
    let trimmed = cron_expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Parse a cron expression, accepting both five- and six/seven-field forms
pub fn parse_schedule(cron_expression: &str) -> Result<Schedule, String> {
    let normalized = normalize_cron_expression(cron_expression);
    Schedule::from_str(&normalized)
        .map_err(|e| format!("Invalid cron expression '{cron_expression}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_five_field_expression_is_normalized() {
        assert_eq!(normalize_cron_expression("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron_expression(" 0 0 * * * * "), "0 0 * * * *");
    }

    #[test]
    fn test_valid_cron_expression() {
        let schedule = parse_schedule("0 */6 * * *").unwrap();
        let next_time = schedule.upcoming(Utc).next().unwrap();
        assert!(next_time > Utc::now());
    }

    #[test]
    fn test_invalid_cron_expression() {
        let err = parse_schedule("invalid").unwrap_err();
        assert!(err.contains("Invalid cron expression"));
    }
}
