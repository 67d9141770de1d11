//! Configuration validation.
//!
//! Validates every config field before any data is loaded. Absent keys
//! fall back to their defaults and pass.

use crate::domain::error::LaggardError;
use crate::domain::returns::WeekEnding;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    validate_dates(config)?;
    validate_industry_level(config)?;
    validate_fraction(config, "market_top_pct")?;
    validate_fraction(config, "industry_top_pct")?;
    validate_fraction(config, "laggard_pct")?;
    validate_trigger(config)?;
    validate_positive(config, "hold_days")?;
    validate_positive(config, "top_industry_n")?;
    validate_week_ending(config)?;
    validate_grid(config)?;
    Ok(())
}

pub fn parse_date(value: &str, section: &str, field: &str) -> Result<NaiveDate, LaggardError> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| {
            LaggardError::config_invalid(
                section,
                field,
                format!("invalid {} format, expected YYYY-MM-DD", field),
            )
        })
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    let start = config
        .get_string("data", "start_date")
        .map(|s| parse_date(&s, "data", "start_date"))
        .transpose()?;
    let end = config
        .get_string("data", "end_date")
        .map(|s| parse_date(&s, "data", "end_date"))
        .transpose()?;

    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(LaggardError::config_invalid(
                "data",
                "start_date",
                "start_date must be before end_date",
            ));
        }
    }
    Ok(())
}

fn validate_industry_level(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    let level = config.get_int("data", "industry_level", 2);
    if !(1..=3).contains(&level) {
        return Err(LaggardError::config_invalid(
            "data",
            "industry_level",
            "industry_level must be 1, 2 or 3",
        ));
    }
    Ok(())
}

fn validate_fraction(config: &dyn ConfigPort, key: &str) -> Result<(), LaggardError> {
    let value = config.get_double("strategy", key, 0.3);
    if !(value > 0.0 && value <= 1.0) {
        return Err(LaggardError::config_invalid(
            "strategy",
            key,
            format!("{} must be in (0, 1]", key),
        ));
    }
    Ok(())
}

fn validate_trigger(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    let value = config.get_double("strategy", "trigger_threshold", 0.3);
    if !value.is_finite() {
        return Err(LaggardError::config_invalid(
            "strategy",
            "trigger_threshold",
            "trigger_threshold must be a finite number",
        ));
    }
    Ok(())
}

fn validate_positive(config: &dyn ConfigPort, key: &str) -> Result<(), LaggardError> {
    let value = config.get_int("strategy", key, 1);
    if value < 1 {
        return Err(LaggardError::config_invalid(
            "strategy",
            key,
            format!("{} must be at least 1", key),
        ));
    }
    Ok(())
}

fn validate_week_ending(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    if let Some(rule) = config.get_string("strategy", "week_ending") {
        rule.parse::<WeekEnding>()
            .map_err(|reason| LaggardError::config_invalid("strategy", "week_ending", reason))?;
    }
    Ok(())
}

/// Parse an optional grid list, rejecting bad tokens and empty lists.
pub fn parse_grid_list(
    config: &dyn ConfigPort,
    key: &str,
) -> Result<Option<Vec<f64>>, LaggardError> {
    match config.get_double_list("grid", key) {
        None => Ok(None),
        Some(Err(token)) => Err(LaggardError::config_invalid(
            "grid",
            key,
            format!("'{}' is not a number", token),
        )),
        Some(Ok(values)) if values.is_empty() => Err(LaggardError::config_invalid(
            "grid",
            key,
            format!("{} must list at least one value", key),
        )),
        Some(Ok(values)) => Ok(Some(values)),
    }
}

/// Range checks shared by the INI lists and the `grid` command flags.
/// Triggers must be finite; laggard pcts must lie in (0, 1].
pub fn check_grid_values(triggers: &[f64], laggards: &[f64]) -> Result<(), LaggardError> {
    if let Some(t) = triggers.iter().find(|t| !t.is_finite()) {
        return Err(LaggardError::config_invalid(
            "grid",
            "trigger_thresholds",
            format!("{} is not a finite threshold", t),
        ));
    }
    if let Some(p) = laggards.iter().find(|p| !(**p > 0.0 && **p <= 1.0)) {
        return Err(LaggardError::config_invalid(
            "grid",
            "laggard_pcts",
            format!("{} is outside (0, 1]", p),
        ));
    }
    Ok(())
}

fn validate_grid(config: &dyn ConfigPort) -> Result<(), LaggardError> {
    let triggers = parse_grid_list(config, "trigger_thresholds")?.unwrap_or_default();
    let laggards = parse_grid_list(config, "laggard_pcts")?.unwrap_or_default();
    check_grid_values(&triggers, &laggards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const VALID: &str = "\
[data]
start_date = 2020-01-01
end_date = 2020-12-31
industry_level = 2

[strategy]
market_top_pct = 0.3
industry_top_pct = 0.3
laggard_pct = 0.5
trigger_threshold = -1.0
hold_days = 5
top_industry_n = 1
week_ending = W-FRI

[grid]
trigger_thresholds = 0.0, 0.5
laggard_pcts = 0.3, 0.5
";

    #[test]
    fn valid_config_passes() {
        assert!(validate_config(&make_config(VALID)).is_ok());
    }

    #[test]
    fn empty_config_uses_defaults() {
        assert!(validate_config(&make_config("[data]\n")).is_ok());
    }

    #[test]
    fn compact_dates_are_accepted() {
        let config = make_config("[data]\nstart_date = 20200101\nend_date = 20201231\n");
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn invalid_date_format_fails() {
        let config = make_config("[data]\nstart_date = 2020/01/01\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn start_after_end_fails() {
        let config = make_config("[data]\nstart_date = 2021-01-01\nend_date = 2020-01-01\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn industry_level_out_of_range_fails() {
        let config = make_config("[data]\nindustry_level = 4\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "industry_level"));
    }

    #[test]
    fn laggard_pct_zero_fails() {
        let config = make_config("[strategy]\nlaggard_pct = 0\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "laggard_pct"));
    }

    #[test]
    fn top_pct_above_one_fails() {
        let config = make_config("[strategy]\nmarket_top_pct = 1.5\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "market_top_pct"));
    }

    #[test]
    fn hold_days_zero_fails() {
        let config = make_config("[strategy]\nhold_days = 0\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "hold_days"));
    }

    #[test]
    fn top_industry_n_negative_fails() {
        let config = make_config("[strategy]\ntop_industry_n = -2\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "top_industry_n"));
    }

    #[test]
    fn unknown_week_rule_fails() {
        let config = make_config("[strategy]\nweek_ending = W-XYZ\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "week_ending"));
    }

    #[test]
    fn grid_bad_token_fails() {
        let config = make_config("[grid]\ntrigger_thresholds = 0.1, abc\n");
        let err = validate_config(&config).unwrap_err();
        assert!(
            matches!(err, LaggardError::ConfigInvalid { ref key, ref reason, .. }
                if key == "trigger_thresholds" && reason.contains("abc"))
        );
    }

    #[test]
    fn grid_laggard_out_of_range_fails() {
        let config = make_config("[grid]\nlaggard_pcts = 0.3, 1.2\n");
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "laggard_pcts"));
    }

    #[test]
    fn grid_values_reject_nan_and_out_of_range() {
        assert!(check_grid_values(&[-1.0, 0.0, 0.5], &[0.3, 1.0]).is_ok());
        assert!(check_grid_values(&[], &[]).is_ok());

        let err = check_grid_values(&[0.1, f64::NAN], &[0.3]).unwrap_err();
        assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "trigger_thresholds"));
        for bad in [0.0, 1.5, f64::NAN, -0.2] {
            let err = check_grid_values(&[0.0], &[0.3, bad]).unwrap_err();
            assert!(matches!(err, LaggardError::ConfigInvalid { key, .. } if key == "laggard_pcts"));
        }
    }

    #[test]
    fn parse_grid_list_reads_values() {
        let config = make_config(VALID);
        assert_eq!(
            parse_grid_list(&config, "trigger_thresholds").unwrap(),
            Some(vec![0.0, 0.5])
        );
        assert_eq!(parse_grid_list(&config, "missing").unwrap(), None);
    }
}
