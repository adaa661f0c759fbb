//! Threshold rules: bounds, comparison operator, severity floor, debounce
//! parameters and exclusion windows for a single check value.
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fmt, str::FromStr};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdError {
    #[error("Invalid operator '{0}', must be one of >=, <=, >, <, == or !=")]
    InvalidOperator(String),
    #[error("Invalid severity '{0}', must be Minor, Major or Critical")]
    InvalidSeverity(String),
    #[error("Invalid exclusion time '{0}', expected HH:MM")]
    InvalidExcludeTime(String),
    #[error("Invalid day of week '{0}'")]
    InvalidDayOfWeek(String),
    #[error("Invalid time period '{0}', expected <minutes>m or <hours>h")]
    InvalidTimePeriod(String),
}

/// Comparison applied as `current_value <op> bound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    #[default]
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
    Equal,
    NotEqual,
}

impl Operator {
    pub fn compare(self, value: f64, bound: f64) -> bool {
        match self {
            Operator::GreaterOrEqual => value >= bound,
            Operator::LessOrEqual => value <= bound,
            Operator::Greater => value > bound,
            Operator::Less => value < bound,
            Operator::Equal => (value - bound).abs() < f64::EPSILON,
            Operator::NotEqual => (value - bound).abs() > f64::EPSILON,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::GreaterOrEqual => ">=",
            Operator::LessOrEqual => "<=",
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }
}

impl FromStr for Operator {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">=" => Ok(Operator::GreaterOrEqual),
            "<=" => Ok(Operator::LessOrEqual),
            ">" => Ok(Operator::Greater),
            "<" => Ok(Operator::Less),
            "==" => Ok(Operator::Equal),
            "!=" => Ok(Operator::NotEqual),
            other => Err(ThresholdError::InvalidOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = ThresholdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity attached to a breached tier.
///
/// `Unknown` only appears when escalating from a severity name that could not be
/// recognised. It is kept distinct so routing never mistakes it for a real level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Minor,
    Major,
    Critical,
    Unknown,
}

impl Severity {
    /// The severity used for a crit-tier breach when `self` is the warn-tier floor.
    pub fn next(self) -> Severity {
        match self {
            Severity::Minor => Severity::Major,
            Severity::Major | Severity::Critical => Severity::Critical,
            Severity::Unknown => Severity::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Minor => "Minor",
            Severity::Major => "Major",
            Severity::Critical => "Critical",
            Severity::Unknown => "Unknown",
        }
    }
}

impl FromStr for Severity {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "crit" | "critical" => Ok(Severity::Critical),
            _ => Err(ThresholdError::InvalidSeverity(s.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escalates a configured `min_severity` name. Unrecognised names map to
/// [`Severity::Unknown`].
pub fn next_severity(min_severity: &str) -> Severity {
    min_severity
        .parse::<Severity>()
        .map(Severity::next)
        .unwrap_or(Severity::Unknown)
}

/// Converts `<n>m` / `<n>h` into seconds.
pub fn parse_time_period(period: &str) -> Result<u64, ThresholdError> {
    let trimmed = period.trim();
    let invalid = || ThresholdError::InvalidTimePeriod(period.to_string());

    let Some(unit) = trimmed.chars().last() else {
        return Err(invalid());
    };
    let digits = &trimmed[..trimmed.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier = match unit {
        'h' => 60 * 60,
        'm' => 60,
        _ => return Err(invalid()),
    };
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

/// The two levels checked for every threshold, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Crit,
    Warn,
}

impl Tier {
    pub const EVALUATION_ORDER: [Tier; 2] = [Tier::Crit, Tier::Warn];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Crit => "crit",
            Tier::Warn => "warn",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wall-clock window during which a threshold never alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeTime {
    /// `None` applies the window to every day.
    pub days_of_week: Option<Vec<Weekday>>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl ExcludeTime {
    pub fn parse<S: AsRef<str>>(
        days_of_week: Option<&[S]>,
        start_time: &str,
        end_time: &str,
    ) -> Result<Self, ThresholdError> {
        let days_of_week = days_of_week
            .map(|days| {
                days.iter()
                    .map(|day| {
                        day.as_ref()
                            .trim()
                            .parse::<Weekday>()
                            .map_err(|_| ThresholdError::InvalidDayOfWeek(day.as_ref().to_string()))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(Self {
            days_of_week,
            start_time: parse_clock_time(start_time)?,
            end_time: parse_clock_time(end_time)?,
        })
    }

    pub fn applies_to_day(&self, day: Weekday) -> bool {
        self.days_of_week
            .as_ref()
            .map_or(true, |days| days.contains(&day))
    }

    /// Both ends of the window are inclusive.
    pub fn contains(&self, now: &NaiveDateTime) -> bool {
        if !self.applies_to_day(now.weekday()) {
            debug!(exclusion = ?self, "Ignoring time exclusion as it's not for today.");
            return false;
        }
        let time = now.time();
        let inside = self.start_time <= time && time <= self.end_time;
        if !inside {
            debug!(exclusion = ?self, "Ignoring time exclusion as not within time window.");
        }
        inside
    }
}

fn parse_clock_time(value: &str) -> Result<NaiveTime, ThresholdError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ThresholdError::InvalidExcludeTime(value.to_string()))
}

/// One configured rule. Immutable for the duration of a check run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Threshold {
    pub id: Option<String>,
    pub warn_bound: Option<f64>,
    pub crit_bound: Option<f64>,
    pub operator: Operator,
    pub min_severity: Severity,
    pub team: Option<String>,
    pub ignore: bool,
    pub warn_time_seconds: Option<u64>,
    pub crit_time_seconds: Option<u64>,
    pub warn_occurrences: Option<u32>,
    pub crit_occurrences: Option<u32>,
    pub exclude_times: Vec<ExcludeTime>,
    pub metadata: HashMap<String, String>,
}

impl Threshold {
    /// Thresholds without an id are defaults for values that have no specific rule.
    pub fn is_default(&self) -> bool {
        self.id.as_deref().map_or(true, str::is_empty)
    }

    pub fn alert_type(&self) -> Option<&str> {
        self.metadata.get("alert_type").map(String::as_str)
    }

    /// Advanced thresholds carry at least one debounce parameter and keep cache state.
    pub fn is_advanced(&self) -> bool {
        Tier::EVALUATION_ORDER
            .into_iter()
            .any(|tier| self.has_debounce(tier))
    }

    pub fn has_debounce(&self, tier: Tier) -> bool {
        self.required_occurrences(tier).is_some() || self.required_seconds(tier).is_some()
    }

    pub fn bound(&self, tier: Tier) -> Option<f64> {
        match tier {
            Tier::Crit => self.crit_bound,
            Tier::Warn => self.warn_bound,
        }
    }

    /// Zero counts are treated as "not configured".
    pub fn required_occurrences(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Crit => self.crit_occurrences,
            Tier::Warn => self.warn_occurrences,
        }
        .filter(|n| *n > 0)
    }

    pub fn required_seconds(&self, tier: Tier) -> Option<u64> {
        match tier {
            Tier::Crit => self.crit_time_seconds,
            Tier::Warn => self.warn_time_seconds,
        }
        .filter(|s| *s > 0)
    }

    pub fn severity(&self, tier: Tier) -> Severity {
        match tier {
            Tier::Crit => self.min_severity.next(),
            Tier::Warn => self.min_severity,
        }
    }

    /// Bound substituted into the OK message: the crit bound if set, else the warn bound.
    pub fn ok_message_bound(&self) -> Option<f64> {
        self.crit_bound.or(self.warn_bound)
    }

    pub fn is_excluded_at(&self, now: &NaiveDateTime) -> bool {
        self.exclude_times.iter().any(|window| {
            debug!(exclusion = ?window, "Checking time based exclusion.");
            window.contains(now)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_next_severity() {
        assert_eq!(next_severity("Minor"), Severity::Major);
        assert_eq!(next_severity("minor"), Severity::Major);
        assert_eq!(next_severity("Major"), Severity::Critical);
        assert_eq!(next_severity("Critical"), Severity::Critical);
        assert_eq!(next_severity("CRIT"), Severity::Critical);
        assert_eq!(next_severity("BadSeverity"), Severity::Unknown);
        assert_eq!(next_severity("anything_else"), Severity::Unknown);
        assert_eq!(Severity::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_default_threshold_escalates_to_major() {
        let threshold = Threshold {
            warn_bound: Some(5.0),
            ..Default::default()
        };
        assert_eq!(threshold.severity(Tier::Warn), Severity::Minor);
        assert_eq!(threshold.severity(Tier::Crit), Severity::Major);
    }

    #[test]
    fn test_operator_parsing_and_comparison() {
        assert_eq!(">=".parse::<Operator>().unwrap(), Operator::GreaterOrEqual);
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::NotEqual);
        assert_eq!(
            "=>".parse::<Operator>().unwrap_err(),
            ThresholdError::InvalidOperator("=>".to_string())
        );

        assert!(Operator::GreaterOrEqual.compare(5.0, 5.0));
        assert!(!Operator::Greater.compare(5.0, 5.0));
        assert!(Operator::LessOrEqual.compare(4.0, 5.0));
        assert!(Operator::Less.compare(4.0, 5.0));
        assert!(Operator::Equal.compare(5.0, 5.0));
        assert!(Operator::NotEqual.compare(5.5, 5.0));
    }

    #[test]
    fn test_operator_deserializes_from_symbol() {
        let op: Operator = serde_json::from_str("\"<\"").unwrap();
        assert_eq!(op, Operator::Less);
        assert!(serde_json::from_str::<Operator>("\"~\"").is_err());
    }

    #[test]
    fn test_parse_time_period() {
        assert_eq!(parse_time_period("5m").unwrap(), 300);
        assert_eq!(parse_time_period("2h").unwrap(), 7200);
        assert!(parse_time_period("5").is_err());
        assert!(parse_time_period("m").is_err());
        assert!(parse_time_period("5s").is_err());
        assert!(parse_time_period("-5m").is_err());
    }

    #[test]
    fn test_exclude_time_window_is_inclusive() {
        // 2022-05-04 was a Wednesday.
        let window = ExcludeTime::parse(Some(&["Wednesday"][..]), "10:00", "16:00").unwrap();
        assert!(window.contains(&at(2022, 5, 4, 15, 0)));
        assert!(window.contains(&at(2022, 5, 4, 10, 0)));
        assert!(window.contains(&at(2022, 5, 4, 16, 0)));
        assert!(!window.contains(&at(2022, 5, 4, 16, 1)));
        assert!(!window.contains(&at(2022, 5, 5, 15, 0)));
    }

    #[test]
    fn test_exclude_time_without_days_applies_every_day() {
        let window = ExcludeTime::parse::<&str>(None, "00:00", "01:00").unwrap();
        assert!(window.contains(&at(2022, 5, 7, 0, 30)));
        assert!(window.contains(&at(2022, 5, 8, 0, 30)));
    }

    #[test]
    fn test_exclude_time_rejects_malformed_input() {
        assert_eq!(
            ExcludeTime::parse::<&str>(None, "25:00", "26:00").unwrap_err(),
            ThresholdError::InvalidExcludeTime("25:00".to_string())
        );
        assert_eq!(
            ExcludeTime::parse(Some(&["Someday"][..]), "10:00", "11:00").unwrap_err(),
            ThresholdError::InvalidDayOfWeek("Someday".to_string())
        );
    }

    #[test]
    fn test_advanced_detection_ignores_zero_values() {
        let simple = Threshold {
            warn_bound: Some(5.0),
            warn_occurrences: Some(0),
            ..Default::default()
        };
        assert!(!simple.is_advanced());

        let advanced = Threshold {
            warn_bound: Some(5.0),
            crit_time_seconds: Some(10),
            ..Default::default()
        };
        assert!(advanced.is_advanced());
        assert!(advanced.has_debounce(Tier::Crit));
        assert!(!advanced.has_debounce(Tier::Warn));
    }

    #[test]
    fn test_default_detection() {
        let mut threshold = Threshold::default();
        assert!(threshold.is_default());
        threshold.id = Some(String::new());
        assert!(threshold.is_default());
        threshold.id = Some("/var".to_string());
        assert!(!threshold.is_default());
    }
}
