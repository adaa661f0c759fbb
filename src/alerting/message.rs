//! Message templates and the substitutions applied to them.
use crate::alerting::evaluation_service::EvaluationError;
use crate::alerting::threshold::Tier;

const THRESHOLD_TOKEN: &str = "THRESHOLD";
const ALERT_TYPE_TOKEN: &str = "ALERT_TYPE";
const PERIOD_TOKEN: &str = "PERIOD";

/// The OK / warn / crit templates used for one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub ok: String,
    pub warn: String,
    pub crit: String,
}

impl MessageTemplates {
    /// `alert` is the fallback for whichever of `warn` / `crit` is missing.
    /// At least one alert-level template must be supplied.
    pub fn new(
        ok: Option<&str>,
        alert: Option<&str>,
        warn: Option<&str>,
        crit: Option<&str>,
    ) -> Result<Self, EvaluationError> {
        let non_empty = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);

        let ok = non_empty(ok).ok_or(EvaluationError::MissingOkMessage)?;
        let alert = non_empty(alert);
        let warn = non_empty(warn).or_else(|| alert.clone());
        let crit = non_empty(crit).or_else(|| alert.clone());

        let (warn, crit) = match (warn, crit) {
            (Some(warn), Some(crit)) => (warn, crit),
            (Some(warn), None) => (warn.clone(), warn),
            (None, Some(crit)) => (crit.clone(), crit),
            (None, None) => return Err(EvaluationError::MissingAlertMessage),
        };

        Ok(Self { ok, warn, crit })
    }

    pub fn for_tier(&self, tier: Tier) -> &str {
        match tier {
            Tier::Crit => &self.crit,
            Tier::Warn => &self.warn,
        }
    }
}

/// Substitutes `{THRESHOLD}`, `{ALERT_TYPE}` and `{PERIOD}`. The `::TOKEN::` spelling
/// used by older check scripts is accepted as well.
pub fn render(template: &str, bound: Option<f64>, alert_type: Option<&str>, period: &str) -> String {
    let bound = bound.map(format_bound).unwrap_or_default();
    let alert_type = alert_type.unwrap_or_default();

    [
        (THRESHOLD_TOKEN, bound.as_str()),
        (ALERT_TYPE_TOKEN, alert_type),
        (PERIOD_TOKEN, period),
    ]
    .into_iter()
    .fold(template.to_string(), |text, (token, value)| {
        text.replace(&format!("{{{token}}}"), value)
            .replace(&format!("::{token}::"), value)
    })
}

/// Bounds always render with a fractional part, so `5` reads as `5.0`.
pub fn format_bound(bound: f64) -> String {
    if bound.is_finite() && bound.fract() == 0.0 && bound.abs() < 1e15 {
        format!("{bound:.1}")
    } else {
        format!("{bound}")
    }
}

/// Renders a duration with minutes as the smallest unit, e.g. `1 hour and 30 minutes`
/// or `0.08 minutes`.
pub fn humanize_period(seconds: f64) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };

    let days = (seconds / 86_400.0).floor();
    let hours = ((seconds - days * 86_400.0) / 3_600.0).floor();
    let minutes = (seconds - days * 86_400.0 - hours * 3_600.0) / 60.0;

    let mut parts = Vec::new();
    if days > 0.0 {
        parts.push(plural(days as u64, "day"));
    }
    if hours > 0.0 {
        parts.push(plural(hours as u64, "hour"));
    }
    if minutes > 0.0 || parts.is_empty() {
        if minutes.fract() == 0.0 {
            parts.push(plural(minutes as u64, "minute"));
        } else {
            parts.push(format!("{minutes:.2} minutes"));
        }
    }

    match parts.split_last() {
        Some((last, rest)) if !rest.is_empty() => format!("{} and {last}", rest.join(", ")),
        Some((last, _)) => last.clone(),
        None => String::new(),
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
