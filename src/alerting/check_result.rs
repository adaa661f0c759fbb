//! Threshold results and their aggregation into one check outcome.
use crate::alerting::threshold::Severity;
use serde::Serialize;
use std::fmt;

/// Process exit status of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum ExitStatus {
    #[default]
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Warning => 1,
            ExitStatus::Critical => 2,
            ExitStatus::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExitStatus::Ok => "OK",
            ExitStatus::Warning => "WARNING",
            ExitStatus::Critical => "CRITICAL",
            ExitStatus::Unknown => "UNKNOWN",
        }
    }

    /// Return code raised by an emitted alert of `severity`.
    pub fn for_severity(severity: Severity) -> Self {
        if severity == Severity::Critical {
            ExitStatus::Critical
        } else {
            ExitStatus::Warning
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output line produced by a threshold evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultMessage {
    pub message: String,
    pub alert_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub team: Option<String>,
}

impl ResultMessage {
    /// Per-message status word used in rendered output.
    pub fn status_label(&self) -> &'static str {
        match self.severity {
            None => "OK",
            Some(Severity::Minor) => "WARN",
            Some(_) => "CRITICAL",
        }
    }

    /// `{check} {STATUS}: {message} | KEY:.. SEV:.. TEAM:.. SOURCE:..`
    pub fn render(&self, check_name: &str, source: Option<&str>) -> String {
        let mut tokens = Vec::new();
        if !self.alert_key.is_empty() {
            tokens.push(format!("KEY:{}", self.alert_key));
        }
        if let Some(severity) = self.severity {
            tokens.push(format!("SEV:{severity}"));
        }
        if let Some(team) = self.team.as_deref().filter(|t| !t.is_empty()) {
            tokens.push(format!("TEAM:{team}"));
        }
        if let Some(source) = source.filter(|s| !s.is_empty()) {
            tokens.push(format!("SOURCE:{source}"));
        }

        let line = format!("{check_name} {}: {}", self.status_label(), self.message);
        if tokens.is_empty() {
            line
        } else {
            format!("{line} | {}", tokens.join(" "))
        }
    }
}

/// Outcome of evaluating one or more thresholds for a value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ThresholdResult {
    pub status: ExitStatus,
    pub messages: Vec<ResultMessage>,
}

impl ThresholdResult {
    pub fn return_code(&self) -> u8 {
        self.status.code()
    }

    pub fn push_ok(&mut self, message: String, alert_key: String, team: Option<String>) {
        self.messages.push(ResultMessage {
            message,
            alert_key,
            severity: None,
            team,
        });
    }

    pub fn push_alert(
        &mut self,
        message: String,
        alert_key: String,
        severity: Severity,
        team: Option<String>,
    ) {
        self.raise(ExitStatus::for_severity(severity));
        self.messages.push(ResultMessage {
            message,
            alert_key,
            severity: Some(severity),
            team,
        });
    }

    pub fn raise(&mut self, status: ExitStatus) {
        self.status = self.status.max(status);
    }

    /// Appends `other`'s messages and keeps the worst status.
    pub fn merge(&mut self, other: ThresholdResult) {
        self.raise(other.status);
        self.messages.extend(other.messages);
    }
}

/// Collects the results of every value a check run evaluated.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    check_name: String,
    ok_summary: String,
    alert_summary: String,
    result: ThresholdResult,
}

impl CheckOutcome {
    pub fn new(
        check_name: impl Into<String>,
        ok_summary: impl Into<String>,
        alert_summary: impl Into<String>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            ok_summary: ok_summary.into(),
            alert_summary: alert_summary.into(),
            result: ThresholdResult::default(),
        }
    }

    pub fn record(&mut self, result: ThresholdResult) {
        self.result.merge(result);
    }

    pub fn status(&self) -> ExitStatus {
        self.result.status
    }

    pub fn messages(&self) -> &[ResultMessage] {
        &self.result.messages
    }

    pub fn summary(&self) -> &str {
        if self.status() == ExitStatus::Ok {
            &self.ok_summary
        } else {
            &self.alert_summary
        }
    }

    /// Every message line followed by the final summary line.
    pub fn render_lines(&self, source: Option<&str>) -> Vec<String> {
        self.messages()
            .iter()
            .map(|message| message.render(&self.check_name, source))
            .chain(std::iter::once(format!(
                "{} {}: {}",
                self.check_name,
                self.status(),
                self.summary()
            )))
            .collect()
    }
}
