use crate::alerting::{
    alert_cache::{AlertCache, AlertCacheEntry, AlertCacheStore},
    check_result::ThresholdResult,
    message::{humanize_period, render, MessageTemplates},
    threshold::{Threshold, Tier},
};
use chrono::{DateTime, Local};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("No ok message passed; an ok message is required for every value")]
    MissingOkMessage,
    #[error("No alert level message passed; at least one of the alert, warn or crit messages is required")]
    MissingAlertMessage,
}

/// A single value handed to the evaluator by a collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Logical key such as a mount point. Selects id-specific thresholds.
    pub id: Option<String>,
    pub value: f64,
    /// Category tag matched against a threshold's `alert_type` metadata.
    pub alert_type: Option<String>,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            id: None,
            value,
            alert_type: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_alert_type(mut self, alert_type: impl Into<String>) -> Self {
        self.alert_type = Some(alert_type.into());
        self
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Picks the thresholds that apply to a value.
///
/// With an id, the first threshold carrying that id wins, otherwise the last
/// default (id-less) threshold in the list. With only an alert type, every
/// threshold tagged with it. With neither, all of them.
pub fn select_thresholds<'a>(
    thresholds: &'a [Threshold],
    id: Option<&str>,
    alert_type: Option<&str>,
) -> Vec<&'a Threshold> {
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        thresholds
            .iter()
            .find(|t| t.id.as_deref() == Some(id))
            .or_else(|| thresholds.iter().rev().find(|t| t.is_default()))
            .into_iter()
            .collect()
    } else if let Some(alert_type) = alert_type {
        thresholds
            .iter()
            .filter(|t| t.alert_type() == Some(alert_type))
            .collect()
    } else {
        thresholds.iter().collect()
    }
}

fn unix_seconds(now: &DateTime<Local>) -> f64 {
    now.timestamp_micros() as f64 / 1_000_000.0
}

/// Evaluates values for one check against its thresholds, carrying debounce state
/// between runs through the alert cache.
pub struct ThresholdEvaluator {
    check_name: String,
    thresholds: Vec<Threshold>,
    store: AlertCacheStore,
}

impl ThresholdEvaluator {
    pub fn new(check_name: impl Into<String>, thresholds: Vec<Threshold>, store: AlertCacheStore) -> Self {
        Self {
            check_name: check_name.into(),
            thresholds,
            store,
        }
    }

    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    pub fn store(&self) -> &AlertCacheStore {
        &self.store
    }

    pub fn process_value(&self, sample: &Sample, templates: &MessageTemplates) -> ThresholdResult {
        self.process_value_at(sample, templates, Local::now())
    }

    /// Evaluates every selected threshold at a single instant `now`.
    pub fn process_value_at(
        &self,
        sample: &Sample,
        templates: &MessageTemplates,
        now: DateTime<Local>,
    ) -> ThresholdResult {
        debug!(
            check_name = %self.check_name,
            id = ?sample.id,
            value = sample.value,
            "Checking thresholds."
        );

        let mut result = ThresholdResult::default();
        let selected = select_thresholds(&self.thresholds, sample.id(), sample.alert_type.as_deref());
        if selected.is_empty() {
            debug!(id = ?sample.id, alert_type = ?sample.alert_type, "No threshold matched.");
        }

        for (index, threshold) in selected.into_iter().enumerate() {
            let threshold_no = index as u32 + 1;
            if let Some(threshold_result) = self.evaluate(threshold, threshold_no, sample, templates, now) {
                result.merge(threshold_result);
            }
        }
        result
    }

    /// Evaluates one threshold occupying slot `threshold_no`.
    ///
    /// Returns `None` for ignored thresholds. Crit is checked before warn and only
    /// the first unsuppressed breach is reported, while both tiers keep their own
    /// streak in the cache.
    pub fn evaluate(
        &self,
        threshold: &Threshold,
        threshold_no: u32,
        sample: &Sample,
        templates: &MessageTemplates,
        now: DateTime<Local>,
    ) -> Option<ThresholdResult> {
        if threshold.ignore {
            debug!(threshold_no, "Skipping due to ignore.");
            return None;
        }

        let alert_key = sample
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| threshold_no.to_string());
        let alert_type = sample.alert_type.as_deref();
        let ok_message = render(&templates.ok, threshold.ok_message_bound(), alert_type, "");
        let mut result = ThresholdResult::default();

        if threshold.is_excluded_at(&now.naive_local()) {
            debug!(threshold_no, "Skipping threshold check due to exclude time.");
            result.push_ok(ok_message, alert_key, threshold.team.clone());
            return Some(result);
        }

        let advanced = threshold.is_advanced();
        let mut cache = if advanced {
            self.store.load(&self.check_name, threshold_no)
        } else {
            AlertCache::empty(threshold_no)
        };
        let now_ts = unix_seconds(&now);
        let mut has_output = false;
        let mut cache_changed = false;

        for tier in Tier::EVALUATION_ORDER {
            let Some(bound) = threshold.bound(tier) else {
                continue;
            };

            debug!(
                value = sample.value,
                operator = %threshold.operator,
                bound,
                "Comparing."
            );
            if !threshold.operator.compare(sample.value, bound) {
                if advanced && cache.clear(tier) {
                    debug!(threshold_no, %tier, "Removed alert instance from cache.");
                    cache_changed = true;
                }
                continue;
            }

            debug!(threshold_no, %tier, "Over threshold.");
            let period = threshold
                .required_seconds(tier)
                .map(|seconds| format!(" for {}", humanize_period(seconds as f64)))
                .unwrap_or_default();

            if !has_output && !Self::should_suppress(threshold, tier, cache.find(tier), now_ts, &period) {
                let message = render(templates.for_tier(tier), Some(bound), alert_type, &period);
                let severity = threshold.severity(tier);
                info!(
                    check_name = %self.check_name,
                    alert_key = %alert_key,
                    %tier,
                    %severity,
                    "Threshold breached."
                );
                result.push_alert(message, alert_key.clone(), severity, threshold.team.clone());
                has_output = true;
            }

            if advanced {
                let entry = cache.record_breach(tier, now_ts);
                debug!(threshold_no, %tier, occurrences = entry.occurrences, "Recorded breach.");
                cache_changed = true;
            }
        }

        if cache_changed {
            if let Err(e) = self.store.save(&self.check_name, &cache) {
                error!(
                    check_name = %self.check_name,
                    threshold_no,
                    error = %e,
                    "Failed to persist alert cache; debounce state will not carry over."
                );
            }
        }

        if !has_output {
            debug!(threshold_no, "Threshold is OK.");
            result.push_ok(ok_message, alert_key, threshold.team.clone());
        }

        Some(result)
    }

    /// Whether a breach of `tier` must stay quiet because its occurrence count or
    /// duration has not been reached yet. `previous` is the tier's live streak, if any.
    fn should_suppress(
        threshold: &Threshold,
        tier: Tier,
        previous: Option<&AlertCacheEntry>,
        now_ts: f64,
        period: &str,
    ) -> bool {
        let required_occurrences = threshold.required_occurrences(tier);
        let required_seconds = threshold.required_seconds(tier);
        let mut suppress = false;

        match previous {
            Some(entry) => {
                if let Some(required) = required_occurrences {
                    let seen = entry.occurrences.saturating_add(1);
                    if seen <= required {
                        suppress = true;
                    }
                    debug!(
                        %tier,
                        breached_times = seen,
                        allowed = required,
                        suppress,
                        "Checked occurrence debounce."
                    );
                }
                if let Some(required) = required_seconds {
                    let elapsed = entry.elapsed_seconds(now_ts);
                    if elapsed < required as f64 {
                        suppress = true;
                    }
                    debug!(
                        %tier,
                        breached_for = %humanize_period(elapsed),
                        allowed = %period.trim(),
                        suppress,
                        "Checked time debounce."
                    );
                }
            }
            None => {
                if let Some(required) = required_occurrences.filter(|n| *n > 1) {
                    debug!(%tier, allowed = required, "Breached for the first time. Suppressing alert.");
                    suppress = true;
                }
                if required_seconds.is_some() {
                    debug!(%tier, allowed = %period.trim(), "Breached for the first time. Suppressing alert.");
                    suppress = true;
                }
            }
        }
        suppress
    }
}
