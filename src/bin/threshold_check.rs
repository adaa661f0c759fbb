use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use nodenexus_check::alerting::alert_cache::AlertCacheStore;
use nodenexus_check::alerting::check_result::{CheckOutcome, ExitStatus};
use nodenexus_check::alerting::evaluation_service::{Sample, ThresholdEvaluator};
use nodenexus_check::alerting::message::MessageTemplates;
use nodenexus_check::alerting::threshold::{Operator, Severity, Threshold};
use nodenexus_check::check_modules::config::{
    parse_threshold_override, CheckConfig, CliOverrides, LOG_FILE_ENV,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Release builds stamp `CHECK_VERSION`; local builds fall back to the crate version.
const VERSION: &str = match option_env!("CHECK_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Name used for output lines and alert cache files
    #[arg(long, global = true)]
    check_name: Option<String>,

    /// Path to a TOML or JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the alert status cache (overrides SENSU_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Turn on debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate values against the configured thresholds
    Evaluate(EvaluateArgs),
    /// Show every live breach streak of the check
    Status {
        /// Print the raw cache entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every alert cache file of the check
    Clear,
}

#[derive(clap::Args, Debug)]
struct EvaluateArgs {
    /// Value to check, optionally keyed by an id: `[ID=]NUMBER`
    #[arg(long = "value", required = true, value_parser = parse_value_arg)]
    values: Vec<ValueArg>,

    /// Category of the values, matched against `metadata.alert_type`
    #[arg(long)]
    alert_type: Option<String>,

    #[arg(long, default_value = "Current value {VALUE}{ALERT_TYPE} is OK")]
    ok_message: String,

    #[arg(
        long,
        default_value = "Current value {VALUE}{ALERT_TYPE} exceeds {THRESHOLD}{ALERT_TYPE}{PERIOD}"
    )]
    alert_message: String,

    #[arg(long)]
    warn_message: Option<String>,

    #[arg(long)]
    crit_message: Option<String>,

    /// Reported as `SOURCE:` on every message line
    #[arg(long)]
    source: Option<String>,

    #[arg(long, default_value = "Check ran OK")]
    ok_summary: String,

    #[arg(long, default_value = "Some values exceed the threshold")]
    alert_summary: String,

    /// Warn bound of the default threshold
    #[arg(long)]
    default_warn: Option<f64>,

    /// Crit bound of the default threshold
    #[arg(long)]
    default_crit: Option<f64>,

    #[arg(long, default_value = ">=")]
    operator: Operator,

    /// The lowest severity to alert at for the warn bound
    #[arg(long, default_value = "Minor")]
    min_severity: Severity,

    #[arg(long)]
    default_team: Option<String>,

    /// `<ID>,<Y|N>[,<warn>[,<crit>[,<team>[,<Minor|Major|Crit>]]]]`, repeatable
    #[arg(long = "override", value_parser = parse_override_arg)]
    overrides: Vec<Threshold>,
}

impl EvaluateArgs {
    fn default_threshold(&self) -> Option<Threshold> {
        if self.default_warn.is_none() && self.default_crit.is_none() {
            return None;
        }
        Some(Threshold {
            warn_bound: self.default_warn,
            crit_bound: self.default_crit,
            operator: self.operator,
            min_severity: self.min_severity,
            team: self.default_team.clone(),
            ..Default::default()
        })
    }

    /// Templates for one value, with `{ID}` and `{VALUE}` already filled in.
    fn templates_for(&self, value: &ValueArg) -> Result<MessageTemplates, Box<dyn Error>> {
        let id = value.id.as_deref().unwrap_or_default();
        let number = value.value.to_string();
        let fill = |template: &str| template.replace("{ID}", id).replace("{VALUE}", &number);

        let ok = fill(&self.ok_message);
        let alert = fill(&self.alert_message);
        let warn = self.warn_message.as_deref().map(&fill);
        let crit = self.crit_message.as_deref().map(&fill);
        Ok(MessageTemplates::new(
            Some(ok.as_str()),
            Some(alert.as_str()),
            warn.as_deref(),
            crit.as_deref(),
        )?)
    }
}

#[derive(Debug, Clone)]
struct ValueArg {
    id: Option<String>,
    value: f64,
}

fn parse_value_arg(arg: &str) -> Result<ValueArg, String> {
    let (id, number) = match arg.rsplit_once('=') {
        Some((id, number)) if !id.is_empty() => (Some(id.to_string()), number),
        Some(_) => return Err(format!("missing id before '=' in '{arg}'")),
        None => (None, arg),
    };
    let value = number
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid number '{number}': {e}"))?;
    Ok(ValueArg { id, value })
}

fn parse_override_arg(arg: &str) -> Result<Threshold, String> {
    parse_threshold_override(arg).map_err(|e| e.to_string())
}

/// A log file path is usable when it names a file inside an existing directory.
fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name()?;
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty())?;
    dir.is_dir().then_some((dir, file_name))
}

fn init_logging(verbose: bool) {
    // Optional JSON log file for the asset, no rotation
    let file_layer = std::env::var_os(LOG_FILE_ENV).and_then(|raw| {
        let path = PathBuf::from(&raw);
        match split_log_path(&path) {
            Some((dir, file_name)) => Some(
                fmt::layer()
                    .with_writer(rolling::never(dir, file_name))
                    .with_ansi(false)
                    .json(),
            ),
            None => {
                eprintln!("Invalid log file path {path:?} in {LOG_FILE_ENV}, file logging disabled");
                None
            }
        }
    });

    // stdout carries the check result, so human-readable logs go to stderr
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

fn evaluate(config: CheckConfig, args: &EvaluateArgs) -> Result<ExitStatus, Box<dyn Error>> {
    let store = AlertCacheStore::new(&config.cache_dir);
    let evaluator = ThresholdEvaluator::new(config.check_name.clone(), config.thresholds, store);
    let mut outcome = CheckOutcome::new(
        config.check_name,
        args.ok_summary.clone(),
        args.alert_summary.clone(),
    );

    let now = Local::now();
    for value in &args.values {
        let templates = args.templates_for(value)?;
        let sample = Sample {
            id: value.id.clone(),
            value: value.value,
            alert_type: args.alert_type.clone(),
        };
        outcome.record(evaluator.process_value_at(&sample, &templates, now));
    }

    for line in outcome.render_lines(args.source.as_deref()) {
        println!("{line}");
    }
    info!(
        check_name = %evaluator.check_name(),
        status = %outcome.status(),
        messages = outcome.messages().len(),
        "Check finished."
    );
    Ok(outcome.status())
}

fn format_timestamp(unix_seconds: f64) -> String {
    let micros = (unix_seconds * 1_000_000.0).round() as i64;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|utc| utc.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix_seconds.to_string())
}

fn status(config: &CheckConfig, json: bool) -> Result<ExitStatus, Box<dyn Error>> {
    let store = AlertCacheStore::new(&config.cache_dir);
    let slots = store.discover(&config.check_name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
        return Ok(ExitStatus::Ok);
    }
    if slots.is_empty() {
        println!("{}: no active breaches", config.check_name);
    }
    for (threshold_no, entries) in &slots {
        for entry in entries {
            println!(
                "{} threshold {threshold_no} {}: breached since {} ({} occurrences)",
                config.check_name,
                entry.threshold_type,
                format_timestamp(entry.exceeding_start),
                entry.occurrences
            );
        }
    }
    Ok(ExitStatus::Ok)
}

fn clear(config: &CheckConfig) -> Result<ExitStatus, Box<dyn Error>> {
    let store = AlertCacheStore::new(&config.cache_dir);
    let removed = store.clear(&config.check_name)?;
    println!("{}: removed {removed} alert cache file(s)", config.check_name);
    Ok(ExitStatus::Ok)
}

fn run(args: Args) -> Result<ExitStatus, Box<dyn Error>> {
    let cli = CliOverrides {
        check_name: args.check_name.clone(),
        cache_dir: args.cache_dir.clone(),
        default_threshold: match &args.command {
            Command::Evaluate(evaluate_args) => evaluate_args.default_threshold(),
            _ => None,
        },
        threshold_overrides: match &args.command {
            Command::Evaluate(evaluate_args) => evaluate_args.overrides.clone(),
            _ => Vec::new(),
        },
    };
    let config = CheckConfig::load(args.config.as_deref(), cli)?;
    debug!(cache_dir = ?config.cache_dir, "Using alert cache.");

    match &args.command {
        Command::Evaluate(evaluate_args) => evaluate(config, evaluate_args),
        Command::Status { json } => status(&config, *json),
        Command::Clear => clear(&config),
    }
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose);

    let check_name = args
        .check_name
        .clone()
        .unwrap_or_else(|| "threshold-check".to_string());
    let status = match run(args) {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Check failed.");
            println!("{check_name} {}: {e}", ExitStatus::Unknown);
            ExitStatus::Unknown
        }
    };
    ExitCode::from(status.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_arg() {
        let plain = parse_value_arg("42.5").unwrap();
        assert_eq!(plain.id, None);
        assert_eq!(plain.value, 42.5);

        let keyed = parse_value_arg("/var=87").unwrap();
        assert_eq!(keyed.id.as_deref(), Some("/var"));
        assert_eq!(keyed.value, 87.0);

        assert!(parse_value_arg("=87").is_err());
        assert!(parse_value_arg("/var=lots").is_err());
    }

    #[test]
    fn test_templates_fill_id_and_value() {
        let args = Args::parse_from([
            "threshold-check",
            "evaluate",
            "--value",
            "/var=87",
            "--ok-message",
            "{ID} at {VALUE}{ALERT_TYPE}",
            "--crit-message",
            "{ID} over {THRESHOLD}",
        ]);
        let Command::Evaluate(evaluate_args) = args.command else {
            panic!("expected evaluate");
        };
        let templates = evaluate_args.templates_for(&evaluate_args.values[0]).unwrap();
        assert_eq!(templates.ok, "/var at 87{ALERT_TYPE}");
        assert_eq!(templates.crit, "/var over {THRESHOLD}");
        assert!(templates.warn.starts_with("Current value 87"));
    }

    #[test]
    fn test_default_threshold_only_when_bounds_given() {
        let args = Args::parse_from(["threshold-check", "evaluate", "--value", "1"]);
        let Command::Evaluate(evaluate_args) = args.command else {
            panic!("expected evaluate");
        };
        assert!(evaluate_args.default_threshold().is_none());

        let args = Args::parse_from([
            "threshold-check",
            "--check-name",
            "cpu",
            "evaluate",
            "--value",
            "1",
            "--default-warn",
            "80",
            "--min-severity",
            "Major",
            "--operator",
            "<",
            "--override",
            "/boot,Y",
        ]);
        let Command::Evaluate(evaluate_args) = args.command else {
            panic!("expected evaluate");
        };
        let threshold = evaluate_args.default_threshold().unwrap();
        assert_eq!(threshold.warn_bound, Some(80.0));
        assert_eq!(threshold.min_severity, Severity::Major);
        assert_eq!(threshold.operator, Operator::Less);
        assert!(evaluate_args.overrides[0].ignore);
        assert_eq!(args.check_name.as_deref(), Some("cpu"));
    }

    #[test]
    fn test_version_flag_reports_build_version() {
        use clap::CommandFactory;
        assert_eq!(Args::command().get_version(), Some(VERSION));
    }

    #[test]
    fn test_split_log_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let good = tmp.path().join("asset.log");
        assert!(split_log_path(&good).is_some());
        assert!(split_log_path(&tmp.path().join("missing/asset.log")).is_none());
        assert!(split_log_path(Path::new("asset.log")).is_none());
    }
}
