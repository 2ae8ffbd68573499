//! Fanout CLI Application
//!
//! Sends a batch of HTTP requests concurrently and prints the responses as
//! JSON, in the order the requests were given.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, ValueEnum};
use console::Term;
use fanout_lib::{
    load_env_config, parse_duration, parse_url_list, ConfigManager, DispatchConfig,
    DispatchError, Dispatcher, EnvConfig, FileConfig, Json, Method, NoProgress, Outcome,
    Payloads, ProgressSink, RequestBuilder, Results,
};
use serde_json::{json, Value};
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Exit code when the dispatch ran but some requests failed.
const EXIT_PARTIAL_FAILURE: i32 = 2;

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One compact JSON array
    Json,
    /// Indented JSON array
    Pretty,
    /// One JSON value per line
    Lines,
}

/// CLI arguments for fanout
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send many HTTP requests concurrently and collect the responses in order")]
#[command(
    long_about = "Send many HTTP requests concurrently under a fixed concurrency limit.\n\nResponses are decoded as JSON and printed in request order. Timed-out requests are retried; other failures are reported in their slot without stopping the rest."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// URLs or paths to request
    #[arg(value_name = "URLS", help_heading = "Requests")]
    pub urls: Vec<String>,

    /// Input file with URLs (one per line)
    #[arg(
        short = 'f',
        long = "file",
        value_name = "FILE",
        help_heading = "Requests"
    )]
    pub file: Option<String>,

    /// Base URL prepended to every relative path
    #[arg(
        short = 'b',
        long = "base-url",
        value_name = "URL",
        help_heading = "Requests"
    )]
    pub base_url: Option<String>,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS)
    #[arg(
        short = 'X',
        long = "method",
        value_name = "METHOD",
        help_heading = "Requests"
    )]
    pub method: Option<String>,

    /// JSON payload file: an array (one per request) or a shared object
    #[arg(
        short = 'd',
        long = "data",
        value_name = "FILE",
        help_heading = "Requests"
    )]
    pub data: Option<String>,

    /// Extra request header, e.g. "Authorization: Bearer x" (repeatable)
    #[arg(
        short = 'H',
        long = "header",
        value_name = "HEADER",
        action = clap::ArgAction::Append,
        help_heading = "Requests"
    )]
    pub headers: Vec<String>,

    /// Max requests in flight (default: 100, max: 1000)
    #[arg(short = 'c', long = "concurrency", help_heading = "Performance")]
    pub concurrency: Option<usize>,

    /// Per-attempt timeout, e.g. "10s", "500ms" (default: 10s)
    #[arg(long = "timeout", value_name = "DURATION", help_heading = "Performance")]
    pub timeout: Option<String>,

    /// Retries after a timeout (default: 3)
    #[arg(long = "retries", value_name = "N", help_heading = "Performance")]
    pub retries: Option<u32>,

    /// Pause between timeout retries (default: 0s)
    #[arg(long = "retry-delay", value_name = "DURATION", help_heading = "Performance")]
    pub retry_delay: Option<String>,

    /// Concatenate list responses into a single list
    #[arg(long = "flatten", help_heading = "Output Format")]
    pub flatten: bool,

    /// Keep 4xx/5xx responses instead of reporting them as failures
    #[arg(long = "no-raise-for-status", help_heading = "Output Format")]
    pub no_raise_for_status: bool,

    /// Output format
    #[arg(
        short = 'o',
        long = "output",
        value_enum,
        default_value = "json",
        help_heading = "Output Format"
    )]
    pub output: OutputFormat,

    /// Do not draw the progress line on stderr
    #[arg(long = "no-progress", help_heading = "Output Format")]
    pub no_progress: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Configuration")]
    pub verbose: u8,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    dispatch: DispatchConfig,
    method: Method,
    base_url: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_tracing(args.verbose);

    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    match run_fanout(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(EXIT_PARTIAL_FAILURE),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    if args.urls.is_empty() && args.file.is_none() {
        return Err("You must specify URLs or a file with --file".to_string());
    }

    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 || concurrency > fanout_lib::MAX_CONCURRENCY {
            return Err(format!(
                "Concurrency must be between 1 and {}",
                fanout_lib::MAX_CONCURRENCY
            ));
        }
    }

    if let Some(timeout) = &args.timeout {
        match parse_duration(timeout) {
            Some(d) if !d.is_zero() => {}
            _ => return Err(format!("Invalid timeout '{}'", timeout)),
        }
    }

    if let Some(delay) = &args.retry_delay {
        if parse_duration(delay).is_none() {
            return Err(format!("Invalid retry delay '{}'", delay));
        }
    }

    for header in &args.headers {
        parse_header(header)?;
    }

    Ok(())
}

/// Main dispatch logic. Returns `Ok(false)` when some requests failed.
async fn run_fanout(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let settings = build_settings(&args, &load_env_config())?;
    let urls = collect_urls(&args)?;
    let payloads = match &args.data {
        Some(path) => read_payloads(path)?,
        None => Payloads::None,
    };

    let mut builder = RequestBuilder::new(settings.method)
        .urls(urls)
        .payloads(payloads);
    if let Some(base_url) = &settings.base_url {
        builder = builder.base_url(base_url.clone());
    }
    let descriptors = builder.build()?;

    tracing::debug!(
        "{} {} request(s), concurrency {}",
        descriptors.len(),
        settings.method,
        settings.dispatch.max_concurrency
    );

    let dispatcher = Dispatcher::http(settings.dispatch.clone())?;

    // Progress only goes to an interactive stderr
    let progress = if !args.no_progress && Term::stderr().is_term() && !descriptors.is_empty() {
        Some(ui::ProgressLine::start(descriptors.len()))
    } else {
        None
    };
    let sink: &dyn ProgressSink = match &progress {
        Some(line) => line,
        None => &NoProgress,
    };

    let handler = Json;
    let start_time = Instant::now();

    let outcome = tokio::select! {
        result = dispatcher.dispatch_with_progress(&descriptors, &handler, sink) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let duration = start_time.elapsed();

    if let Some(line) = progress {
        line.stop().await;
    }

    let (results, complete) = match outcome {
        None => return Err("Interrupted, in-flight requests were cancelled".into()),
        Some(Ok(results)) => (results, true),
        Some(Err(DispatchError::Incomplete { results, .. })) => (results, false),
        Some(Err(DispatchError::Config(e))) => return Err(e.into()),
    };

    print!("{}", render_output(&results, args.output)?);

    if !complete {
        ui::print_failure_summary(results.failures());
    }
    if Term::stderr().is_term() && results.requests() > 1 {
        ui::print_summary(results.requests(), results.failed_count(), duration);
    }

    Ok(complete)
}

/// Build settings from config files, environment and CLI arguments.
///
/// Precedence order (highest to lowest):
/// 1. CLI arguments (explicit user input)
/// 2. Environment variables (FANOUT_*)
/// 3. Config file (--config, FANOUT_CONFIG, or discovered)
/// 4. Built-in defaults
fn build_settings(
    args: &Args,
    env_config: &EnvConfig,
) -> Result<Settings, Box<dyn std::error::Error>> {
    let config_manager = ConfigManager::new();

    // Step 1: config file
    let file_config = if let Some(explicit_path) = &args.config {
        tracing::debug!("Using explicit config file (CLI --config): {}", explicit_path);
        config_manager
            .load_file(explicit_path)
            .map_err(|e| format!("Failed to load config file '{}': {}", explicit_path, e))?
    } else if let Some(env_path) = &env_config.config {
        tracing::debug!("Using explicit config file (FANOUT_CONFIG): {}", env_path);
        config_manager
            .load_file(env_path)
            .map_err(|e| format!("Failed to load config file '{}': {}", env_path, e))?
    } else {
        match config_manager.discover_and_load() {
            Ok(file_config) => file_config,
            Err(e) => {
                tracing::warn!("Config discovery failed: {}", e);
                FileConfig::default()
            }
        }
    };

    let mut settings = Settings {
        dispatch: file_config.apply_to(DispatchConfig::default())?,
        method: file_config.method()?.unwrap_or(Method::Get),
        base_url: file_config.base_url().map(str::to_string),
    };

    // Step 2: environment variables
    settings.dispatch = env_config.apply_to(settings.dispatch);
    if let Some(method) = env_config.method {
        settings.method = method;
    }
    if let Some(base_url) = &env_config.base_url {
        settings.base_url = Some(base_url.clone());
    }

    // Step 3: CLI arguments
    settings = apply_cli_args(settings, args)?;

    settings.dispatch.validate()?;
    Ok(settings)
}

/// Apply CLI arguments to settings (highest precedence).
///
/// Only flags the user actually passed override earlier layers.
fn apply_cli_args(
    mut settings: Settings,
    args: &Args,
) -> Result<Settings, Box<dyn std::error::Error>> {
    if let Some(method) = &args.method {
        settings.method = method.parse()?;
    }
    if let Some(base_url) = &args.base_url {
        settings.base_url = Some(base_url.clone());
    }

    let config = &mut settings.dispatch;
    if let Some(concurrency) = args.concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(timeout) = &args.timeout {
        config.timeout =
            parse_duration(timeout).ok_or_else(|| format!("Invalid timeout '{}'", timeout))?;
    }
    if let Some(retries) = args.retries {
        config.max_retries_on_timeout = retries;
    }
    if let Some(delay) = &args.retry_delay {
        config.retry_delay =
            parse_duration(delay).ok_or_else(|| format!("Invalid retry delay '{}'", delay))?;
    }
    if args.flatten {
        config.flatten = true;
    }
    if args.no_raise_for_status {
        config.raise_for_status = false;
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        config.headers.insert(name, value);
    }

    Ok(settings)
}

/// Split `"Name: value"` into its parts.
fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("Invalid header '{}', expected 'Name: value'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid header '{}', name is empty", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// URLs from the command line followed by those from --file.
fn collect_urls(args: &Args) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut urls = args.urls.clone();

    if let Some(file) = &args.file {
        tracing::debug!("Reading URLs from file: {}", file);
        urls.extend(read_urls_from_file(file)?);
    }

    if urls.is_empty() {
        return Err("No URLs found to request".into());
    }
    Ok(urls)
}

fn read_urls_from_file(file_path: &str) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let path = std::path::Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {}", file_path).into());
    }

    let content = std::fs::read_to_string(path)?;
    let urls = parse_url_list(&content);
    if urls.is_empty() {
        return Err(format!("No URLs found in the file: {}", file_path).into());
    }
    Ok(urls)
}

fn read_payloads(file_path: &str) -> Result<Payloads, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file_path)
        .map_err(|e| format!("Failed to read payload file '{}': {}", file_path, e))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| format!("Payload file '{}' is not valid JSON: {}", file_path, e))?;
    Ok(Payloads::from_json(value))
}

/// JSON view of one slot; failures become `{"error": {...}}`.
fn outcome_to_json(outcome: &Outcome<Value>) -> Value {
    match outcome {
        Ok(value) => value.clone(),
        Err(e) => json!({
            "error": {
                "message": e.to_string(),
                "index": e.index,
                "method": e.method,
                "url": e.url,
                "attempts": e.attempts,
                "kind": e.kind,
            }
        }),
    }
}

fn render_output(
    results: &Results<Value>,
    format: OutputFormat,
) -> Result<String, serde_json::Error> {
    let values: Vec<Value> = results.iter().map(outcome_to_json).collect();

    let rendered = match format {
        OutputFormat::Json => format!("{}\n", serde_json::to_string(&values)?),
        OutputFormat::Pretty => format!("{}\n", serde_json::to_string_pretty(&values)?),
        OutputFormat::Lines => {
            let mut out = String::new();
            for value in &values {
                out.push_str(&serde_json::to_string(value)?);
                out.push('\n');
            }
            out
        }
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_test_args() -> Args {
        Args {
            urls: vec!["http://test.com".to_string()],
            file: None,
            base_url: None,
            method: None,
            data: None,
            headers: vec![],
            concurrency: None,
            timeout: None,
            retries: None,
            retry_delay: None,
            flatten: false,
            no_raise_for_status: false,
            output: OutputFormat::Json,
            no_progress: true,
            config: None,
            verbose: 0,
        }
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_validate_args_requires_urls() {
        let mut args = create_test_args();
        args.urls.clear();

        let result = validate_args(&args);
        assert!(result.unwrap_err().contains("--file"));

        args.file = Some("urls.txt".to_string());
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_validate_args_concurrency_range() {
        let mut args = create_test_args();
        args.concurrency = Some(0);
        assert!(validate_args(&args).is_err());

        args.concurrency = Some(1001);
        assert!(validate_args(&args).is_err());

        args.concurrency = Some(1000);
        assert!(validate_args(&args).is_ok());
    }

    #[test]
    fn test_validate_args_rejects_bad_durations_and_headers() {
        let mut args = create_test_args();
        args.timeout = Some("0s".to_string());
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.retry_delay = Some("soon".to_string());
        assert!(validate_args(&args).is_err());

        let mut args = create_test_args();
        args.headers = vec!["no-colon".to_string()];
        assert!(validate_args(&args).is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer a:b").unwrap(),
            ("Authorization".to_string(), "Bearer a:b".to_string())
        );
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let file = write_config("");
        let mut args = create_test_args();
        args.config = Some(file.path().to_string_lossy().to_string());

        let settings = build_settings(&args, &EnvConfig::default()).unwrap();
        assert_eq!(settings.method, Method::Get);
        assert_eq!(settings.base_url, None);
        assert_eq!(settings.dispatch, DispatchConfig::default());
    }

    #[test]
    fn test_settings_precedence() {
        let file = write_config(
            r#"
[defaults]
concurrency = 10
timeout = "5s"
retries = 1
method = "POST"
base_url = "http://file.test"

[headers]
X-Source = "file"
"#,
        );

        let env_config = EnvConfig {
            concurrency: Some(20),
            retries: Some(2),
            base_url: Some("http://env.test".to_string()),
            ..EnvConfig::default()
        };

        let mut args = create_test_args();
        args.config = Some(file.path().to_string_lossy().to_string());
        args.concurrency = Some(30);
        args.method = Some("put".to_string());
        args.headers = vec!["X-Cli: yes".to_string()];

        let settings = build_settings(&args, &env_config).unwrap();

        // CLI beats env beats file
        assert_eq!(settings.dispatch.max_concurrency, 30);
        assert_eq!(settings.method, Method::Put);
        // env beats file
        assert_eq!(settings.dispatch.max_retries_on_timeout, 2);
        assert_eq!(settings.base_url.as_deref(), Some("http://env.test"));
        // file beats defaults
        assert_eq!(settings.dispatch.timeout, Duration::from_secs(5));
        assert_eq!(settings.dispatch.headers.get("X-Source").unwrap(), "file");
        assert_eq!(settings.dispatch.headers.get("X-Cli").unwrap(), "yes");
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let file = write_config(
            r#"
[defaults]
flatten = true
raise_for_status = false
"#,
        );
        let mut args = create_test_args();
        args.config = Some(file.path().to_string_lossy().to_string());

        let settings = build_settings(&args, &EnvConfig::default()).unwrap();
        assert!(settings.dispatch.flatten);
        assert!(!settings.dispatch.raise_for_status);
    }

    #[test]
    fn test_invalid_cli_method_is_rejected() {
        let file = write_config("");
        let mut args = create_test_args();
        args.config = Some(file.path().to_string_lossy().to_string());
        args.method = Some("FETCH".to_string());

        let err = build_settings(&args, &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("FETCH"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let mut args = create_test_args();
        args.config = Some("/definitely/not/here.toml".to_string());

        let err = build_settings(&args, &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config file"));
    }

    #[test]
    fn test_collect_urls_appends_file_entries() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# targets").unwrap();
        writeln!(file, "/a").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "/b").unwrap();

        let mut args = create_test_args();
        args.urls = vec!["/first".to_string()];
        args.file = Some(file.path().to_string_lossy().to_string());

        assert_eq!(collect_urls(&args).unwrap(), vec!["/first", "/a", "/b"]);
    }

    #[test]
    fn test_read_urls_from_missing_file() {
        let err = read_urls_from_file("/definitely/not/here.txt").unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[test]
    fn test_read_payloads() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"[{{"a": 1}}, {{"a": 2}}]"#).unwrap();
        let payloads = read_payloads(&file.path().to_string_lossy()).unwrap();
        assert!(matches!(payloads, Payloads::PerRequest(ref p) if p.len() == 2));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_payloads(&file.path().to_string_lossy()).is_err());
    }

    #[test]
    fn test_failed_slot_renders_as_error_object() {
        let err = fanout_lib::RequestError::new(
            1,
            Method::Get,
            "http://test.com/b",
            4,
            fanout_lib::ErrorKind::Timeout {
                after: Duration::from_secs(10),
            },
        );

        let value = outcome_to_json(&Err(err));
        assert_eq!(value["error"]["kind"]["kind"], "timeout");
        assert_eq!(value["error"]["attempts"], 4);
        assert_eq!(value["error"]["url"], "http://test.com/b");

        assert_eq!(outcome_to_json(&Ok(json!({"ok": true}))), json!({"ok": true}));
    }
}
