//! Terminal display for the fanout CLI.
//!
//! Everything here writes to stderr so stdout stays clean JSON. Uses only
//! the `console` crate.

use console::{style, Term};
use fanout_lib::{ErrorKind, ProgressSink, RequestError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Progress ─────────────────────────────────────────────────────────────────

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const BAR_WIDTH: usize = 30;

#[derive(Debug)]
struct ProgressState {
    completed: AtomicUsize,
    total: usize,
    running: AtomicBool,
}

/// Animated progress line fed by the dispatcher.
pub struct ProgressLine {
    state: Arc<ProgressState>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ProgressLine {
    /// Start drawing progress for `total` requests.
    pub fn start(total: usize) -> Self {
        let state = Arc::new(ProgressState {
            completed: AtomicUsize::new(0),
            total,
            running: AtomicBool::new(true),
        });
        let render_state = state.clone();

        let handle = tokio::spawn(async move {
            let term = Term::stderr();
            let mut idx = 0usize;
            while render_state.running.load(Ordering::Relaxed) {
                let frame = SPINNER_FRAMES[idx % SPINNER_FRAMES.len()];
                let completed = render_state.completed.load(Ordering::Relaxed);
                let _ = term.clear_line();
                let _ = term.write_str(&format!(
                    "{} {}",
                    style(frame).cyan(),
                    render_line(completed, render_state.total)
                ));
                idx += 1;
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
            let _ = term.clear_line();
        });

        Self {
            state,
            handle: Some(handle),
        }
    }

    /// Stop drawing and clear the line.
    pub async fn stop(mut self) {
        self.state.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.await;
        }
    }
}

impl ProgressSink for ProgressLine {
    fn on_progress(&self, completed: usize, _total: usize) {
        self.state.completed.store(completed, Ordering::Relaxed);
    }
}

/// `[=========>          ] 12/40 requests`
pub fn render_line(completed: usize, total: usize) -> String {
    format!(
        "[{}] {}/{} request{}",
        render_bar(completed, total, BAR_WIDTH),
        completed,
        total,
        if total == 1 { "" } else { "s" }
    )
}

fn render_bar(completed: usize, total: usize, width: usize) -> String {
    let filled = if total == 0 {
        width
    } else {
        (completed.min(total) * width) / total
    };

    let mut bar = "=".repeat(filled);
    if filled < width {
        bar.push('>');
        bar.push_str(&" ".repeat(width - filled - 1));
    }
    bar
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print a one-line run summary.
pub fn print_summary(total: usize, failed: usize, duration: Duration) {
    let succeeded = total.saturating_sub(failed);
    eprintln!(
        "{} request{} in {:.1}s  {}  {}  {}  {}",
        style(total).bold(),
        if total == 1 { "" } else { "s" },
        duration.as_secs_f64(),
        style("|").dim(),
        style(format!("{} ok", succeeded)).green(),
        style("|").dim(),
        if failed == 0 {
            style(format!("{} failed", failed)).dim()
        } else {
            style(format!("{} failed", failed)).red()
        },
    );
}

/// Print failures grouped by error class, a few URLs each.
pub fn print_failure_summary<'a, I>(failures: I)
where
    I: IntoIterator<Item = &'a RequestError>,
{
    let groups = group_failures(failures);
    if groups.is_empty() {
        return;
    }

    eprintln!("{}", style("Some requests failed:").yellow());
    for (label, urls) in groups {
        eprintln!(
            "  {} {}: {}",
            style(urls.len()).bold(),
            label,
            format_list(&urls, 5)
        );
    }
}

fn group_failures<'a, I>(failures: I) -> Vec<(&'static str, Vec<String>)>
where
    I: IntoIterator<Item = &'a RequestError>,
{
    let mut groups: Vec<(&'static str, Vec<String>)> = Vec::new();
    for failure in failures {
        let label = describe_kind(&failure.kind);
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, urls)) => urls.push(failure.url.clone()),
            None => groups.push((label, vec![failure.url.clone()])),
        }
    }
    groups
}

fn describe_kind(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Timeout { .. } => "timeouts",
        ErrorKind::Transport { .. } => "network errors",
        ErrorKind::HttpStatus { .. } => "HTTP errors",
        ErrorKind::ResponseDecode { .. } => "undecodable responses",
        ErrorKind::NotFlattenable => "non-list responses",
        ErrorKind::GateClosed => "cancelled requests",
    }
}

fn format_list(items: &[String], max_show: usize) -> String {
    if items.len() <= max_show {
        items.join(", ")
    } else {
        format!(
            "{}, ... and {} more",
            items[..max_show].join(", "),
            items.len() - max_show
        )
    }
}
