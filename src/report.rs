//! Console rendering of execution results

use colored::Colorize;
use std::sync::Arc;

use crate::execution::ExecutionPhase;
use crate::notifications::{Attributes, Notice, Notifier, Telemetry, QUERY_EXECUTION_EVENT};
use crate::results::{ErrorOrigin, ExecutionStats, MutationInfo, QueryError, Table};
use crate::sink::{ResultSink, Results};

/// Rows printed per table before the output is cut short
const MAX_ROWS: usize = 20;

pub fn render_results(results: &Results) -> String {
    let mut out = String::new();

    if let Some(ref error) = results.error {
        out.push_str(&render_error(error));
    }

    if let Some(ref info) = results.mutation_info {
        out.push_str(&render_mutation(info));
    }

    for table in results.tables.values() {
        out.push_str(&render_table(table));
    }

    if let Some(ref stats) = results.stats {
        out.push_str(&render_stats(stats));
    }

    out
}

fn render_error(error: &QueryError) -> String {
    let origin = match error.origin {
        ErrorOrigin::Client => "client",
        ErrorOrigin::Server => "server",
        ErrorOrigin::Unknown => "unknown",
    };
    let mut out = format!("{} {} {}\n", "✗".red(), format!("[{}]", origin).dimmed(), error.message.red());
    for detail in &error.details {
        out.push_str(&format!("    {}\n", detail.dimmed()));
    }
    out
}

fn render_mutation(info: &MutationInfo) -> String {
    let mut out = format!(
        "{} {} {}\n",
        "⟳".yellow(),
        "Mutation:".bold(),
        if info.status.message.is_empty() {
            format!("status {}", info.status.code)
        } else {
            info.status.message.clone()
        }
    );
    for state in &info.states {
        out.push_str(&format!("    {} {}\n", state.name.cyan(), state.state.dimmed()));
    }
    out
}

fn render_table(table: &Table) -> String {
    let total = table.num_rows();
    let mut out = format!("\n{} {} {}\n", "▸".blue(), table.name.bold(), format!("({} rows)", total).dimmed());

    for row in table.batches.iter().flat_map(|b| b.rows.iter()).take(MAX_ROWS) {
        out.push_str(&format!("  {}\n", row));
    }
    if total > MAX_ROWS {
        out.push_str(&format!("  {}\n", format!("… {} more", total - MAX_ROWS).dimmed()));
    }
    out
}

fn render_stats(stats: &ExecutionStats) -> String {
    format!(
        "\n{} {} records, {} in {} (compiled in {})\n",
        "✓".green(),
        stats.records_processed,
        format_bytes(stats.bytes_processed),
        format_nanos(stats.execution_time_ns),
        format_nanos(stats.compilation_time_ns)
    )
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_nanos(nanos: u64) -> String {
    let ms = nanos as f64 / 1_000_000.0;
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.1}ms", ms)
    }
}

/// One-line summary of how an execution ended
pub fn render_outcome(phase: ExecutionPhase) -> String {
    match phase {
        ExecutionPhase::Completed => format!("{} {}", "✓".green(), "Execution completed".green()),
        ExecutionPhase::Failed => format!("{} {}", "✗".red(), "Execution failed".red()),
        ExecutionPhase::Cancelled => format!("{} {}", "■".yellow(), "Execution cancelled".yellow()),
        ExecutionPhase::TimedOut => format!("{} {}", "⧗".red(), "Mutation did not complete in time".red()),
        ExecutionPhase::Idle => format!(
            "{} {}",
            "•".dimmed(),
            "Nothing was submitted (mutation scripts only run with --manual)".dimmed()
        ),
        ExecutionPhase::Submitting | ExecutionPhase::Streaming | ExecutionPhase::MutationPending => {
            format!("{} {:?}", "…".dimmed(), phase)
        }
    }
}

pub fn print_outcome(phase: ExecutionPhase, results: &Results) {
    print!("{}", render_results(results));
    println!("\n{}", render_outcome(phase));
}

/// Prints notices to stderr. Actions are listed, never run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.action {
            Some(action) => eprintln!(
                "{} {} {}",
                "!".yellow().bold(),
                notice.message,
                format!("[{}]", action.title).cyan()
            ),
            None => eprintln!("{} {}", "!".yellow().bold(), notice.message),
        }
    }
}

/// Prints the sink whenever an execution reports an outcome. Used by watch
/// mode, where nothing waits on the orchestrator.
pub struct ConsoleReporter {
    sink: Arc<dyn ResultSink>,
}

impl ConsoleReporter {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self { sink }
    }
}

impl Telemetry for ConsoleReporter {
    fn track(&self, event: &str, attributes: Attributes) {
        if event != QUERY_EXECUTION_EVENT {
            return;
        }

        let phase = match attributes.get("status").map(String::as_str) {
            Some("success") => ExecutionPhase::Completed,
            Some("timeout") => ExecutionPhase::TimedOut,
            _ => ExecutionPhase::Failed,
        };

        print_outcome(phase, &self.sink.snapshot());
        println!("\n{}", "Watching for changes...".dimmed());
    }
}
