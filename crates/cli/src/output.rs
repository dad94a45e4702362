// Output formatting for CLI

use scaling_queue::QueueStats;
use serde::Serialize;

#[derive(Clone, Copy)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Final report of a run
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub outcome: String,
    pub elapsed_ms: u64,
    #[serde(flatten)]
    pub stats: QueueStats,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
            OutputFormat::Text => {
                let stats = &summary.stats;
                print_field("Outcome", &summary.outcome);
                print_field("Elapsed", &format!("{} ms", summary.elapsed_ms));
                print_field("State", &stats.state.to_string());
                print_field("Fetched", &stats.fetched.to_string());
                print_field("Added", &stats.added.to_string());
                print_field("Processed", &stats.processed.to_string());
                print_field("Failed", &stats.failed.to_string());
                print_field("Skipped", &stats.skipped.to_string());
                print_field("Pending", &stats.pending.to_string());
                print_field("In flight", &stats.in_flight.to_string());
            }
        }
        Ok(())
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}
