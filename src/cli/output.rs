// Output formatting and display for CLI

use crate::ipc::protocol::ResponseData;
use crate::process::{ManualOutcome, ProcessView};
use chrono::{DateTime, Local, Utc};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::ProcessList(processes) => {
            if processes.is_empty() {
                println!("{}", "No processes are registered".yellow());
            } else {
                print_process_table(processes);
            }
        }

        ResponseData::DaemonStatus {
            pid,
            uptime_secs,
            process_count,
        } => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
            println!(
                "  {}: {}",
                "Uptime".bold(),
                format_duration(&Duration::from_secs(*uptime_secs))
            );
            println!("  {}: {}", "Processes".bold(), process_count);
        }

        other => println!("{}", describe(other)),
    }
}

/// One-line, coloured description of a response
pub fn describe(data: &ResponseData) -> String {
    match data {
        ResponseData::Added { id, name } => format!(
            "{} Process {} added ({})",
            "✓".green().bold(),
            name.cyan(),
            short_id(&id.to_string())
        ),
        ResponseData::Removed { id } => {
            format!("{} Process {} removed", "✓".green().bold(), id)
        }
        ResponseData::Started { id, outcome } | ResponseData::Stopped { id, outcome } => {
            describe_outcome(&id.to_string(), outcome)
        }
        ResponseData::ProcessList(processes) => {
            format!("{} process(es)", processes.len())
        }
        ResponseData::DaemonStatus { pid, .. } => {
            format!("{} Daemon is running (PID {})", "✓".green().bold(), pid)
        }
    }
}

fn describe_outcome(id: &str, outcome: &ManualOutcome) -> String {
    if outcome.is_noop() {
        format!("{} Process {} {}", "!".yellow().bold(), id, outcome)
    } else {
        format!("{} Process {} {}", "✓".green().bold(), id, outcome)
    }
}

pub fn describe_error(error: &str) -> String {
    format!("{} {}", "✗".red().bold(), error)
}

/// Print a formatted table of processes
fn print_process_table(processes: &[ProcessView]) {
    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Auto")]
        auto_restart: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Last Start")]
        last_start: String,
    }

    let rows: Vec<ProcessRow> = processes
        .iter()
        .map(|p| ProcessRow {
            id: short_id(&p.id.to_string()),
            name: truncate(&p.name, 20),
            state: format_state_colored(p),
            pid: p
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".to_string()),
            restarts: format!("{} ({} recent)", p.restart_count, p.recent_restart_count),
            auto_restart: if p.auto_restart { "on" } else { "off" }.to_string(),
            health: format_health_colored(p),
            cpu: if p.health_check_enabled {
                format!("{:.1}%", p.cpu_percent)
            } else {
                "-".to_string()
            },
            memory: if p.health_check_enabled {
                format!("{:.1}MB", p.memory_mb)
            } else {
                "-".to_string()
            },
            last_start: format_timestamp(p.last_start),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", processes.len())
            .dimmed()
            .italic()
    );
}

/// Format the run state with color coding
fn format_state_colored(process: &ProcessView) -> String {
    if process.is_running {
        "running".green().to_string()
    } else if process.circuit_breaker_tripped {
        "tripped".red().bold().to_string()
    } else {
        match process.last_exit_code {
            Some(0) | None => "stopped".bright_black().to_string(),
            Some(code) => format!("exited ({})", code).red().to_string(),
        }
    }
}

fn format_health_colored(process: &ProcessView) -> String {
    match &process.health_status {
        Some(status) if process.is_healthy => status.green().to_string(),
        Some(status) => status.yellow().to_string(),
        None => "-".to_string(),
    }
}

fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    match timestamp {
        Some(time) => {
            let local: DateTime<Local> = time.into();
            local.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => "-".to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// First segment of a UUID, enough to address a process from the CLI
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Create a spinner for calls that may take a while
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessId;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_short_id() {
        let id = ProcessId::new().to_string();
        assert_eq!(short_id(&id), id[..8]);
    }

    #[test]
    fn test_noop_outcome_is_flagged() {
        colored::control::set_override(false);
        let id = ProcessId::new();

        let text = describe(&ResponseData::Stopped {
            id,
            outcome: ManualOutcome::NotRunning,
        });
        assert!(text.starts_with('!'));
        assert!(text.ends_with("not running"));

        let text = describe(&ResponseData::Started {
            id,
            outcome: ManualOutcome::Started { pid: 10 },
        });
        assert!(text.starts_with('✓'));
    }
}
