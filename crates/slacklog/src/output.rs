use std::io::IsTerminal;

use owo_colors::OwoColorize;
use slacklog_sink::DispatchStats;

pub fn print_send_result(stats: &DispatchStats) {
    let status = if stats.delivered > 0 { "sent" } else { "failed" };
    println!("{} delivered={} failed={}", paint_status(status), stats.delivered, stats.failed);
}

pub fn print_pipe_summary(stats: &DispatchStats, skipped: u64) {
    let status = if stats.failed == 0 && stats.dropped == 0 {
        "done"
    } else {
        "partial"
    };
    println!(
        "{} batches={} delivered={} failed={} dropped={} skipped={}",
        paint_status(status),
        stats.batches,
        stats.delivered,
        stats.failed,
        stats.dropped,
        skipped
    );
}

fn paint_status(status: &str) -> String {
    if !std::io::stdout().is_terminal() {
        return status.to_string();
    }
    match status {
        "sent" | "done" => status.green().to_string(),
        "partial" => status.yellow().to_string(),
        _ => status.red().to_string(),
    }
}
