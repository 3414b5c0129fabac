//! UI utilities for HyperDrop CLI.

use std::io::{self, Write};
use std::time::Duration;

use tokio::sync::watch;

use hyperdrop_core::file::format_size;
use hyperdrop_core::transfer::{TransferSnapshot, TransferStatus};

/// Print the banner shown at the top of every command.
pub fn print_header() {
    println!();
    println!("HyperDrop v{}", hyperdrop_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

/// Render live progress until the session completes, fails or goes away.
pub async fn display_progress(mut rx: watch::Receiver<TransferSnapshot>) {
    let mut last_file = String::new();
    let mut announced_peer = false;

    loop {
        let changed = tokio::time::timeout(Duration::from_secs(1), rx.changed()).await;
        let snapshot = rx.borrow_and_update().clone();

        if !announced_peer {
            if let Some(peer) = &snapshot.peer_name {
                println!("  Connected to {}", peer);
                println!();
                announced_peer = true;
            }
        }

        match snapshot.progress.status {
            TransferStatus::Complete | TransferStatus::Error => break,
            TransferStatus::Transferring => {
                if snapshot.current_file_name != last_file {
                    if !last_file.is_empty() {
                        println!();
                    }
                    last_file.clone_from(&snapshot.current_file_name);
                }
                print!("\r  {}    ", progress_line(&snapshot));
                let _ = io::stdout().flush();
            }
            TransferStatus::Pending => {}
        }

        if matches!(changed, Ok(Err(_))) {
            break;
        }
    }

    println!();
}

/// One line of progress: `[ 42.00%] file - 3.1 MB/s - ETA: 12s`.
pub fn progress_line(snapshot: &TransferSnapshot) -> String {
    let progress = &snapshot.progress;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let speed = format_size(progress.speed_bps as u64);

    let counter = if snapshot.total_files > 1 {
        format!(
            " ({}/{})",
            (snapshot.files_completed + 1).min(snapshot.total_files),
            snapshot.total_files
        )
    } else {
        String::new()
    };

    format!(
        "[{:>6.2}%] {}{} - {}/s - ETA: {}",
        progress.percentage,
        snapshot.current_file_name,
        counter,
        speed,
        format_eta(progress.time_remaining)
    )
}

/// Format an ETA, `--` when unknown.
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        None => "--".to_string(),
        Some(d) if d.as_secs() >= 60 => format_remaining(d),
        Some(d) => format!("{}s", d.as_secs()),
    }
}

/// Parse a duration string like "5m", "30s", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num))
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}

/// Format remaining duration as "M:SS".
pub fn format_remaining(remaining: Duration) -> String {
    let total_secs = remaining.as_secs();
    let mins = total_secs / 60;
    let secs = total_secs % 60;
    format!("{}:{:02}", mins, secs)
}
