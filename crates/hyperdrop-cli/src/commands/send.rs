//! Send command implementation.
//!
//! Connects to a waiting receiver, streams the given files and waits for the
//! receiver to hang up.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use hyperdrop_core::channel::tcp::TcpChannel;
use hyperdrop_core::channel::ChannelEvents;
use hyperdrop_core::file::{format_size, OutgoingFile};
use hyperdrop_core::transfer::{Role, TransferController};

use super::SendArgs;
use crate::ui;

/// How long to wait for the receiver to close after the last frame.
const CLOSE_GRACE: Duration = Duration::from_secs(30);

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config()?;

    let files = args
        .paths
        .iter()
        .map(|path| {
            OutgoingFile::from_path(path)
                .with_context(|| format!("Cannot send '{}'", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let total_size: u64 = files.iter().map(|f| f.size).sum();

    if !args.quiet {
        ui::print_header();
        display_send_info(&files, total_size, &args.addr);
    }

    let (transfer_config, device_name) = super::session_settings(config, args.name);
    let (channel, mut events) =
        TcpChannel::connect(args.addr.as_str(), transfer_config.connect_timeout)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))
            .with_context(|| format!("Could not reach {}", args.addr))?;

    let mut controller = TransferController::new(transfer_config, device_name, ());

    let progress_handle = if args.quiet {
        None
    } else {
        Some(tokio::spawn(ui::display_progress(controller.subscribe())))
    };

    let start_time = Instant::now();
    let result = transfer(&mut controller, channel, &mut events, &files).await;
    let elapsed = start_time.elapsed();

    drop(controller);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    match result {
        Ok(()) => {
            if !args.quiet {
                println!();
                println!(
                    "  Transfer complete! {} in {:.1}s",
                    format_size(total_size),
                    elapsed.as_secs_f64()
                );
                println!();
            }
            Ok(())
        }
        Err(e) => {
            if !args.quiet {
                eprintln!();
                eprintln!("  Transfer failed: {}", e.user_message());
                eprintln!();
            }
            Err(e.into())
        }
    }
}

async fn transfer(
    controller: &mut TransferController<TcpChannel>,
    channel: TcpChannel,
    events: &mut ChannelEvents,
    files: &[OutgoingFile],
) -> hyperdrop_core::Result<()> {
    controller.connect(channel, events, Role::Sender).await?;
    controller.send_files_with_events(files, events).await?;
    controller.flush().await?;

    match tokio::time::timeout(CLOSE_GRACE, controller.run(events)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!("Receiver did not hang up, closing");
            Ok(())
        }
    }
}

/// Display what is about to be sent.
fn display_send_info(files: &[OutgoingFile], total_size: u64, addr: &str) {
    println!(
        "  Sending {} items ({}) to {}",
        files.len(),
        format_size(total_size),
        addr
    );
    println!();
    for file in files {
        println!("  {} {} ({})", file_icon(file), file.name, format_size(file.size));
    }
    println!();
}

fn file_icon(file: &OutgoingFile) -> &'static str {
    let mime = file.mime_type.as_str();
    if mime.starts_with("image/") {
        "[img]"
    } else if mime.starts_with("video/") {
        "[vid]"
    } else if mime.starts_with("audio/") {
        "[aud]"
    } else if mime.starts_with("text/") {
        "[txt]"
    } else {
        "[file]"
    }
}
