//! Receive command implementation.
//!
//! Listens for one sender, saves every file it sends into the output
//! directory and exits once the set is complete.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use hyperdrop_core::channel::tcp::TcpChannel;
use hyperdrop_core::file::{format_size, unique_output_path};
use hyperdrop_core::transfer::{ReceivedFile, Role, TransferController};

use super::ReceiveArgs;
use crate::ui;

/// A file written to disk.
struct SavedFile {
    path: PathBuf,
    size: u64,
    missing_chunks: usize,
}

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let config = super::load_config()?;

    let output_dir = args
        .output
        .or_else(|| config.general.default_output.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Cannot create '{}'", output_dir.display()))?;

    let wait = ui::parse_duration(&args.timeout)
        .ok_or_else(|| anyhow::anyhow!("Invalid timeout '{}'", args.timeout))?;

    let listen = args
        .listen
        .unwrap_or_else(|| config.network.listen_addr.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Cannot listen on {}", listen))?;
    let local_addr = listener.local_addr()?;

    if !args.quiet {
        ui::print_header();
        println!("  Waiting for a sender on {}", local_addr);
        println!("  Saving to {}", output_dir.display());
        println!("  Expires in {}", ui::format_remaining(wait));
        println!();
    }

    let (channel, mut events) = TcpChannel::accept(&listener, wait)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("No sender connected")?;
    drop(listener);

    let (files_tx, files_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_files(output_dir, files_rx));

    let (transfer_config, device_name) = super::session_settings(config, args.name);
    let mut controller = TransferController::new(transfer_config, device_name, files_tx);

    let progress_handle = if args.quiet {
        None
    } else {
        Some(tokio::spawn(ui::display_progress(controller.subscribe())))
    };

    let start_time = Instant::now();
    let result = match controller
        .connect(channel, &mut events, Role::Receiver)
        .await
    {
        Ok(()) => controller.run(&mut events).await,
        Err(e) => Err(e),
    };
    let elapsed = start_time.elapsed();
    let sender_name = controller.snapshot().peer_name;

    drop(controller);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    let saved = writer.await.context("File writer task failed")??;

    if !args.quiet {
        display_saved(&saved, sender_name.as_deref(), elapsed.as_secs_f64());
    }

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            if !args.quiet {
                eprintln!("  Transfer failed: {}", e.user_message());
                eprintln!();
            }
            Err(e.into())
        }
    }
}

/// Persist each delivered file until the controller goes away.
async fn write_files(
    output_dir: PathBuf,
    mut files: mpsc::UnboundedReceiver<ReceivedFile>,
) -> Result<Vec<SavedFile>> {
    let mut saved = Vec::new();

    while let Some(file) = files.recv().await {
        let path = unique_output_path(&output_dir, &file.metadata.name);
        tokio::fs::write(&path, &file.data)
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        tracing::debug!("Saved {} to {}", file.metadata.name, path.display());

        saved.push(SavedFile {
            path,
            size: file.metadata.size,
            missing_chunks: file.missing_chunks.len(),
        });
    }

    Ok(saved)
}

fn display_saved(saved: &[SavedFile], sender_name: Option<&str>, elapsed_secs: f64) {
    println!();
    if saved.is_empty() {
        println!("  No files received.");
        println!();
        return;
    }

    let total: u64 = saved.iter().map(|f| f.size).sum();
    println!(
        "  Received {} files ({}) from {} in {:.1}s",
        saved.len(),
        format_size(total),
        sender_name.unwrap_or("the sender"),
        elapsed_secs
    );
    println!();
    for file in saved {
        let name = file.path.file_name().map_or_else(
            || file.path.display().to_string(),
            |n| n.to_string_lossy().to_string(),
        );
        if file.missing_chunks > 0 {
            println!(
                "  {} ({}, {} chunks missing)",
                name,
                format_size(file.size),
                file.missing_chunks
            );
        } else {
            println!("  {} ({})", name, format_size(file.size));
        }
    }
    println!();
    if let Some(dir) = saved.first().and_then(|f| f.path.parent()) {
        println!("  Saved to {}", display_dir(dir));
        println!();
    }
}

fn display_dir(dir: &Path) -> String {
    if dir.as_os_str().is_empty() {
        ".".to_string()
    } else {
        dir.display().to_string()
    }
}
