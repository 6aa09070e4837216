//! `upload`: drive a ChunkProducer over HTTP.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use parcel_core::config::ClientConfig;
use parcel_core::FileIdentifier;
use parcel_services::{ChunkProducer, ProgressEvent, StartOutcome, UploadSource, UploadStatus};

use super::files::human_bytes;
use super::http::HttpTransport;

/// Identifier for a local path: its final component.
fn identifier_for(path: &Path) -> Result<FileIdentifier> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    FileIdentifier::parse(name).with_context(|| format!("cannot upload {} under that name", path.display()))
}

fn print_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::Status { file, status } => match status {
            UploadStatus::Uploading => println!("  ▶ {file}"),
            UploadStatus::Paused => println!("  ⏸ {file} paused"),
            _ => {}
        },
        ProgressEvent::ChunkAcknowledged {
            file,
            uploaded_chunks,
            total_chunks,
            ..
        } => {
            let pct = u64::from(*uploaded_chunks) * 100 / u64::from((*total_chunks).max(1));
            println!("  │ {file}: {uploaded_chunks}/{total_chunks} chunks ({pct}%)");
        }
        ProgressEvent::Retrying {
            file,
            chunk_index,
            attempt,
            delay,
            error,
        } => println!(
            "  │ {file}: chunk {chunk_index} failed ({error}), retry {attempt} in {:.1}s",
            delay.as_secs_f64()
        ),
        ProgressEvent::Completed { file, artifact } => println!(
            "  └─ {file} complete: {} at {}",
            human_bytes(artifact.size),
            artifact.path
        ),
        ProgressEvent::Failed { file, error } => println!("  └─ {file} FAILED: {error}"),
    }
}

pub async fn cmd_upload(config: &ClientConfig, paths: &[&str]) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("upload needs at least one file");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = HttpTransport::new(&config.server_url);
    let producer = Arc::new(
        ChunkProducer::new(transport, config.chunk_size, config.retry.clone()).with_events(tx),
    );

    for path in paths {
        let path = Path::new(path);
        let id = identifier_for(path)?;
        let source = UploadSource::from_path(path, id.clone())
            .await
            .with_context(|| format!("failed to read file: {}", path.display()))?;
        let added = producer
            .add_file(source)
            .await
            .with_context(|| format!("cannot plan upload of {}", path.display()))?;
        if !added {
            println!("  skipping duplicate {id}");
        }
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    // Ctrl-C pauses at the next chunk boundary. Weak, so the event channel
    // closes once the producer is dropped.
    {
        let producer = Arc::downgrade(&producer);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if let Some(producer) = producer.upgrade() {
                    println!("  pausing after the current chunk...");
                    producer.pause();
                }
            }
        });
    }

    println!("Uploading to {}", config.server_url);
    let outcome = producer.start_upload().await;
    drop(producer);
    let _ = printer.await;

    let StartOutcome::Finished(summary) = outcome else {
        anyhow::bail!("an upload is already running");
    };

    println!();
    println!(
        "{} completed, {} failed{}",
        summary.completed.len(),
        summary.failed.len(),
        if summary.paused { ", paused" } else { "" }
    );
    if !summary.failed.is_empty() {
        anyhow::bail!("{} upload(s) failed", summary.failed.len());
    }
    Ok(())
}
