//! parcel-ctl — command-line client for parceld.

use anyhow::{Context, Result};

use parcel_core::config::ParcelConfig;
use parcel_ctl::cmd;
use parcel_ctl::HttpTransport;

fn print_usage() {
    println!("Usage: parcel-ctl [--url <url>] [--chunk-size <bytes>] <command>");
    println!();
    println!("Commands:");
    println!("  upload <file>...   Upload files in chunks (Ctrl-C pauses)");
    println!("  files              List completed uploads");
    println!("  sessions           List uploads still in progress");
    println!();
    println!("Options:");
    println!("  --url <url>            Server URL (default: from config, http://127.0.0.1:3000)");
    println!("  --chunk-size <bytes>   Chunk size for uploads (default: from config, 1 MiB)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = ParcelConfig::load().unwrap_or_else(|e| {
        eprintln!("warning: {e}, using defaults");
        ParcelConfig::default()
    });

    // Parse options
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => {
                i += 1;
                config.client.server_url = args.get(i).context("--url requires a value")?.clone();
            }
            "--chunk-size" => {
                i += 1;
                config.client.chunk_size = args
                    .get(i)
                    .context("--chunk-size requires a value")?
                    .parse()
                    .context("--chunk-size must be a number")?;
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let transport = HttpTransport::new(&config.client.server_url);

    match remaining.as_slice() {
        ["upload", paths @ ..] => cmd::upload::cmd_upload(&config.client, paths).await,
        ["files"] | [] => cmd::files::cmd_files(&transport).await,
        ["sessions"] => cmd::files::cmd_sessions(&transport).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
