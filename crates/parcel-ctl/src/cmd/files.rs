//! Listing commands.

use anyhow::Result;

use super::http::HttpTransport;

pub async fn cmd_files(transport: &HttpTransport) -> Result<()> {
    let files = transport.list_files().await?;

    if files.is_empty() {
        println!("No completed uploads.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Completed Uploads ({})", files.len());
    println!("═══════════════════════════════════════");
    for f in &files {
        println!("  ┌─ {}", f.name);
        println!("  │  size : {} ({})", f.size, human_bytes(f.size));
        println!("  └─ url  : {}{}", transport.server_url(), f.path);
    }

    Ok(())
}

pub async fn cmd_sessions(transport: &HttpTransport) -> Result<()> {
    let sessions = transport.list_sessions().await?;

    if sessions.is_empty() {
        println!("No uploads in progress.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Uploads In Progress ({})", sessions.len());
    println!("═══════════════════════════════════════");
    for s in &sessions {
        println!("  ┌─ {}", s.name);
        println!("  │  chunks : {} / {}", s.uploaded_chunks, s.total_chunks);
        println!("  └─ idle   : {}s", s.idle_secs);
    }

    Ok(())
}

pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::human_bytes;

    #[test]
    fn formats_sizes() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024 / 2), "2.5 MB");
    }
}
