//! Info command implementation.

use serde::Serialize;
use thl_core::{DiskLog, LogConfig, SegmentMeta};

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InfoResult {
    /// Log directory.
    pub path: String,
    /// Lowest committed seqno.
    pub min_seqno: i64,
    /// Highest committed seqno.
    pub max_seqno: i64,
    /// Number of segment files.
    pub file_count: usize,
    /// Total bytes readable across segments.
    pub total_size: u64,
    /// Whether segments carry checksums.
    pub checksums: bool,
    /// Serializer used to decode payloads.
    pub serializer: String,
    /// Segment details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentMeta>>,
}

/// Collects information about the log described by `config`.
pub fn inspect(config: LogConfig, show_segments: bool) -> Result<InfoResult, Box<dyn std::error::Error>> {
    let log = DiskLog::prepare(config.read_only(true))?;
    let segments = log.segments();

    Ok(InfoResult {
        path: log.config().log_dir.display().to_string(),
        min_seqno: log.min_seqno(),
        max_seqno: log.max_seqno(),
        file_count: segments.len(),
        total_size: segments.iter().map(|s| s.committed_len).sum(),
        checksums: segments.iter().all(|s| s.checksums),
        serializer: format!("{:?}", log.config().serializer).to_lowercase(),
        segments: show_segments.then_some(segments),
    })
}

/// Runs the info command.
pub fn run(
    config: LogConfig,
    show_segments: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(config, show_segments)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InfoResult) {
    println!("Log: {}", result.path);
    println!();
    println!("Seqno range:   {} .. {}", result.min_seqno, result.max_seqno);
    println!("Segment files: {}", result.file_count);
    println!("Total size:    {} bytes", result.total_size);
    println!("Checksums:     {}", if result.checksums { "on" } else { "off" });
    println!("Serializer:    {}", result.serializer);

    if let Some(segments) = &result.segments {
        println!();
        println!("{:<22} {:>12} {:>12} {:>12} {:>7}", "File", "Base", "Last", "Bytes", "Sealed");
        for segment in segments {
            println!(
                "{:<22} {:>12} {:>12} {:>12} {:>7}",
                segment.file_name,
                segment.base_seqno,
                segment.last_seqno,
                segment.committed_len,
                if segment.sealed { "yes" } else { "no" }
            );
        }
    }
}
