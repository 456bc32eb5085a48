//! Validate command implementation.

use thl_core::{DiskLog, LogConfig, ValidationReport};

/// Validates the log described by `config`.
pub fn check(config: LogConfig) -> Result<ValidationReport, Box<dyn std::error::Error>> {
    let log = DiskLog::prepare(config.read_only(true))?;
    Ok(log.validate()?)
}

/// Runs the validate command.
pub fn run(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating log at {}", config.log_dir.display());
    println!();

    match check(config) {
        Ok(report) => {
            println!("Segments checked: {}", report.segments);
            println!("Events checked:   {}", report.events);
            println!("Seqno range:      {} .. {}", report.min_seqno, report.max_seqno);
            println!();
            println!("✓ Log validation passed");
            Ok(())
        }
        Err(e) => {
            println!("  {e}");
            println!();
            println!("✗ Log validation failed");
            Err("Validation failed".into())
        }
    }
}
