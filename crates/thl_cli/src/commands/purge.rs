//! Purge command implementation.

use thl_core::{DiskLog, LogConfig};

/// Deletes `low..=high` from the log and returns the new seqno bounds.
pub fn purge(
    config: LogConfig,
    low: Option<i64>,
    high: Option<i64>,
) -> Result<(i64, i64), Box<dyn std::error::Error>> {
    let log = DiskLog::prepare(config.read_only(false))?;
    if !log.is_writable() {
        return Err("Log is locked by another process".into());
    }

    let mut conn = log.connect(false)?;
    conn.delete(low, high)?;
    conn.release()?;
    Ok((log.min_seqno(), log.max_seqno()))
}

/// Runs the purge command.
pub fn run(
    config: LogConfig,
    low: Option<i64>,
    high: Option<i64>,
    confirmed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let range = format!(
        "{} .. {}",
        low.map_or("start".to_string(), |s| s.to_string()),
        high.map_or("end".to_string(), |s| s.to_string())
    );
    if !confirmed {
        println!("Would delete seqnos {range} from {}", config.log_dir.display());
        println!("Re-run with --yes to delete.");
        return Ok(());
    }

    let (min, max) = purge(config, low, high)?;
    println!("Deleted seqnos {range}");
    println!("Log now holds {min} .. {max}");
    Ok(())
}
