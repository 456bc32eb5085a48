//! List command implementation.

use std::io::Write;
use thl_core::{DiskLog, LogConfig, LogEvent, ReplEvent};

/// Options for the list command.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// First seqno to print.
    pub low: Option<i64>,
    /// Last seqno to print.
    pub high: Option<i64>,
    /// Maximum number of events.
    pub limit: Option<usize>,
    /// Skip payloads.
    pub headers_only: bool,
    /// One JSON object per line instead of text.
    pub json: bool,
}

/// Runs the list command, writing events to `out`. Returns the number of
/// events printed.
pub fn run(
    config: LogConfig,
    options: &ListOptions,
    out: &mut impl Write,
) -> Result<usize, Box<dyn std::error::Error>> {
    let log = DiskLog::prepare(config.read_only(true))?;
    let mut conn = log.connect(true)?;

    let positioned = match options.low {
        Some(low) => conn.seek_seqno(low.max(log.min_seqno()))?,
        None => conn.seek_first()?,
    };
    if !positioned {
        return Err(format!(
            "Seqno {} is outside the log ({} .. {})",
            options.low.unwrap_or_default(),
            log.min_seqno(),
            log.max_seqno()
        )
        .into());
    }

    let mut printed = 0;
    while let Some(event) = conn.next(false)? {
        if options.high.is_some_and(|high| event.seqno() > high) {
            break;
        }
        if options.limit.is_some_and(|limit| printed >= limit) {
            break;
        }
        print_event(out, &event, options)?;
        printed += 1;
    }

    tracing::debug!(printed, read = conn.read_count(), "listed events");
    Ok(printed)
}

fn print_event(
    out: &mut impl Write,
    event: &LogEvent,
    options: &ListOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if options.json {
        let line = if options.headers_only {
            serde_json::to_string(&event.header)?
        } else {
            serde_json::to_string(event)?
        };
        writeln!(out, "{line}")?;
        return Ok(());
    }

    let header = &event.header;
    write!(
        out,
        "seqno={} fragno={} last_frag={} epoch={} tstamp={} source={} shard={} event_id={}",
        header.seqno,
        header.fragno,
        header.last_frag,
        header.epoch_number,
        header.source_tstamp,
        header.source_id,
        header.shard_id,
        header.event_id
    )?;
    if !options.headers_only {
        match &event.event {
            ReplEvent::Change(data) => write!(out, " payload={} bytes", data.len())?,
            ReplEvent::FilteredRange {
                to_seqno,
                to_fragno,
            } => write!(out, " filtered_to={to_seqno}/{to_fragno}")?,
        }
    }
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use thl_testkit::scenarios;

    fn list(dir: &std::path::Path, options: &ListOptions) -> (usize, String) {
        let mut out = Vec::new();
        let count = run(LogConfig::new(dir), options, &mut out).unwrap();
        (count, String::from_utf8(out).unwrap())
    }

    #[test]
    fn lists_range_in_order() {
        let log = scenarios::multi_segment_log(20, 300);
        let options = ListOptions {
            low: Some(5),
            high: Some(9),
            ..ListOptions::default()
        };
        let (count, text) = list(log.dir(), &options);
        assert_eq!(count, 5);
        assert!(text.lines().next().unwrap().starts_with("seqno=5 "));
        assert!(text.lines().last().unwrap().starts_with("seqno=9 "));
    }

    #[test]
    fn json_headers_only() {
        let log = scenarios::populated_log(3);
        let options = ListOptions {
            headers_only: true,
            json: true,
            limit: Some(2),
            ..ListOptions::default()
        };
        let (count, text) = list(log.dir(), &options);
        assert_eq!(count, 2);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["seqno"], 0);
        assert_eq!(first["event_id"], "0");
    }

    #[test]
    fn low_beyond_log_fails() {
        let log = scenarios::populated_log(3);
        let options = ListOptions {
            low: Some(50),
            ..ListOptions::default()
        };
        assert!(run(LogConfig::new(log.dir()), &options, &mut Vec::new()).is_err());
    }
}
