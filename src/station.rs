use chrono::{DateTime, Utc};
use serde::Serialize;

/// Marker carried by every Basic Station station-to-engine log line.
const S2E_MARKER: &str = "[S2E:";
const RX_MARKER: &str = " RX ";
const TX_MARKER: &str = " TX ";

/// Liveness looks at this many trailing lines regardless of the window size.
pub const RECENT_WINDOW: usize = 50;

/// Traffic counters derived from one snapshot of packet forwarder output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LocalStats {
    pub rx_count: u64,
    pub tx_count: u64,
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
}

pub fn is_uplink(line: &str) -> bool {
    line.contains(S2E_MARKER) && line.contains(RX_MARKER)
}

pub fn is_downlink(line: &str) -> bool {
    line.contains(S2E_MARKER) && line.contains(TX_MARKER)
}

pub fn extract<S: AsRef<str>>(lines: &[S]) -> LocalStats {
    extract_at(lines, Utc::now())
}

/// Counts RX/TX lines over the whole window and derives `connected` from
/// uplink activity in the last [`RECENT_WINDOW`] lines only.
pub fn extract_at<S: AsRef<str>>(lines: &[S], timestamp: DateTime<Utc>) -> LocalStats {
    let mut rx_count = 0;
    let mut tx_count = 0;

    for line in lines.iter().map(AsRef::as_ref) {
        if line.trim().is_empty() {
            continue;
        }
        if is_uplink(line) {
            rx_count += 1;
            tracing::debug!(line = %truncate(line), "rx line");
        }
        if is_downlink(line) {
            tx_count += 1;
            tracing::debug!(line = %truncate(line), "tx line");
        }
    }

    let recent = &lines[lines.len().saturating_sub(RECENT_WINDOW)..];
    let connected = recent.iter().any(|line| is_uplink(line.as_ref()));

    LocalStats {
        rx_count,
        tx_count,
        connected,
        timestamp,
    }
}

fn truncate(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
