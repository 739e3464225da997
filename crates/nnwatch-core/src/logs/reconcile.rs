// Log buffer reconciliation.
//
// Backend logs are an append-only file tail. A poll rereads the tail (which
// may have slid forward), a push may deliver only the new lines. Both must
// advance the local buffer without duplicating or dropping lines, and the
// work per tick is bounded by the search window, not the full history.

use super::MAX_LOG_LINES;
use crate::records::LogEntry;

/// Longest tail run of the previous buffer searched for in a snapshot.
pub const OVERLAP_MAX_KEYS: usize = 12;

/// Shortest tail run accepted as proof of overlap.
pub const OVERLAP_MIN_KEYS: usize = 3;

/// Only the newest part of a snapshot is searched for the overlap, and only
/// the newest part of the buffer is matched against a redelivered delta.
pub const SEARCH_WINDOW: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    Noop,
    Append,
    Replace,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub mode: ReconcileMode,
    pub next: Vec<LogEntry>,
    pub appended: Vec<LogEntry>,
    /// Set when no overlap was found and the snapshot replaced a non-empty
    /// history. Callers surface this as a log history reset.
    pub history_reset: bool,
}

impl Reconciled {
    fn noop(previous: &[LogEntry]) -> Self {
        Reconciled {
            mode: ReconcileMode::Noop,
            next: previous.to_vec(),
            appended: Vec::new(),
            history_reset: false,
        }
    }

    fn replace(snapshot: &[LogEntry], history_reset: bool) -> Self {
        Reconciled {
            mode: ReconcileMode::Replace,
            next: cap_tail(snapshot).to_vec(),
            appended: Vec::new(),
            history_reset,
        }
    }

    fn append(previous: &[LogEntry], appended: &[LogEntry]) -> Self {
        let mut next = Vec::with_capacity(previous.len() + appended.len());
        next.extend_from_slice(previous);
        next.extend_from_slice(appended);
        let overflow = next.len().saturating_sub(MAX_LOG_LINES);
        next.drain(..overflow);
        Reconciled {
            mode: ReconcileMode::Append,
            next,
            appended: appended.to_vec(),
            history_reset: false,
        }
    }
}

fn cap_tail(entries: &[LogEntry]) -> &[LogEntry] {
    &entries[entries.len().saturating_sub(MAX_LOG_LINES)..]
}

/// Compute the minimal edit that advances `previous` to match `snapshot`.
pub fn reconcile(previous: &[LogEntry], snapshot: &[LogEntry]) -> Reconciled {
    if snapshot.is_empty() {
        if previous.is_empty() {
            return Reconciled::noop(previous);
        }
        return Reconciled::replace(snapshot, false);
    }
    if previous.is_empty() {
        return Reconciled::replace(snapshot, false);
    }

    // Common case: the snapshot is the previous window plus new lines.
    if snapshot.len() >= previous.len()
        && previous
            .iter()
            .zip(snapshot)
            .all(|(a, b)| a.key == b.key)
    {
        let surplus = &snapshot[previous.len()..];
        if surplus.is_empty() {
            return Reconciled::noop(previous);
        }
        return Reconciled::append(previous, surplus);
    }

    if let Some(resume_at) = find_overlap(previous, snapshot) {
        let surplus = &snapshot[resume_at..];
        if surplus.is_empty() {
            return Reconciled::noop(previous);
        }
        return Reconciled::append(previous, surplus);
    }

    Reconciled::replace(snapshot, true)
}

/// Search the newest `SEARCH_WINDOW` entries of `snapshot` for the last `k`
/// keys of `previous`, shrinking `k` from 12 to 3. Returns the snapshot
/// index right after the first match.
fn find_overlap(previous: &[LogEntry], snapshot: &[LogEntry]) -> Option<usize> {
    let window_start = snapshot.len().saturating_sub(SEARCH_WINDOW);
    let window = &snapshot[window_start..];
    let k_max = OVERLAP_MAX_KEYS.min(previous.len()).min(snapshot.len());

    for k in (OVERLAP_MIN_KEYS..=k_max).rev() {
        let needle = &previous[previous.len() - k..];
        if k > window.len() {
            continue;
        }
        for start in 0..=(window.len() - k) {
            let matches = window[start..start + k]
                .iter()
                .zip(needle)
                .all(|(a, b)| a.key == b.key);
            if matches {
                return Some(window_start + start + k);
            }
        }
    }
    None
}

/// Append a pushed delta. A redelivered delta starts with lines the buffer
/// already ends with; the longest such run (searched within the newest
/// `SEARCH_WINDOW` entries) is skipped and everything after it is appended
/// as is, repeats included. Redelivering the same delta is a no-op.
pub fn append_delta(previous: &[LogEntry], delta: &[LogEntry]) -> Reconciled {
    let recent = &previous[previous.len().saturating_sub(SEARCH_WINDOW)..];
    let overlap = (1..=recent.len().min(delta.len()))
        .rev()
        .find(|&k| {
            recent[recent.len() - k..]
                .iter()
                .zip(&delta[..k])
                .all(|(a, b)| a.key == b.key)
        })
        .unwrap_or(0);

    let fresh = &delta[overlap..];
    if fresh.is_empty() {
        return Reconciled::noop(previous);
    }
    Reconciled::append(previous, fresh)
}
