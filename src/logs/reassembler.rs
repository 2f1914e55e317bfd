// ABOUTME: Ordering state machine that restores sequence order over a lossy, unordered log transport
// Pure state; timers and I/O live in the stream driver

use super::message::LogMessage;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Grace period after the last arrival before buffered messages are force-printed.
pub const FLUSH_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per-stream reassembly state.
///
/// Invariant: `pending` never holds a sequence number `<= last_printed`.
#[derive(Debug, Default)]
pub struct ReassemblyState {
    last_printed: u64,
    pending: HashMap<u64, LogMessage>,
}

impl ReassemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number handed to the sink so far
    pub fn last_printed(&self) -> u64 {
        self.last_printed
    }

    /// Number of messages waiting for a gap to fill
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle an arriving message and return the lines that are now printable, in order.
    pub fn accept(&mut self, message: LogMessage) -> Vec<String> {
        let mut printed = Vec::new();
        let number = message.sequence_number;

        if Some(number) == self.next_expected() {
            printed.push(message.text);
            self.last_printed = number;
        } else if number > self.last_printed {
            self.pending.insert(number, message);
        } else {
            debug!(
                "Discarding stale log message {} (last printed {})",
                number, self.last_printed
            );
        }

        self.drain_ready(&mut printed);
        printed
    }

    /// Print everything still buffered in ascending order, skipping gaps.
    ///
    /// Skipped sequence numbers are lost: a late arrival for one of them is
    /// stale once a higher number has been printed.
    pub fn flush_all(&mut self) -> Vec<String> {
        let mut numbers: Vec<u64> = self.pending.keys().copied().collect();
        numbers.sort_unstable();

        let mut printed = Vec::with_capacity(numbers.len());
        for number in numbers {
            if let Some(message) = self.pending.remove(&number) {
                if let Some(expected) = self.next_expected().filter(|&n| number > n) {
                    debug!("Flush skipped log messages {}..{}", expected, number);
                }
                printed.push(message.text);
                self.last_printed = number;
            }
        }
        printed
    }

    /// `None` once `u64::MAX` has been printed; every later arrival is stale.
    fn next_expected(&self) -> Option<u64> {
        self.last_printed.checked_add(1)
    }

    fn drain_ready(&mut self, printed: &mut Vec<String>) {
        while let Some(expected) = self.next_expected() {
            let Some(next) = self.pending.remove(&expected) else {
                break;
            };
            printed.push(next.text);
            self.last_printed = expected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_in_order_messages_print_immediately() {
        let mut state = ReassemblyState::new();
        assert_eq!(state.accept(LogMessage::new(1, "a")), lines(&["a"]));
        assert_eq!(state.accept(LogMessage::new(2, "b")), lines(&["b"]));
        assert_eq!(state.last_printed(), 2);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn test_gap_fill_drains_buffer() {
        let mut state = ReassemblyState::new();
        assert_eq!(state.accept(LogMessage::new(1, "a")), lines(&["a"]));
        assert!(state.accept(LogMessage::new(3, "c")).is_empty());
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.accept(LogMessage::new(2, "b")), lines(&["b", "c"]));
        assert_eq!(state.last_printed(), 3);
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn test_flush_skips_missing_numbers() {
        let mut state = ReassemblyState::new();
        assert!(state.accept(LogMessage::new(2, "b")).is_empty());
        assert!(state.accept(LogMessage::new(4, "d")).is_empty());

        assert_eq!(state.flush_all(), lines(&["b", "d"]));
        assert_eq!(state.last_printed(), 4);
        assert_eq!(state.pending_len(), 0);

        // The skipped numbers are permanently stale
        assert!(state.accept(LogMessage::new(1, "a")).is_empty());
        assert!(state.accept(LogMessage::new(3, "c")).is_empty());
        assert_eq!(state.pending_len(), 0);
    }

    #[test]
    fn test_stale_and_duplicate_messages() {
        let mut state = ReassemblyState::new();
        state.accept(LogMessage::new(1, "a"));
        assert!(state.accept(LogMessage::new(1, "a-again")).is_empty());
        assert!(state.accept(LogMessage::new(0, "zero")).is_empty());

        // A duplicate of a buffered number replaces the earlier copy
        state.accept(LogMessage::new(3, "c"));
        state.accept(LogMessage::new(3, "c2"));
        assert_eq!(state.pending_len(), 1);
        assert_eq!(state.accept(LogMessage::new(2, "b")), lines(&["b", "c2"]));
    }

    #[test]
    fn test_flush_on_empty_buffer_is_noop() {
        let mut state = ReassemblyState::new();
        assert!(state.flush_all().is_empty());
        assert_eq!(state.last_printed(), 0);
    }

    #[test]
    fn test_flush_handles_sparse_large_numbers() {
        let mut state = ReassemblyState::new();
        state.accept(LogMessage::new(u64::MAX - 1, "far"));
        state.accept(LogMessage::new(10, "near"));
        assert_eq!(state.flush_all(), lines(&["near", "far"]));
        assert_eq!(state.last_printed(), u64::MAX - 1);
    }

    #[test]
    fn test_highest_sequence_number_saturates_stream() {
        let mut state = ReassemblyState::new();
        state.accept(LogMessage::new(u64::MAX, "last"));
        assert_eq!(state.flush_all(), lines(&["last"]));
        assert_eq!(state.last_printed(), u64::MAX);

        assert!(state.accept(LogMessage::new(5, "late")).is_empty());
        assert!(state.accept(LogMessage::new(0, "zero")).is_empty());
        assert!(state.accept(LogMessage::new(u64::MAX, "again")).is_empty());
        assert_eq!(state.pending_len(), 0);
        assert!(state.flush_all().is_empty());
    }

    #[test]
    fn test_drain_reaches_highest_sequence_number() {
        let mut state = ReassemblyState::new();
        state.accept(LogMessage::new(u64::MAX - 1, "second to last"));
        assert_eq!(state.flush_all(), lines(&["second to last"]));

        assert_eq!(state.accept(LogMessage::new(u64::MAX, "last")), lines(&["last"]));
        assert_eq!(state.last_printed(), u64::MAX);
        assert!(state.accept(LogMessage::new(1, "late")).is_empty());
    }
}
