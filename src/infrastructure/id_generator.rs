// Document ID Generator - Snowflake-like IDs rendered as fixed-width hex
// Used by the document stores to assign `_id` on insert

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// 64-bit ID format: [timestamp:42][node_id:10][sequence:12]
/// Rendered as 16 lowercase hex digits so lexical order follows creation order.
#[derive(Debug)]
pub struct DocumentIdGenerator {
    node_id: u16,
    /// (last_timestamp, sequence) guarded together so two threads never
    /// observe the same pair.
    state: Mutex<(u64, u64)>,
    issued: AtomicU64,
}

impl DocumentIdGenerator {
    /// Create new ID generator for the given node; ids wrap node_id into 10 bits.
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & 0x3FF,
            state: Mutex::new((0, 0)),
            issued: AtomicU64::new(0),
        }
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Generate the next raw id.
    pub fn next_raw(&self) -> u64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last_ts, sequence) = *state;

        let mut now = Self::now_millis().max(last_ts);
        let next_sequence = if now == last_ts {
            sequence + 1
        } else {
            0
        };

        let next_sequence = if next_sequence > 0xFFF {
            // Sequence overflow - borrow the next millisecond
            now += 1;
            0
        } else {
            next_sequence
        };

        *state = (now, next_sequence);
        self.issued.fetch_add(1, Ordering::Relaxed);

        ((now & 0x3FF_FFFF_FFFF) << 22) | ((self.node_id as u64) << 12) | (next_sequence & 0xFFF)
    }

    /// Generate the next id as a document key.
    pub fn next_id(&self) -> String {
        format!("{:016x}", self.next_raw())
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}

impl Default for DocumentIdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_generation() {
        let generator = DocumentIdGenerator::new(123);

        let id1 = generator.next_raw();
        let id2 = generator.next_raw();
        let id3 = generator.next_raw();

        assert!(id1 < id2 && id2 < id3);
        assert_eq!((id1 >> 12) & 0x3FF, 123);
        assert_eq!((id3 >> 12) & 0x3FF, 123);
        assert_eq!(generator.issued(), 3);
    }

    #[test]
    fn test_hex_ids_sort_by_creation() {
        let generator = DocumentIdGenerator::default();
        let ids: Vec<String> = (0..5000).map(|_| generator.next_id()).collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| id.len() == 16));
    }
}
