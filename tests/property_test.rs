use proptest::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use xpod::core::registry::token::{matches_token, token_hash};
use xpod::core::storage::{CacheTracker, format_bytes};
use xpod::core::supervisor::{LogEntry, LogLevel, LogRing};

proptest! {
    #[test]
    fn any_secret_matches_only_its_own_hash(
        secret in "[A-Za-z0-9_-]{8,64}",
        other in "[A-Za-z0-9_-]{8,64}",
    ) {
        let hash = token_hash(&secret);
        prop_assert!(matches_token(&hash, &secret));
        if other != secret {
            prop_assert!(!matches_token(&hash, &other));
        }
    }

    #[test]
    fn log_ring_is_bounded_and_keeps_the_tail(messages in prop::collection::vec("[a-z]{1,16}", 0..50)) {
        let ring = LogRing::new(16);
        for message in &messages {
            ring.push(LogEntry::new(LogLevel::Info, "svc", message));
        }
        let snapshot = ring.snapshot();
        prop_assert!(snapshot.len() <= 16);
        let expected_tail: Vec<&String> = messages.iter().rev().take(16).rev().collect();
        let actual: Vec<&String> = snapshot.iter().map(|entry| &entry.message).collect();
        prop_assert_eq!(actual, expected_tail);
    }

    #[test]
    fn tracker_accounting_matches_live_entries(
        ops in prop::collection::vec((0u8..3, 0usize..8, 1u64..10_000), 1..60)
    ) {
        let tracker = CacheTracker::new(u64::MAX);
        let mut model: HashMap<PathBuf, u64> = HashMap::new();
        for (op, slot, size) in ops {
            let path = PathBuf::from(format!("/cache/file-{slot}"));
            match op {
                0 | 1 => {
                    tracker.add(path.clone(), size);
                    model.insert(path, size);
                }
                _ => {
                    tracker.remove(&path);
                    model.remove(&path);
                }
            }
            prop_assert_eq!(tracker.current_bytes(), model.values().sum::<u64>());
            prop_assert_eq!(tracker.entry_count(), model.len());
        }
    }

    #[test]
    fn byte_formatting_always_carries_a_unit(bytes in any::<u64>()) {
        let formatted = format_bytes(bytes);
        prop_assert!(
            formatted.ends_with(" B")
                || formatted.ends_with(" KiB")
                || formatted.ends_with(" MiB")
                || formatted.ends_with(" GiB")
        );
    }
}
