//! Chain verification
//!
//! Read-only walk over a project's entry sequence. Two checks per entry:
//! linkage (`previous_hash` equals the predecessor's `hash`) and digest
//! recomputation from the stored payload. The local writer is trusted at
//! append time; verification exists to detect after-the-fact corruption or
//! tampering during audits.

use crate::types::Entry;

/// Index of the first entry failing linkage or recomputation, if any.
///
/// An empty history is trivially valid.
pub fn first_invalid(entries: &[Entry]) -> Option<usize> {
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && entry.previous_hash.as_deref() != Some(entries[i - 1].hash.as_str()) {
            return Some(i);
        }
        if entry.hash != entry.recompute_hash() {
            return Some(i);
        }
    }
    None
}

/// Per-entry validity flags for a chain view.
///
/// An entry is valid when its linkage to the predecessor holds (vacuously for
/// the first entry) and its digest recomputes to the stored hash.
pub fn validity_flags(entries: &[Entry]) -> Vec<bool> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let linked =
                i == 0 || entry.previous_hash.as_deref() == Some(entries[i - 1].hash.as_str());
            linked && entry.hash == entry.recompute_hash()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain;
    use crate::types::{EntryStatus, Payload, PayloadValue, ProjectId};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn build_chain(len: usize) -> Vec<Entry> {
        let project_id = ProjectId::new("proj_1");
        let mut entries = Vec::new();
        let mut prev: Option<String> = None;

        for seq in 0..len {
            let mut payload = Payload::new();
            payload.insert("step".into(), PayloadValue::Int(seq as i64));
            payload.insert("weight".into(), PayloadValue::Number(dec!(250)));

            let hash = chain::digest(&payload, prev.as_deref());
            entries.push(Entry {
                project_id: project_id.clone(),
                sequence_no: seq as u64,
                timestamp: Utc::now(),
                status: EntryStatus::Collected,
                verified_by: "system".to_string(),
                batch_reference: None,
                payload,
                previous_hash: prev.clone(),
                hash: hash.clone(),
            });
            prev = Some(hash);
        }
        entries
    }

    #[test]
    fn test_empty_history_valid() {
        assert_eq!(first_invalid(&[]), None);
        assert!(validity_flags(&[]).is_empty());
    }

    #[test]
    fn test_intact_chain_valid() {
        let entries = build_chain(6);
        assert_eq!(first_invalid(&entries), None);
        assert!(validity_flags(&entries).iter().all(|v| *v));
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut entries = build_chain(5);
        entries[2]
            .payload
            .insert("weight".into(), PayloadValue::Number(dec!(999999)));

        assert_eq!(first_invalid(&entries), Some(2));

        let flags = validity_flags(&entries);
        assert!(flags[0] && flags[1]);
        assert!(!flags[2]);
    }

    #[test]
    fn test_broken_linkage_detected() {
        let mut entries = build_chain(4);
        entries[3].previous_hash = Some("0".repeat(64));

        assert_eq!(first_invalid(&entries), Some(3));
    }

    #[test]
    fn test_rewritten_hash_detected() {
        let mut entries = build_chain(3);
        entries[1].hash = "f".repeat(64);

        // Recomputation fails at 1 before linkage fails at 2
        assert_eq!(first_invalid(&entries), Some(1));
    }
}
