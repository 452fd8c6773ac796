//! Transfer reassembler: accumulates decrypted file chunks until a
//! transfer completes.
//!
//! Transfers are keyed by `transfer_id` in one map behind a single lock,
//! so the completion check and the removal happen atomically even when
//! chunks for the same transfer race on different handler tasks. Chunks
//! may arrive in any order; a duplicate index overwrites its predecessor
//! and cannot double-fire completion because completion is judged from
//! the set of distinct indices, not a counter.
//!
//! A decrypt failure for ANY chunk discards the whole transfer. A partial
//! file is never surfaced.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::{debug, warn};

use veil_crypto::EncryptedChunk;

struct Transfer {
    chunk_count: u32,
    received: BTreeMap<u32, Vec<u8>>,
    file_name: String,
    mime_type: String,
    sender: String,
}

/// The reconstructed file, handed to the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTransfer {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub sender: String,
}

#[derive(Debug)]
pub enum IngestOutcome {
    InProgress { received: u32, chunk_count: u32 },
    Completed(CompletedTransfer),
}

#[derive(Default)]
pub struct Reassembler {
    transfers: Mutex<HashMap<String, Transfer>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Transfer>> {
        // A poisoned map only means a panicked handler task; the chunk
        // data itself is still coherent, so keep going.
        self.transfers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transfer key: the caller-chosen id, or a composite fallback for
    /// senders that left it empty (wire compatibility with old clients).
    pub fn key(sender: &str, chunk: &EncryptedChunk) -> String {
        if chunk.transfer_id.is_empty() {
            format!("{}_{}_{}", sender, chunk.file_name, chunk.chunk_count)
        } else {
            chunk.transfer_id.clone()
        }
    }

    /// Store one decrypted chunk; reports `Completed` exactly once, when
    /// the last missing index arrives.
    pub fn ingest_chunk(
        &self,
        sender: &str,
        chunk: &EncryptedChunk,
        plaintext: Vec<u8>,
    ) -> IngestOutcome {
        let key = Self::key(sender, chunk);
        let mut transfers = self.lock();

        let transfer = transfers.entry(key.clone()).or_insert_with(|| Transfer {
            chunk_count: chunk.chunk_count.max(1),
            received: BTreeMap::new(),
            file_name: chunk.file_name.clone(),
            mime_type: chunk.mime_type.clone(),
            sender: sender.to_string(),
        });

        if chunk.chunk_index >= transfer.chunk_count {
            warn!(
                transfer = %key,
                index = chunk.chunk_index,
                count = transfer.chunk_count,
                "chunk index out of range, ignored"
            );
            return IngestOutcome::InProgress {
                received: transfer.received.len() as u32,
                chunk_count: transfer.chunk_count,
            };
        }

        transfer.received.insert(chunk.chunk_index, plaintext);
        let received = transfer.received.len() as u32;
        let chunk_count = transfer.chunk_count;

        if received < chunk_count {
            return IngestOutcome::InProgress {
                received,
                chunk_count,
            };
        }

        // Atomic with the insert above: still holding the map lock.
        match transfers.remove(&key) {
            Some(done) => {
                let bytes: Vec<u8> = done.received.into_values().flatten().collect();
                debug!(transfer = %key, size = bytes.len(), "transfer completed");
                IngestOutcome::Completed(CompletedTransfer {
                    bytes,
                    file_name: done.file_name,
                    mime_type: done.mime_type,
                    sender: done.sender,
                })
            }
            None => IngestOutcome::InProgress {
                received,
                chunk_count,
            },
        }
    }

    /// Discard a transfer after a chunk failed to decrypt. Returns whether
    /// any partial state existed for it.
    pub fn fail(&self, sender: &str, chunk: &EncryptedChunk) -> bool {
        let key = Self::key(sender, chunk);
        let existed = self.lock().remove(&key).is_some();
        if existed {
            warn!(transfer = %key, "transfer aborted, partial chunks discarded");
        }
        existed
    }

    /// In-flight transfer count (diagnostics).
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::EncryptedEnvelope;

    fn chunk(transfer_id: &str, index: u32, count: u32) -> EncryptedChunk {
        EncryptedChunk {
            envelope: EncryptedEnvelope {
                ciphertext: "Y3Q=".into(),
                iv: "aXY=".into(),
                wrapped_key: "a2V5".into(),
            },
            transfer_id: transfer_id.into(),
            chunk_index: index,
            chunk_count: count,
            file_name: "f.bin".into(),
            mime_type: "application/octet-stream".into(),
        }
    }

    fn payload(index: u32) -> Vec<u8> {
        vec![index as u8; 4]
    }

    #[test]
    fn any_arrival_order_yields_identical_result() {
        let orders: [[u32; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut results = Vec::new();
        for order in orders {
            let r = Reassembler::new();
            let mut completed = None;
            for &i in &order {
                if let IngestOutcome::Completed(c) = r.ingest_chunk("s", &chunk("t", i, 3), payload(i))
                {
                    completed = Some(c);
                }
            }
            results.push(completed.expect("transfer must complete"));
        }
        for r in &results[1..] {
            assert_eq!(r, &results[0]);
        }
        assert_eq!(results[0].bytes, [0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn duplicate_chunk_neither_completes_early_nor_corrupts() {
        let r = Reassembler::new();
        assert!(matches!(
            r.ingest_chunk("s", &chunk("t", 0, 2), payload(0)),
            IngestOutcome::InProgress { received: 1, .. }
        ));
        // Re-delivery of index 0 overwrites, still one distinct index.
        assert!(matches!(
            r.ingest_chunk("s", &chunk("t", 0, 2), payload(0)),
            IngestOutcome::InProgress { received: 1, .. }
        ));
        match r.ingest_chunk("s", &chunk("t", 1, 2), payload(1)) {
            IngestOutcome::Completed(c) => {
                assert_eq!(c.bytes, [0, 0, 0, 0, 1, 1, 1, 1]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn concurrent_transfers_do_not_interfere() {
        let r = Reassembler::new();
        r.ingest_chunk("s", &chunk("a", 0, 2), payload(0));
        r.ingest_chunk("s", &chunk("b", 0, 2), payload(9));
        assert_eq!(r.in_flight(), 2);

        match r.ingest_chunk("s", &chunk("b", 1, 2), payload(1)) {
            IngestOutcome::Completed(c) => assert_eq!(c.bytes, [9, 9, 9, 9, 1, 1, 1, 1]),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(r.in_flight(), 1);
    }

    #[test]
    fn failure_discards_whole_transfer() {
        let r = Reassembler::new();
        r.ingest_chunk("s", &chunk("t", 0, 3), payload(0));
        r.ingest_chunk("s", &chunk("t", 1, 3), payload(1));
        assert!(r.fail("s", &chunk("t", 2, 3)));
        assert_eq!(r.in_flight(), 0);

        // The id is dead; a late chunk starts a fresh transfer.
        assert!(matches!(
            r.ingest_chunk("s", &chunk("t", 2, 3), payload(2)),
            IngestOutcome::InProgress { received: 1, chunk_count: 3 }
        ));
    }

    #[test]
    fn empty_transfer_id_falls_back_to_composite_key() {
        let r = Reassembler::new();
        match r.ingest_chunk("sender-1", &chunk("", 0, 1), payload(0)) {
            IngestOutcome::Completed(c) => assert_eq!(c.sender, "sender-1"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_index_cannot_fake_completion() {
        let r = Reassembler::new();
        r.ingest_chunk("s", &chunk("t", 0, 2), payload(0));
        // Bogus index 5 of 2 is ignored rather than counted.
        assert!(matches!(
            r.ingest_chunk("s", &chunk("t", 5, 2), payload(5)),
            IngestOutcome::InProgress { received: 1, .. }
        ));
    }
}
