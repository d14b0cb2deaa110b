//! Photo reassembly from downlinked chunks.
//!
//! Chunks arrive tagged with a photo id, a chunk index, and the total chunk
//! count. Out-of-order delivery is tolerated and duplicates overwrite the
//! earlier copy. An assembly that misses its deadline is discarded and
//! reported; a completed photo can never follow for that id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::frame::PhotoChunk;

struct PendingPhoto {
    total: u16,
    chunks: HashMap<u16, Vec<u8>>,
    started_at: Instant,
}

/// Buffers photo chunks per photo id until completion or deadline.
pub struct PhotoAssembler {
    pending: HashMap<u32, PendingPhoto>,
    deadline: Duration,
}

impl PhotoAssembler {
    pub fn new(deadline: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            deadline,
        }
    }

    /// Insert a chunk; returns the reassembled photo when it completes.
    ///
    /// The first chunk of a photo fixes the total count; chunks disagreeing
    /// with it, or indexed past it, are dropped.
    pub fn insert(&mut self, chunk: PhotoChunk) -> Option<Vec<u8>> {
        if chunk.total == 0 {
            tracing::warn!(photo_id = chunk.photo_id, "photo chunk with zero total, dropping");
            return None;
        }

        let entry = self
            .pending
            .entry(chunk.photo_id)
            .or_insert_with(|| PendingPhoto {
                total: chunk.total,
                chunks: HashMap::new(),
                started_at: Instant::now(),
            });

        if chunk.total != entry.total {
            tracing::warn!(
                photo_id = chunk.photo_id,
                expected = entry.total,
                got = chunk.total,
                "photo chunk total mismatch, dropping"
            );
            return None;
        }
        if chunk.index >= entry.total {
            tracing::warn!(
                photo_id = chunk.photo_id,
                index = chunk.index,
                total = entry.total,
                "photo chunk index out of range, dropping"
            );
            return None;
        }

        // Duplicates overwrite, not append.
        entry.chunks.insert(chunk.index, chunk.data);

        if entry.chunks.len() == entry.total as usize {
            let photo_id = chunk.photo_id;
            let mut entry = self
                .pending
                .remove(&photo_id)
                .expect("entry present by construction");
            let mut data = Vec::new();
            for index in 0..entry.total {
                data.extend_from_slice(
                    &entry
                        .chunks
                        .remove(&index)
                        .expect("all indices present when count matches total"),
                );
            }
            return Some(data);
        }
        None
    }

    /// Discard assemblies past the deadline.
    ///
    /// Returns `(photo_id, received, total)` for each discarded photo.
    pub fn expire(&mut self) -> Vec<(u32, usize, usize)> {
        let deadline = self.deadline;
        let mut expired = Vec::new();
        self.pending.retain(|photo_id, pending| {
            if pending.started_at.elapsed() >= deadline {
                expired.push((*photo_id, pending.chunks.len(), pending.total as usize));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Number of photos currently being assembled.
    pub fn in_progress(&self) -> usize {
        self.pending.len()
    }
}
