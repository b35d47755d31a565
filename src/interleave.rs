//! Cross-track chunk interleaving.
//!
//! Samples are not written one-by-one: consecutive same-track samples are
//! grouped into chunks, the unit described by the stsc and stco/co64
//! tables. The interleaver keeps one pending chunk buffer per track and
//! releases chunks in ascending first-timestamp order, so the output stays
//! roughly time-ordered across tracks while memory held for unwritten
//! samples stays bounded.

/// Upper bound on the media time span of one chunk.
pub(crate) const MAX_CHUNK_DURATION_MICROS: u64 = 500_000;

/// Upper bound on pending payload bytes per chunk.
pub(crate) const MAX_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// A chunk released by the interleaver, ready to be written as one
/// contiguous block.
#[derive(Debug)]
pub(crate) struct ReadyChunk {
    /// Internal track index the chunk belongs to.
    pub track: usize,
    pub data: Vec<u8>,
    pub sample_count: u32,
    /// Normalized timestamp of the chunk's first sample, in microseconds.
    pub first_timestamp: u64,
}

struct PendingChunk {
    data: Vec<u8>,
    sample_count: u32,
    first_timestamp: u64,
}

/// One pending chunk buffer per track plus the flush policy.
pub(crate) struct Interleaver {
    pending: Vec<Option<PendingChunk>>,
}

impl Interleaver {
    pub fn new(track_count: usize) -> Self {
        Self {
            pending: (0..track_count).map(|_| None).collect(),
        }
    }

    /// Append one sample's payload to its track's pending chunk. Returns
    /// the chunks that became due, in ascending first-timestamp order; the
    /// caller must write them before the new sample is considered placed.
    pub fn push(&mut self, track: usize, payload: &[u8], timestamp: u64) -> Vec<ReadyChunk> {
        let mut ready = Vec::new();

        // Any track's pending chunk that has aged past the duration bound
        // is released now, so no chunk lags more than one bound behind the
        // newest sample.
        for idx in 0..self.pending.len() {
            let due = match &self.pending[idx] {
                Some(chunk) => {
                    timestamp.saturating_sub(chunk.first_timestamp) >= MAX_CHUNK_DURATION_MICROS
                        || (idx == track
                            && chunk.data.len() + payload.len() > MAX_CHUNK_BYTES)
                }
                None => false,
            };
            if due {
                if let Some(chunk) = self.pending[idx].take() {
                    ready.push(ReadyChunk {
                        track: idx,
                        data: chunk.data,
                        sample_count: chunk.sample_count,
                        first_timestamp: chunk.first_timestamp,
                    });
                }
            }
        }
        ready.sort_by_key(|c| c.first_timestamp);

        let pending = self.pending[track].get_or_insert_with(|| PendingChunk {
            data: Vec::new(),
            sample_count: 0,
            first_timestamp: timestamp,
        });
        pending.data.extend_from_slice(payload);
        pending.sample_count += 1;

        ready
    }

    /// Release every pending chunk, in ascending first-timestamp order.
    /// Called at finalize.
    pub fn drain(&mut self) -> Vec<ReadyChunk> {
        let mut ready: Vec<ReadyChunk> = self
            .pending
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.take().map(|chunk| ReadyChunk {
                    track: idx,
                    data: chunk.data,
                    sample_count: chunk.sample_count,
                    first_timestamp: chunk.first_timestamp,
                })
            })
            .collect();
        ready.sort_by_key(|c| c.first_timestamp);
        ready
    }

    /// Bytes currently held across all pending chunks.
    #[cfg(test)]
    fn buffered_bytes(&self) -> usize {
        self.pending
            .iter()
            .flatten()
            .map(|chunk| chunk.data.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_within_bound_share_a_chunk() {
        let mut il = Interleaver::new(1);
        assert!(il.push(0, &[1; 10], 0).is_empty());
        assert!(il.push(0, &[2; 10], 100_000).is_empty());
        assert!(il.push(0, &[3; 10], 200_000).is_empty());

        let chunks = il.drain();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sample_count, 3);
        assert_eq!(chunks[0].data.len(), 30);
        assert_eq!(chunks[0].first_timestamp, 0);
    }

    #[test]
    fn duration_bound_starts_a_new_chunk() {
        let mut il = Interleaver::new(1);
        assert!(il.push(0, &[1; 10], 0).is_empty());
        // 600ms later: the first chunk is due before this sample is placed.
        let ready = il.push(0, &[2; 10], 600_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].sample_count, 1);

        let rest = il.drain();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].first_timestamp, 600_000);
    }

    #[test]
    fn byte_bound_starts_a_new_chunk() {
        let mut il = Interleaver::new(1);
        let big = vec![0u8; MAX_CHUNK_BYTES - 10];
        assert!(il.push(0, &big, 0).is_empty());
        let ready = il.push(0, &[0u8; 100], 10_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].data.len(), big.len());
        assert!(il.buffered_bytes() <= MAX_CHUNK_BYTES);
    }

    #[test]
    fn cross_track_release_is_time_ordered() {
        let mut il = Interleaver::new(2);
        // Track 1 starts earlier than track 0.
        assert!(il.push(1, &[0xAA; 4], 0).is_empty());
        assert!(il.push(0, &[0xBB; 4], 100_000).is_empty());

        // A sample far in the future makes both pending chunks due; the
        // earlier (track 1) chunk must come out first.
        let ready = il.push(0, &[0xCC; 4], 2_000_000);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].track, 1);
        assert_eq!(ready[0].first_timestamp, 0);
        assert_eq!(ready[1].track, 0);
        assert_eq!(ready[1].first_timestamp, 100_000);
    }

    #[test]
    fn aging_chunk_released_by_other_tracks_sample() {
        let mut il = Interleaver::new(2);
        assert!(il.push(0, &[1; 8], 0).is_empty());
        // An audio sample 500ms in releases the video chunk even though no
        // further video arrived.
        let ready = il.push(1, &[2; 8], 500_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].track, 0);
    }

    #[test]
    fn drain_empties_everything() {
        let mut il = Interleaver::new(2);
        il.push(0, &[1; 8], 0);
        il.push(1, &[2; 8], 0);
        let chunks = il.drain();
        assert_eq!(chunks.len(), 2);
        assert!(il.drain().is_empty());
        assert_eq!(il.buffered_bytes(), 0);
    }
}
