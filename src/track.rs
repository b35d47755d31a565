//! Track configuration, encoded-chunk types, and per-track sample state.
//!
//! The muxer owns at most one video and one audio track. Each track
//! accumulates the table-relevant scalars of every pushed sample (size,
//! timestamp, duration, sync flag, composition offset) plus the chunk
//! descriptors produced by the interleaver; payload bytes themselves are
//! handed straight to the output and never retained here.
//!
//! Timestamps and durations arrive in microseconds and are resolved to
//! timescale ticks at finalize, once every duration is known.

use crate::atoms::{micros_to_ticks, signed_micros_to_ticks, VIDEO_TIMESCALE};
use crate::error::{MuxError, MuxResult};

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VideoCodec {
    /// H.264/AVC — `avc1` sample entry with an `avcC` configuration record.
    Avc,
    /// H.265/HEVC — `hev1` sample entry with an `hvcC` configuration record.
    Hevc,
}

/// Audio codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AudioCodec {
    /// AAC — `mp4a` sample entry with an `esds` descriptor chain.
    Aac,
}

/// Keyframe/delta tag of an encoded chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkKind {
    /// Decodable without reference to prior samples (sync sample).
    Key,
    /// Depends on previously decoded samples.
    Delta,
}

/// How first and subsequent timestamps are treated per track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TimestampMode {
    /// The first sample on each track must have timestamp 0.
    #[default]
    Strict,
    /// Every timestamp is rebased to the track's first-seen timestamp, so
    /// playback starts at zero.
    Offset,
    /// Timestamps pass through unmodified.
    Permissive,
}

/// Video track configuration, immutable after construction.
#[derive(Clone, Debug)]
pub struct VideoTrackConfig {
    pub codec: VideoCodec,
    /// Display width in pixels.
    pub width: u32,
    /// Display height in pixels.
    pub height: u32,
    /// Decoder configuration record payload (`avcC`/`hvcC` contents). May be
    /// supplied later through the first chunk's metadata instead.
    pub decoder_config: Option<Vec<u8>>,
}

/// Audio track configuration, immutable after construction.
#[derive(Clone, Debug)]
pub struct AudioTrackConfig {
    pub codec: AudioCodec,
    /// Sample rate in Hz. Also used as the track timescale.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u16,
    /// AudioSpecificConfig bytes. Synthesized from the rate/channel fields
    /// when neither this nor chunk metadata supplies one.
    pub decoder_config: Option<Vec<u8>>,
}

/// One encoded access unit with its timing metadata.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    /// Raw encoded payload bytes (opaque to the muxer).
    pub data: Vec<u8>,
    pub kind: ChunkKind,
    /// Presentation timestamp in microseconds.
    pub timestamp: u64,
    /// Duration in microseconds; 0 means "derive from the next chunk's
    /// timestamp".
    pub duration: u64,
    /// Presentation-vs-decode offset in microseconds; non-zero only when
    /// decode order differs from presentation order (B-frames).
    pub composition_offset: i64,
}

impl EncodedChunk {
    pub fn new(data: Vec<u8>, kind: ChunkKind, timestamp: u64, duration: u64) -> Self {
        Self {
            data,
            kind,
            timestamp,
            duration,
            composition_offset: 0,
        }
    }

    pub fn with_composition_offset(mut self, composition_offset: i64) -> Self {
        self.composition_offset = composition_offset;
        self
    }
}

/// Encoder-supplied side data accompanying a chunk. The decoder
/// configuration blob only needs to be present once, typically on the
/// first chunk.
#[derive(Clone, Debug, Default)]
pub struct ChunkMetadata {
    pub decoder_config: Option<Vec<u8>>,
}

/// Tagged track kind carrying the codec-specific configuration.
#[derive(Clone, Debug)]
pub(crate) enum TrackKind {
    Video {
        codec: VideoCodec,
        width: u32,
        height: u32,
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
    },
}

/// Table-relevant scalars of one pushed sample, in microseconds.
#[derive(Clone, Debug)]
pub(crate) struct PendingSample {
    pub size: u32,
    /// Normalized presentation timestamp.
    pub timestamp: u64,
    /// 0 = unknown, resolved from the next sample or at finalize.
    pub duration: u64,
    pub composition_offset: i64,
    pub is_sync: bool,
}

/// One physically contiguous run of same-track samples in the output.
#[derive(Clone, Debug)]
pub(crate) struct ChunkEntry {
    /// Absolute byte offset of the chunk's first sample in the file.
    pub offset: u64,
    pub sample_count: u32,
}

/// A sample's table entry with timing resolved to timescale ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SampleEntry {
    pub size: u32,
    pub duration: u32,
    pub composition_offset: i32,
    pub is_sync: bool,
}

/// Runtime state of one track, owned exclusively by the muxer.
pub(crate) struct TrackState {
    pub track_id: u32,
    pub timescale: u32,
    pub kind: TrackKind,
    pub decoder_config: Option<Vec<u8>>,
    pub samples: Vec<PendingSample>,
    pub chunks: Vec<ChunkEntry>,
    /// Baseline subtracted in `Offset` mode.
    first_timestamp: Option<u64>,
    /// Last normalized timestamp, for monotonicity checks.
    last_timestamp: Option<u64>,
}

impl TrackState {
    pub fn new(track_id: u32, kind: TrackKind, decoder_config: Option<Vec<u8>>) -> Self {
        let timescale = match &kind {
            TrackKind::Video { .. } => VIDEO_TIMESCALE,
            TrackKind::Audio { sample_rate, .. } => *sample_rate,
        };
        Self {
            track_id,
            timescale,
            kind,
            decoder_config,
            samples: Vec::new(),
            chunks: Vec::new(),
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Apply the configured timestamp mode and monotonicity check. Pure:
    /// errors leave the track untouched; the caller commits the returned
    /// normalized timestamp via [`TrackState::record_sample`].
    pub fn normalize_timestamp(&self, timestamp: u64, mode: TimestampMode) -> MuxResult<u64> {
        let normalized = match self.first_timestamp {
            None => match mode {
                TimestampMode::Strict if timestamp != 0 => {
                    return Err(MuxError::Timestamp(format!(
                        "First timestamp on track {} must be 0 in strict mode, got {} µs \
                         (use offset or permissive mode for rebased input)",
                        self.track_id, timestamp
                    )));
                }
                TimestampMode::Offset => 0,
                _ => timestamp,
            },
            Some(first) => match mode {
                TimestampMode::Offset => timestamp.checked_sub(first).ok_or_else(|| {
                    MuxError::Timestamp(format!(
                        "Timestamp {} µs on track {} precedes the track baseline {} µs",
                        timestamp, self.track_id, first
                    ))
                })?,
                _ => timestamp,
            },
        };

        if let Some(last) = self.last_timestamp {
            if normalized < last {
                return Err(MuxError::Timestamp(format!(
                    "Timestamp {} µs on track {} is earlier than the previous sample ({} µs)",
                    normalized, self.track_id, last
                )));
            }
        }
        Ok(normalized)
    }

    /// Append a sample's table entry. `timestamp` must come from
    /// [`TrackState::normalize_timestamp`]; `raw_timestamp` is the
    /// caller-supplied value retained as the offset-mode baseline.
    pub fn record_sample(
        &mut self,
        size: u32,
        raw_timestamp: u64,
        timestamp: u64,
        duration: u64,
        composition_offset: i64,
        is_sync: bool,
    ) {
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(raw_timestamp);
        }
        // A previous sample pushed without a duration resolves to the delta
        // between its timestamp and this one.
        if let Some(prev) = self.samples.last_mut() {
            if prev.duration == 0 {
                prev.duration = timestamp - prev.timestamp;
            }
        }
        self.samples.push(PendingSample {
            size,
            timestamp,
            duration,
            composition_offset,
            is_sync,
        });
        self.last_timestamp = Some(timestamp);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Resolve the accumulated microsecond entries into timescale ticks.
    ///
    /// Tick durations are computed end-tick minus start-tick so that the
    /// stts deltas stay aligned with the original timestamps instead of
    /// accumulating rounding drift. A trailing sample with unknown duration
    /// inherits the previous sample's duration.
    pub fn resolve_entries(&self) -> Vec<SampleEntry> {
        let mut entries = Vec::with_capacity(self.samples.len());
        let mut prev_duration = 0u32;
        for sample in &self.samples {
            let start = micros_to_ticks(sample.timestamp, self.timescale);
            let duration = if sample.duration > 0 {
                let end = micros_to_ticks(sample.timestamp + sample.duration, self.timescale);
                (end - start) as u32
            } else {
                prev_duration
            };
            prev_duration = duration;
            entries.push(SampleEntry {
                size: sample.size,
                duration,
                composition_offset: signed_micros_to_ticks(
                    sample.composition_offset,
                    self.timescale,
                ) as i32,
                is_sync: sample.is_sync,
            });
        }
        entries
    }

    /// Total track duration in timescale ticks (end of the last sample).
    pub fn duration_ticks(&self) -> u64 {
        match self.samples.last() {
            None => 0,
            Some(last) => {
                let entries = self.resolve_entries();
                let start = micros_to_ticks(last.timestamp, self.timescale);
                start + entries.last().map(|e| e.duration as u64).unwrap_or(0)
            }
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Video { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_track() -> TrackState {
        TrackState::new(
            1,
            TrackKind::Video {
                codec: VideoCodec::Avc,
                width: 640,
                height: 480,
            },
            None,
        )
    }

    fn audio_track() -> TrackState {
        TrackState::new(
            2,
            TrackKind::Audio {
                codec: AudioCodec::Aac,
                sample_rate: 48_000,
                channels: 2,
            },
            None,
        )
    }

    #[test]
    fn timescale_from_kind() {
        assert_eq!(video_track().timescale, 90_000);
        assert_eq!(audio_track().timescale, 48_000);
    }

    #[test]
    fn strict_rejects_nonzero_first_timestamp() {
        let track = video_track();
        let err = track
            .normalize_timestamp(1000, TimestampMode::Strict)
            .unwrap_err();
        assert!(matches!(err, MuxError::Timestamp(_)));
        // Zero is fine.
        assert_eq!(
            track.normalize_timestamp(0, TimestampMode::Strict).unwrap(),
            0
        );
    }

    #[test]
    fn offset_rebases_to_first_timestamp() {
        let mut track = video_track();
        let ts = track
            .normalize_timestamp(500_000, TimestampMode::Offset)
            .unwrap();
        assert_eq!(ts, 0);
        track.record_sample(100, 500_000, ts, 0, 0, true);

        let ts = track
            .normalize_timestamp(533_333, TimestampMode::Offset)
            .unwrap();
        assert_eq!(ts, 33_333);
    }

    #[test]
    fn offset_rejects_timestamp_before_baseline() {
        let mut track = video_track();
        let ts = track
            .normalize_timestamp(500_000, TimestampMode::Offset)
            .unwrap();
        track.record_sample(100, 500_000, ts, 0, 0, true);
        let err = track
            .normalize_timestamp(400_000, TimestampMode::Offset)
            .unwrap_err();
        assert!(matches!(err, MuxError::Timestamp(_)));
    }

    #[test]
    fn permissive_passes_through() {
        let track = video_track();
        assert_eq!(
            track
                .normalize_timestamp(123_456, TimestampMode::Permissive)
                .unwrap(),
            123_456
        );
    }

    #[test]
    fn monotonicity_enforced() {
        let mut track = video_track();
        track.record_sample(100, 0, 0, 0, 0, true);
        track.record_sample(100, 33_333, 33_333, 0, 0, false);
        let err = track
            .normalize_timestamp(20_000, TimestampMode::Permissive)
            .unwrap_err();
        assert!(matches!(err, MuxError::Timestamp(_)));
        // Equal timestamps are allowed (non-decreasing).
        assert!(track
            .normalize_timestamp(33_333, TimestampMode::Permissive)
            .is_ok());
    }

    #[test]
    fn failed_normalization_leaves_state_unchanged() {
        let track = video_track();
        assert!(track
            .normalize_timestamp(1000, TimestampMode::Strict)
            .is_err());
        assert_eq!(track.sample_count(), 0);
        // The track still accepts a valid first sample.
        assert!(track.normalize_timestamp(0, TimestampMode::Strict).is_ok());
    }

    #[test]
    fn missing_duration_backfilled_from_next_timestamp() {
        let mut track = video_track();
        track.record_sample(100, 0, 0, 0, 0, true);
        track.record_sample(100, 33_333, 33_333, 0, 0, false);
        track.record_sample(100, 66_666, 66_666, 0, 0, false);

        assert_eq!(track.samples[0].duration, 33_333);
        assert_eq!(track.samples[1].duration, 33_333);
        // Last sample still unknown until resolve.
        assert_eq!(track.samples[2].duration, 0);

        let entries = track.resolve_entries();
        // 33_333 µs → 3000 ticks at 90 kHz; trailing sample inherits.
        assert_eq!(entries[0].duration, 3000);
        assert_eq!(entries[1].duration, 3000);
        assert_eq!(entries[2].duration, 3000);
    }

    #[test]
    fn explicit_duration_preserved() {
        let mut track = audio_track();
        // 1024 samples at 48kHz = 21333 µs
        track.record_sample(512, 0, 0, 21_333, 0, true);
        track.record_sample(512, 21_333, 21_333, 21_333, 0, true);

        let entries = track.resolve_entries();
        assert_eq!(entries.len(), 2);
        // End-minus-start keeps the tick sum aligned: 1024 + 1024.
        assert_eq!(entries[0].duration, 1024);
        assert_eq!(entries[1].duration, 1024);
        assert_eq!(track.duration_ticks(), 2048);
    }

    #[test]
    fn duration_ticks_empty_track() {
        assert_eq!(video_track().duration_ticks(), 0);
    }

    #[test]
    fn single_sample_without_duration_resolves_to_zero() {
        let mut track = video_track();
        track.record_sample(100, 0, 0, 0, 0, true);
        let entries = track.resolve_entries();
        assert_eq!(entries[0].duration, 0);
    }

    #[test]
    fn composition_offset_converted_to_ticks() {
        let mut track = video_track();
        track.record_sample(100, 0, 0, 33_333, 66_666, true);
        let entries = track.resolve_entries();
        assert_eq!(entries[0].composition_offset, 6000);
    }

    #[test]
    fn tick_rounding_does_not_drift() {
        let mut track = video_track();
        // 30fps at 33333 µs per frame: exact tick deltas must sum to the
        // last end tick, not 10 * round(33333 µs).
        for i in 0..10u64 {
            let ts = i * 33_333;
            track.record_sample(100, ts, ts, 0, 0, i == 0);
        }
        let entries = track.resolve_entries();
        let sum: u64 = entries.iter().map(|e| e.duration as u64).sum();
        assert_eq!(sum, track.duration_ticks());
    }
}
