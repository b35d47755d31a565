//! High-level MP4 muxer API.
//!
//! Usage:
//! ```ignore
//! let mut muxer = Mp4Muxer::new(BufferTarget::new(), MuxerConfig {
//!     video: Some(video_config),
//!     audio: Some(audio_config),
//!     timestamp_mode: TimestampMode::Offset,
//! })?;
//!
//! // Push encoded chunks progressively
//! muxer.add_video_chunk(&chunk, Some(&metadata), None)?;
//! muxer.add_audio_chunk(&chunk, None, None)?;
//!
//! // Finalize: writes moov box and hands back the buffer
//! let bytes = muxer.finalize()?.unwrap();
//! ```
//!
//! The muxer writes ftyp up front, streams interleaved chunk payloads into
//! a single mdat, and builds the complete moov at finalize. On targets that
//! support patching ([`crate::target::BufferTarget`],
//! [`crate::target::WritableTarget`]) the mdat size is reserved and patched
//! in place; on append-only targets ([`crate::target::StreamTarget`])
//! flushed chunks are held back and the fully sized mdat is emitted at
//! finalize. Both paths produce byte-identical files.

use std::io::Cursor;

use crate::atoms::{large_box_header, LARGE_BOX_HEADER_LEN};
use crate::error::{MuxError, MuxResult};
use crate::interleave::{Interleaver, ReadyChunk};
use crate::mp4::{self, synthesize_aac_config, TrackSummary};
use crate::target::{Reservation, Target, Writer};
use crate::track::{
    AudioTrackConfig, ChunkEntry, ChunkKind, ChunkMetadata, EncodedChunk, TimestampMode,
    TrackKind, TrackState, VideoTrackConfig,
};

/// Muxer configuration: which tracks the file carries and how timestamps
/// are validated. Tracks are fixed at construction.
#[derive(Clone, Debug, Default)]
pub struct MuxerConfig {
    /// Video track, at most one.
    pub video: Option<VideoTrackConfig>,
    /// Audio track, at most one.
    pub audio: Option<AudioTrackConfig>,
    /// Timestamp handling policy applied per track.
    pub timestamp_mode: TimestampMode,
}

/// How mdat payload reaches the target.
enum MdatState {
    /// Target supports patching: the 16-byte mdat header was reserved right
    /// after ftyp and chunk payloads stream straight through.
    Progressive {
        reservation: Reservation,
        /// Absolute position of the mdat header.
        header_start: u64,
    },
    /// Append-only target: flushed chunks are retained and the mdat is
    /// emitted in one pass at finalize, once its size is known.
    Deferred { chunks: Vec<ReadyChunk>, bytes: u64 },
}

/// Progressive MP4 muxer over a pluggable output [`Target`].
///
/// Writes chunk payloads into an mdat box as they arrive, then writes the
/// moov box at the end during `finalize()`.
pub struct Mp4Muxer<T: Target> {
    writer: Writer<T>,
    /// All tracks, in track-ID order (video first when both are present).
    tracks: Vec<TrackState>,
    /// Index into `tracks` for the video track.
    video: Option<usize>,
    /// Index into `tracks` for the audio track.
    audio: Option<usize>,
    timestamp_mode: TimestampMode,
    interleaver: Interleaver,
    mdat: MdatState,
    finalized: bool,
}

impl<T: Target> Mp4Muxer<T> {
    /// Create a muxer writing into `target`. The ftyp box is written
    /// immediately; on patchable targets the mdat header is reserved too.
    pub fn new(target: T, config: MuxerConfig) -> MuxResult<Self> {
        if config.video.is_none() && config.audio.is_none() {
            return Err(MuxError::Configuration(
                "At least one track must be configured".into(),
            ));
        }

        let mut writer = Writer::new(target);

        let mut ftyp = Vec::new();
        mp4::write_ftyp(&mut ftyp)?;
        writer.write(&ftyp)?;

        let mut tracks = Vec::new();
        let mut video = None;
        let mut audio = None;
        let mut next_track_id = 1u32;

        if let Some(cfg) = config.video {
            // The VisualSampleEntry width/height fields are 16-bit.
            if cfg.width > u16::MAX as u32 || cfg.height > u16::MAX as u32 {
                return Err(MuxError::Configuration(format!(
                    "Video dimensions {}x{} exceed the 16-bit sample entry range",
                    cfg.width, cfg.height
                )));
            }
            let kind = TrackKind::Video {
                codec: cfg.codec,
                width: cfg.width,
                height: cfg.height,
            };
            video = Some(tracks.len());
            tracks.push(TrackState::new(next_track_id, kind, cfg.decoder_config));
            tracing::info!(
                track_id = next_track_id,
                codec = ?cfg.codec,
                width = cfg.width,
                height = cfg.height,
                "Configured video track"
            );
            next_track_id += 1;
        }
        if let Some(cfg) = config.audio {
            if cfg.sample_rate == 0 {
                return Err(MuxError::Configuration(
                    "Audio sample rate must be non-zero".into(),
                ));
            }
            let kind = TrackKind::Audio {
                codec: cfg.codec,
                sample_rate: cfg.sample_rate,
                channels: cfg.channels,
            };
            audio = Some(tracks.len());
            tracks.push(TrackState::new(next_track_id, kind, cfg.decoder_config));
            tracing::info!(
                track_id = next_track_id,
                codec = ?cfg.codec,
                sample_rate = cfg.sample_rate,
                channels = cfg.channels,
                "Configured audio track"
            );
        }

        // The mdat always uses a 64-bit header so that patchable and
        // append-only targets lay the file out identically, and so the size
        // field never overflows past 4 GiB of payload.
        let mdat = if writer.supports_patching() {
            let header_start = writer.position();
            let reservation = writer.reserve(LARGE_BOX_HEADER_LEN)?;
            MdatState::Progressive {
                reservation,
                header_start,
            }
        } else {
            MdatState::Deferred {
                chunks: Vec::new(),
                bytes: 0,
            }
        };

        let interleaver = Interleaver::new(tracks.len());

        Ok(Self {
            writer,
            tracks,
            video,
            audio,
            timestamp_mode: config.timestamp_mode,
            interleaver,
            mdat,
            finalized: false,
        })
    }

    /// Push an encoded video chunk. `timestamp_override` replaces the
    /// chunk's own timestamp when given; `metadata` may carry the decoder
    /// configuration record (used on first sight, ignored afterwards).
    pub fn add_video_chunk(
        &mut self,
        chunk: &EncodedChunk,
        metadata: Option<&ChunkMetadata>,
        timestamp_override: Option<u64>,
    ) -> MuxResult<()> {
        let track = self
            .video
            .ok_or_else(|| MuxError::Configuration("No video track was configured".into()))?;
        let timestamp = timestamp_override.unwrap_or(chunk.timestamp);
        self.push_chunk(
            track,
            &chunk.data,
            chunk.kind,
            timestamp,
            chunk.duration,
            chunk.composition_offset,
            metadata,
        )
    }

    /// Push an encoded audio chunk.
    pub fn add_audio_chunk(
        &mut self,
        chunk: &EncodedChunk,
        metadata: Option<&ChunkMetadata>,
        timestamp_override: Option<u64>,
    ) -> MuxResult<()> {
        let track = self
            .audio
            .ok_or_else(|| MuxError::Configuration("No audio track was configured".into()))?;
        let timestamp = timestamp_override.unwrap_or(chunk.timestamp);
        self.push_chunk(
            track,
            &chunk.data,
            chunk.kind,
            timestamp,
            chunk.duration,
            chunk.composition_offset,
            metadata,
        )
    }

    /// Push video payload bytes without building an [`EncodedChunk`] first.
    pub fn add_video_chunk_raw(
        &mut self,
        data: &[u8],
        kind: ChunkKind,
        timestamp: u64,
        duration: u64,
        metadata: Option<&ChunkMetadata>,
    ) -> MuxResult<()> {
        let track = self
            .video
            .ok_or_else(|| MuxError::Configuration("No video track was configured".into()))?;
        self.push_chunk(track, data, kind, timestamp, duration, 0, metadata)
    }

    /// Push audio payload bytes without building an [`EncodedChunk`] first.
    pub fn add_audio_chunk_raw(
        &mut self,
        data: &[u8],
        kind: ChunkKind,
        timestamp: u64,
        duration: u64,
        metadata: Option<&ChunkMetadata>,
    ) -> MuxResult<()> {
        let track = self
            .audio
            .ok_or_else(|| MuxError::Configuration("No audio track was configured".into()))?;
        self.push_chunk(track, data, kind, timestamp, duration, 0, metadata)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_chunk(
        &mut self,
        track: usize,
        data: &[u8],
        kind: ChunkKind,
        timestamp: u64,
        duration: u64,
        composition_offset: i64,
        metadata: Option<&ChunkMetadata>,
    ) -> MuxResult<()> {
        if self.finalized {
            return Err(MuxError::State("Cannot add chunks after finalize".into()));
        }
        if data.len() as u64 > u32::MAX as u64 {
            return Err(MuxError::Capacity(format!(
                "Sample of {} bytes exceeds the 32-bit sample size limit",
                data.len()
            )));
        }

        // Validate the timestamp before mutating anything, so a rejected
        // chunk leaves the muxer usable.
        let normalized =
            self.tracks[track].normalize_timestamp(timestamp, self.timestamp_mode)?;

        if let Some(meta) = metadata {
            if let Some(config) = &meta.decoder_config {
                let state = &mut self.tracks[track];
                if state.decoder_config.is_none() {
                    state.decoder_config = Some(config.clone());
                }
            }
        }

        self.tracks[track].record_sample(
            data.len() as u32,
            timestamp,
            normalized,
            duration,
            composition_offset,
            kind == ChunkKind::Key,
        );

        let ready = self.interleaver.push(track, data, normalized);
        for chunk in ready {
            self.write_chunk(chunk)?;
        }
        Ok(())
    }

    /// Place one interleaver-released chunk into the mdat.
    fn write_chunk(&mut self, chunk: ReadyChunk) -> MuxResult<()> {
        tracing::debug!(
            track = self.tracks[chunk.track].track_id,
            samples = chunk.sample_count,
            bytes = chunk.data.len(),
            "Flushing chunk"
        );
        match &mut self.mdat {
            MdatState::Progressive { .. } => {
                self.tracks[chunk.track].chunks.push(ChunkEntry {
                    offset: self.writer.position(),
                    sample_count: chunk.sample_count,
                });
                self.writer.write(&chunk.data)?;
            }
            MdatState::Deferred { chunks, bytes } => {
                *bytes += chunk.data.len() as u64;
                chunks.push(chunk);
            }
        }
        Ok(())
    }

    /// Finalize the file: flush pending chunks, close the mdat, and write
    /// the moov box. Returns the accumulated bytes for in-memory targets,
    /// `None` otherwise.
    pub fn finalize(&mut self) -> MuxResult<Option<Vec<u8>>> {
        if self.finalized {
            return Err(MuxError::State("Already finalized".into()));
        }
        if self.tracks.iter().all(|t| t.sample_count() == 0) {
            return Err(MuxError::State(
                "Cannot finalize before any chunk was added".into(),
            ));
        }
        self.finalized = true;

        for chunk in self.interleaver.drain() {
            self.write_chunk(chunk)?;
        }

        // Close the mdat. Progressive targets get the size patched into the
        // reserved header; append-only targets get header and payload in one
        // forward pass, with chunk offsets assigned as they land.
        match std::mem::replace(
            &mut self.mdat,
            MdatState::Deferred {
                chunks: Vec::new(),
                bytes: 0,
            },
        ) {
            MdatState::Progressive {
                reservation,
                header_start,
            } => {
                let mdat_size = self.writer.position() - header_start;
                self.writer
                    .patch(reservation, &large_box_header(b"mdat", mdat_size))?;
            }
            MdatState::Deferred { chunks, bytes } => {
                let mdat_size = LARGE_BOX_HEADER_LEN as u64 + bytes;
                self.writer.write(&large_box_header(b"mdat", mdat_size))?;
                for chunk in chunks {
                    self.tracks[chunk.track].chunks.push(ChunkEntry {
                        offset: self.writer.position(),
                        sample_count: chunk.sample_count,
                    });
                    self.writer.write(&chunk.data)?;
                }
            }
        }

        let summaries = self.track_summaries()?;

        // The moov is built fully in memory: its internal box sizes need
        // back-patching, which the output target may not support.
        let mut moov = Cursor::new(Vec::new());
        mp4::write_moov(&mut moov, &summaries)?;
        self.writer.write(moov.get_ref())?;

        self.writer.finish()?;

        tracing::info!(
            tracks = summaries.len(),
            bytes = self.writer.position(),
            "MP4 stream finalized"
        );

        Ok(self.writer.take_buffer())
    }

    /// Resolve every track into the moov builder's input form.
    fn track_summaries(&self) -> MuxResult<Vec<TrackSummary>> {
        let mut summaries = Vec::with_capacity(self.tracks.len());
        for track in &self.tracks {
            let decoder_config = match (&track.decoder_config, &track.kind) {
                (Some(config), _) => config.clone(),
                // AAC can run on a config synthesized from the track
                // parameters; video has no such fallback.
                (
                    None,
                    TrackKind::Audio {
                        sample_rate,
                        channels,
                        ..
                    },
                ) => synthesize_aac_config(*sample_rate, *channels),
                (None, TrackKind::Video { .. }) => {
                    return Err(MuxError::Configuration(format!(
                        "Video track {} has no decoder configuration record \
                         (supply it in the track config or chunk metadata)",
                        track.track_id
                    )));
                }
            };
            summaries.push(TrackSummary {
                track_id: track.track_id,
                timescale: track.timescale,
                duration: track.duration_ticks(),
                kind: track.kind.clone(),
                decoder_config,
                entries: track.resolve_entries(),
                chunks: track.chunks.clone(),
            });
        }
        Ok(summaries)
    }

    /// Number of samples pushed to the video track so far.
    pub fn video_sample_count(&self) -> usize {
        self.video.map_or(0, |i| self.tracks[i].sample_count())
    }

    /// Number of samples pushed to the audio track so far.
    pub fn audio_sample_count(&self) -> usize {
        self.audio.map_or(0, |i| self.tracks[i].sample_count())
    }

    /// Total bytes written to the target so far.
    pub fn bytes_written(&self) -> u64 {
        self.writer.position()
    }

    /// Give the output target back, e.g. to recover a wrapped file handle.
    pub fn into_target(self) -> T {
        self.writer.into_target()
    }
}
