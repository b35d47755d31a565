//! `mp4mux` — progressive MP4 (ISO Base Media File Format) muxer.
//!
//! This crate combines pre-encoded video and audio streams into a playable
//! MP4 file (ISO 14496-12) without touching the payload bytes.
//!
//! # Architecture
//!
//! - **Pure Rust box writing** — no FFmpeg or native dependency
//! - **Progressive write** — mdat box data is written as chunks arrive
//! - **Moov-at-end** — the moov (metadata) box is written during `finalize()`
//! - **Pluggable output** — in-memory buffer, `Write + Seek` destinations,
//!   or an append-only streaming callback, all producing identical bytes
//! - **Codec support** — H.264 (avcC), H.265 (hvcC) for video; AAC (esds)
//!   for audio
//!
//! # Usage
//!
//! ```ignore
//! use mp4mux::{
//!     BufferTarget, ChunkKind, Mp4Muxer, MuxerConfig, TimestampMode,
//!     VideoCodec, VideoTrackConfig,
//! };
//!
//! let mut muxer = Mp4Muxer::new(BufferTarget::new(), MuxerConfig {
//!     video: Some(VideoTrackConfig {
//!         codec: VideoCodec::Avc,
//!         width: 1920,
//!         height: 1080,
//!         decoder_config: Some(avcc_record),
//!     }),
//!     audio: None,
//!     timestamp_mode: TimestampMode::Offset,
//! })?;
//!
//! // Push encoded chunks progressively (timestamps in microseconds)
//! muxer.add_video_chunk_raw(&frame, ChunkKind::Key, 0, 33_333, None)?;
//!
//! // Finalize writes moov and hands the file back
//! let mp4_bytes = muxer.finalize()?.unwrap();
//! ```

pub mod atoms;
pub mod error;
mod interleave;
pub mod mp4;
pub mod muxer;
pub mod target;
pub mod track;

// Re-export primary API types
pub use error::{MuxError, MuxResult};
pub use muxer::{Mp4Muxer, MuxerConfig};
pub use target::{BufferTarget, StreamCallback, StreamTarget, Target, WritableTarget};
pub use track::{
    AudioCodec, AudioTrackConfig, ChunkKind, ChunkMetadata, EncodedChunk, TimestampMode,
    VideoCodec, VideoTrackConfig,
};
