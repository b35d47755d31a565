//! MP4 box (atom) writers for ISO Base Media File Format (ISO 14496-12).
//!
//! This module maps finalized track state onto the structural boxes of an
//! MP4 file: ftyp, moov (mvhd, trak, tkhd, mdia, mdhd, hdlr, minf, stbl and
//! its sample tables). The mdat (media data) box is written progressively by
//! the muxer; everything here is a pure function of the accumulated tables
//! and runs against an in-memory cursor, so it works for append-only
//! targets too.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, Write};

use crate::atoms::{
    box_size_placeholder, encode_language, fill_box_size, mp4_creation_time, rescale,
    write_box_header, write_fixed_point_16_16, write_fixed_point_8_8, write_full_box_header,
    write_zeros, MOVIE_TIMESCALE,
};
use crate::error::{MuxError, MuxResult};
use crate::track::{AudioCodec, ChunkEntry, SampleEntry, TrackKind, VideoCodec};

/// Finalized view of one track, input to the moov builder.
pub(crate) struct TrackSummary {
    /// 1-based track ID.
    pub track_id: u32,
    /// Track timescale.
    pub timescale: u32,
    /// Total duration in timescale units.
    pub duration: u64,
    /// Kind tag with codec-specific configuration.
    pub kind: TrackKind,
    /// Decoder configuration record payload embedded into stsd.
    pub decoder_config: Vec<u8>,
    /// Per-sample table entries, timing already in ticks.
    pub entries: Vec<SampleEntry>,
    /// Chunk descriptors in output order.
    pub chunks: Vec<ChunkEntry>,
}

/// Write the ftyp (File Type) box.
///
/// Compatible brands: isom, iso6, mp41
pub fn write_ftyp<W: Write>(writer: &mut W) -> MuxResult<()> {
    // ftyp box:
    //   major_brand: isom
    //   minor_version: 0x200
    //   compatible_brands: isom, iso6, mp41
    let size: u32 = 8 + 4 + 4 + 4 * 3; // header + major + minor + 3 brands = 28
    write_box_header(writer, b"ftyp", size)?;
    writer.write_all(b"isom")?; // major brand
    writer.write_u32::<BigEndian>(0x200)?; // minor version
    writer.write_all(b"isom")?; // compatible brand 1
    writer.write_all(b"iso6")?; // compatible brand 2
    writer.write_all(b"mp41")?; // compatible brand 3
    Ok(())
}

/// Write the mvhd (Movie Header) box — version 0.
///
/// `duration` is in movie timescale units (milliseconds).
fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: u64) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mvhd")?;

    let creation_time = mp4_creation_time();

    // version=0, flags=0
    writer.write_u32::<BigEndian>(0)?; // version + flags

    writer.write_u32::<BigEndian>(creation_time as u32)?; // creation_time
    writer.write_u32::<BigEndian>(creation_time as u32)?; // modification_time
    writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?; // timescale
    writer.write_u32::<BigEndian>(duration.min(u32::MAX as u64) as u32)?; // duration

    write_fixed_point_16_16(writer, 1.0)?; // rate (1.0 = normal)
    write_fixed_point_8_8(writer, 1.0)?; // volume (1.0 = full)

    write_zeros(writer, 10)?; // reserved

    // Unity matrix (3x3 identity in 16.16 fixed point, except [2][2] is 30.2)
    write_fixed_point_16_16(writer, 1.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 1.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    writer.write_u32::<BigEndian>(0x4000_0000)?; // 1.0 in 30.2 fixed point

    write_zeros(writer, 24)?; // pre-defined (6 x u32)

    writer.write_u32::<BigEndian>(0xFFFF_FFFF)?; // next_track_ID (use max)

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the tkhd (Track Header) box — version 0.
///
/// `duration` is in movie timescale units. Width/height are 0 for audio.
fn write_tkhd<W: Write + Seek>(
    writer: &mut W,
    track_id: u32,
    duration: u64,
    width: u32,
    height: u32,
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"tkhd")?;

    let creation_time = mp4_creation_time();

    // version=0, flags=0x000003 (track_enabled | track_in_movie)
    writer.write_u32::<BigEndian>(0x00_000003)?;

    writer.write_u32::<BigEndian>(creation_time as u32)?; // creation_time
    writer.write_u32::<BigEndian>(creation_time as u32)?; // modification_time
    writer.write_u32::<BigEndian>(track_id)?; // track_ID
    write_zeros(writer, 4)?; // reserved
    writer.write_u32::<BigEndian>(duration.min(u32::MAX as u64) as u32)?; // duration

    write_zeros(writer, 8)?; // reserved (2 x u32)
    writer.write_i16::<BigEndian>(0)?; // layer
    writer.write_i16::<BigEndian>(0)?; // alternate_group
    // Volume: 0x0100 for audio, 0 for video
    if width == 0 && height == 0 {
        write_fixed_point_8_8(writer, 1.0)?; // audio track
    } else {
        write_fixed_point_8_8(writer, 0.0)?; // video track
    }
    write_zeros(writer, 2)?; // reserved

    // Unity matrix
    write_fixed_point_16_16(writer, 1.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 1.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    write_fixed_point_16_16(writer, 0.0)?;
    writer.write_u32::<BigEndian>(0x4000_0000)?;

    // Width and height in 16.16 fixed point
    write_fixed_point_16_16(writer, width as f64)?;
    write_fixed_point_16_16(writer, height as f64)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the mdhd (Media Header) box — version 0.
fn write_mdhd<W: Write + Seek>(writer: &mut W, timescale: u32, duration: u64) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mdhd")?;

    let creation_time = mp4_creation_time();

    // version=0, flags=0
    writer.write_u32::<BigEndian>(0)?;

    writer.write_u32::<BigEndian>(creation_time as u32)?;
    writer.write_u32::<BigEndian>(creation_time as u32)?;
    writer.write_u32::<BigEndian>(timescale)?;
    writer.write_u32::<BigEndian>(duration.min(u32::MAX as u64) as u32)?;

    // Language: "und" (undetermined)
    writer.write_u16::<BigEndian>(encode_language("und"))?;
    // Pre-defined
    writer.write_u16::<BigEndian>(0)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the hdlr (Handler Reference) box.
///
/// `handler_type` should be "vide" for video or "soun" for audio.
fn write_hdlr<W: Write + Seek>(writer: &mut W, handler_type: &[u8; 4]) -> MuxResult<()> {
    let name = match handler_type {
        b"vide" => "VideoHandler\0",
        b"soun" => "SoundHandler\0",
        _ => "DataHandler\0",
    };

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"hdlr")?;

    // version=0, flags=0
    writer.write_u32::<BigEndian>(0)?;

    write_zeros(writer, 4)?; // pre_defined
    writer.write_all(handler_type)?; // handler_type
    write_zeros(writer, 12)?; // reserved (3 x u32)
    writer.write_all(name.as_bytes())?; // name (null-terminated)

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write a decoder configuration box (`avcC`/`hvcC`) whose payload is the
/// encoder-supplied configuration record, embedded verbatim.
fn write_codec_config<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
    config: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(box_type)?;
    writer.write_all(config)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the stsd (Sample Description) box for a video track.
///
/// `config` is the raw AVCDecoderConfigurationRecord /
/// HEVCDecoderConfigurationRecord bytes, opaque to the muxer.
fn write_stsd_video<W: Write + Seek>(
    writer: &mut W,
    codec: VideoCodec,
    width: u32,
    height: u32,
    config: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsd")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(1)?; // entry_count

    // Write the sample entry (avc1 or hev1)
    let entry_size_pos = box_size_placeholder(writer)?;
    match codec {
        VideoCodec::Avc => writer.write_all(b"avc1")?,
        VideoCodec::Hevc => writer.write_all(b"hev1")?,
    }

    // VisualSampleEntry fields
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 2)?; // pre_defined
    write_zeros(writer, 2)?; // reserved
    write_zeros(writer, 12)?; // pre_defined (3 x u32)
    writer.write_u16::<BigEndian>(width as u16)?;
    writer.write_u16::<BigEndian>(height as u16)?;
    writer.write_u32::<BigEndian>(0x0048_0000)?; // horizresolution (72 dpi, 16.16)
    writer.write_u32::<BigEndian>(0x0048_0000)?; // vertresolution (72 dpi, 16.16)
    write_zeros(writer, 4)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // frame_count
    write_zeros(writer, 32)?; // compressorname (32 bytes, empty)
    writer.write_u16::<BigEndian>(0x0018)?; // depth (24-bit color)
    writer.write_i16::<BigEndian>(-1)?; // pre_defined

    // Codec-specific configuration record
    match codec {
        VideoCodec::Avc => write_codec_config(writer, b"avcC", config)?,
        VideoCodec::Hevc => write_codec_config(writer, b"hvcC", config)?,
    }

    fill_box_size(writer, entry_size_pos)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the stsd (Sample Description) box for an audio track.
fn write_stsd_audio<W: Write + Seek>(
    writer: &mut W,
    codec: AudioCodec,
    sample_rate: u32,
    channels: u16,
    config: &[u8],
) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsd")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(1)?; // entry_count

    let entry_size_pos = box_size_placeholder(writer)?;
    match codec {
        AudioCodec::Aac => writer.write_all(b"mp4a")?,
    }

    // AudioSampleEntry fields
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 8)?; // reserved (2 x u32)
    writer.write_u16::<BigEndian>(channels)?; // channelcount
    writer.write_u16::<BigEndian>(16)?; // samplesize (16-bit)
    write_zeros(writer, 2)?; // pre_defined
    write_zeros(writer, 2)?; // reserved
    // Sample rate in 16.16 fixed point. The integer part is 16-bit, so
    // rates past 65535 Hz are clamped; the true rate travels in the codec
    // configuration (AudioSpecificConfig rate index).
    writer.write_u32::<BigEndian>(sample_rate.min(u16::MAX as u32) << 16)?;

    match codec {
        AudioCodec::Aac => write_esds(writer, config)?,
    }

    fill_box_size(writer, entry_size_pos)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the esds (Elementary Stream Descriptor) box for AAC.
///
/// `config_data` is the AudioSpecificConfig carried as the
/// DecoderSpecificInfo payload.
fn write_esds<W: Write + Seek>(writer: &mut W, config_data: &[u8]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"esds")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags

    // A descriptor's declared length counts its content only; a nested
    // descriptor contributes tag + length field + content to its parent.
    let dec_config_len = 13 + descr_total_size(config_data.len());
    let es_desc_len = 3 + descr_total_size(dec_config_len) + descr_total_size(1);

    // ES_Descriptor tag=0x03

    writer.write_u8(0x03)?; // ES_DescrTag
    write_descr_length(writer, es_desc_len)?;
    writer.write_u16::<BigEndian>(1)?; // ES_ID
    writer.write_u8(0)?; // stream priority

    // DecoderConfigDescriptor tag=0x04
    writer.write_u8(0x04)?; // DecoderConfigDescrTag
    write_descr_length(writer, dec_config_len)?;
    writer.write_u8(0x40)?; // objectTypeIndication = Audio ISO/IEC 14496-3 (AAC)
    writer.write_u8(0x15)?; // streamType = Audio stream
    write_zeros(writer, 3)?; // bufferSizeDB (24-bit)
    writer.write_u32::<BigEndian>(128_000)?; // maxBitrate
    writer.write_u32::<BigEndian>(128_000)?; // avgBitrate

    // DecoderSpecificInfo tag=0x05
    writer.write_u8(0x05)?; // DecoderSpecificInfoTag
    write_descr_length(writer, config_data.len())?;
    writer.write_all(config_data)?;

    // SLConfigDescriptor tag=0x06
    writer.write_u8(0x06)?; // SLConfigDescrTag
    write_descr_length(writer, 1)?;
    writer.write_u8(0x02)?; // predefined = MP4

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Full on-wire size of a descriptor: tag byte + expandable length field +
/// content bytes.
fn descr_total_size(content_len: usize) -> usize {
    let mut len_field = 1;
    let mut rest = content_len >> 7;
    while rest > 0 {
        len_field += 1;
        rest >>= 7;
    }
    1 + len_field + content_len
}

/// Write MPEG-4 descriptor length in expandable form (1-4 bytes).
fn write_descr_length<W: Write>(writer: &mut W, len: usize) -> MuxResult<()> {
    // Simple form: for lengths < 128, just write the byte
    if len < 128 {
        writer.write_u8(len as u8)?;
    } else {
        // Expandable size encoding (up to 4 bytes)
        let mut val = len;
        let mut bytes = Vec::new();
        loop {
            bytes.push((val & 0x7F) as u8);
            val >>= 7;
            if val == 0 {
                break;
            }
        }
        bytes.reverse();
        for (i, b) in bytes.iter().enumerate() {
            if i < bytes.len() - 1 {
                writer.write_u8(b | 0x80)?;
            } else {
                writer.write_u8(*b)?;
            }
        }
    }
    Ok(())
}

/// Standard AAC sample rates indexable in an AudioSpecificConfig.
const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Synthesize a 2-byte AAC-LC AudioSpecificConfig from the track
/// configuration, used when the encoder never supplied one.
pub(crate) fn synthesize_aac_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    let rate_index = AAC_SAMPLE_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .unwrap_or(0x0b) as u8; // fall back to 8000 Hz index
    let object_type = 2u8; // AAC-LC
    vec![
        (object_type << 3) | (rate_index >> 1),
        (rate_index << 7) | ((channels as u8) << 3),
    ]
}

/// Write the stbl (Sample Table) box containing all sample metadata.
fn write_stbl<W: Write + Seek>(writer: &mut W, track: &TrackSummary) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stbl")?;

    // stsd (Sample Description)
    match &track.kind {
        TrackKind::Video {
            codec,
            width,
            height,
        } => {
            write_stsd_video(writer, *codec, *width, *height, &track.decoder_config)?;
        }
        TrackKind::Audio {
            codec,
            sample_rate,
            channels,
        } => {
            write_stsd_audio(
                writer,
                *codec,
                *sample_rate,
                *channels,
                &track.decoder_config,
            )?;
        }
    }

    // stts (Decoding Time to Sample)
    write_stts(writer, &track.entries)?;

    // ctts (Composition Time to Sample) — only if any composition offsets are nonzero
    let has_ctts = track.entries.iter().any(|e| e.composition_offset != 0);
    if has_ctts {
        write_ctts(writer, &track.entries)?;
    }

    // stsc (Sample to Chunk)
    write_stsc(writer, &track.chunks)?;

    // stsz (Sample Size)
    write_stsz(writer, &track.entries)?;

    // stco or co64 (Chunk Offset)
    let needs_co64 = track.chunks.iter().any(|c| c.offset > u32::MAX as u64);
    if needs_co64 {
        write_co64(writer, &track.chunks)?;
    } else {
        write_stco(writer, &track.chunks)?;
    }

    // stss (Sync Sample) — video only, omitted when every sample is sync
    // (absence of the box means exactly that to a demuxer).
    let all_sync = track.entries.iter().all(|e| e.is_sync);
    if matches!(track.kind, TrackKind::Video { .. }) && !all_sync {
        write_stss(writer, &track.entries)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write stts (Decoding Time to Sample) box — run-length encoded durations.
fn write_stts<W: Write + Seek>(writer: &mut W, entries: &[SampleEntry]) -> MuxResult<()> {
    let runs = run_length_encode(entries.iter().map(|e| e.duration));

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stts")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(runs.len() as u32)?;

    for (count, duration) in &runs {
        writer.write_u32::<BigEndian>(*count)?;
        writer.write_u32::<BigEndian>(*duration)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Coalesce consecutive equal values into (count, value) runs.
fn run_length_encode<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, current)) if *current == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

/// Write ctts (Composition Time to Sample) box — version 1 (signed offsets).
fn write_ctts<W: Write + Seek>(writer: &mut W, entries: &[SampleEntry]) -> MuxResult<()> {
    let runs = run_length_encode(entries.iter().map(|e| e.composition_offset));

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"ctts")?;
    // version=1 for signed composition offsets
    writer.write_u32::<BigEndian>(0x0100_0000)?;
    writer.write_u32::<BigEndian>(runs.len() as u32)?;

    for (count, offset) in &runs {
        writer.write_u32::<BigEndian>(*count)?;
        writer.write_i32::<BigEndian>(*offset)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write stsc (Sample to Chunk) box.
///
/// Consecutive chunks holding the same number of samples collapse into one
/// run; each entry is (first_chunk, samples_per_chunk, sample_description).
fn write_stsc<W: Write + Seek>(writer: &mut W, chunks: &[ChunkEntry]) -> MuxResult<()> {
    let runs = run_length_encode(chunks.iter().map(|c| c.sample_count));

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsc")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(runs.len() as u32)?;

    let mut first_chunk = 1u32; // 1-based
    for (count, samples_per_chunk) in &runs {
        writer.write_u32::<BigEndian>(first_chunk)?;
        writer.write_u32::<BigEndian>(*samples_per_chunk)?;
        writer.write_u32::<BigEndian>(1)?; // sample_description_index
        first_chunk += count;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write stsz (Sample Size) box.
fn write_stsz<W: Write + Seek>(writer: &mut W, entries: &[SampleEntry]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stsz")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags

    // Check if all samples have the same size
    let all_same = match entries.first() {
        None => false,
        Some(first) => entries.iter().all(|e| e.size == first.size),
    };

    if all_same {
        writer.write_u32::<BigEndian>(entries[0].size)?; // sample_size (uniform)
        writer.write_u32::<BigEndian>(entries.len() as u32)?; // sample_count
    } else {
        writer.write_u32::<BigEndian>(0)?; // sample_size = 0 (variable)
        writer.write_u32::<BigEndian>(entries.len() as u32)?;
        for entry in entries {
            writer.write_u32::<BigEndian>(entry.size)?;
        }
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write stco (Chunk Offset) box — 32-bit offsets.
fn write_stco<W: Write + Seek>(writer: &mut W, chunks: &[ChunkEntry]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stco")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(chunks.len() as u32)?;

    for chunk in chunks {
        writer.write_u32::<BigEndian>(chunk.offset as u32)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write co64 (Chunk Offset 64-bit) box — for files > 4GB.
fn write_co64<W: Write + Seek>(writer: &mut W, chunks: &[ChunkEntry]) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"co64")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(chunks.len() as u32)?;

    for chunk in chunks {
        writer.write_u64::<BigEndian>(chunk.offset)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write stss (Sync Sample) box — lists keyframe sample numbers (1-based).
fn write_stss<W: Write + Seek>(writer: &mut W, entries: &[SampleEntry]) -> MuxResult<()> {
    let sync_samples: Vec<u32> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_sync)
        .map(|(i, _)| (i + 1) as u32) // 1-based
        .collect();

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"stss")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(sync_samples.len() as u32)?;

    for sample_number in &sync_samples {
        writer.write_u32::<BigEndian>(*sample_number)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the dinf (Data Information) box with a dref (Data Reference) sub-box.
fn write_dinf<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"dinf")?;

    // dref box
    let dref_size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"dref")?;
    writer.write_u32::<BigEndian>(0)?; // version + flags
    writer.write_u32::<BigEndian>(1)?; // entry_count

    // url entry (self-contained: data is in same file)
    write_full_box_header(writer, b"url ", 12, 0, 0x000001)?; // flag 1 = self-contained

    fill_box_size(writer, dref_size_pos)?;
    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the minf (Media Information) box.
fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackSummary) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"minf")?;

    // Media-specific header
    match &track.kind {
        TrackKind::Video { .. } => {
            // vmhd (Video Media Header)
            write_full_box_header(writer, b"vmhd", 20, 0, 0x000001)?;
            writer.write_u16::<BigEndian>(0)?; // graphicsmode
            write_zeros(writer, 6)?; // opcolor (3 x u16)
        }
        TrackKind::Audio { .. } => {
            // smhd (Sound Media Header)
            write_full_box_header(writer, b"smhd", 16, 0, 0)?;
            writer.write_i16::<BigEndian>(0)?; // balance
            write_zeros(writer, 2)?; // reserved
        }
    }

    // dinf (Data Information)
    write_dinf(writer)?;

    // stbl (Sample Table)
    write_stbl(writer, track)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write the mdia (Media) box for a track.
fn write_mdia<W: Write + Seek>(writer: &mut W, track: &TrackSummary) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"mdia")?;

    // mdhd
    write_mdhd(writer, track.timescale, track.duration)?;

    // hdlr
    let handler_type = match &track.kind {
        TrackKind::Video { .. } => b"vide",
        TrackKind::Audio { .. } => b"soun",
    };
    write_hdlr(writer, handler_type)?;

    // minf
    write_minf(writer, track)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Write a complete trak (Track) box.
fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackSummary) -> MuxResult<()> {
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"trak")?;

    // tkhd duration uses the movie timescale
    let movie_duration = rescale(track.duration, track.timescale, MOVIE_TIMESCALE);
    let (width, height) = match &track.kind {
        TrackKind::Video { width, height, .. } => (*width, *height),
        TrackKind::Audio { .. } => (0, 0),
    };
    write_tkhd(writer, track.track_id, movie_duration, width, height)?;

    // mdia
    write_mdia(writer, track)?;

    fill_box_size(writer, size_pos)?;
    Ok(())
}

/// Build the complete moov (Movie) box with all tracks into `writer`.
pub(crate) fn write_moov<W: Write + Seek>(
    writer: &mut W,
    tracks: &[TrackSummary],
) -> MuxResult<()> {
    if tracks.is_empty() {
        return Err(MuxError::Configuration(
            "Cannot build moov with zero tracks".into(),
        ));
    }

    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(b"moov")?;

    // Movie duration is the maximum across tracks, in movie timescale
    let movie_duration = tracks
        .iter()
        .map(|t| rescale(t.duration, t.timescale, MOVIE_TIMESCALE))
        .max()
        .unwrap_or(0);

    // mvhd
    write_mvhd(writer, movie_duration)?;

    // trak for each track
    for track in tracks {
        write_trak(writer, track)?;
    }

    fill_box_size(writer, size_pos)?;
    Ok(())
}
