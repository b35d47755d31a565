//! Low-level MP4 atom/box writing primitives.
//!
//! MP4 files are structured as nested boxes (atoms). Each box has:
//! - 4-byte big-endian size (includes header)
//! - 4-byte ASCII type (e.g. "ftyp", "moov", "mdat")
//!
//! "Full boxes" additionally have:
//! - 1-byte version
//! - 3-byte flags
//!
//! Boxes are serialized depth-first with a placeholder size field that is
//! back-patched once the content length is known. Header boxes are always
//! assembled in an in-memory cursor, so the back-patch never touches the
//! output target itself.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

use crate::error::{MuxError, MuxResult};

/// Write a standard box header: 4-byte size + 4-byte type.
///
/// `size` is the total box size including the 8-byte header.
/// If `size` is 1, an extended 64-bit size follows (see `large_box_header`).
pub fn write_box_header<W: Write>(writer: &mut W, box_type: &[u8; 4], size: u32) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    Ok(())
}

/// Write a "full box" header: 4-byte size + 4-byte type + 1-byte version + 3-byte flags.
///
/// Total header is 12 bytes.
pub fn write_full_box_header<W: Write>(
    writer: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    // version (1 byte) + flags (3 bytes) = 4 bytes total
    let version_flags = ((version as u32) << 24) | (flags & 0x00FF_FFFF);
    writer.write_u32::<BigEndian>(version_flags)?;
    Ok(())
}

/// Write a box size placeholder (4 bytes of zeros) and return the stream position
/// where the size should be patched later.
///
/// Usage pattern:
/// ```ignore
/// let pos = box_size_placeholder(&mut writer)?;
/// writer.write_all(b"moov")?;
/// // ... write box content ...
/// fill_box_size(&mut writer, pos)?;
/// ```
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> MuxResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?; // placeholder
    Ok(pos)
}

/// Patch the box size at the given position with the actual size
/// (from `pos` to current position).
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let size = current - size_pos;

    // Header boxes must fit the standard 32-bit size field; only mdat gets
    // the 64-bit extended form.
    if size > u32::MAX as u64 {
        return Err(MuxError::Capacity(format!(
            "Box size {} exceeds 32-bit limit",
            size
        )));
    }

    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Encode a 64-bit box header (size == 1 signals the extended size field).
pub fn large_box_header(box_type: &[u8; 4], large_size: u64) -> [u8; 16] {
    let mut header = [0u8; 16];
    header[0..4].copy_from_slice(&1u32.to_be_bytes());
    header[4..8].copy_from_slice(box_type);
    header[8..16].copy_from_slice(&large_size.to_be_bytes());
    header
}

/// Byte length of the 64-bit extended box header.
pub const LARGE_BOX_HEADER_LEN: usize = 16;

/// Standard video timescale (90kHz, same as MPEG-TS).
pub const VIDEO_TIMESCALE: u32 = 90_000;

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Microseconds per second — chunk timestamps and durations arrive in µs.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Convert a microsecond instant to ticks of the given timescale, rounding
/// to nearest.
pub fn micros_to_ticks(micros: u64, timescale: u32) -> u64 {
    let scaled = micros as u128 * timescale as u128 + MICROS_PER_SEC as u128 / 2;
    (scaled / MICROS_PER_SEC as u128) as u64
}

/// Signed variant of `micros_to_ticks`, for composition offsets.
pub fn signed_micros_to_ticks(micros: i64, timescale: u32) -> i64 {
    let sign = if micros < 0 { -1 } else { 1 };
    sign * micros_to_ticks(micros.unsigned_abs(), timescale) as i64
}

/// Rescale a tick count from one timescale to another, rounding to nearest.
pub fn rescale(ticks: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    let scaled = ticks as u128 * to as u128 + from as u128 / 2;
    (scaled / from as u128) as u64
}

/// Write a fixed-point 16.16 number.
pub fn write_fixed_point_16_16<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    let fixed = (value * 65536.0).round() as i32;
    writer.write_i32::<BigEndian>(fixed)?;
    Ok(())
}

/// Write a fixed-point 8.8 number.
pub fn write_fixed_point_8_8<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    let fixed = (value * 256.0).round() as i16;
    writer.write_i16::<BigEndian>(fixed)?;
    Ok(())
}

/// Write zero padding bytes.
pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    let zeros = vec![0u8; count];
    writer.write_all(&zeros)?;
    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits.
/// Default is "und" (undetermined).
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() < 3 {
        // "und" = undetermined
        return encode_language("und");
    }
    let a = (bytes[0] - 0x60) as u16;
    let b = (bytes[1] - 0x60) as u16;
    let c = (bytes[2] - 0x60) as u16;
    (a << 10) | (b << 5) | c
}

/// Convert seconds since 1904-01-01 (MP4 epoch) from a Unix timestamp.
/// MP4 uses seconds since 1904-01-01 00:00:00 UTC.
/// Unix epoch is 1970-01-01 00:00:00 UTC.
/// Difference: 66 years worth of seconds (including leap years).
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Get current time as MP4 creation time (seconds since 1904).
pub fn mp4_creation_time() -> u64 {
    // Fixed value for reproducible output; 2024-01-01 00:00:00 UTC as MP4 time.
    MP4_EPOCH_OFFSET + 1_704_067_200
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_box_header() {
        let mut buf = Vec::new();
        write_box_header(&mut buf, b"ftyp", 20).unwrap();
        assert_eq!(buf.len(), 8);
        // Size: 20 = 0x00000014
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x14]);
        // Type: "ftyp"
        assert_eq!(&buf[4..8], b"ftyp");
    }

    #[test]
    fn test_write_full_box_header() {
        let mut buf = Vec::new();
        write_full_box_header(&mut buf, b"mvhd", 120, 1, 0).unwrap();
        assert_eq!(buf.len(), 12);
        // Size: 120
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 120]);
        // Type: "mvhd"
        assert_eq!(&buf[4..8], b"mvhd");
        // Version 1, flags 0 → 0x01000000
        assert_eq!(&buf[8..12], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_full_box_header_with_flags() {
        let mut buf = Vec::new();
        write_full_box_header(&mut buf, b"tkhd", 100, 0, 0x000003).unwrap();
        // Version 0, flags 3 → 0x00000003
        assert_eq!(&buf[8..12], &[0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_box_size_placeholder_and_fill() {
        let mut cursor = Cursor::new(Vec::new());
        let pos = box_size_placeholder(&mut cursor).unwrap();
        assert_eq!(pos, 0);

        cursor.write_all(b"moov").unwrap();
        // Write some content (20 bytes)
        cursor.write_all(&[0xAA; 20]).unwrap();

        fill_box_size(&mut cursor, pos).unwrap();

        let buf = cursor.into_inner();
        // Total size = 4 (size) + 4 (type) + 20 (content) = 28 bytes
        assert_eq!(buf.len(), 28);
        // Size field should be 28
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 28]);
    }

    #[test]
    fn test_large_box_header() {
        let header = large_box_header(b"mdat", 0x1_0000_0000);
        assert_eq!(header.len(), LARGE_BOX_HEADER_LEN);
        // size field = 1 (signals extended size)
        assert_eq!(&header[0..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&header[4..8], b"mdat");
        // extended size = 0x100000000
        assert_eq!(
            &header[8..16],
            &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_micros_to_ticks() {
        assert_eq!(micros_to_ticks(1_000_000, 90_000), 90_000);
        assert_eq!(micros_to_ticks(500_000, 90_000), 45_000);
        assert_eq!(micros_to_ticks(2_000_000, 44_100), 88_200);
        assert_eq!(micros_to_ticks(0, 90_000), 0);
        // 33333 µs at 90kHz = 2999.97 ticks, rounds to 3000
        assert_eq!(micros_to_ticks(33_333, 90_000), 3000);
    }

    #[test]
    fn test_signed_micros_to_ticks() {
        assert_eq!(signed_micros_to_ticks(-500_000, 90_000), -45_000);
        assert_eq!(signed_micros_to_ticks(500_000, 90_000), 45_000);
        assert_eq!(signed_micros_to_ticks(0, 90_000), 0);
    }

    #[test]
    fn test_rescale() {
        // 450_000 ticks at 90kHz = 5s = 5000 movie ticks
        assert_eq!(rescale(450_000, 90_000, MOVIE_TIMESCALE), 5000);
        // 44100 ticks at 44.1kHz = 1s
        assert_eq!(rescale(44_100, 44_100, MOVIE_TIMESCALE), 1000);
        assert_eq!(rescale(100, 0, MOVIE_TIMESCALE), 0);
    }

    #[test]
    fn test_write_fixed_point_16_16() {
        let mut buf = Vec::new();
        write_fixed_point_16_16(&mut buf, 1.0).unwrap();
        // 1.0 * 65536 = 0x00010000
        assert_eq!(&buf, &[0x00, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_write_fixed_point_8_8() {
        let mut buf = Vec::new();
        write_fixed_point_8_8(&mut buf, 1.0).unwrap();
        // 1.0 * 256 = 0x0100
        assert_eq!(&buf, &[0x01, 0x00]);
    }

    #[test]
    fn test_encode_language_und() {
        let code = encode_language("und");
        // u=0x15, n=0x0E, d=0x04
        // (0x15 << 10) | (0x0E << 5) | 0x04 = 0x55C4
        assert_eq!(code, 0x55C4);
    }

    #[test]
    fn test_encode_language_eng() {
        let code = encode_language("eng");
        // e=5, n=14, g=7
        // (5 << 10) | (14 << 5) | 7 = 5120 + 448 + 7 = 5575
        assert_eq!(code, 5575);
    }

    #[test]
    fn test_write_zeros() {
        let mut buf = Vec::new();
        write_zeros(&mut buf, 8).unwrap();
        assert_eq!(buf, vec![0u8; 8]);
    }

    #[test]
    fn test_mp4_creation_time() {
        let t = mp4_creation_time();
        assert!(t > MP4_EPOCH_OFFSET);
    }
}
