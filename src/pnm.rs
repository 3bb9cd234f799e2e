//! Binary PGM (P5) and PPM (P6).
//!
//! ASCII variants (P1-P3) and PAM (P7) are out of scope. Samples with
//! maxval above 255 are 16-bit big-endian on disk and decoded to
//! native-endian output.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;

const FORMAT: &str = "pnm";

pub(crate) fn test(data: &[u8]) -> bool {
    matches!(data, [b'P', b'5' | b'6', c, ..] if c.is_ascii_whitespace())
}

struct Header {
    width: u32,
    height: u32,
    maxval: u32,
    channels: u8,
    data_offset: usize,
}

/// Skip whitespace and `#` comments (which run to end of line).
fn skip_space(data: &[u8], mut pos: usize) -> usize {
    loop {
        while data.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
            pos += 1;
        }
        if data.get(pos) == Some(&b'#') {
            while data.get(pos).is_some_and(|&b| b != b'\n') {
                pos += 1;
            }
        } else {
            return pos;
        }
    }
}

fn read_number(data: &[u8], pos: usize) -> Result<(u32, usize), DecodeError> {
    let mut pos = skip_space(data, pos);
    let start = pos;
    let mut value: u64 = 0;
    while let Some(&b) = data.get(pos) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + u64::from(b - b'0');
        if value > u64::from(u32::MAX) {
            return Err(DecodeError::corrupt(FORMAT, "header number out of range"));
        }
        pos += 1;
    }
    if pos == start {
        if pos >= data.len() {
            return Err(DecodeError::Truncated(FORMAT));
        }
        return Err(DecodeError::corrupt(FORMAT, "expected decimal number"));
    }
    Ok((value as u32, pos))
}

fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    if !test(data) {
        return Err(DecodeError::corrupt(FORMAT, "missing P5/P6 magic"));
    }
    let channels = if data[1] == b'5' { 1 } else { 3 };

    let (width, pos) = read_number(data, 2)?;
    let (height, pos) = read_number(data, pos)?;
    let (maxval, pos) = read_number(data, pos)?;
    if maxval == 0 || maxval > 65535 {
        return Err(DecodeError::corrupt(FORMAT, "maxval out of range"));
    }
    // Exactly one whitespace byte separates the header from sample data.
    if !data.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Truncated(FORMAT));
    }
    Ok(Header {
        width,
        height,
        maxval,
        channels,
        data_offset: pos + 1,
    })
}

fn header_info(h: &Header) -> ImageInfo {
    ImageInfo {
        width: h.width,
        height: h.height,
        channels: h.channels,
        depth: if h.maxval > 255 {
            SampleDepth::Sixteen
        } else {
            SampleDepth::Eight
        },
        format: ImageFormat::Pnm,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    parse_header(data).map(|h| header_info(&h))
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let header = parse_header(data)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let out_size = checked_output_size(
        info.width,
        info.height,
        usize::from(info.channels),
        info.depth.bytes(),
    )?;
    req.limits.check_alloc(out_size)?;

    let samples = data
        .get(header.data_offset..)
        .ok_or(DecodeError::Truncated(FORMAT))?;
    if samples.len() < out_size {
        return Err(DecodeError::Truncated(FORMAT));
    }
    let samples = &samples[..out_size];

    let mut out = ByteVec::with_capacity(req.alloc, out_size)?;
    match info.depth {
        SampleDepth::Eight => out.extend_from_slice(samples)?,
        _ => {
            // 16-bit samples are big-endian on disk.
            for pair in samples.chunks_exact(2) {
                let v = u16::from_be_bytes([pair[0], pair[1]]);
                out.extend_from_slice(&v.to_ne_bytes())?;
            }
        }
    }
    Ok((out, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::Channels;
    use crate::limits::Limits;
    use crate::mem::GLOBAL;

    fn request() -> Request<'static> {
        Request {
            channels: Channels::Native,
            limits: Limits::default(),
            alloc: &GLOBAL,
        }
    }

    #[test]
    fn pgm_gradient() {
        let mut file = b"P5 2 2 255\n".to_vec();
        file.extend_from_slice(&[0, 85, 170, 255]);
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!(info.width, 2);
        assert_eq!(info.height, 2);
        assert_eq!(info.channels, 1);
        assert_eq!(info.depth, SampleDepth::Eight);
        assert_eq!(pixels.as_slice(), &[0, 85, 170, 255]);
    }

    #[test]
    fn ppm_with_comments() {
        let mut file = b"P6\n# a comment\n2 1\n# another\n255\n".to_vec();
        file.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!((info.width, info.height, info.channels), (2, 1, 3));
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn sixteen_bit_pgm_converts_to_native_endian() {
        let mut file = b"P5 1 1 65535\n".to_vec();
        file.extend_from_slice(&[0x12, 0x34]);
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!(info.depth, SampleDepth::Sixteen);
        let v = u16::from_ne_bytes([pixels.as_slice()[0], pixels.as_slice()[1]]);
        assert_eq!(v, 0x1234);
    }

    #[test]
    fn truncated_samples_rejected() {
        let mut file = b"P5 4 4 255\n".to_vec();
        file.extend_from_slice(&[0; 15]); // one byte short
        assert_eq!(
            decode(&file, &request()).unwrap_err(),
            DecodeError::Truncated(FORMAT)
        );
    }

    #[test]
    fn zero_maxval_rejected() {
        let file = b"P5 1 1 0\n\x00".to_vec();
        assert!(matches!(
            decode(&file, &request()),
            Err(DecodeError::Corrupt { .. })
        ));
    }
}
