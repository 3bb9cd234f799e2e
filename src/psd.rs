//! PSD decoder: the flattened composite image of a version-1 Photoshop
//! document in RGB mode, 8 or 16 bits per channel, raw or PackBits
//! compressed. Layers are not parsed.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "psd";

const MAGIC: &[u8; 4] = b"8BPS";

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

struct Header {
    channel_count: u16,
    width: u32,
    height: u32,
    depth: u16,
}

fn parse_header(r: &mut ByteReader) -> Result<Header, DecodeError> {
    if r.read_array::<4>()? != *MAGIC {
        return Err(DecodeError::corrupt(FORMAT, "missing 8BPS magic"));
    }
    if r.read_u16_be()? != 1 {
        return Err(DecodeError::unsupported(FORMAT, "unsupported version"));
    }
    r.skip(6)?; // reserved
    let channel_count = r.read_u16_be()?;
    if channel_count == 0 || channel_count > 16 {
        return Err(DecodeError::corrupt(FORMAT, "bad channel count"));
    }
    let height = r.read_u32_be()?;
    let width = r.read_u32_be()?;
    let depth = r.read_u16_be()?;
    if depth != 8 && depth != 16 {
        return Err(DecodeError::unsupported(FORMAT, "unsupported bit depth"));
    }
    // Color mode 3 is RGB; indexed/CMYK/Lab documents are not handled.
    if r.read_u16_be()? != 3 {
        return Err(DecodeError::unsupported(FORMAT, "color mode is not RGB"));
    }
    Ok(Header {
        channel_count,
        width,
        height,
        depth,
    })
}

fn header_info(h: &Header) -> ImageInfo {
    ImageInfo {
        width: h.width,
        height: h.height,
        channels: 4,
        depth: if h.depth == 16 {
            SampleDepth::Sixteen
        } else {
            SampleDepth::Eight
        },
        format: ImageFormat::Psd,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    parse_header(&mut r).map(|h| header_info(&h))
}

/// Skip a length-prefixed section (color mode data, image resources,
/// layer and mask info all share the shape).
fn skip_section(r: &mut ByteReader) -> Result<(), DecodeError> {
    let len = r.read_u32_be()?;
    r.skip(len as usize)
}

/// PackBits: control byte `n`, where `n < 128` copies `n + 1` literal
/// bytes, `n > 128` repeats the next byte `257 - n` times, and `128` is
/// a no-op.
fn unpack_bits(r: &mut ByteReader, out: &mut [u8]) -> Result<(), DecodeError> {
    let mut pos = 0;
    while pos < out.len() {
        let control = r.read_u8()?;
        if control < 128 {
            let count = usize::from(control) + 1;
            if count > out.len() - pos {
                return Err(DecodeError::corrupt(FORMAT, "PackBits run overflows plane"));
            }
            out[pos..pos + count].copy_from_slice(r.read_slice(count)?);
            pos += count;
        } else if control > 128 {
            let count = 257 - usize::from(control);
            if count > out.len() - pos {
                return Err(DecodeError::corrupt(FORMAT, "PackBits run overflows plane"));
            }
            let value = r.read_u8()?;
            out[pos..pos + count].fill(value);
            pos += count;
        }
    }
    Ok(())
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let header = parse_header(&mut r)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let sample_bytes = info.depth.bytes();
    let out_size = checked_output_size(info.width, info.height, 4, sample_bytes)?;
    req.limits.check_alloc(out_size)?;

    skip_section(&mut r)?; // color mode data
    skip_section(&mut r)?; // image resources
    skip_section(&mut r)?; // layer and mask info

    let compression = r.read_u16_be()?;
    if compression > 1 {
        return Err(DecodeError::unsupported(FORMAT, "unknown compression"));
    }

    let pixel_count = info.width as usize * info.height as usize;
    let plane_bytes = pixel_count * sample_bytes;

    // A scratch plane for one channel at a time keeps peak memory at one
    // plane plus the output.
    let mut plane = ByteVec::zeroed(req.alloc, plane_bytes)?;

    if compression == 1 {
        // Per-row byte counts precede the PackBits streams; runs never
        // cross rows, so each channel decodes as one continuous plane.
        let count_bytes = (info.height as usize)
            .checked_mul(usize::from(header.channel_count))
            .and_then(|n| n.checked_mul(2))
            .ok_or(DecodeError::corrupt(FORMAT, "row count table overflow"))?;
        r.skip(count_bytes)?;
    }

    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();

    for channel in 0..4usize {
        if channel >= usize::from(header.channel_count) {
            // Missing channels: opaque alpha, black color.
            let fill = if channel == 3 { u8::MAX } else { 0 };
            for i in 0..pixel_count {
                let at = (i * 4 + channel) * sample_bytes;
                pixels[at..at + sample_bytes].fill(fill);
            }
            continue;
        }

        if compression == 1 {
            unpack_bits(&mut r, plane.as_mut_slice())?;
        } else {
            r.read_into(plane.as_mut_slice())?;
        }

        let src = plane.as_slice();
        if sample_bytes == 2 {
            for i in 0..pixel_count {
                let v = u16::from_be_bytes([src[i * 2], src[i * 2 + 1]]);
                let at = (i * 4 + channel) * 2;
                pixels[at..at + 2].copy_from_slice(&v.to_ne_bytes());
            }
        } else {
            for i in 0..pixel_count {
                pixels[i * 4 + channel] = src[i];
            }
        }
    }

    if header.channel_count >= 4 {
        remove_white_matte(pixels, pixel_count, sample_bytes);
    }

    Ok((out, info))
}

/// Photoshop composites the flattened image against white; undo that so
/// partially transparent pixels carry their own color.
fn remove_white_matte(pixels: &mut [u8], pixel_count: usize, sample_bytes: usize) {
    if sample_bytes == 2 {
        for i in 0..pixel_count {
            let px = &mut pixels[i * 8..i * 8 + 8];
            let a = u16::from_ne_bytes([px[6], px[7]]);
            if a == 0 || a == u16::MAX {
                continue;
            }
            let alpha = f32::from(a) / 65535.0;
            let inv = 65535.0 * (1.0 - 1.0 / alpha);
            for c in 0..3 {
                let v = u16::from_ne_bytes([px[c * 2], px[c * 2 + 1]]);
                let unmatted = (f32::from(v) / alpha + inv).clamp(0.0, 65535.0);
                px[c * 2..c * 2 + 2].copy_from_slice(&(unmatted as u16).to_ne_bytes());
            }
        }
    } else {
        for i in 0..pixel_count {
            let px = &mut pixels[i * 4..i * 4 + 4];
            let a = px[3];
            if a == 0 || a == u8::MAX {
                continue;
            }
            let alpha = f32::from(a) / 255.0;
            let inv = 255.0 * (1.0 - 1.0 / alpha);
            for c in 0..3 {
                let unmatted = (f32::from(px[c]) / alpha + inv).clamp(0.0, 255.0);
                px[c] = unmatted as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::Channels;
    use crate::limits::Limits;
    use crate::mem::GLOBAL;
    use alloc::vec::Vec;

    fn request() -> Request<'static> {
        Request {
            channels: Channels::Native,
            limits: Limits::default(),
            alloc: &GLOBAL,
        }
    }

    fn file(channels: u16, w: u32, h: u32, depth: u16, compression: u16) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"8BPS");
        v.extend_from_slice(&1u16.to_be_bytes());
        v.extend_from_slice(&[0; 6]);
        v.extend_from_slice(&channels.to_be_bytes());
        v.extend_from_slice(&h.to_be_bytes());
        v.extend_from_slice(&w.to_be_bytes());
        v.extend_from_slice(&depth.to_be_bytes());
        v.extend_from_slice(&3u16.to_be_bytes()); // RGB
        v.extend_from_slice(&0u32.to_be_bytes()); // color mode data
        v.extend_from_slice(&0u32.to_be_bytes()); // image resources
        v.extend_from_slice(&0u32.to_be_bytes()); // layer/mask
        v.extend_from_slice(&compression.to_be_bytes());
        v
    }

    #[test]
    fn raw_rgb_gets_opaque_alpha() {
        let mut data = file(3, 2, 1, 8, 0);
        data.extend_from_slice(&[1, 2]); // R plane
        data.extend_from_slice(&[3, 4]); // G plane
        data.extend_from_slice(&[5, 6]); // B plane
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!((info.channels, info.depth), (4, SampleDepth::Eight));
        assert_eq!(pixels.as_slice(), &[1, 3, 5, 255, 2, 4, 6, 255]);
    }

    #[test]
    fn packbits_planes() {
        let mut data = file(3, 4, 1, 8, 1);
        data.extend_from_slice(&[0; 6]); // row byte counts, ignored
        // each plane: repeat-run of 4 bytes
        data.extend_from_slice(&[0xFD, 10]); // R: 257-253 = 4 copies
        data.extend_from_slice(&[0xFD, 20]);
        data.extend_from_slice(&[0xFD, 30]);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(&pixels.as_slice()[..4], &[10, 20, 30, 255]);
        assert_eq!(&pixels.as_slice()[12..], &[10, 20, 30, 255]);
    }

    #[test]
    fn sixteen_bit_raw() {
        let mut data = file(3, 1, 1, 16, 0);
        data.extend_from_slice(&0x1234u16.to_be_bytes());
        data.extend_from_slice(&0x5678u16.to_be_bytes());
        data.extend_from_slice(&0x9ABCu16.to_be_bytes());
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.depth, SampleDepth::Sixteen);
        let px = pixels.as_slice();
        let s = |i: usize| u16::from_ne_bytes([px[i * 2], px[i * 2 + 1]]);
        assert_eq!([s(0), s(1), s(2), s(3)], [0x1234, 0x5678, 0x9ABC, 0xFFFF]);
    }

    #[test]
    fn packbits_run_past_plane_is_corrupt() {
        let mut data = file(1, 2, 1, 8, 1);
        data.extend_from_slice(&[0; 2]);
        data.extend_from_slice(&[0xF0, 7]); // 17-byte run into a 2-byte plane
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn cmyk_mode_rejected() {
        let mut data = file(4, 1, 1, 8, 0);
        data[24..26].copy_from_slice(&4u16.to_be_bytes());
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn truncated_plane_rejected() {
        let mut data = file(3, 4, 4, 8, 0);
        data.extend_from_slice(&[0; 20]);
        assert_eq!(
            decode(&data, &request()).unwrap_err(),
            DecodeError::Truncated(FORMAT)
        );
    }
}
