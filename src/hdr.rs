//! Radiance HDR decoder: RGBE scanlines, both the old run-length scheme
//! and the adaptive per-component scheme, decoded to linear `f32` RGB.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "hdr";

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(b"#?RADIANCE\n") || data.starts_with(b"#?RGBE\n")
}

/// Read one LF-terminated header line, without the terminator.
fn read_line<'d>(r: &mut ByteReader<'d>) -> Result<&'d [u8], DecodeError> {
    let start = r.position();
    loop {
        if r.read_u8()? == b'\n' {
            return r.slice(start, r.position() - 1);
        }
    }
}

struct Header {
    width: u32,
    height: u32,
    data_offset: usize,
}

fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    if !test(data) {
        return Err(DecodeError::corrupt(FORMAT, "missing #? magic"));
    }
    let mut r = ByteReader::new(data, FORMAT);
    let _ = read_line(&mut r)?; // magic line

    let mut format_ok = false;
    loop {
        let line = read_line(&mut r)?;
        if line.is_empty() {
            break;
        }
        if line == b"FORMAT=32-bit_rle_rgbe" {
            format_ok = true;
        }
    }
    if !format_ok {
        return Err(DecodeError::unsupported(FORMAT, "not 32-bit_rle_rgbe"));
    }

    // Only the standard "-Y <h> +X <w>" orientation is handled.
    let dims = read_line(&mut r)?;
    let rest = dims
        .strip_prefix(b"-Y ")
        .ok_or(DecodeError::unsupported(FORMAT, "unsupported orientation"))?;
    let (height, rest) = parse_dim(rest)?;
    let rest = rest
        .strip_prefix(b" +X ")
        .ok_or(DecodeError::unsupported(FORMAT, "unsupported orientation"))?;
    let (width, rest) = parse_dim(rest)?;
    if !rest.is_empty() {
        return Err(DecodeError::corrupt(FORMAT, "trailing resolution bytes"));
    }
    Ok(Header {
        width,
        height,
        data_offset: r.position(),
    })
}

fn parse_dim(bytes: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    let mut value: u64 = 0;
    let mut len = 0;
    while let Some(&b) = bytes.get(len) {
        if !b.is_ascii_digit() {
            break;
        }
        value = value * 10 + u64::from(b - b'0');
        if value > u64::from(u32::MAX) {
            return Err(DecodeError::corrupt(FORMAT, "dimension out of range"));
        }
        len += 1;
    }
    if len == 0 {
        return Err(DecodeError::corrupt(FORMAT, "bad resolution line"));
    }
    Ok((value as u32, &bytes[len..]))
}

fn header_info(h: &Header) -> ImageInfo {
    ImageInfo {
        width: h.width,
        height: h.height,
        channels: 3,
        depth: SampleDepth::F32,
        format: ImageFormat::Hdr,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    parse_header(data).map(|h| header_info(&h))
}

/// 2^n for the RGBE exponent range, including subnormal results.
fn pow2(n: i32) -> f32 {
    if n >= -126 {
        f32::from_bits(((n + 127) as u32) << 23)
    } else {
        pow2(-126) * pow2(n + 126)
    }
}

fn rgbe_to_f32(rgbe: [u8; 4], out: &mut [u8]) {
    let [r, g, b, e] = rgbe;
    let (fr, fg, fb) = if e == 0 {
        (0.0, 0.0, 0.0)
    } else {
        // Mantissas are 8-bit, so the shared scale is 2^(e - 128 - 8).
        let scale = pow2(i32::from(e) - 136);
        (
            f32::from(r) * scale,
            f32::from(g) * scale,
            f32::from(b) * scale,
        )
    };
    out[0..4].copy_from_slice(&fr.to_ne_bytes());
    out[4..8].copy_from_slice(&fg.to_ne_bytes());
    out[8..12].copy_from_slice(&fb.to_ne_bytes());
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let header = parse_header(data)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let out_size = checked_output_size(info.width, info.height, 3, 4)?;
    req.limits.check_alloc(out_size)?;

    let mut r = ByteReader::new(data, FORMAT);
    r.set_position(header.data_offset)?;

    let width = info.width as usize;
    let height = info.height as usize;
    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();

    // Adaptive RLE scanlines only exist for widths in 8..=32767; anything
    // else is a flat stream of RGBE pixels with old-style runs.
    if !(8..=32767).contains(&width) {
        decode_flat(&mut r, pixels, width * height)?;
        return Ok((out, info));
    }

    // One planar scanline of RGBE components at a time.
    let mut scanline = ByteVec::zeroed(req.alloc, width * 4)?;

    for y in 0..height {
        let head = r.read_array::<4>()?;
        if head[0] != 2 || head[1] != 2 || (u16::from_be_bytes([head[2], head[3]]) as usize) != width
        {
            // Not an adaptive scanline header; the whole remainder is flat.
            if y != 0 {
                return Err(DecodeError::corrupt(FORMAT, "mixed scanline encodings"));
            }
            let mut flat = ByteReader::new(data, FORMAT);
            flat.set_position(header.data_offset)?;
            decode_flat(&mut flat, pixels, width * height)?;
            return Ok((out, info));
        }

        let plane = scanline.as_mut_slice();
        for c in 0..4 {
            let row = &mut plane[c * width..(c + 1) * width];
            let mut x = 0;
            while x < row.len() {
                let count = usize::from(r.read_u8()?);
                if count > 128 {
                    let run = count - 128;
                    if run > row.len() - x {
                        return Err(DecodeError::corrupt(FORMAT, "run overflows scanline"));
                    }
                    row[x..x + run].fill(r.read_u8()?);
                    x += run;
                } else {
                    if count == 0 || count > row.len() - x {
                        return Err(DecodeError::corrupt(FORMAT, "run overflows scanline"));
                    }
                    row[x..x + count].copy_from_slice(r.read_slice(count)?);
                    x += count;
                }
            }
        }

        let plane = scanline.as_slice();
        for x in 0..width {
            let rgbe = [
                plane[x],
                plane[width + x],
                plane[2 * width + x],
                plane[3 * width + x],
            ];
            let at = (y * width + x) * 12;
            rgbe_to_f32(rgbe, &mut pixels[at..at + 12]);
        }
    }

    Ok((out, info))
}

/// Flat RGBE pixels with the old run scheme: a (1,1,1,n) pixel repeats
/// the previous pixel n times, with consecutive runs accumulating a
/// byte-shifted count.
fn decode_flat(r: &mut ByteReader, pixels: &mut [u8], pixel_count: usize) -> Result<(), DecodeError> {
    let mut prev = [0u8; 4];
    let mut shift = 0u32;
    let mut i = 0usize;
    while i < pixel_count {
        let rgbe = r.read_array::<4>()?;
        if rgbe[0] == 1 && rgbe[1] == 1 && rgbe[2] == 1 {
            if shift > 16 || i == 0 {
                return Err(DecodeError::corrupt(FORMAT, "bad old-style run"));
            }
            let run = usize::from(rgbe[3]) << shift;
            if run > pixel_count - i {
                return Err(DecodeError::corrupt(FORMAT, "run past end of image"));
            }
            for _ in 0..run {
                let at = i * 12;
                rgbe_to_f32(prev, &mut pixels[at..at + 12]);
                i += 1;
            }
            shift += 8;
        } else {
            let at = i * 12;
            rgbe_to_f32(rgbe, &mut pixels[at..at + 12]);
            prev = rgbe;
            i += 1;
            shift = 0;
        }
    }
    Ok(())
}
