//! PNG decoder: all IHDR bit depth and color type combinations, Adam7
//! interlace, palettes, and tRNS transparency. Chunk CRCs and the zlib
//! Adler checksum are not verified.

mod unfilter;

use crate::decode::Request;
use crate::error::DecodeError;
use crate::inflate::zlib_decode;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "png";

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(&SIGNATURE)
}

const COLOR_GRAY: u8 = 0;
const COLOR_RGB: u8 = 2;
const COLOR_PALETTE: u8 = 3;
const COLOR_GRAY_ALPHA: u8 = 4;
const COLOR_RGBA: u8 = 6;

struct Png {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: u8,
    interlaced: bool,
    palette: [[u8; 3]; 256],
    palette_len: usize,
    /// Per-entry alpha for paletted images; opaque where tRNS is shorter.
    pal_alpha: [u8; 256],
    /// Transparent color key for gray and RGB images, at source depth.
    trns_key: Option<[u16; 3]>,
    has_trns: bool,
}

impl Png {
    /// Channels as stored in the filtered stream.
    fn src_channels(&self) -> usize {
        match self.color_type {
            COLOR_RGB => 3,
            COLOR_GRAY_ALPHA => 2,
            COLOR_RGBA => 4,
            _ => 1,
        }
    }

    /// Channels after palette and tRNS expansion.
    fn out_channels(&self) -> u8 {
        let base: u8 = match self.color_type {
            COLOR_GRAY => 1,
            COLOR_RGB | COLOR_PALETTE => 3,
            COLOR_GRAY_ALPHA => 2,
            _ => 4,
        };
        if self.has_trns && matches!(self.color_type, COLOR_GRAY | COLOR_RGB | COLOR_PALETTE) {
            base + 1
        } else {
            base
        }
    }

    fn depth(&self) -> SampleDepth {
        if self.bit_depth == 16 {
            SampleDepth::Sixteen
        } else {
            SampleDepth::Eight
        }
    }

    fn info(&self) -> ImageInfo {
        ImageInfo {
            width: self.width,
            height: self.height,
            channels: self.out_channels(),
            depth: self.depth(),
            format: ImageFormat::Png,
        }
    }
}

fn parse_ihdr(r: &mut ByteReader) -> Result<Png, DecodeError> {
    if r.read_array::<8>()? != SIGNATURE {
        return Err(DecodeError::corrupt(FORMAT, "bad signature"));
    }
    let len = r.read_u32_be()?;
    if len != 13 || r.read_array::<4>()? != *b"IHDR" {
        return Err(DecodeError::corrupt(FORMAT, "first chunk is not IHDR"));
    }
    let width = r.read_u32_be()?;
    let height = r.read_u32_be()?;
    let bit_depth = r.read_u8()?;
    let color_type = r.read_u8()?;
    let compression = r.read_u8()?;
    let filter = r.read_u8()?;
    let interlace = r.read_u8()?;
    r.skip(4)?; // CRC

    if compression != 0 || filter != 0 {
        return Err(DecodeError::corrupt(FORMAT, "bad compression/filter method"));
    }
    if interlace > 1 {
        return Err(DecodeError::corrupt(FORMAT, "bad interlace method"));
    }
    let depth_ok = match color_type {
        COLOR_GRAY => matches!(bit_depth, 1 | 2 | 4 | 8 | 16),
        COLOR_RGB | COLOR_GRAY_ALPHA | COLOR_RGBA => matches!(bit_depth, 8 | 16),
        COLOR_PALETTE => matches!(bit_depth, 1 | 2 | 4 | 8),
        _ => return Err(DecodeError::corrupt(FORMAT, "bad color type")),
    };
    if !depth_ok {
        return Err(DecodeError::corrupt(FORMAT, "bad bit depth for color type"));
    }

    Ok(Png {
        width,
        height,
        bit_depth,
        color_type,
        interlaced: interlace == 1,
        palette: [[0; 3]; 256],
        palette_len: 0,
        pal_alpha: [255; 256],
        trns_key: None,
        has_trns: false,
    })
}

/// Walk the chunk stream after IHDR. IDAT payloads are appended to
/// `idat` when given; otherwise the walk stops at the first IDAT, which
/// is enough for probing since PLTE and tRNS must precede it.
fn parse_chunks(
    r: &mut ByteReader,
    png: &mut Png,
    mut idat: Option<&mut ByteVec>,
) -> Result<(), DecodeError> {
    loop {
        let len = r.read_u32_be()? as usize;
        let kind = r.read_array::<4>()?;
        match &kind {
            b"PLTE" => {
                if len % 3 != 0 || len > 256 * 3 {
                    return Err(DecodeError::corrupt(FORMAT, "bad PLTE length"));
                }
                png.palette_len = len / 3;
                for i in 0..png.palette_len {
                    png.palette[i] = r.read_array()?;
                }
            }
            b"tRNS" => {
                match png.color_type {
                    COLOR_PALETTE => {
                        if len > png.palette_len {
                            return Err(DecodeError::corrupt(FORMAT, "tRNS longer than palette"));
                        }
                        for i in 0..len {
                            png.pal_alpha[i] = r.read_u8()?;
                        }
                    }
                    COLOR_GRAY => {
                        if len != 2 {
                            return Err(DecodeError::corrupt(FORMAT, "bad tRNS length"));
                        }
                        let g = r.read_u16_be()?;
                        png.trns_key = Some([g, g, g]);
                    }
                    COLOR_RGB => {
                        if len != 6 {
                            return Err(DecodeError::corrupt(FORMAT, "bad tRNS length"));
                        }
                        png.trns_key =
                            Some([r.read_u16_be()?, r.read_u16_be()?, r.read_u16_be()?]);
                    }
                    _ => {
                        return Err(DecodeError::corrupt(FORMAT, "tRNS with alpha color type"));
                    }
                }
                png.has_trns = true;
            }
            b"IDAT" => match idat.as_deref_mut() {
                Some(buf) => buf.extend_from_slice(r.read_slice(len)?)?,
                None => return Ok(()),
            },
            b"IEND" => {
                r.skip(4)?; // CRC
                return Ok(());
            }
            _ => {
                // Ancillary chunks have a lowercase first letter.
                if kind[0] & 0x20 == 0 {
                    return Err(DecodeError::unsupported(FORMAT, "unhandled critical chunk"));
                }
                r.skip(len)?;
            }
        }
        r.skip(4)?; // CRC
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let mut png = parse_ihdr(&mut r)?;
    parse_chunks(&mut r, &mut png, None)?;
    Ok(png.info())
}

/// Pass geometry: origin, step, and dimensions in image pixels.
struct Pass {
    x0: usize,
    y0: usize,
    dx: usize,
    dy: usize,
    width: usize,
    height: usize,
}

const ADAM7: [(usize, usize, usize, usize); 7] = [
    (0, 0, 8, 8),
    (4, 0, 8, 8),
    (0, 4, 4, 8),
    (2, 0, 4, 4),
    (0, 2, 2, 4),
    (1, 0, 2, 2),
    (0, 1, 1, 2),
];

const SINGLE_PASS: [(usize, usize, usize, usize); 1] = [(0, 0, 1, 1)];

fn passes(png: &Png) -> impl Iterator<Item = Pass> {
    let (w, h) = (png.width as usize, png.height as usize);
    let table: &'static [(usize, usize, usize, usize)] = if png.interlaced {
        &ADAM7
    } else {
        &SINGLE_PASS
    };
    table.iter().filter_map(move |&(x0, y0, dx, dy)| {
        let width = w.saturating_sub(x0).div_ceil(dx);
        let height = h.saturating_sub(y0).div_ceil(dy);
        (width > 0 && height > 0).then_some(Pass {
            x0,
            y0,
            dx,
            dy,
            width,
            height,
        })
    })
}

fn row_bytes(png: &Png, pass_width: usize) -> usize {
    (pass_width * png.src_channels() * usize::from(png.bit_depth)).div_ceil(8)
}

/// Total filtered stream size across all passes, one filter byte per row.
fn raw_size(png: &Png) -> Result<usize, DecodeError> {
    let mut total = 0usize;
    for pass in passes(png) {
        let row = row_bytes(png, pass.width) + 1;
        total = pass
            .height
            .checked_mul(row)
            .and_then(|n| total.checked_add(n))
            .ok_or(DecodeError::LimitExceeded("decoded image size overflows"))?;
    }
    Ok(total)
}

/// Reads samples of a row at the image bit depth, MSB first.
struct Samples<'a> {
    row: &'a [u8],
    bit_depth: u8,
    bit_pos: usize,
}

impl Samples<'_> {
    fn next(&mut self) -> u16 {
        match self.bit_depth {
            16 => {
                let at = self.bit_pos / 8;
                self.bit_pos += 16;
                u16::from_be_bytes([self.row[at], self.row[at + 1]])
            }
            8 => {
                let at = self.bit_pos / 8;
                self.bit_pos += 8;
                u16::from(self.row[at])
            }
            d => {
                let d = usize::from(d);
                let byte = self.row[self.bit_pos / 8];
                let shift = 8 - d - self.bit_pos % 8;
                self.bit_pos += d;
                u16::from((byte >> shift) & ((1 << d) - 1))
            }
        }
    }
}

/// Scale factor bringing sub-byte gray samples to 8-bit range.
fn gray_scale(bit_depth: u8) -> u16 {
    match bit_depth {
        1 => 255,
        2 => 85,
        4 => 17,
        _ => 1,
    }
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let mut png = parse_ihdr(&mut r)?;
    req.limits.check_dimensions(png.width, png.height)?;

    let mut idat = ByteVec::new(req.alloc);
    parse_chunks(&mut r, &mut png, Some(&mut idat))?;

    if png.color_type == COLOR_PALETTE && png.palette_len == 0 {
        return Err(DecodeError::corrupt(FORMAT, "paletted image without PLTE"));
    }

    let info = png.info();
    let out_size = checked_output_size(
        info.width,
        info.height,
        usize::from(info.channels),
        info.depth.bytes(),
    )?;
    req.limits.check_alloc(out_size)?;

    let expected = raw_size(&png)?;
    req.limits.check_alloc(expected)?;
    let mut raw = zlib_decode(idat.as_slice(), req.alloc, expected, Some(expected), FORMAT)?;
    if raw.len() < expected {
        return Err(DecodeError::corrupt(FORMAT, "not enough image data"));
    }

    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();

    let bpp = (png.src_channels() * usize::from(png.bit_depth)).div_ceil(8).max(1);
    let mut offset = 0usize;
    for pass in passes(&png) {
        let stride = row_bytes(&png, pass.width) + 1;
        for j in 0..pass.height {
            let start = offset + j * stride;
            let filter = raw.as_mut_slice()[start];
            let (before, after) = raw.as_mut_slice().split_at_mut(start + 1);
            let cur = &mut after[..stride - 1];
            let prev: &[u8] = if j == 0 {
                &[]
            } else {
                &before[start - (stride - 1)..start]
            };
            unfilter::unfilter_row(filter, bpp, prev, cur)?;

            expand_row(
                &png,
                cur,
                pass.x0,
                pass.y0 + pass.dy * j,
                pass.dx,
                pass.width,
                pixels,
            )?;
        }
        offset += pass.height * stride;
    }

    Ok((out, info))
}

/// Convert one unfiltered row to native output samples, writing every
/// `dx`-th pixel starting at (`x0`, `y`).
fn expand_row(
    png: &Png,
    row: &[u8],
    x0: usize,
    y: usize,
    dx: usize,
    count: usize,
    pixels: &mut [u8],
) -> Result<(), DecodeError> {
    let width = png.width as usize;
    let out_ch = usize::from(png.out_channels());
    let sixteen = png.bit_depth == 16;
    let px_bytes = out_ch * png.depth().bytes();
    let scale = gray_scale(png.bit_depth);
    let max: u16 = if sixteen { u16::MAX } else { 255 };

    let mut samples = Samples {
        row,
        bit_depth: png.bit_depth,
        bit_pos: 0,
    };

    for i in 0..count {
        let mut values = [0u16; 4];
        let n = match png.color_type {
            COLOR_GRAY => {
                let g = samples.next();
                values[0] = g * scale;
                if png.has_trns {
                    values[1] = if png.trns_key == Some([g, g, g]) { 0 } else { max };
                    2
                } else {
                    1
                }
            }
            COLOR_RGB => {
                let (cr, cg, cb) = (samples.next(), samples.next(), samples.next());
                values[..3].copy_from_slice(&[cr, cg, cb]);
                if png.has_trns {
                    values[3] = if png.trns_key == Some([cr, cg, cb]) { 0 } else { max };
                    4
                } else {
                    3
                }
            }
            COLOR_PALETTE => {
                let idx = usize::from(samples.next());
                if idx >= png.palette_len {
                    return Err(DecodeError::corrupt(FORMAT, "palette index out of range"));
                }
                let [pr, pg, pb] = png.palette[idx];
                values[..3].copy_from_slice(&[u16::from(pr), u16::from(pg), u16::from(pb)]);
                if png.has_trns {
                    values[3] = u16::from(png.pal_alpha[idx]);
                    4
                } else {
                    3
                }
            }
            COLOR_GRAY_ALPHA => {
                values[0] = samples.next();
                values[1] = samples.next();
                2
            }
            _ => {
                for v in values.iter_mut() {
                    *v = samples.next();
                }
                4
            }
        };
        debug_assert_eq!(n, out_ch);

        let at = (y * width + x0 + i * dx) * px_bytes;
        let dst = &mut pixels[at..at + px_bytes];
        if sixteen {
            for (c, v) in values[..n].iter().enumerate() {
                dst[c * 2..c * 2 + 2].copy_from_slice(&v.to_ne_bytes());
            }
        } else {
            for (c, v) in values[..n].iter().enumerate() {
                dst[c] = *v as u8;
            }
        }
    }
    Ok(())
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

    fn chunk(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        v.extend_from_slice(kind);
        v.extend_from_slice(payload);
        v.extend_from_slice(&[0; 4]); // CRC unchecked
        v
    }

    /// Zlib stream holding `raw` in stored deflate blocks.
    fn zlib(raw: &[u8]) -> Vec<u8> {
        let mut v = alloc::vec![0x78, 0x01];
        v.push(1); // BFINAL, stored
        let len = raw.len() as u16;
        v.extend_from_slice(&len.to_le_bytes());
        v.extend_from_slice(&(!len).to_le_bytes());
        v.extend_from_slice(raw);
        v.extend_from_slice(&[0; 4]); // Adler unchecked
        v
    }

    fn ihdr(w: u32, h: u32, bit_depth: u8, color_type: u8, interlace: u8) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&w.to_be_bytes());
        p.extend_from_slice(&h.to_be_bytes());
        p.extend_from_slice(&[bit_depth, color_type, 0, 0, interlace]);
        chunk(b"IHDR", &p)
    }

    fn file(header: Vec<u8>, extra: &[Vec<u8>], raw: &[u8]) -> Vec<u8> {
        let mut v = SIGNATURE.to_vec();
        v.extend_from_slice(&header);
        for c in extra {
            v.extend_from_slice(c);
        }
        v.extend_from_slice(&chunk(b"IDAT", &zlib(raw)));
        v.extend_from_slice(&chunk(b"IEND", &[]));
        v
    }

    #[test]
    fn gray8_gradient() {
        let raw = [0, 0, 85, 0, 170, 255]; // two rows, filter 0
        let data = file(ihdr(2, 2, 8, COLOR_GRAY, 0), &[], &raw);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!((info.width, info.height, info.channels), (2, 2, 1));
        assert_eq!(info.depth, SampleDepth::Eight);
        assert_eq!(pixels.as_slice(), &[0, 85, 170, 255]);
    }

    #[test]
    fn rgb8_sub_filter() {
        let raw = [1, 10, 20, 30, 5, 5, 5]; // Sub filter, 2 pixels
        let data = file(ihdr(2, 1, 8, COLOR_RGB, 0), &[], &raw);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[10, 20, 30, 15, 25, 35]);
    }

    #[test]
    fn up_filter_uses_previous_row() {
        let raw = [0, 100, 2, 55]; // row 2 adds row 1
        let data = file(ihdr(1, 2, 8, COLOR_GRAY, 0), &[], &raw);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[100, 155]);
    }

    #[test]
    fn one_bit_gray_scales_to_full_range() {
        let raw = [0, 0b1000_0000]; // pixels 1, 0
        let data = file(ihdr(2, 1, 1, COLOR_GRAY, 0), &[], &raw);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[255, 0]);
    }

    #[test]
    fn sixteen_bit_gray_native_endian() {
        let raw = [0, 0x12, 0x34];
        let data = file(ihdr(1, 1, 16, COLOR_GRAY, 0), &[], &raw);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.depth, SampleDepth::Sixteen);
        let v = u16::from_ne_bytes([pixels.as_slice()[0], pixels.as_slice()[1]]);
        assert_eq!(v, 0x1234);
    }

    #[test]
    fn palette_with_trns_becomes_rgba() {
        let plte = chunk(b"PLTE", &[10, 20, 30, 40, 50, 60]);
        let trns = chunk(b"tRNS", &[128]); // entry 0 half transparent
        let raw = [0, 0b0100_0000]; // 1-bit indices: 0, 1
        let data = file(ihdr(2, 1, 1, COLOR_PALETTE, 0), &[plte, trns], &raw);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 4);
        assert_eq!(pixels.as_slice(), &[10, 20, 30, 128, 40, 50, 60, 255]);
    }

    #[test]
    fn gray_trns_key_clears_alpha() {
        let trns = chunk(b"tRNS", &[0, 85]);
        let raw = [0, 85, 170];
        let data = file(ihdr(2, 1, 8, COLOR_GRAY, 0), &[trns], &raw);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 2);
        assert_eq!(pixels.as_slice(), &[85, 0, 170, 255]);
    }

    #[test]
    fn adam7_two_by_two() {
        // Passes covering 2x2: pass 1 → (0,0), pass 6 → (1,0), pass 7 → (0,1),(1,1)
        let raw = [0, 1, 0, 2, 0, 3, 4];
        let data = file(ihdr(2, 2, 8, COLOR_GRAY, 1), &[], &raw);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn idat_split_across_chunks() {
        let raw = [0u8, 7, 8];
        let z = zlib(&raw);
        let (a, b) = z.split_at(4);
        let mut data = SIGNATURE.to_vec();
        data.extend_from_slice(&ihdr(2, 1, 8, COLOR_GRAY, 0));
        data.extend_from_slice(&chunk(b"IDAT", a));
        data.extend_from_slice(&chunk(b"IDAT", b));
        data.extend_from_slice(&chunk(b"IEND", &[]));
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[7, 8]);
    }

    #[test]
    fn short_stream_is_corrupt() {
        let raw = [0u8, 1]; // one row short for 2x2
        let data = file(ihdr(2, 2, 8, COLOR_GRAY, 0), &[], &raw);
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn unknown_critical_chunk_rejected() {
        let bogus = chunk(b"ABCD", &[1, 2, 3]);
        let data = file(ihdr(1, 1, 8, COLOR_GRAY, 0), &[bogus], &[0, 9]);
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn probe_reports_without_inflating() {
        let plte = chunk(b"PLTE", &[1, 2, 3]);
        let mut data = SIGNATURE.to_vec();
        data.extend_from_slice(&ihdr(7, 9, 4, COLOR_PALETTE, 0));
        data.extend_from_slice(&plte);
        // Truncated IDAT: probe must not care.
        data.extend_from_slice(&(100u32.to_be_bytes()));
        data.extend_from_slice(b"IDAT");
        let info = probe(&data).unwrap();
        assert_eq!((info.width, info.height, info.channels), (7, 9, 3));
    }
}
