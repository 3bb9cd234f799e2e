//! TGA (Targa) decoder: raw and run-length-encoded images, color-mapped,
//! truecolor, and grayscale variants.
//!
//! TGA has no magic bytes; [`test`] is a bounded trial-parse of the
//! 18-byte header and runs last in sniffing priority.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "tga";

struct Header {
    id_length: u8,
    has_colormap: bool,
    image_type: u8,
    colormap_len: u16,
    colormap_bits: u8,
    width: u16,
    height: u16,
    pixel_bits: u8,
    /// Bit 5 of the descriptor: rows stored top-to-bottom.
    top_origin: bool,
}

impl Header {
    fn is_rle(&self) -> bool {
        self.image_type >= 9
    }

    fn base_type(&self) -> u8 {
        if self.is_rle() {
            self.image_type - 8
        } else {
            self.image_type
        }
    }

    fn is_gray(&self) -> bool {
        self.base_type() == 3
    }

    fn is_indexed(&self) -> bool {
        self.base_type() == 1
    }
}

fn parse_header(r: &mut ByteReader) -> Result<Header, DecodeError> {
    let id_length = r.read_u8()?;
    let colormap_type = r.read_u8()?;
    let image_type = r.read_u8()?;
    let _colormap_first = r.read_u16_le()?;
    let colormap_len = r.read_u16_le()?;
    let colormap_bits = r.read_u8()?;
    let _x_origin = r.read_u16_le()?;
    let _y_origin = r.read_u16_le()?;
    let width = r.read_u16_le()?;
    let height = r.read_u16_le()?;
    let pixel_bits = r.read_u8()?;
    let descriptor = r.read_u8()?;

    if colormap_type > 1 {
        return Err(DecodeError::corrupt(FORMAT, "bad colormap type"));
    }
    let header = Header {
        id_length,
        has_colormap: colormap_type == 1,
        image_type,
        colormap_len,
        colormap_bits,
        width,
        height,
        pixel_bits,
        top_origin: descriptor & 0x20 != 0,
    };

    if header.has_colormap {
        if header.base_type() != 1 {
            return Err(DecodeError::corrupt(FORMAT, "colormap with non-indexed type"));
        }
        if header.pixel_bits != 8 {
            return Err(DecodeError::unsupported(FORMAT, "non-8-bit palette index"));
        }
        if !matches!(header.colormap_bits, 15 | 16 | 24 | 32) {
            return Err(DecodeError::corrupt(FORMAT, "bad colormap entry size"));
        }
    } else {
        if !matches!(header.base_type(), 2 | 3) {
            return Err(DecodeError::corrupt(FORMAT, "bad image type"));
        }
        if !matches!(header.pixel_bits, 8 | 15 | 16 | 24 | 32) {
            return Err(DecodeError::corrupt(FORMAT, "bad pixel size"));
        }
    }
    if header.width == 0 || header.height == 0 {
        return Err(DecodeError::corrupt(FORMAT, "zero dimension"));
    }
    Ok(header)
}

/// Channel count of the decoded output for a direct (non-indexed) pixel
/// size, or of a palette entry.
fn channels_for(bits: u8, gray: bool) -> u8 {
    match bits {
        8 => 1,
        16 if gray => 2,
        15 | 16 => 3,
        24 => 3,
        _ => 4,
    }
}

pub(crate) fn test(data: &[u8]) -> bool {
    let mut r = ByteReader::new(data, FORMAT);
    parse_header(&mut r).is_ok()
}

fn header_info(h: &Header) -> ImageInfo {
    let channels = if h.is_indexed() {
        channels_for(h.colormap_bits, false)
    } else {
        channels_for(h.pixel_bits, h.is_gray())
    };
    ImageInfo {
        width: u32::from(h.width),
        height: u32::from(h.height),
        channels,
        depth: SampleDepth::Eight,
        format: ImageFormat::Tga,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    parse_header(&mut r).map(|h| header_info(&h))
}

/// Expand a 15/16-bit 5-5-5 value to 8-bit RGB.
fn unpack_555(v: u16, out: &mut [u8]) {
    let five_to_eight = |c: u16| ((c * 255) / 31) as u8;
    out[0] = five_to_eight((v >> 10) & 31);
    out[1] = five_to_eight((v >> 5) & 31);
    out[2] = five_to_eight(v & 31);
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let header = parse_header(&mut r)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let channels = usize::from(info.channels);
    let out_size = checked_output_size(info.width, info.height, channels, 1)?;
    req.limits.check_alloc(out_size)?;

    r.skip(usize::from(header.id_length))?;

    // Palette entries resolved to output channel order up front.
    let mut palette = [0u8; 256 * 4];
    let pal_len = usize::from(header.colormap_len);
    if header.has_colormap {
        if pal_len > 256 {
            return Err(DecodeError::unsupported(FORMAT, "palette over 256 entries"));
        }
        for i in 0..pal_len {
            let entry = &mut palette[i * 4..i * 4 + 4];
            match header.colormap_bits {
                15 | 16 => unpack_555(r.read_u16_le()?, entry),
                24 => {
                    let [b, g, rr] = r.read_array()?;
                    entry[..3].copy_from_slice(&[rr, g, b]);
                }
                _ => {
                    let [b, g, rr, a] = r.read_array()?;
                    entry.copy_from_slice(&[rr, g, b, a]);
                }
            }
        }
    }

    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();

    let mut rle_count = 0u32;
    let mut rle_repeating = false;
    let mut read_next = true;
    let mut raw = [0u8; 4];

    let pixel_count = info.width as usize * info.height as usize;
    for i in 0..pixel_count {
        if header.is_rle() {
            if rle_count == 0 {
                let packet = r.read_u8()?;
                rle_repeating = packet & 0x80 != 0;
                rle_count = u32::from(packet & 0x7F) + 1;
                read_next = true;
            } else if !rle_repeating {
                read_next = true;
            }
            rle_count -= 1;
        }

        if read_next {
            if header.is_indexed() {
                let idx = usize::from(r.read_u8()?);
                if idx >= pal_len {
                    return Err(DecodeError::corrupt(FORMAT, "palette index out of range"));
                }
                raw[..channels].copy_from_slice(&palette[idx * 4..idx * 4 + channels]);
            } else {
                match header.pixel_bits {
                    8 => raw[0] = r.read_u8()?,
                    16 if header.is_gray() => {
                        raw[0] = r.read_u8()?;
                        raw[1] = r.read_u8()?;
                    }
                    15 | 16 => unpack_555(r.read_u16_le()?, &mut raw),
                    24 => {
                        let [b, g, rr] = r.read_array()?;
                        raw[..3].copy_from_slice(&[rr, g, b]);
                    }
                    _ => {
                        let [b, g, rr, a] = r.read_array()?;
                        raw.copy_from_slice(&[rr, g, b, a]);
                    }
                }
            }
            read_next = !(header.is_rle() && rle_repeating);
        }

        pixels[i * channels..(i + 1) * channels].copy_from_slice(&raw[..channels]);
    }

    // TGA default origin is bottom-left.
    if !header.top_origin {
        flip_rows(pixels, info.width as usize * channels);
    }

    Ok((out, info))
}

fn flip_rows(pixels: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let mid = pixels.len() / 2 / row_bytes * row_bytes;
    let (top, rest) = pixels.split_at_mut(pixels.len() - mid);
    let top = &mut top[..mid];
    for (a, b) in top
        .chunks_exact_mut(row_bytes)
        .zip(rest.rchunks_exact_mut(row_bytes))
    {
        a.swap_with_slice(b);
    }
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

    fn header(image_type: u8, w: u16, h: u16, bits: u8, descriptor: u8) -> alloc::vec::Vec<u8> {
        let mut v = alloc::vec![0u8; 18];
        v[2] = image_type;
        v[12..14].copy_from_slice(&w.to_le_bytes());
        v[14..16].copy_from_slice(&h.to_le_bytes());
        v[16] = bits;
        v[17] = descriptor;
        v
    }

    #[test]
    fn raw_gray_bottom_up() {
        let mut file = header(3, 2, 2, 8, 0);
        file.extend_from_slice(&[170, 255, 0, 85]); // bottom row first
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!((info.width, info.height, info.channels), (2, 2, 1));
        assert_eq!(pixels.as_slice(), &[0, 85, 170, 255]);
    }

    #[test]
    fn raw_bgr_to_rgb_top_origin() {
        let mut file = header(2, 1, 2, 24, 0x20);
        file.extend_from_slice(&[3, 2, 1, 6, 5, 4]); // BGR per pixel
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rle_run_repeats_pixel() {
        let mut file = header(11, 4, 1, 8, 0x20);
        // one RLE packet: repeat count 4 of value 42
        file.extend_from_slice(&[0x83, 42]);
        let (pixels, _) = decode(&file, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[42, 42, 42, 42]);
    }

    #[test]
    fn rle_literal_packet() {
        let mut file = header(11, 3, 1, 8, 0x20);
        // literal packet of 3 pixels
        file.extend_from_slice(&[0x02, 1, 2, 3]);
        let (pixels, _) = decode(&file, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn indexed_with_palette() {
        let mut file = header(1, 2, 1, 8, 0x20);
        file[1] = 1; // colormap present
        file[5..7].copy_from_slice(&2u16.to_le_bytes()); // 2 entries
        file[7] = 24;
        file.extend_from_slice(&[10, 20, 30, 40, 50, 60]); // 2 BGR entries
        file.extend_from_slice(&[1, 0]); // indices
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[60, 50, 40, 30, 20, 10]);
    }

    #[test]
    fn palette_index_out_of_range_is_corrupt() {
        let mut file = header(1, 1, 1, 8, 0x20);
        file[1] = 1;
        file[5..7].copy_from_slice(&1u16.to_le_bytes());
        file[7] = 24;
        file.extend_from_slice(&[0, 0, 0]);
        file.extend_from_slice(&[5]);
        assert!(matches!(
            decode(&file, &request()),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn truncated_pixels_rejected() {
        let mut file = header(2, 4, 4, 24, 0);
        file.extend_from_slice(&[0; 10]);
        assert_eq!(
            decode(&file, &request()).unwrap_err(),
            DecodeError::Truncated(FORMAT)
        );
    }
}
