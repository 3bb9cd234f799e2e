//! BMP decoder: OS/2 and Windows info headers, 1/2/4/8/16/24/32 bpp,
//! palettes, and bitfield masks. RLE-compressed files are rejected.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "bmp";

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(b"BM")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Gray8,
    Pal8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    fn channels(self) -> u8 {
        match self {
            Self::Gray8 => 1,
            Self::Pal8 | Self::Rgb8 => 3,
            Self::Rgba8 => 4,
        }
    }
}

struct Header {
    width: usize,
    height: usize,
    /// Rows are stored bottom-up unless the raw height was negative.
    bottom_up: bool,
    bpp: u16,
    pix_fmt: PixelFormat,
    bitfields: [u32; 4],
    uses_bitfields: bool,
    palette: [[u8; 3]; 256],
    palette_len: usize,
    data_offset: usize,
}

fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    if r.read_array::<2>()? != *b"BM" {
        return Err(DecodeError::corrupt(FORMAT, "missing BM magic"));
    }
    let _file_size = r.read_u32_le()?;
    r.skip(4)?; // reserved
    let data_offset = r.read_u32_le()?;
    let ihsize = r.read_u32_le()?;

    let (width_raw, height_raw, planes, bpp);
    let mut compression = 0u32;
    let mut colors_used = 0u32;
    let mut bitfields = [0u32; 4];
    let mut uses_bitfields = false;

    match ihsize {
        12 => {
            // OS/2 BMPv1
            width_raw = u32::from(r.read_u16_le()?);
            height_raw = u32::from(r.read_u16_le()?);
            planes = r.read_u16_le()?;
            bpp = r.read_u16_le()?;
        }
        16 | 40 | 52 | 56 | 64 | 108 | 124 => {
            width_raw = r.read_u32_le()?;
            height_raw = r.read_u32_le()?;
            planes = r.read_u16_le()?;
            bpp = r.read_u16_le()?;
            if ihsize >= 40 {
                compression = r.read_u32_le()?;
            }
            if ihsize > 16 {
                let _image_size = r.read_u32_le()?;
                let _x_ppm = r.read_u32_le()?;
                let _y_ppm = r.read_u32_le()?;
                colors_used = r.read_u32_le()?;
                let _important = r.read_u32_le()?;

                // Color masks live in the header from V2 on, or follow a
                // 40-byte header when compression is BI_BITFIELDS. They
                // only take effect under BI_BITFIELDS; a V4/V5 header
                // with BI_RGB carries the fields but the pixels are
                // plain BGR(A).
                if ihsize >= 52 || compression == 3 || compression == 6 {
                    bitfields[0] = r.read_u32_le()?;
                    bitfields[1] = r.read_u32_le()?;
                    bitfields[2] = r.read_u32_le()?;
                    uses_bitfields = compression == 3 || compression == 6;
                }
                // The alpha mask slot exists only from V3 (56 bytes) on,
                // or after a 40-byte header under BI_ALPHABITFIELDS.
                if ihsize >= 56 || compression == 6 {
                    bitfields[3] = r.read_u32_le()?;
                }
            }
        }
        _ => return Err(DecodeError::unsupported(FORMAT, "unknown info header size")),
    }

    match compression {
        0 => {}
        1 | 2 => return Err(DecodeError::unsupported(FORMAT, "RLE compression")),
        3 | 6 => {}
        _ => return Err(DecodeError::unsupported(FORMAT, "unknown compression")),
    }
    if planes != 1 {
        return Err(DecodeError::corrupt(FORMAT, "planes field is not 1"));
    }
    let width = width_raw as usize;
    let bottom_up = (height_raw as i32) >= 0;
    let height = (height_raw as i32).unsigned_abs() as usize;

    // Palette bytes between the headers and the pixel data.
    let palette_bytes = (data_offset as usize)
        .saturating_sub(14)
        .saturating_sub(ihsize as usize);

    let pix_fmt = match bpp {
        32 => PixelFormat::Rgba8,
        24 => PixelFormat::Rgb8,
        16 => {
            if uses_bitfields && bitfields[3] != 0 {
                PixelFormat::Rgba8
            } else {
                PixelFormat::Rgb8
            }
        }
        8 => {
            if palette_bytes > 0 {
                PixelFormat::Pal8
            } else {
                PixelFormat::Gray8
            }
        }
        1 | 2 | 4 => {
            if palette_bytes == 0 {
                return Err(DecodeError::corrupt(FORMAT, "sub-byte depth without palette"));
            }
            PixelFormat::Pal8
        }
        _ => return Err(DecodeError::unsupported(FORMAT, "unsupported bit depth")),
    };

    let mut palette = [[0u8; 3]; 256];
    let mut palette_len = 0;
    if pix_fmt == PixelFormat::Pal8 {
        let max_colors = 1usize << bpp;
        let entry_size = if ihsize == 12 { 3 } else { 4 };
        let mut colors = max_colors.min(palette_bytes / entry_size);
        if colors_used != 0 {
            if colors_used as usize > max_colors {
                return Err(DecodeError::corrupt(FORMAT, "palette count exceeds depth"));
            }
            colors = colors_used as usize;
        }

        r.set_position(14 + ihsize as usize)?;
        for entry in palette.iter_mut().take(colors) {
            let bytes = if entry_size == 3 {
                let [b, g, rr] = r.read_array()?;
                [rr, g, b]
            } else {
                let [b, g, rr, _] = r.read_array()?;
                [rr, g, b]
            };
            *entry = bytes;
        }
        palette_len = colors;
    }

    Ok(Header {
        width,
        height,
        bottom_up,
        bpp,
        pix_fmt,
        bitfields,
        uses_bitfields,
        palette,
        palette_len,
        data_offset: data_offset as usize,
    })
}

fn header_info(h: &Header) -> ImageInfo {
    ImageInfo {
        width: h.width as u32,
        height: h.height as u32,
        channels: h.pix_fmt.channels(),
        depth: SampleDepth::Eight,
        format: ImageFormat::Bmp,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    parse_header(data).map(|h| header_info(&h))
}

/// Extract one masked component and scale it to 8 bits.
fn scale_field(v: u32, mask: u32) -> u8 {
    // Repeating-bit multipliers per field width, so e.g. 5-bit 31 maps
    // to exactly 255.
    const MUL_TABLE: [u32; 9] = [0, 0xFF, 0x55, 0x49, 0x11, 0x21, 0x41, 0x81, 0x01];
    const SHIFT_TABLE: [u32; 9] = [0, 0, 0, 1, 0, 2, 4, 6, 0];

    let bits = mask.count_ones().min(8);
    let shift = (32 - mask.leading_zeros()) as i32 - 8;
    let mut v = v & mask;
    if shift < 0 {
        v <<= -shift;
    } else {
        v >>= shift;
    }
    v >>= 8 - bits;
    ((v.wrapping_mul(MUL_TABLE[bits as usize])) >> SHIFT_TABLE[bits as usize]) as u8
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let mut header = parse_header(data)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let channels = usize::from(info.channels);
    let out_size = checked_output_size(info.width, info.height, channels, 1)?;
    req.limits.check_alloc(out_size)?;

    let mut r = ByteReader::new(data, FORMAT);
    r.set_position(header.data_offset)?;

    // 16-bit files without explicit masks are 5-5-5.
    if header.bpp == 16 && (!header.uses_bitfields || header.bitfields[..3] == [0; 3]) {
        header.bitfields = [31 << 10, 31 << 5, 31, 0];
        header.uses_bitfields = true;
    }

    let width = header.width;
    let row_bytes = (width * usize::from(header.bpp)).div_ceil(32) * 4;
    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();

    // One row of palette indices, expanded from sub-byte depths.
    let mut indices = ByteVec::zeroed(req.alloc, width.div_ceil(8) * 8)?;

    for file_row in 0..header.height {
        let y = if header.bottom_up {
            header.height - 1 - file_row
        } else {
            file_row
        };
        let dst = &mut pixels[y * width * channels..(y + 1) * width * channels];
        let row_start = r.position();

        match header.pix_fmt {
            PixelFormat::Gray8 => r.read_into(dst)?,
            PixelFormat::Pal8 => {
                let row = &mut indices.as_mut_slice()[..width.div_ceil(8) * 8];
                match header.bpp {
                    8 => r.read_into(&mut row[..width])?,
                    _ => {
                        let packed = r.read_slice((width * usize::from(header.bpp)).div_ceil(8))?;
                        expand_indices(usize::from(header.bpp), packed, row);
                    }
                }
                for (idx, px) in row[..width].iter().zip(dst.chunks_exact_mut(3)) {
                    let idx = usize::from(*idx);
                    if idx >= header.palette_len {
                        return Err(DecodeError::corrupt(FORMAT, "palette index out of range"));
                    }
                    px.copy_from_slice(&header.palette[idx]);
                }
            }
            PixelFormat::Rgb8 if header.bpp == 24 => {
                r.read_into(dst)?;
                for px in dst.chunks_exact_mut(3) {
                    px.swap(0, 2); // BGR on disk
                }
            }
            _ => {
                let [mr, mg, mb, ma] = header.bitfields;
                let plain_bgra = header.bpp == 32 && !header.uses_bitfields;
                for px in dst.chunks_exact_mut(channels) {
                    let v = if header.bpp == 16 {
                        u32::from(r.read_u16_le()?)
                    } else {
                        r.read_u32_le()?
                    };
                    if plain_bgra {
                        let [b, g, rr, a] = v.to_le_bytes();
                        px.copy_from_slice(&[rr, g, b, a]);
                    } else {
                        px[0] = scale_field(v, mr);
                        px[1] = scale_field(v, mg);
                        px[2] = scale_field(v, mb);
                        if channels == 4 {
                            px[3] = if ma == 0 { 255 } else { scale_field(v, ma) };
                        }
                    }
                }
            }
        }

        // Rows pad to a 4-byte boundary.
        let consumed = r.position() - row_start;
        r.skip(row_bytes - consumed.min(row_bytes))?;
    }

    Ok((out, info))
}

/// Unpack 1/2/4-bit palette indices to one byte each, MSB first.
fn expand_indices(depth: usize, input: &[u8], out: &mut [u8]) {
    let per_byte = 8 / depth;
    let mask = (1u8 << depth) - 1;
    for (i, slot) in out.iter_mut().enumerate() {
        let Some(&byte) = input.get(i / per_byte) else {
            break;
        };
        let shift = 8 - depth - (i % per_byte) * depth;
        *slot = (byte >> shift) & mask;
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

    /// 40-byte info header, no palette.
    fn file(w: i32, h: i32, bpp: u16, data_offset: u32) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"BM");
        v.extend_from_slice(&0u32.to_le_bytes()); // file size, unchecked
        v.extend_from_slice(&[0; 4]);
        v.extend_from_slice(&data_offset.to_le_bytes());
        v.extend_from_slice(&40u32.to_le_bytes());
        v.extend_from_slice(&w.to_le_bytes());
        v.extend_from_slice(&h.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        v.extend_from_slice(&bpp.to_le_bytes());
        v.extend_from_slice(&[0; 24]); // compression..important
        v
    }

    #[test]
    fn bgr24_bottom_up_with_padding() {
        let mut data = file(1, 2, 24, 54);
        // bottom row first; 3 bytes pixel + 1 pad
        data.extend_from_slice(&[30, 20, 10, 0]);
        data.extend_from_slice(&[60, 50, 40, 0]);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[40, 50, 60, 10, 20, 30]);
    }

    #[test]
    fn top_down_negative_height() {
        let mut data = file(1, -2, 24, 54);
        data.extend_from_slice(&[3, 2, 1, 0]);
        data.extend_from_slice(&[6, 5, 4, 0]);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn raw_32bpp_keeps_alpha() {
        let mut data = file(1, 1, 32, 54);
        data.extend_from_slice(&[3, 2, 1, 9]); // BGRA
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 4);
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 9]);
    }

    #[test]
    fn sixteen_bpp_defaults_to_555() {
        let mut data = file(1, 1, 16, 54);
        let v: u16 = (31 << 10) | (15 << 5) | 0; // R max, G mid, B zero
        data.extend_from_slice(&v.to_le_bytes());
        data.extend_from_slice(&[0; 2]); // pad to 4
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[255, 123, 0]);
    }

    #[test]
    fn paletted_4bpp() {
        let mut data = file(3, 1, 4, 54 + 8);
        // 2 palette entries, BGRX
        data.extend_from_slice(&[10, 20, 30, 0]);
        data.extend_from_slice(&[40, 50, 60, 0]);
        // indices 1,0,1 packed MSB-first + pad to 4 bytes
        data.extend_from_slice(&[0x10, 0x10, 0, 0]);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(
            pixels.as_slice(),
            &[60, 50, 40, 30, 20, 10, 60, 50, 40]
        );
    }

    #[test]
    fn v4_header_with_bi_rgb_is_plain_bgra() {
        // 108-byte header, compression 0: the mask fields are present
        // but zeroed and must not be applied.
        let mut data = Vec::new();
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&122u32.to_le_bytes()); // 14 + 108
        data.extend_from_slice(&108u32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&32u16.to_le_bytes());
        data.extend_from_slice(&[0; 92]); // compression 0, zero masks, rest
        data.extend_from_slice(&[30, 20, 10, 40]); // BGRA
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 4);
        assert_eq!(pixels.as_slice(), &[10, 20, 30, 40]);
    }

    #[test]
    fn v2_header_has_no_alpha_mask() {
        // 52-byte header holds exactly three masks; the pixel data that
        // follows must not be consumed as a fourth.
        let mut data = Vec::new();
        data.extend_from_slice(b"BM");
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&66u32.to_le_bytes()); // 14 + 52
        data.extend_from_slice(&52u32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&16u16.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes()); // BI_BITFIELDS
        data.extend_from_slice(&[0; 20]); // size..important
        data.extend_from_slice(&0xF800u32.to_le_bytes()); // 565 masks
        data.extend_from_slice(&0x07E0u32.to_le_bytes());
        data.extend_from_slice(&0x001Fu32.to_le_bytes());
        let v: u16 = 0xF800 | 0x0020; // R max, G = 1 of 63
        data.extend_from_slice(&v.to_le_bytes());
        data.extend_from_slice(&[0; 2]); // pad to 4
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[255, 4, 0]);
    }

    #[test]
    fn rle_compression_rejected() {
        let mut data = file(1, 1, 8, 54);
        data[30..34].copy_from_slice(&1u32.to_le_bytes());
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn truncated_rows_rejected() {
        let mut data = file(4, 4, 24, 54);
        data.extend_from_slice(&[0; 10]);
        assert_eq!(
            decode(&data, &request()).unwrap_err(),
            DecodeError::Truncated(FORMAT)
        );
    }
}
