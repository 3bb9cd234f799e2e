//! GIF decoder. Decodes the first image of the stream onto a canvas the
//! size of the logical screen; later frames, loop counts, and timing are
//! ignored.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "gif";

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")
}

struct ScreenHeader {
    width: u16,
    height: u16,
    global_palette: bool,
    global_palette_len: usize,
}

fn parse_screen(r: &mut ByteReader) -> Result<ScreenHeader, DecodeError> {
    let magic = r.read_array::<6>()?;
    if &magic[..4] != b"GIF8" || !(magic[4] == b'7' || magic[4] == b'9') || magic[5] != b'a' {
        return Err(DecodeError::corrupt(FORMAT, "missing GIF magic"));
    }
    let width = r.read_u16_le()?;
    let height = r.read_u16_le()?;
    let flags = r.read_u8()?;
    let _background = r.read_u8()?;
    let _aspect = r.read_u8()?;
    Ok(ScreenHeader {
        width,
        height,
        global_palette: flags & 0x80 != 0,
        global_palette_len: 2 << (flags & 7),
    })
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let screen = parse_screen(&mut r)?;
    Ok(ImageInfo {
        width: u32::from(screen.width),
        height: u32::from(screen.height),
        channels: 4,
        depth: SampleDepth::Eight,
        format: ImageFormat::Gif,
    })
}

fn read_palette(r: &mut ByteReader, len: usize, out: &mut [[u8; 3]; 256]) -> Result<(), DecodeError> {
    for entry in out.iter_mut().take(len) {
        *entry = r.read_array()?;
    }
    Ok(())
}

/// Skip a chain of data sub-blocks.
fn skip_sub_blocks(r: &mut ByteReader) -> Result<(), DecodeError> {
    loop {
        let len = r.read_u8()?;
        if len == 0 {
            return Ok(());
        }
        r.skip(usize::from(len))?;
    }
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let mut r = ByteReader::new(data, FORMAT);
    let screen = parse_screen(&mut r)?;
    let info = ImageInfo {
        width: u32::from(screen.width),
        height: u32::from(screen.height),
        channels: 4,
        depth: SampleDepth::Eight,
        format: ImageFormat::Gif,
    };
    req.limits.check_dimensions(info.width, info.height)?;
    let out_size = checked_output_size(info.width, info.height, 4, 1)?;
    req.limits.check_alloc(out_size)?;

    let mut global_palette = [[0u8; 3]; 256];
    if screen.global_palette {
        read_palette(&mut r, screen.global_palette_len, &mut global_palette)?;
    }

    let mut transparent: Option<u8> = None;

    loop {
        match r.read_u8()? {
            0x2C => {
                // Image descriptor: decode this frame and stop.
                return decode_frame(
                    &mut r,
                    &screen,
                    &global_palette,
                    transparent,
                    info,
                    out_size,
                    req,
                );
            }
            0x21 => {
                let label = r.read_u8()?;
                if label == 0xF9 {
                    // Graphic control extension
                    let len = r.read_u8()?;
                    if len != 4 {
                        return Err(DecodeError::corrupt(FORMAT, "bad graphic control size"));
                    }
                    let flags = r.read_u8()?;
                    let _delay = r.read_u16_le()?;
                    let index = r.read_u8()?;
                    transparent = (flags & 1 != 0).then_some(index);
                }
                skip_sub_blocks(&mut r)?;
            }
            0x3B => return Err(DecodeError::corrupt(FORMAT, "no image data before trailer")),
            _ => return Err(DecodeError::corrupt(FORMAT, "unknown block type")),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_frame<'a>(
    r: &mut ByteReader,
    screen: &ScreenHeader,
    global_palette: &[[u8; 3]; 256],
    transparent: Option<u8>,
    info: ImageInfo,
    out_size: usize,
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let frame_x = usize::from(r.read_u16_le()?);
    let frame_y = usize::from(r.read_u16_le()?);
    let frame_w = usize::from(r.read_u16_le()?);
    let frame_h = usize::from(r.read_u16_le()?);
    let flags = r.read_u8()?;
    let interlaced = flags & 0x40 != 0;

    if frame_x + frame_w > usize::from(screen.width)
        || frame_y + frame_h > usize::from(screen.height)
    {
        return Err(DecodeError::corrupt(FORMAT, "frame exceeds logical screen"));
    }

    let mut local_palette = [[0u8; 3]; 256];
    let (palette, palette_len) = if flags & 0x80 != 0 {
        let len = 2 << (flags & 7);
        read_palette(r, len, &mut local_palette)?;
        (&local_palette, len)
    } else if screen.global_palette {
        (global_palette, screen.global_palette_len)
    } else {
        return Err(DecodeError::corrupt(FORMAT, "no color table"));
    };

    // Uncovered canvas stays transparent black.
    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let canvas = out.as_mut_slice();
    let canvas_width = usize::from(screen.width);

    let mut writer = FrameWriter {
        canvas,
        canvas_width,
        frame_x,
        frame_y,
        frame_w,
        frame_h,
        interlaced,
        pass: 0,
        x: 0,
        y: 0,
        emitted: 0,
    };

    let min_code_size = r.read_u8()?;
    decode_lzw(r, min_code_size, palette, palette_len, transparent, &mut writer)?;

    Ok((out, info))
}

/// Writes palette-resolved pixels into the frame rectangle in raster or
/// interlaced order.
struct FrameWriter<'p> {
    canvas: &'p mut [u8],
    canvas_width: usize,
    frame_x: usize,
    frame_y: usize,
    frame_w: usize,
    frame_h: usize,
    interlaced: bool,
    pass: usize,
    x: usize,
    y: usize,
    emitted: usize,
}

/// Adam-style GIF interlace: (first row, step) per pass.
const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

impl FrameWriter<'_> {
    fn full(&self) -> bool {
        self.emitted >= self.frame_w * self.frame_h
    }

    fn push(&mut self, rgba: [u8; 4]) {
        if self.full() {
            return;
        }
        let at = ((self.frame_y + self.y) * self.canvas_width + self.frame_x + self.x) * 4;
        self.canvas[at..at + 4].copy_from_slice(&rgba);
        self.emitted += 1;
        self.x += 1;
        if self.x == self.frame_w {
            self.x = 0;
            if self.interlaced {
                self.y += INTERLACE_PASSES[self.pass].1;
                while self.y >= self.frame_h && self.pass < 3 {
                    self.pass += 1;
                    self.y = INTERLACE_PASSES[self.pass].0;
                }
            } else {
                self.y += 1;
            }
        }
    }
}

const MAX_CODES: usize = 4096;

#[derive(Clone, Copy)]
struct LzwCode {
    prefix: i16,
    first: u8,
    suffix: u8,
}

/// Reads LZW-packed codes LSB-first across GIF data sub-blocks.
struct CodeReader<'r, 'd> {
    r: &'r mut ByteReader<'d>,
    block_remaining: u8,
    bits: u32,
    nbits: u32,
    exhausted: bool,
}

impl CodeReader<'_, '_> {
    fn next(&mut self, code_bits: u32) -> Result<Option<u16>, DecodeError> {
        while self.nbits < code_bits {
            if self.block_remaining == 0 {
                self.block_remaining = self.r.read_u8()?;
                if self.block_remaining == 0 {
                    self.exhausted = true;
                    return Ok(None);
                }
            }
            self.bits |= u32::from(self.r.read_u8()?) << self.nbits;
            self.nbits += 8;
            self.block_remaining -= 1;
        }
        let code = (self.bits & ((1 << code_bits) - 1)) as u16;
        self.bits >>= code_bits;
        self.nbits -= code_bits;
        Ok(Some(code))
    }
}

fn decode_lzw(
    r: &mut ByteReader,
    min_code_size: u8,
    palette: &[[u8; 3]; 256],
    palette_len: usize,
    transparent: Option<u8>,
    writer: &mut FrameWriter,
) -> Result<(), DecodeError> {
    if min_code_size > 11 {
        return Err(DecodeError::corrupt(FORMAT, "bad LZW code size"));
    }
    let clear = 1u16 << min_code_size;
    let eoi = clear + 1;

    let mut codes = [LzwCode {
        prefix: -1,
        first: 0,
        suffix: 0,
    }; MAX_CODES];
    for (i, code) in codes.iter_mut().enumerate().take(usize::from(clear)) {
        code.first = i as u8;
        code.suffix = i as u8;
    }

    let mut reader = CodeReader {
        r,
        block_remaining: 0,
        bits: 0,
        nbits: 0,
        exhausted: false,
    };

    let mut code_bits = u32::from(min_code_size) + 1;
    let mut avail = eoi + 1;
    let mut oldcode: i32 = -1;
    // Reversed-chain scratch for emitting one code's expansion.
    let mut chain = [0u8; MAX_CODES];

    let emit = |code: u16,
                codes: &[LzwCode; MAX_CODES],
                chain: &mut [u8; MAX_CODES],
                writer: &mut FrameWriter|
     -> Result<(), DecodeError> {
        let mut len = 0;
        let mut cur = code as i32;
        while cur >= 0 {
            let entry = codes[cur as usize];
            chain[len] = entry.suffix;
            len += 1;
            cur = i32::from(entry.prefix);
        }
        for &index in chain[..len].iter().rev() {
            if usize::from(index) >= palette_len {
                return Err(DecodeError::corrupt(FORMAT, "palette index out of range"));
            }
            let rgba = if transparent == Some(index) {
                [0, 0, 0, 0]
            } else {
                let [red, green, blue] = palette[usize::from(index)];
                [red, green, blue, 255]
            };
            writer.push(rgba);
        }
        Ok(())
    };

    loop {
        if writer.full() {
            break;
        }
        let Some(code) = reader.next(code_bits)? else {
            return Err(DecodeError::corrupt(FORMAT, "code stream ended early"));
        };

        if code == clear {
            code_bits = u32::from(min_code_size) + 1;
            avail = eoi + 1;
            oldcode = -1;
        } else if code == eoi {
            if !writer.full() {
                return Err(DecodeError::corrupt(FORMAT, "code stream ended early"));
            }
            break;
        } else if code <= avail {
            if oldcode >= 0 {
                // Deferred clear: once the table is full, encoders may
                // keep emitting 12-bit codes without a clear. The table
                // freezes and existing codes stay decodable.
                if usize::from(avail) < MAX_CODES {
                    codes[usize::from(avail)] = LzwCode {
                        prefix: oldcode as i16,
                        first: codes[oldcode as usize].first,
                        suffix: if code == avail {
                            codes[oldcode as usize].first
                        } else {
                            codes[usize::from(code)].first
                        },
                    };
                    avail += 1;
                }
            } else if code == avail {
                return Err(DecodeError::corrupt(FORMAT, "code before dictionary entry"));
            }
            emit(code, &codes, &mut chain, writer)?;
            if u32::from(avail) == (1 << code_bits) && code_bits < 12 {
                code_bits += 1;
            }
            oldcode = i32::from(code);
        } else {
            return Err(DecodeError::corrupt(FORMAT, "illegal LZW code"));
        }
    }

    // Skip whatever remains of the code stream through its terminator.
    if !reader.exhausted {
        let trailing = usize::from(reader.block_remaining);
        r.skip(trailing)?;
        skip_sub_blocks(r)?;
    }
    Ok(())
}
