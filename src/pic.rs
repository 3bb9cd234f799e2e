//! Softimage PIC decoder. Rows are encoded packet-by-packet, each packet
//! covering a subset of the RGBA channels with its own encoding.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::ByteVec;
use crate::stream::ByteReader;

const FORMAT: &str = "pic";

const MAGIC: &[u8; 4] = &[0x53, 0x80, 0xF6, 0x34];

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(MAGIC) && data.get(88..92) == Some(b"PICT")
}

const ALPHA_MASK: u8 = 0x10;

#[derive(Clone, Copy)]
struct Packet {
    /// Encoding: 0 uncompressed, 1 pure run-length, 2 mixed run-length.
    encoding: u8,
    /// Channel mask: 0x80 red, 0x40 green, 0x20 blue, 0x10 alpha.
    mask: u8,
}

struct Header {
    width: u16,
    height: u16,
    packets: [Packet; MAX_PACKETS],
    packet_count: usize,
    /// Union of all packet masks.
    channel_mask: u8,
    data_offset: usize,
}

const MAX_PACKETS: usize = 10;

fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    if !test(data) {
        return Err(DecodeError::corrupt(FORMAT, "missing PIC magic"));
    }
    let mut r = ByteReader::new(data, FORMAT);
    r.skip(92)?;
    let width = r.read_u16_be()?;
    let height = r.read_u16_be()?;
    let _ratio = r.read_u32_be()?;
    let _fields = r.read_u16_be()?;
    let _pad = r.read_u16_be()?;

    let mut packets = [Packet {
        encoding: 0,
        mask: 0,
    }; MAX_PACKETS];
    let mut packet_count = 0;
    let mut channel_mask = 0u8;
    loop {
        if packet_count == MAX_PACKETS {
            return Err(DecodeError::corrupt(FORMAT, "too many packets"));
        }
        let chained = r.read_u8()?;
        let _size = r.read_u8()?;
        let encoding = r.read_u8()?;
        let mask = r.read_u8()?;
        if encoding > 2 {
            return Err(DecodeError::unsupported(FORMAT, "unknown packet encoding"));
        }
        channel_mask |= mask;
        packets[packet_count] = Packet { encoding, mask };
        packet_count += 1;
        if chained == 0 {
            break;
        }
    }

    Ok(Header {
        width,
        height,
        packets,
        packet_count,
        channel_mask,
        data_offset: r.position(),
    })
}

fn header_info(h: &Header) -> ImageInfo {
    ImageInfo {
        width: u32::from(h.width),
        height: u32::from(h.height),
        channels: if h.channel_mask & ALPHA_MASK != 0 { 4 } else { 3 },
        depth: SampleDepth::Eight,
        format: ImageFormat::Pic,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    parse_header(data).map(|h| header_info(&h))
}

/// Read one value per set mask bit, high bits first (R, G, B, A).
fn read_masked(r: &mut ByteReader, mask: u8, px: &mut [u8; 4]) -> Result<(), DecodeError> {
    for (bit, slot) in [(0x80u8, 0usize), (0x40, 1), (0x20, 2), (ALPHA_MASK, 3)] {
        if mask & bit != 0 {
            px[slot] = r.read_u8()?;
        }
    }
    Ok(())
}

fn store_masked(mask: u8, px: &[u8; 4], dst: &mut [u8]) {
    for (bit, slot) in [(0x80u8, 0usize), (0x40, 1), (0x20, 2), (ALPHA_MASK, 3)] {
        if mask & bit != 0 && slot < dst.len() {
            dst[slot] = px[slot];
        }
    }
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let header = parse_header(data)?;
    let info = header_info(&header);
    req.limits.check_dimensions(info.width, info.height)?;

    let channels = usize::from(info.channels);
    let out_size = checked_output_size(info.width, info.height, channels, 1)?;
    req.limits.check_alloc(out_size)?;

    let mut r = ByteReader::new(data, FORMAT);
    r.set_position(header.data_offset)?;

    let width = info.width as usize;
    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();
    // Channels no packet covers stay at full intensity.
    pixels.fill(0xFF);

    for y in 0..info.height as usize {
        let row = &mut pixels[y * width * channels..(y + 1) * width * channels];
        for packet in &header.packets[..header.packet_count] {
            decode_row_packet(&mut r, *packet, row, width, channels)?;
        }
    }

    Ok((out, info))
}

fn decode_row_packet(
    r: &mut ByteReader,
    packet: Packet,
    row: &mut [u8],
    width: usize,
    channels: usize,
) -> Result<(), DecodeError> {
    let mut px = [0u8; 4];
    match packet.encoding {
        0 => {
            for x in 0..width {
                read_masked(r, packet.mask, &mut px)?;
                store_masked(packet.mask, &px, &mut row[x * channels..(x + 1) * channels]);
            }
        }
        1 => {
            let mut x = 0;
            while x < width {
                // Runs may claim more than the row holds; excess is clamped.
                let count = usize::from(r.read_u8()?).min(width - x);
                if count == 0 {
                    return Err(DecodeError::corrupt(FORMAT, "zero-length run"));
                }
                read_masked(r, packet.mask, &mut px)?;
                for _ in 0..count {
                    store_masked(packet.mask, &px, &mut row[x * channels..(x + 1) * channels]);
                    x += 1;
                }
            }
        }
        _ => {
            let mut x = 0;
            while x < width {
                let control = usize::from(r.read_u8()?);
                if control >= 128 {
                    let count = if control == 128 {
                        usize::from(r.read_u16_be()?)
                    } else {
                        control - 127
                    };
                    if count > width - x {
                        return Err(DecodeError::corrupt(FORMAT, "run past end of row"));
                    }
                    read_masked(r, packet.mask, &mut px)?;
                    for _ in 0..count {
                        store_masked(packet.mask, &px, &mut row[x * channels..(x + 1) * channels]);
                        x += 1;
                    }
                } else {
                    let count = control + 1;
                    if count > width - x {
                        return Err(DecodeError::corrupt(FORMAT, "literals past end of row"));
                    }
                    for _ in 0..count {
                        read_masked(r, packet.mask, &mut px)?;
                        store_masked(packet.mask, &px, &mut row[x * channels..(x + 1) * channels]);
                        x += 1;
                    }
                }
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

    /// Header with a single packet for the given mask and encoding.
    fn file(w: u16, h: u16, encoding: u8, mask: u8) -> Vec<u8> {
        let mut v = alloc::vec![0u8; 88];
        v[..4].copy_from_slice(MAGIC);
        v.extend_from_slice(b"PICT");
        v.extend_from_slice(&w.to_be_bytes());
        v.extend_from_slice(&h.to_be_bytes());
        v.extend_from_slice(&[0; 8]); // ratio, fields, pad
        v.extend_from_slice(&[0, 0, encoding, mask]); // final packet
        v
    }

    #[test]
    fn uncompressed_rgb() {
        let mut data = file(2, 1, 0, 0xE0);
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 3);
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn alpha_packet_widens_output() {
        let mut data = file(1, 1, 0, 0xF0);
        data.extend_from_slice(&[1, 2, 3, 4]);
        let (pixels, info) = decode(&data, &request()).unwrap();
        assert_eq!(info.channels, 4);
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn pure_rle_run() {
        let mut data = file(4, 1, 1, 0xE0);
        data.extend_from_slice(&[4, 9, 8, 7]);
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[9, 8, 7, 9, 8, 7, 9, 8, 7, 9, 8, 7]);
    }

    #[test]
    fn mixed_rle_literals_and_run() {
        let mut data = file(3, 1, 2, 0xE0);
        data.extend_from_slice(&[0x00, 1, 2, 3]); // one literal pixel
        data.extend_from_slice(&[0x81, 7, 8, 9]); // run of 2
        let (pixels, _) = decode(&data, &request()).unwrap();
        assert_eq!(pixels.as_slice(), &[1, 2, 3, 7, 8, 9, 7, 8, 9]);
    }

    #[test]
    fn mixed_rle_run_overflow_is_corrupt() {
        let mut data = file(2, 1, 2, 0xE0);
        data.extend_from_slice(&[0x85, 1, 2, 3]); // run of 6 into width 2
        assert!(matches!(
            decode(&data, &request()),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn truncated_row_rejected() {
        let mut data = file(4, 2, 0, 0xE0);
        data.extend_from_slice(&[0; 5]);
        assert_eq!(
            decode(&data, &request()).unwrap_err(),
            DecodeError::Truncated(FORMAT)
        );
    }
}
