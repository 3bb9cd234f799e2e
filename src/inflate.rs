//! DEFLATE (RFC 1951) decompressor with a zlib (RFC 1950) wrapper.
//!
//! Handles all three block types: stored, fixed Huffman, dynamic Huffman.
//! Malformed code-length sets (over-subscribed), invalid back-reference
//! distances, and truncated bitstreams all fail the decode; output is
//! written through the caller's allocator.

use crate::error::DecodeError;
use crate::mem::{Allocator, ByteVec};

const MAX_BITS: usize = 15;

// ── Bit reader (LSB-first) ──────────────────────────────────────────

struct BitReader<'d> {
    data: &'d [u8],
    pos: usize,
    bits: u32,
    nbits: u32,
    format: &'static str,
}

impl<'d> BitReader<'d> {
    fn new(data: &'d [u8], format: &'static str) -> Self {
        BitReader {
            data,
            pos: 0,
            bits: 0,
            nbits: 0,
            format,
        }
    }

    #[inline]
    fn read(&mut self, n: u32) -> Result<u32, DecodeError> {
        debug_assert!(n <= 24);
        while self.nbits < n {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or(DecodeError::Truncated(self.format))?;
            self.bits |= u32::from(byte) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
        let val = self.bits & ((1u32 << n) - 1);
        self.bits >>= n;
        self.nbits -= n;
        Ok(val)
    }

    /// Discard the partial byte in flight and return to a byte boundary.
    /// After any `read`, at most 7 bits are buffered, all from the byte
    /// preceding `pos`.
    fn align(&mut self) {
        debug_assert!(self.nbits < 8);
        self.bits = 0;
        self.nbits = 0;
    }
}

// ── Canonical Huffman table ─────────────────────────────────────────

/// Canonical code assignment: shorter codes numerically smaller, equal
/// lengths in symbol order. Decoding walks the counts table bit by bit.
#[derive(Debug)]
struct HuffTree {
    counts: [u16; MAX_BITS + 1],
    symbols: [u16; 288],
}

impl HuffTree {
    fn build(lengths: &[u8], format: &'static str) -> Result<Self, DecodeError> {
        let mut counts = [0u16; MAX_BITS + 1];
        for &l in lengths {
            if usize::from(l) > MAX_BITS {
                return Err(DecodeError::corrupt(format, "code length over 15 bits"));
            }
            counts[usize::from(l)] += 1;
        }

        // Over-subscription check: the code space must not go negative.
        let mut left = 1i32;
        for bits in 1..=MAX_BITS {
            left = (left << 1) - i32::from(counts[bits]);
            if left < 0 {
                return Err(DecodeError::corrupt(format, "over-subscribed Huffman code"));
            }
        }

        let mut offsets = [0u16; MAX_BITS + 1];
        let mut total = 0u16;
        for bits in 1..=MAX_BITS {
            offsets[bits] = total;
            total += counts[bits];
        }

        let mut symbols = [0u16; 288];
        if usize::from(total) > symbols.len() {
            return Err(DecodeError::corrupt(format, "too many Huffman symbols"));
        }
        for (sym, &l) in lengths.iter().enumerate() {
            if l > 0 {
                symbols[usize::from(offsets[usize::from(l)])] = sym as u16;
                offsets[usize::from(l)] += 1;
            }
        }

        Ok(HuffTree { counts, symbols })
    }

    fn decode(&self, br: &mut BitReader) -> Result<u16, DecodeError> {
        let mut code = 0u32;
        let mut first = 0u32;
        let mut index = 0usize;
        for bits in 1..=MAX_BITS {
            code |= br.read(1)?;
            let count = u32::from(self.counts[bits]);
            if code < first + count {
                return Ok(self.symbols[index + (code - first) as usize]);
            }
            index += count as usize;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(DecodeError::corrupt(br.format, "invalid Huffman code"))
    }
}

// ── Static length/distance tables ───────────────────────────────────

static LEN_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
static LEN_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
static DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
static DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];

/// Code-length code order for dynamic Huffman headers.
static CL_ORDER: [u8; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

fn fixed_lit_lengths() -> [u8; 288] {
    let mut lengths = [8u8; 288];
    for l in lengths.iter_mut().take(256).skip(144) {
        *l = 9;
    }
    for l in lengths.iter_mut().take(280).skip(256) {
        *l = 7;
    }
    lengths
}

// ── Core inflate ────────────────────────────────────────────────────

/// Decompress a raw DEFLATE stream.
///
/// `size_hint` pre-sizes the output; `max_out` caps it (a stream producing
/// more than `max_out` bytes is corrupt — container parsers know the exact
/// decompressed size up front).
pub(crate) fn inflate<'a>(
    data: &[u8],
    alloc: &'a dyn Allocator,
    size_hint: usize,
    max_out: Option<usize>,
    format: &'static str,
) -> Result<ByteVec<'a>, DecodeError> {
    let mut br = BitReader::new(data, format);
    let mut out = ByteVec::with_capacity(alloc, size_hint)?;

    loop {
        let bfinal = br.read(1)?;
        let btype = br.read(2)?;

        match btype {
            0 => inflate_stored(&mut br, &mut out, max_out)?,
            1 => {
                let lit = HuffTree::build(&fixed_lit_lengths(), format)?;
                let dist = HuffTree::build(&[5u8; 30], format)?;
                inflate_block(&mut br, &lit, &dist, &mut out, max_out)?;
            }
            2 => {
                let (lit, dist) = read_dynamic_trees(&mut br)?;
                inflate_block(&mut br, &lit, &dist, &mut out, max_out)?;
            }
            _ => return Err(DecodeError::corrupt(format, "reserved deflate block type")),
        }

        if bfinal != 0 {
            return Ok(out);
        }
    }
}

fn inflate_stored(
    br: &mut BitReader,
    out: &mut ByteVec,
    max_out: Option<usize>,
) -> Result<(), DecodeError> {
    br.align();
    let format = br.format;
    let header = br
        .data
        .get(br.pos..br.pos + 4)
        .ok_or(DecodeError::Truncated(format))?;
    let len = u16::from_le_bytes([header[0], header[1]]);
    let nlen = u16::from_le_bytes([header[2], header[3]]);
    if len != !nlen {
        return Err(DecodeError::corrupt(format, "stored block LEN/NLEN mismatch"));
    }
    br.pos += 4;
    let block = br
        .data
        .get(br.pos..br.pos + usize::from(len))
        .ok_or(DecodeError::Truncated(format))?;
    br.pos += usize::from(len);
    check_output_cap(out.len() + block.len(), max_out, format)?;
    out.extend_from_slice(block)
}

fn read_dynamic_trees(br: &mut BitReader) -> Result<(HuffTree, HuffTree), DecodeError> {
    let format = br.format;
    let hlit = br.read(5)? as usize + 257;
    let hdist = br.read(5)? as usize + 1;
    let hclen = br.read(4)? as usize + 4;

    let mut cl_lengths = [0u8; 19];
    for &pos in CL_ORDER.iter().take(hclen) {
        cl_lengths[usize::from(pos)] = br.read(3)? as u8;
    }
    let cl_tree = HuffTree::build(&cl_lengths, format)?;

    let total = hlit + hdist;
    let mut lengths = [0u8; 288 + 32];
    let mut i = 0;
    while i < total {
        let sym = cl_tree.decode(br)?;
        match sym {
            0..=15 => {
                lengths[i] = sym as u8;
                i += 1;
            }
            16 => {
                if i == 0 {
                    return Err(DecodeError::corrupt(format, "length repeat with no prior"));
                }
                let rep = br.read(2)? as usize + 3;
                if i + rep > total {
                    return Err(DecodeError::corrupt(format, "length repeat overruns table"));
                }
                let val = lengths[i - 1];
                lengths[i..i + rep].fill(val);
                i += rep;
            }
            17 | 18 => {
                let rep = if sym == 17 {
                    br.read(3)? as usize + 3
                } else {
                    br.read(7)? as usize + 11
                };
                if i + rep > total {
                    return Err(DecodeError::corrupt(format, "zero-run overruns table"));
                }
                i += rep; // already zero
            }
            _ => return Err(DecodeError::corrupt(format, "invalid code-length symbol")),
        }
    }

    let lit = HuffTree::build(&lengths[..hlit], format)?;
    let dist = HuffTree::build(&lengths[hlit..total], format)?;
    Ok((lit, dist))
}

fn inflate_block(
    br: &mut BitReader,
    lit: &HuffTree,
    dist: &HuffTree,
    out: &mut ByteVec,
    max_out: Option<usize>,
) -> Result<(), DecodeError> {
    let format = br.format;
    loop {
        let sym = usize::from(lit.decode(br)?);
        if sym < 256 {
            check_output_cap(out.len() + 1, max_out, format)?;
            out.push(sym as u8)?;
        } else if sym == 256 {
            return Ok(());
        } else {
            let li = sym - 257;
            if li >= LEN_BASE.len() {
                return Err(DecodeError::corrupt(format, "invalid length symbol"));
            }
            let length =
                usize::from(LEN_BASE[li]) + br.read(u32::from(LEN_EXTRA[li]))? as usize;

            let di = usize::from(dist.decode(br)?);
            if di >= DIST_BASE.len() {
                return Err(DecodeError::corrupt(format, "invalid distance symbol"));
            }
            let distance =
                usize::from(DIST_BASE[di]) + br.read(u32::from(DIST_EXTRA[di]))? as usize;

            if distance > out.len() {
                return Err(DecodeError::corrupt(
                    format,
                    "back-reference before output start",
                ));
            }
            check_output_cap(out.len() + length, max_out, format)?;
            let src = out.len() - distance;
            out.copy_back_reference(src, length)?;
        }
    }
}

#[inline]
fn check_output_cap(
    needed: usize,
    max_out: Option<usize>,
    format: &'static str,
) -> Result<(), DecodeError> {
    match max_out {
        Some(cap) if needed > cap => {
            Err(DecodeError::corrupt(format, "decompressed data over declared size"))
        }
        _ => Ok(()),
    }
}

// ── Zlib wrapper ────────────────────────────────────────────────────

/// Decompress zlib-wrapped data (CMF/FLG header + DEFLATE stream).
///
/// The trailing Adler-32 checksum is not verified.
pub(crate) fn zlib_decode<'a>(
    data: &[u8],
    alloc: &'a dyn Allocator,
    size_hint: usize,
    max_out: Option<usize>,
    format: &'static str,
) -> Result<ByteVec<'a>, DecodeError> {
    if data.len() < 2 {
        return Err(DecodeError::Truncated(format));
    }
    let cmf = data[0];
    let flg = data[1];
    if cmf & 0x0F != 8 {
        return Err(DecodeError::corrupt(format, "zlib compression method not deflate"));
    }
    if (u16::from(cmf) << 8 | u16::from(flg)) % 31 != 0 {
        return Err(DecodeError::corrupt(format, "bad zlib header check"));
    }
    if flg & 0x20 != 0 {
        return Err(DecodeError::corrupt(format, "preset dictionary not allowed"));
    }
    inflate(&data[2..], alloc, size_hint, max_out, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Global;

    /// Minimal zlib stream with one stored block.
    fn stored_zlib(payload: &[u8]) -> alloc::vec::Vec<u8> {
        let mut v = alloc::vec![0x78, 0x01];
        v.push(0x01); // BFINAL=1, BTYPE=00
        let len = payload.len() as u16;
        v.extend_from_slice(&len.to_le_bytes());
        v.extend_from_slice(&(!len).to_le_bytes());
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn stored_block_roundtrip() {
        let z = stored_zlib(b"hello raster");
        let out = zlib_decode(&z, &Global, 0, None, "test").unwrap();
        assert_eq!(out.as_slice(), b"hello raster");
    }

    #[test]
    fn fixed_huffman_literals() {
        // BFINAL=1 BTYPE=01, literals 'a' (0x61 -> code 0x91, 8 bits),
        // then end-of-block (7 zero bits).
        // Bit packing done by hand: 1, 10, then MSB-first codes LSB-packed.
        // 'a' = 97 -> code 0b10010001 (8 bits), EOB = 0b0000000 (7 bits).
        let mut bits: alloc::vec::Vec<bool> = alloc::vec![true, true, false];
        for i in (0..8).rev() {
            bits.push((0x91 >> i) & 1 == 1);
        }
        bits.extend(core::iter::repeat(false).take(7));
        let mut bytes = alloc::vec![0u8; bits.len().div_ceil(8)];
        for (i, b) in bits.iter().enumerate() {
            if *b {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        let out = inflate(&bytes, &Global, 0, None, "test").unwrap();
        assert_eq!(out.as_slice(), b"a");
    }

    #[test]
    fn bad_zlib_method_rejected() {
        let err = zlib_decode(&[0x79, 0x01, 0x01], &Global, 0, None, "test").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { .. }));
    }

    #[test]
    fn preset_dictionary_rejected() {
        // CMF=0x78, FLG with FDICT set, FCHECK adjusted: 0x78 0x20 + 3 => find valid check
        let mut flg = 0x20u8;
        while (u16::from(0x78u8) << 8 | u16::from(flg)) % 31 != 0 {
            flg += 1;
        }
        let err = zlib_decode(&[0x78, flg], &Global, 0, None, "test").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { .. }));
    }

    #[test]
    fn stored_len_nlen_mismatch_rejected() {
        let z = alloc::vec![0x78, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, b'x', b'y'];
        let err = zlib_decode(&z, &Global, 0, None, "test").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { .. }));
    }

    #[test]
    fn truncated_stream_is_truncated_error() {
        let z = stored_zlib(b"abcdef");
        for cut in 0..z.len() - 1 {
            let err = zlib_decode(&z[..cut.max(2)], &Global, 0, None, "test");
            if cut >= 2 {
                assert!(err.is_err(), "prefix of {cut} bytes must not decode");
            }
        }
    }

    #[test]
    fn output_cap_enforced() {
        let z = stored_zlib(b"too much data");
        let err = zlib_decode(&z, &Global, 0, Some(4), "test").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { .. }));
    }

    #[test]
    fn oversubscribed_lengths_rejected() {
        // Three 1-bit codes cannot exist.
        let err = HuffTree::build(&[1, 1, 1], "test").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { .. }));
    }
}
