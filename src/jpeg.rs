//! JPEG decoder: baseline and progressive DCT, 8-bit precision,
//! grayscale and YCbCr, restart intervals, sampling factors up to 4.
//!
//! All scans accumulate into per-component coefficient buffers;
//! dequantization and the inverse DCT run once after the last scan, so
//! sequential and progressive files share one path. Fixed-point integer
//! math throughout.

use crate::decode::Request;
use crate::error::DecodeError;
use crate::info::{ImageFormat, ImageInfo, SampleDepth};
use crate::limits::checked_output_size;
use crate::mem::{Allocator, ByteVec};

const FORMAT: &str = "jpeg";

pub(crate) fn test(data: &[u8]) -> bool {
    data.starts_with(&[0xFF, 0xD8, 0xFF])
}

// Markers
const M_SOF0: u8 = 0xC0; // baseline
const M_SOF1: u8 = 0xC1; // extended sequential
const M_SOF2: u8 = 0xC2; // progressive
const M_DHT: u8 = 0xC4;
const M_SOI: u8 = 0xD8;
const M_EOI: u8 = 0xD9;
const M_SOS: u8 = 0xDA;
const M_DQT: u8 = 0xDB;
const M_DRI: u8 = 0xDD;

/// Zig-zag scan position to natural (row-major) block index.
const ZIGZAG: [u8; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

// ── Huffman tables ──────────────────────────────────────────────────

/// JPEG Huffman table with an 8-bit fast lookup and a linear fallback
/// for longer codes.
struct HuffTable {
    /// Indexed by the next 8 bits; bits 15:8 symbol, 7:0 code length,
    /// zero when no code of 8 bits or fewer matches.
    fast: [u16; 256],
    codes: [(u16, u8, u8); 256],
    num_codes: usize,
}

impl HuffTable {
    fn build(counts: &[u8; 16], symbols: &[u8]) -> Result<Self, DecodeError> {
        let mut table = HuffTable {
            fast: [0; 256],
            codes: [(0, 0, 0); 256],
            num_codes: 0,
        };
        let mut code: u32 = 0;
        let mut sym_idx = 0usize;
        for bits in 0..16usize {
            let length = bits as u8 + 1;
            for _ in 0..counts[bits] {
                if sym_idx >= symbols.len() || table.num_codes >= 256 {
                    return Err(DecodeError::corrupt(FORMAT, "bad Huffman table"));
                }
                if code >= 1 << length {
                    return Err(DecodeError::corrupt(FORMAT, "oversubscribed Huffman table"));
                }
                let sym = symbols[sym_idx];
                table.codes[table.num_codes] = (code as u16, length, sym);
                table.num_codes += 1;

                if length <= 8 {
                    let pad = 8 - u32::from(length);
                    let base = (code << pad) as usize;
                    let entry = (u16::from(sym) << 8) | u16::from(length);
                    for slot in &mut table.fast[base..base + (1 << pad)] {
                        *slot = entry;
                    }
                }

                sym_idx += 1;
                code += 1;
            }
            code <<= 1;
        }
        Ok(table)
    }
}

// ── Entropy bit reader ──────────────────────────────────────────────

/// MSB-first bit reader over entropy-coded data. Stuffed `FF 00` pairs
/// collapse to a data byte; any other `FF xx` is a marker and stops the
/// stream, padding with zeros from then on.
struct BitReader<'d> {
    data: &'d [u8],
    pos: usize,
    bits: u32,
    count: i32,
    hit_marker: bool,
    /// Ran past the end of input without seeing a marker.
    truncated: bool,
}

impl<'d> BitReader<'d> {
    fn new(data: &'d [u8], start: usize) -> Self {
        BitReader {
            data,
            pos: start,
            bits: 0,
            count: 0,
            hit_marker: false,
            truncated: false,
        }
    }

    fn fill(&mut self, need: i32) {
        while self.count < need {
            match self.data.get(self.pos) {
                None => {
                    if !self.hit_marker {
                        self.truncated = true;
                    }
                    self.bits <<= 8;
                    self.count += 8;
                }
                Some(&0xFF) => match self.data.get(self.pos + 1) {
                    Some(&0x00) => {
                        self.pos += 2;
                        self.bits = (self.bits << 8) | 0xFF;
                        self.count += 8;
                    }
                    Some(_) => {
                        // Leave the cursor on the marker.
                        self.hit_marker = true;
                        self.bits <<= 8;
                        self.count += 8;
                    }
                    None => {
                        self.truncated = true;
                        self.bits <<= 8;
                        self.count += 8;
                    }
                },
                Some(&b) => {
                    self.pos += 1;
                    self.bits = (self.bits << 8) | u32::from(b);
                    self.count += 8;
                }
            }
        }
    }

    fn read_bits(&mut self, n: i32) -> i32 {
        if n == 0 {
            return 0;
        }
        self.fill(n);
        self.count -= n;
        ((self.bits >> self.count) & ((1 << n) - 1)) as i32
    }

    fn read_bit(&mut self) -> i32 {
        self.read_bits(1)
    }

    fn decode_huff(&mut self, table: &HuffTable) -> Result<u8, DecodeError> {
        self.fill(16);

        let peek = ((self.bits >> (self.count - 8)) & 0xFF) as usize;
        let entry = table.fast[peek];
        if entry != 0 {
            self.count -= i32::from(entry & 0xFF);
            return Ok((entry >> 8) as u8);
        }

        let mut code: u32 = 0;
        for length in 1..=16i32 {
            code = (code << 1) | ((self.bits >> (self.count - length)) & 1);
            for &(c, l, s) in &table.codes[..table.num_codes] {
                if i32::from(l) == length && u32::from(c) == code {
                    self.count -= length;
                    return Ok(s);
                }
            }
        }
        Err(DecodeError::corrupt(FORMAT, "bad Huffman code"))
    }

    /// Read `n` magnitude bits and sign-extend per the JPEG convention.
    fn receive_extend(&mut self, n: i32) -> i32 {
        if n == 0 {
            return 0;
        }
        let val = self.read_bits(n);
        if val < (1 << (n - 1)) {
            val + (-1 << n) + 1
        } else {
            val
        }
    }

    /// Byte-align and consume one RST marker, searching past stray
    /// bytes left by the entropy stream.
    fn restart(&mut self) -> Result<(), DecodeError> {
        self.bits = 0;
        self.count = 0;
        self.hit_marker = false;
        while self.pos + 1 < self.data.len() {
            if self.data[self.pos] == 0xFF && (0xD0..=0xD7).contains(&self.data[self.pos + 1]) {
                self.pos += 2;
                return Ok(());
            }
            self.pos += 1;
        }
        Err(DecodeError::Truncated(FORMAT))
    }
}

// ── Coefficient storage ─────────────────────────────────────────────

/// Per-component DCT coefficients, `i16` values in an allocator-backed
/// byte buffer.
struct CoeffBuf<'a> {
    bytes: ByteVec<'a>,
}

impl<'a> CoeffBuf<'a> {
    fn new(alloc: &'a dyn Allocator, count: usize) -> Result<Self, DecodeError> {
        Ok(CoeffBuf {
            bytes: ByteVec::zeroed(alloc, count * 2)?,
        })
    }

    fn get(&self, i: usize) -> i16 {
        let b = self.bytes.as_slice();
        i16::from_ne_bytes([b[i * 2], b[i * 2 + 1]])
    }

    fn set(&mut self, i: usize, v: i16) {
        let b = self.bytes.as_mut_slice();
        b[i * 2..i * 2 + 2].copy_from_slice(&v.to_ne_bytes());
    }
}

// ── Frame state ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Default)]
struct Component {
    id: u8,
    h: usize,
    v: usize,
    quant: usize,
    dc_table: usize,
    ac_table: usize,
    dc_pred: i32,
    /// Block grid, MCU-aligned.
    blocks_w: usize,
    blocks_h: usize,
    /// Samples actually covered by the image.
    samples_w: usize,
    samples_h: usize,
}

struct Frame {
    width: usize,
    height: usize,
    num_comp: usize,
    progressive: bool,
    comps: [Component; 3],
    max_h: usize,
    max_v: usize,
    mcus_x: usize,
    mcus_y: usize,
}

fn read_u16_be(data: &[u8], at: usize) -> Result<usize, DecodeError> {
    match (data.get(at), data.get(at + 1)) {
        (Some(&hi), Some(&lo)) => Ok(usize::from(hi) << 8 | usize::from(lo)),
        _ => Err(DecodeError::Truncated(FORMAT)),
    }
}

fn parse_sof(seg: &[u8], progressive: bool) -> Result<Frame, DecodeError> {
    if seg.len() < 6 {
        return Err(DecodeError::Truncated(FORMAT));
    }
    if seg[0] != 8 {
        return Err(DecodeError::unsupported(FORMAT, "sample precision is not 8"));
    }
    let height = usize::from(seg[1]) << 8 | usize::from(seg[2]);
    let width = usize::from(seg[3]) << 8 | usize::from(seg[4]);
    let num_comp = usize::from(seg[5]);
    if width == 0 || height == 0 {
        return Err(DecodeError::corrupt(FORMAT, "zero dimension"));
    }
    if num_comp != 1 && num_comp != 3 {
        return Err(DecodeError::unsupported(FORMAT, "component count"));
    }
    if seg.len() < 6 + num_comp * 3 {
        return Err(DecodeError::Truncated(FORMAT));
    }

    let mut comps = [Component::default(); 3];
    let (mut max_h, mut max_v) = (1usize, 1usize);
    for (i, comp) in comps.iter_mut().enumerate().take(num_comp) {
        let at = 6 + i * 3;
        comp.id = seg[at];
        comp.h = usize::from(seg[at + 1] >> 4);
        comp.v = usize::from(seg[at + 1] & 0x0F);
        comp.quant = usize::from(seg[at + 2]);
        if !(1..=4).contains(&comp.h) || !(1..=4).contains(&comp.v) || comp.quant > 3 {
            return Err(DecodeError::corrupt(FORMAT, "bad component parameters"));
        }
        max_h = max_h.max(comp.h);
        max_v = max_v.max(comp.v);
    }

    let mcus_x = width.div_ceil(max_h * 8);
    let mcus_y = height.div_ceil(max_v * 8);
    for comp in comps.iter_mut().take(num_comp) {
        comp.blocks_w = mcus_x * comp.h;
        comp.blocks_h = mcus_y * comp.v;
        comp.samples_w = (width * comp.h).div_ceil(max_h);
        comp.samples_h = (height * comp.v).div_ceil(max_v);
    }

    Ok(Frame {
        width,
        height,
        num_comp,
        progressive,
        comps,
        max_h,
        max_v,
        mcus_x,
        mcus_y,
    })
}

// ── Marker walk ─────────────────────────────────────────────────────

struct Decoder<'d, 'a> {
    data: &'d [u8],
    frame: Option<Frame>,
    quant: [[u16; 64]; 4],
    huff_dc: [Option<HuffTable>; 4],
    huff_ac: [Option<HuffTable>; 4],
    restart_interval: usize,
    coeffs: [Option<CoeffBuf<'a>>; 3],
    eob_run: i32,
    saw_scan: bool,
    /// Adobe APP14 transform byte: 0 means the three components are
    /// plain RGB rather than YCbCr.
    adobe_transform: Option<u8>,
}

/// Walk the marker stream. With a request, SOS payloads are entropy
/// decoded into the coefficient buffers; probing skips them and stops
/// at the first scan.
fn parse<'d, 'a>(
    data: &'d [u8],
    req: Option<&Request<'a>>,
) -> Result<Decoder<'d, 'a>, DecodeError> {
    if !test(data) {
        return Err(DecodeError::corrupt(FORMAT, "missing SOI"));
    }
    let mut dec = Decoder {
        data,
        frame: None,
        quant: [[0; 64]; 4],
        huff_dc: [None, None, None, None],
        huff_ac: [None, None, None, None],
        restart_interval: 0,
        coeffs: [None, None, None],
        eob_run: 0,
        saw_scan: false,
        adobe_transform: None,
    };

    let mut pos = 2usize;
    loop {
        // Tolerate fill bytes before a marker.
        while data.get(pos) == Some(&0xFF) && data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        if data.get(pos) != Some(&0xFF) {
            return Err(if pos >= data.len() {
                DecodeError::Truncated(FORMAT)
            } else {
                DecodeError::corrupt(FORMAT, "expected marker")
            });
        }
        let marker = *data.get(pos + 1).ok_or(DecodeError::Truncated(FORMAT))?;
        pos += 2;

        match marker {
            M_EOI => {
                if !dec.saw_scan {
                    return Err(DecodeError::corrupt(FORMAT, "no scan before EOI"));
                }
                return Ok(dec);
            }
            M_SOI | 0x01 | 0xD0..=0xD7 => {} // no payload
            M_SOS => {
                if req.is_none() {
                    // Probing needs only the frame header.
                    return Ok(dec);
                }
                pos = dec.decode_scan(pos)?;
                dec.saw_scan = true;
            }
            _ => {
                let len = read_u16_be(data, pos)?;
                if len < 2 || pos + len > data.len() {
                    return Err(DecodeError::Truncated(FORMAT));
                }
                let seg = &data[pos + 2..pos + len];
                match marker {
                    M_SOF0 | M_SOF1 | M_SOF2 => {
                        if dec.frame.is_some() {
                            return Err(DecodeError::corrupt(FORMAT, "multiple frame headers"));
                        }
                        let frame = parse_sof(seg, marker == M_SOF2)?;
                        if let Some(req) = req {
                            dec.init_frame(&frame, req)?;
                        }
                        dec.frame = Some(frame);
                    }
                    0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
                        return Err(DecodeError::unsupported(
                            FORMAT,
                            "unsupported coding process",
                        ));
                    }
                    M_DQT => dec.parse_dqt(seg)?,
                    M_DHT => dec.parse_dht(seg)?,
                    M_DRI => {
                        if seg.len() < 2 {
                            return Err(DecodeError::Truncated(FORMAT));
                        }
                        dec.restart_interval = usize::from(seg[0]) << 8 | usize::from(seg[1]);
                    }
                    0xEE => {
                        // Adobe APP14 carries the color transform flag.
                        if seg.len() >= 12 && seg.starts_with(b"Adobe") {
                            dec.adobe_transform = Some(seg[11]);
                        }
                    }
                    _ => {} // APPn, COM, and friends
                }
                pos += len;
            }
        }
    }
}

impl<'d, 'a> Decoder<'d, 'a> {
    fn init_frame(&mut self, frame: &Frame, req: &Request<'a>) -> Result<(), DecodeError> {
        req.limits
            .check_dimensions(frame.width as u32, frame.height as u32)?;
        for (c, comp) in frame.comps.iter().enumerate().take(frame.num_comp) {
            let blocks = comp
                .blocks_w
                .checked_mul(comp.blocks_h)
                .and_then(|n| n.checked_mul(64))
                .ok_or(DecodeError::LimitExceeded("coefficient buffer overflows"))?;
            req.limits.check_alloc(blocks * 2)?;
            self.coeffs[c] = Some(CoeffBuf::new(req.alloc, blocks)?);
        }
        Ok(())
    }

    fn parse_dqt(&mut self, seg: &[u8]) -> Result<(), DecodeError> {
        let mut at = 0usize;
        while at < seg.len() {
            let pq = seg[at] >> 4;
            let tq = usize::from(seg[at] & 0x0F);
            at += 1;
            if tq > 3 || pq > 1 {
                return Err(DecodeError::corrupt(FORMAT, "bad quantization table header"));
            }
            for zig in ZIGZAG {
                let value = if pq == 0 {
                    let v = *seg.get(at).ok_or(DecodeError::Truncated(FORMAT))?;
                    at += 1;
                    u16::from(v)
                } else {
                    let v = read_u16_be(seg, at)?;
                    at += 2;
                    v as u16
                };
                self.quant[tq][usize::from(zig)] = value;
            }
        }
        Ok(())
    }

    fn parse_dht(&mut self, seg: &[u8]) -> Result<(), DecodeError> {
        let mut at = 0usize;
        while at < seg.len() {
            let tc = seg[at] >> 4;
            let th = usize::from(seg[at] & 0x0F);
            at += 1;
            if tc > 1 || th > 3 {
                return Err(DecodeError::corrupt(FORMAT, "bad Huffman table header"));
            }
            if at + 16 > seg.len() {
                return Err(DecodeError::Truncated(FORMAT));
            }
            let mut counts = [0u8; 16];
            counts.copy_from_slice(&seg[at..at + 16]);
            at += 16;
            let total: usize = counts.iter().map(|&c| usize::from(c)).sum();
            if total > 256 || at + total > seg.len() {
                return Err(DecodeError::Truncated(FORMAT));
            }
            let table = HuffTable::build(&counts, &seg[at..at + total])?;
            at += total;
            if tc == 0 {
                self.huff_dc[th] = Some(table);
            } else {
                self.huff_ac[th] = Some(table);
            }
        }
        Ok(())
    }

    // ── Scan decoding ───────────────────────────────────────────────

    /// Decode one SOS segment plus its entropy-coded data; returns the
    /// position of the marker ending the scan.
    fn decode_scan(&mut self, pos: usize) -> Result<usize, DecodeError> {
        let data = self.data;
        let len = read_u16_be(data, pos)?;
        if len < 2 || pos + len > data.len() {
            return Err(DecodeError::Truncated(FORMAT));
        }
        let seg = &data[pos + 2..pos + len];
        let mut frame = self
            .frame
            .take()
            .ok_or(DecodeError::corrupt(FORMAT, "scan before frame header"))?;

        if seg.is_empty() {
            return Err(DecodeError::Truncated(FORMAT));
        }
        let ns = usize::from(seg[0]);
        if ns == 0 || ns > frame.num_comp || seg.len() < 1 + ns * 2 + 3 {
            return Err(DecodeError::corrupt(FORMAT, "bad scan header"));
        }

        // Map scan components to frame components.
        let mut scan_comps = [0usize; 3];
        for (i, slot) in scan_comps.iter_mut().enumerate().take(ns) {
            let id = seg[1 + i * 2];
            let tables = seg[2 + i * 2];
            let c = frame
                .comps
                .iter()
                .take(frame.num_comp)
                .position(|comp| comp.id == id)
                .ok_or(DecodeError::corrupt(
                    FORMAT,
                    "scan references unknown component",
                ))?;
            frame.comps[c].dc_table = usize::from(tables >> 4);
            frame.comps[c].ac_table = usize::from(tables & 0x0F);
            if frame.comps[c].dc_table > 3 || frame.comps[c].ac_table > 3 {
                return Err(DecodeError::corrupt(FORMAT, "bad scan table index"));
            }
            *slot = c;
        }

        let ss = usize::from(seg[1 + ns * 2]);
        let se = usize::from(seg[2 + ns * 2]);
        let ah = i32::from(seg[3 + ns * 2] >> 4);
        let al = i32::from(seg[3 + ns * 2] & 0x0F);

        if frame.progressive {
            if ss > 63 || se > 63 || ss > se || al > 13 {
                return Err(DecodeError::corrupt(FORMAT, "bad spectral selection"));
            }
            if ss == 0 && se != 0 {
                return Err(DecodeError::corrupt(FORMAT, "DC scan with AC band"));
            }
            if ss != 0 && ns != 1 {
                return Err(DecodeError::corrupt(FORMAT, "interleaved AC scan"));
            }
        } else if ss != 0 || se != 63 || ah != 0 || al != 0 {
            return Err(DecodeError::corrupt(FORMAT, "bad sequential scan parameters"));
        }

        for c in frame.comps.iter_mut().take(frame.num_comp) {
            c.dc_pred = 0;
        }
        self.eob_run = 0;

        let mut bits = BitReader::new(data, pos + len);
        let restart = self.restart_interval;
        let mut until_restart = restart;

        if ns == 1 {
            let c = scan_comps[0];
            let comp = frame.comps[c];
            let bw = comp.samples_w.div_ceil(8);
            let bh = comp.samples_h.div_ceil(8);
            for by in 0..bh {
                for bx in 0..bw {
                    if restart > 0 && until_restart == 0 {
                        bits.restart()?;
                        frame.comps[c].dc_pred = 0;
                        self.eob_run = 0;
                        until_restart = restart;
                    }
                    let base = (by * comp.blocks_w + bx) * 64;
                    self.decode_block(&mut bits, &mut frame, c, base, ss, se, ah, al)?;
                    until_restart = until_restart.saturating_sub(1);
                }
            }
        } else {
            for mcu_y in 0..frame.mcus_y {
                for mcu_x in 0..frame.mcus_x {
                    if restart > 0 && until_restart == 0 {
                        bits.restart()?;
                        for comp in frame.comps.iter_mut().take(frame.num_comp) {
                            comp.dc_pred = 0;
                        }
                        self.eob_run = 0;
                        until_restart = restart;
                    }
                    for i in 0..ns {
                        let c = scan_comps[i];
                        let comp = frame.comps[c];
                        for bv in 0..comp.v {
                            for bh_i in 0..comp.h {
                                let bx = mcu_x * comp.h + bh_i;
                                let by = mcu_y * comp.v + bv;
                                let base = (by * comp.blocks_w + bx) * 64;
                                self.decode_block(
                                    &mut bits, &mut frame, c, base, ss, se, ah, al,
                                )?;
                            }
                        }
                    }
                    until_restart = until_restart.saturating_sub(1);
                }
            }
        }

        if bits.truncated {
            return Err(DecodeError::Truncated(FORMAT));
        }

        self.frame = Some(frame);

        // Find the marker ending this scan.
        let mut at = bits.pos;
        while at + 1 < data.len() {
            if data[at] == 0xFF && data[at + 1] != 0x00 {
                return Ok(at);
            }
            at += 1;
        }
        Err(DecodeError::Truncated(FORMAT))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_block(
        &mut self,
        bits: &mut BitReader,
        frame: &mut Frame,
        c: usize,
        base: usize,
        ss: usize,
        se: usize,
        ah: i32,
        al: i32,
    ) -> Result<(), DecodeError> {
        if !frame.progressive {
            self.decode_block_dc(bits, frame, c, base, true, 0)?;
            return self.decode_block_ac_first(bits, frame.comps[c].ac_table, c, base, 1, 63, 0);
        }
        if ss == 0 {
            self.decode_block_dc(bits, frame, c, base, ah == 0, al)
        } else if ah == 0 {
            self.decode_block_ac_first(bits, frame.comps[c].ac_table, c, base, ss, se, al)
        } else {
            self.decode_block_ac_refine(bits, frame.comps[c].ac_table, c, base, ss, se, al)
        }
    }

    fn decode_block_dc(
        &mut self,
        bits: &mut BitReader,
        frame: &mut Frame,
        c: usize,
        base: usize,
        first: bool,
        al: i32,
    ) -> Result<(), DecodeError> {
        let Decoder {
            huff_dc, coeffs, ..
        } = self;
        let coeffs = coeffs[c]
            .as_mut()
            .ok_or(DecodeError::corrupt(FORMAT, "scan before frame header"))?;
        if first {
            let table = huff_dc[frame.comps[c].dc_table]
                .as_ref()
                .ok_or(DecodeError::corrupt(FORMAT, "missing DC table"))?;
            let size = bits.decode_huff(table)?;
            if size > 15 {
                return Err(DecodeError::corrupt(FORMAT, "bad DC size"));
            }
            let diff = bits.receive_extend(i32::from(size));
            frame.comps[c].dc_pred += diff;
            coeffs.set(base, (frame.comps[c].dc_pred << al) as i16);
        } else if bits.read_bit() != 0 {
            let cur = coeffs.get(base);
            coeffs.set(base, cur | (1 << al) as i16);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_block_ac_first(
        &mut self,
        bits: &mut BitReader,
        ac_table: usize,
        c: usize,
        base: usize,
        ss: usize,
        se: usize,
        al: i32,
    ) -> Result<(), DecodeError> {
        if self.eob_run > 0 {
            self.eob_run -= 1;
            return Ok(());
        }
        let Decoder {
            huff_ac,
            coeffs,
            eob_run,
            ..
        } = self;
        let table = huff_ac[ac_table]
            .as_ref()
            .ok_or(DecodeError::corrupt(FORMAT, "missing AC table"))?;
        let coeffs = coeffs[c]
            .as_mut()
            .ok_or(DecodeError::corrupt(FORMAT, "scan before frame header"))?;

        let mut k = ss;
        loop {
            let rs = bits.decode_huff(table)?;
            let run = usize::from(rs >> 4);
            let size = i32::from(rs & 0x0F);
            if size == 0 {
                if run < 15 {
                    // EOB run: this block plus `2^run - 1 + bits` more.
                    *eob_run = (1 << run) - 1;
                    if run > 0 {
                        *eob_run += bits.read_bits(run as i32);
                    }
                    return Ok(());
                }
                k += 16;
            } else {
                k += run;
                if k > se {
                    return Err(DecodeError::corrupt(FORMAT, "AC run past band end"));
                }
                let value = bits.receive_extend(size) << al;
                coeffs.set(base + usize::from(ZIGZAG[k]), value as i16);
                k += 1;
            }
            if k > se {
                return Ok(());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_block_ac_refine(
        &mut self,
        bits: &mut BitReader,
        ac_table: usize,
        c: usize,
        base: usize,
        ss: usize,
        se: usize,
        al: i32,
    ) -> Result<(), DecodeError> {
        let bit = (1i32 << al) as i16;
        let Decoder {
            huff_ac,
            coeffs,
            eob_run,
            ..
        } = self;
        let coeffs = coeffs[c]
            .as_mut()
            .ok_or(DecodeError::corrupt(FORMAT, "scan before frame header"))?;

        if *eob_run > 0 {
            *eob_run -= 1;
            for k in ss..=se {
                let at = base + usize::from(ZIGZAG[k]);
                let cur = coeffs.get(at);
                if cur != 0 && bits.read_bit() != 0 && (cur & bit) == 0 {
                    coeffs.set(at, if cur > 0 { cur + bit } else { cur - bit });
                }
            }
            return Ok(());
        }

        let table = huff_ac[ac_table]
            .as_ref()
            .ok_or(DecodeError::corrupt(FORMAT, "missing AC table"))?;

        let mut k = ss;
        while k <= se {
            let rs = bits.decode_huff(table)?;
            let mut run = i32::from(rs >> 4);
            let size = rs & 0x0F;
            let mut value: i16 = 0;
            let mut ending = false;
            if size == 0 {
                if run < 15 {
                    *eob_run = (1 << run) - 1;
                    if run > 0 {
                        *eob_run += bits.read_bits(run);
                    }
                    // Refine the rest of the band before the run starts.
                    run = 64;
                    ending = true;
                }
                // run == 15 skips 16 zero-history coefficients.
            } else {
                if size != 1 {
                    return Err(DecodeError::corrupt(FORMAT, "bad AC refinement size"));
                }
                value = if bits.read_bit() != 0 { bit } else { -bit };
            }

            while k <= se {
                let at = base + usize::from(ZIGZAG[k]);
                k += 1;
                let cur = coeffs.get(at);
                if cur != 0 {
                    if bits.read_bit() != 0 && (cur & bit) == 0 {
                        coeffs.set(at, if cur > 0 { cur + bit } else { cur - bit });
                    }
                } else {
                    if run == 0 {
                        if value != 0 {
                            coeffs.set(at, value);
                        }
                        break;
                    }
                    run -= 1;
                }
            }
            if ending {
                return Ok(());
            }
        }
        Ok(())
    }
}

// ── Probe / decode entry points ─────────────────────────────────────

fn frame_info(frame: &Frame) -> ImageInfo {
    ImageInfo {
        width: frame.width as u32,
        height: frame.height as u32,
        channels: frame.num_comp as u8,
        depth: SampleDepth::Eight,
        format: ImageFormat::Jpeg,
    }
}

pub(crate) fn probe(data: &[u8]) -> Result<ImageInfo, DecodeError> {
    let dec = parse(data, None)?;
    let frame = dec
        .frame
        .as_ref()
        .ok_or(DecodeError::corrupt(FORMAT, "missing frame header"))?;
    Ok(frame_info(frame))
}

pub(crate) fn decode<'a>(
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    let dec = parse(data, Some(req))?;
    let frame = dec
        .frame
        .as_ref()
        .ok_or(DecodeError::corrupt(FORMAT, "missing frame header"))?;
    let info = frame_info(frame);

    let out_size = checked_output_size(info.width, info.height, frame.num_comp, 1)?;
    req.limits.check_alloc(out_size)?;

    // Dequantize and transform every block into sample planes.
    let mut planes: [Option<ByteVec<'a>>; 3] = [None, None, None];
    let mut block = [0i32; 64];
    for c in 0..frame.num_comp {
        let comp = &frame.comps[c];
        let plane_w = comp.blocks_w * 8;
        let plane_h = comp.blocks_h * 8;
        req.limits.check_alloc(plane_w * plane_h)?;
        let mut plane = ByteVec::zeroed(req.alloc, plane_w * plane_h)?;
        let coeffs = dec.coeffs[c]
            .as_ref()
            .ok_or(DecodeError::corrupt(FORMAT, "missing frame header"))?;
        let quant = &dec.quant[comp.quant];

        for by in 0..comp.blocks_h {
            for bx in 0..comp.blocks_w {
                let base = (by * comp.blocks_w + bx) * 64;
                for (i, slot) in block.iter_mut().enumerate() {
                    *slot = i32::from(coeffs.get(base + i)) * i32::from(quant[i]);
                }
                idct(&mut block);

                let samples = plane.as_mut_slice();
                for row in 0..8 {
                    for col in 0..8 {
                        let value = clamp_u8(block[row * 8 + col] + 128);
                        samples[(by * 8 + row) * plane_w + bx * 8 + col] = value;
                    }
                }
            }
        }
        planes[c] = Some(plane);
    }

    let mut out = ByteVec::zeroed(req.alloc, out_size)?;
    let pixels = out.as_mut_slice();
    let (width, height) = (frame.width, frame.height);

    if frame.num_comp == 1 {
        let plane = planes[0].as_ref().ok_or(DecodeError::OutOfMemory)?;
        let plane_w = frame.comps[0].blocks_w * 8;
        for y in 0..height {
            let row = &plane.as_slice()[y * plane_w..y * plane_w + width];
            pixels[y * width..(y + 1) * width].copy_from_slice(row);
        }
    } else {
        // Adobe transform 0 marks the components as already RGB.
        let ycbcr = dec.adobe_transform.unwrap_or(1) != 0;
        let p0 = planes[0].as_ref().ok_or(DecodeError::OutOfMemory)?;
        let p1 = planes[1].as_ref().ok_or(DecodeError::OutOfMemory)?;
        let p2 = planes[2].as_ref().ok_or(DecodeError::OutOfMemory)?;
        let (p0, w0) = (p0.as_slice(), frame.comps[0].blocks_w * 8);
        let (p1, w1) = (p1.as_slice(), frame.comps[1].blocks_w * 8);
        let (p2, w2) = (p2.as_slice(), frame.comps[2].blocks_w * 8);

        for y in 0..height {
            for x in 0..width {
                // Nearest-neighbor upsampling per component.
                let sample = |c: usize, data: &[u8], stride: usize| {
                    let sx = x * frame.comps[c].h / frame.max_h;
                    let sy = y * frame.comps[c].v / frame.max_v;
                    i32::from(data[sy * stride + sx])
                };
                let c0 = sample(0, p0, w0);
                let c1 = sample(1, p1, w1);
                let c2 = sample(2, p2, w2);

                let (r, g, b) = if ycbcr {
                    let (cb, cr) = (c1 - 128, c2 - 128);
                    // Q10 fixed point: 1.402, 0.344, 0.714, 1.772.
                    (
                        c0 + ((cr * 1436) >> 10),
                        c0 - ((cb * 352) >> 10) - ((cr * 731) >> 10),
                        c0 + ((cb * 1815) >> 10),
                    )
                } else {
                    (c0, c1, c2)
                };

                let at = (y * width + x) * 3;
                pixels[at] = clamp_u8(r);
                pixels[at + 1] = clamp_u8(g);
                pixels[at + 2] = clamp_u8(b);
            }
        }
    }

    Ok((out, info))
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

// ── Fixed-point inverse DCT ─────────────────────────────────────────
//
// Loeffler-Ligtenberg-Moschytz with 13-bit constants and a 2-bit
// intermediate scale, the classic accurate integer form.

const CONST_BITS: i32 = 13;
const PASS1_BITS: i32 = 2;

const FIX_0_298: i32 = 2446;
const FIX_0_390: i32 = 3196;
const FIX_0_541: i32 = 4433;
const FIX_0_765: i32 = 6270;
const FIX_0_899: i32 = 7373;
const FIX_1_175: i32 = 9633;
const FIX_1_501: i32 = 12299;
const FIX_1_847: i32 = 15137;
const FIX_1_961: i32 = 16069;
const FIX_2_053: i32 = 16819;
const FIX_2_562: i32 = 20995;
const FIX_3_072: i32 = 25172;

#[inline]
fn descale(x: i32, n: i32) -> i32 {
    (x + (1 << (n - 1))) >> n
}

/// Even/odd butterflies shared by both passes. Outputs pair as
/// `e[i] ± t[3-i]` for samples `i` and `7-i`.
fn idct_kernel(s: [i32; 8]) -> ([i32; 4], [i32; 4]) {
    // Even part
    let z1 = (s[2] + s[6]) * FIX_0_541;
    let k2 = z1 - s[6] * FIX_1_847;
    let k3 = z1 + s[2] * FIX_0_765;
    let a0 = (s[0] + s[4]) << CONST_BITS;
    let a1 = (s[0] - s[4]) << CONST_BITS;
    let e = [a0 + k3, a1 + k2, a1 - k2, a0 - k3];

    // Odd part
    let z1 = s[7] + s[1];
    let z2 = s[5] + s[3];
    let z3 = s[7] + s[3];
    let z4 = s[5] + s[1];
    let z5 = (z3 + z4) * FIX_1_175;

    let mut t0 = s[7] * FIX_0_298;
    let mut t1 = s[5] * FIX_2_053;
    let mut t2 = s[3] * FIX_3_072;
    let mut t3 = s[1] * FIX_1_501;

    let z1 = z1 * -FIX_0_899;
    let z2 = z2 * -FIX_2_562;
    let z3 = z3 * -FIX_1_961 + z5;
    let z4 = z4 * -FIX_0_390 + z5;

    t0 += z1 + z3;
    t1 += z2 + z4;
    t2 += z2 + z3;
    t3 += z1 + z4;

    (e, [t0, t1, t2, t3])
}

fn idct(block: &mut [i32; 64]) {
    // Row pass, scaled up by PASS1_BITS.
    for row in 0..8 {
        let base = row * 8;
        let s: [i32; 8] = core::array::from_fn(|i| block[base + i]);
        if s[1..] == [0; 7] {
            block[base..base + 8].fill(s[0] << PASS1_BITS);
            continue;
        }
        let (e, t) = idct_kernel(s);
        let shift = CONST_BITS - PASS1_BITS;
        for i in 0..4 {
            block[base + i] = descale(e[i] + t[3 - i], shift);
            block[base + 7 - i] = descale(e[i] - t[3 - i], shift);
        }
    }

    // Column pass, removing both scale factors plus the DCT's own 8.
    for col in 0..8 {
        let s: [i32; 8] = core::array::from_fn(|i| block[i * 8 + col]);
        if s[1..] == [0; 7] {
            let dc = descale(s[0], PASS1_BITS + 3);
            for i in 0..8 {
                block[i * 8 + col] = dc;
            }
            continue;
        }
        let (e, t) = idct_kernel(s);
        let shift = CONST_BITS + PASS1_BITS + 3;
        for i in 0..4 {
            block[i * 8 + col] = descale(e[i] + t[3 - i], shift);
            block[(7 - i) * 8 + col] = descale(e[i] - t[3 - i], shift);
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

    fn segment(out: &mut Vec<u8>, marker: u8, payload: &[u8]) {
        let len = payload.len() + 2;
        out.extend_from_slice(&[0xFF, marker, (len >> 8) as u8, len as u8]);
        out.extend_from_slice(payload);
    }

    fn dqt(out: &mut Vec<u8>, dc_quant: u8) {
        let mut payload = [1u8; 65];
        payload[0] = 0x00; // 8-bit, table 0
        payload[1] = dc_quant;
        segment(out, M_DQT, &payload);
    }

    /// One table with a single 1-bit code (`0`) for `symbol`.
    fn dht(out: &mut Vec<u8>, class: u8, symbol: u8) {
        let mut payload = [0u8; 18];
        payload[0] = class << 4;
        payload[1] = 1; // one code of length 1
        payload[17] = symbol;
        segment(out, M_DHT, &payload);
    }

    fn sof(out: &mut Vec<u8>, marker: u8, width: u16, height: u16) {
        let payload = [
            8,
            (height >> 8) as u8,
            height as u8,
            (width >> 8) as u8,
            width as u8,
            1,
            1,
            0x11,
            0,
        ];
        segment(out, marker, &payload);
    }

    fn sos(out: &mut Vec<u8>, ss: u8, se: u8) {
        segment(out, M_SOS, &[1, 1, 0x00, ss, se, 0]);
    }

    /// 8x8 grayscale baseline file; `dc_sym` is the sole DC symbol.
    fn gray_baseline(dc_quant: u8, dc_sym: u8, entropy: &[u8]) -> Vec<u8> {
        let mut out = alloc::vec![0xFF, M_SOI];
        dqt(&mut out, dc_quant);
        sof(&mut out, M_SOF0, 8, 8);
        dht(&mut out, 0, dc_sym);
        dht(&mut out, 1, 0x00);
        sos(&mut out, 0, 63);
        out.extend_from_slice(entropy);
        out.extend_from_slice(&[0xFF, M_EOI]);
        out
    }

    #[test]
    fn empty_block_is_flat_gray() {
        // DC code `0` (zero diff), AC code `0` (EOB): two bits.
        let file = gray_baseline(1, 0x00, &[0x00]);
        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!((info.width, info.height, info.channels), (8, 8, 1));
        assert!(pixels.as_slice().iter().all(|&p| p == 128));
    }

    #[test]
    fn dc_coefficient_shifts_level() {
        // DC size 2, magnitude bits `10` = +2; quantizer 32 makes the
        // coefficient 64, a level shift of 64/8 = 8.
        let file = gray_baseline(32, 0x02, &[0x40]);
        let (pixels, _) = decode(&file, &request()).unwrap();
        assert!(pixels.as_slice().iter().all(|&p| p == 136));
    }

    #[test]
    fn progressive_dc_then_ac_scan() {
        let mut file = alloc::vec![0xFF, M_SOI];
        dqt(&mut file, 1);
        sof(&mut file, M_SOF2, 8, 8);
        dht(&mut file, 0, 0x00);
        dht(&mut file, 1, 0x00);
        // DC scan: one bit (zero diff).
        sos(&mut file, 0, 0);
        file.push(0x00);
        // AC scan 1..63: one EOB code.
        sos(&mut file, 1, 63);
        file.push(0x00);
        file.extend_from_slice(&[0xFF, M_EOI]);

        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!(info.channels, 1);
        assert!(pixels.as_slice().iter().all(|&p| p == 128));
    }

    #[test]
    fn restart_markers_between_mcus() {
        let mut file = alloc::vec![0xFF, M_SOI];
        dqt(&mut file, 1);
        segment(&mut file, M_DRI, &[0, 1]); // restart every MCU
        sof(&mut file, M_SOF0, 8, 16);
        dht(&mut file, 0, 0x00);
        dht(&mut file, 1, 0x00);
        sos(&mut file, 0, 63);
        file.push(0x00); // first block
        file.extend_from_slice(&[0xFF, 0xD0]); // RST0
        file.push(0x00); // second block
        file.extend_from_slice(&[0xFF, M_EOI]);

        let (pixels, info) = decode(&file, &request()).unwrap();
        assert_eq!((info.width, info.height), (8, 16));
        assert!(pixels.as_slice().iter().all(|&p| p == 128));
    }

    #[test]
    fn probe_reads_color_frame_header() {
        let mut file = alloc::vec![0xFF, M_SOI];
        let payload = [
            8, 0, 9, 0, 16, 3, // 16x9, three components
            1, 0x22, 0, 2, 0x11, 0, 3, 0x11, 0,
        ];
        segment(&mut file, M_SOF0, &payload);
        // Probing stops at SOS without touching the scan payload.
        file.extend_from_slice(&[0xFF, M_SOS]);

        let info = probe(&file).unwrap();
        assert_eq!((info.width, info.height, info.channels), (16, 9, 3));
        assert_eq!(info.depth, SampleDepth::Eight);
    }

    #[test]
    fn truncated_entropy_stream_is_reported() {
        let mut file = gray_baseline(1, 0x00, &[]);
        file.truncate(file.len() - 2); // drop EOI; scan data runs off the end
        assert_eq!(
            decode(&file, &request()),
            Err(DecodeError::Truncated(FORMAT))
        );
    }

    #[test]
    fn lossless_process_rejected() {
        let mut file = alloc::vec![0xFF, M_SOI];
        sof(&mut file, 0xC3, 8, 8);
        assert!(matches!(
            decode(&file, &request()),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn twelve_bit_precision_rejected() {
        let mut file = alloc::vec![0xFF, M_SOI];
        let payload = [12, 0, 8, 0, 8, 1, 1, 0x11, 0];
        segment(&mut file, M_SOF0, &payload);
        assert!(matches!(probe(&file), Err(DecodeError::Unsupported { .. })));
    }

    #[test]
    fn signature_detection() {
        assert!(test(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!test(&[0xFF, 0xD8]));
        assert!(!test(b"\x89PNG"));
    }
}
