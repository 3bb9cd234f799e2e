//! Pixel assembler: converts the native interleaved channel layout into
//! the caller-requested channel count.
//!
//! The conversion table is deterministic: synthesized alpha is always the
//! depth's maximum (full opacity), dropped alpha is simply discarded, and
//! color→gray uses the 77/150/29 integer luma weights (0.299/0.587/0.114
//! for float samples).

use crate::error::DecodeError;
use crate::info::{Channels, ImageInfo, SampleDepth};
use crate::limits::{Limits, checked_output_size};
use crate::mem::ByteVec;

trait Sample: Copy + Default {
    const MAX: Self;
    const BYTES: usize;
    fn load(bytes: &[u8]) -> Self;
    fn store(self, bytes: &mut [u8]);
    fn luma(r: Self, g: Self, b: Self) -> Self;
}

impl Sample for u8 {
    const MAX: u8 = 255;
    const BYTES: usize = 1;
    fn load(bytes: &[u8]) -> u8 {
        bytes[0]
    }
    fn store(self, bytes: &mut [u8]) {
        bytes[0] = self;
    }
    fn luma(r: u8, g: u8, b: u8) -> u8 {
        ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u8
    }
}

impl Sample for u16 {
    const MAX: u16 = 65535;
    const BYTES: usize = 2;
    fn load(bytes: &[u8]) -> u16 {
        u16::from_ne_bytes([bytes[0], bytes[1]])
    }
    fn store(self, bytes: &mut [u8]) {
        bytes[..2].copy_from_slice(&self.to_ne_bytes());
    }
    fn luma(r: u16, g: u16, b: u16) -> u16 {
        ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u16
    }
}

impl Sample for f32 {
    const MAX: f32 = 1.0;
    const BYTES: usize = 4;
    fn load(bytes: &[u8]) -> f32 {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
    fn store(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_ne_bytes());
    }
    fn luma(r: f32, g: f32, b: f32) -> f32 {
        r * 0.299 + g * 0.587 + b * 0.114
    }
}

fn convert_typed<T: Sample>(src: &[u8], dst: &mut [u8], n_from: usize, n_to: usize) {
    let src_px = n_from * T::BYTES;
    let dst_px = n_to * T::BYTES;

    for (sp, dp) in src.chunks_exact(src_px).zip(dst.chunks_exact_mut(dst_px)) {
        let mut c = [T::default(); 4];
        for (i, chunk) in sp.chunks_exact(T::BYTES).enumerate() {
            c[i] = T::load(chunk);
        }

        // Interpret native channels: 1 = G, 2 = GA, 3 = RGB, 4 = RGBA.
        let (r, g, b, a) = match n_from {
            1 => (c[0], c[0], c[0], T::MAX),
            2 => (c[0], c[0], c[0], c[1]),
            3 => (c[0], c[1], c[2], T::MAX),
            _ => (c[0], c[1], c[2], c[3]),
        };
        // Gray sources pass through unchanged; only color collapses to luma.
        let gray = if n_from <= 2 { c[0] } else { T::luma(r, g, b) };

        let out: [T; 4] = match n_to {
            1 => [gray, T::default(), T::default(), T::default()],
            2 => [gray, a, T::default(), T::default()],
            3 => [r, g, b, T::default()],
            _ => [r, g, b, a],
        };
        for (i, chunk) in dp.chunks_exact_mut(T::BYTES).enumerate() {
            out[i].store(chunk);
        }
    }
}

/// Convert `native` (laid out per `info`) to the requested channel count,
/// allocating the output through the same allocator. Returns the buffer
/// unchanged when no conversion is needed, along with the output channel
/// count.
pub(crate) fn to_requested<'a>(
    native: ByteVec<'a>,
    info: &ImageInfo,
    requested: Channels,
    limits: &Limits,
) -> Result<(ByteVec<'a>, u8), DecodeError> {
    let Some(n_to) = requested.count() else {
        return Ok((native, info.channels));
    };
    if n_to == info.channels {
        return Ok((native, info.channels));
    }

    let out_size = checked_output_size(
        info.width,
        info.height,
        usize::from(n_to),
        info.depth.bytes(),
    )?;
    limits.check_alloc(out_size)?;

    let mut out = ByteVec::zeroed(native.allocator(), out_size)?;
    let n_from = usize::from(info.channels);
    match info.depth {
        SampleDepth::Eight => {
            convert_typed::<u8>(native.as_slice(), out.as_mut_slice(), n_from, usize::from(n_to));
        }
        SampleDepth::Sixteen => {
            convert_typed::<u16>(native.as_slice(), out.as_mut_slice(), n_from, usize::from(n_to));
        }
        SampleDepth::F32 => {
            convert_typed::<f32>(native.as_slice(), out.as_mut_slice(), n_from, usize::from(n_to));
        }
    }
    // `native` drops here, releasing the intermediate plane buffer.
    Ok((out, n_to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::ImageFormat;

    fn info(w: u32, h: u32, channels: u8, depth: SampleDepth) -> ImageInfo {
        ImageInfo {
            width: w,
            height: h,
            channels,
            depth,
            format: ImageFormat::Pnm,
        }
    }

    fn bytevec(data: &[u8]) -> ByteVec<'static> {
        let mut v = ByteVec::new(&crate::mem::GLOBAL);
        v.extend_from_slice(data).unwrap();
        v
    }

    #[test]
    fn gray_to_rgba_replicates_and_synthesizes_opaque_alpha() {
        let native = bytevec(&[0, 85, 170, 255]);
        let (out, n) = to_requested(
            native,
            &info(2, 2, 1, SampleDepth::Eight),
            Channels::Rgba,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(n, 4);
        #[rustfmt::skip]
        assert_eq!(
            out.as_slice(),
            &[
                0, 0, 0, 255,       85, 85, 85, 255,
                170, 170, 170, 255, 255, 255, 255, 255,
            ]
        );
    }

    #[test]
    fn rgba_to_rgb_drops_alpha() {
        let native = bytevec(&[1, 2, 3, 200, 4, 5, 6, 100]);
        let (out, n) = to_requested(
            native,
            &info(2, 1, 4, SampleDepth::Eight),
            Channels::Rgb,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(out.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn rgb_to_gray_uses_stb_luma_weights() {
        let native = bytevec(&[255, 255, 255, 255, 0, 0]);
        let (out, _) = to_requested(
            native,
            &info(2, 1, 3, SampleDepth::Eight),
            Channels::Gray,
            &Limits::default(),
        )
        .unwrap();
        // white -> (255*77 + 255*150 + 255*29) >> 8 = 255*256 >> 8 = 255
        // pure red -> 255*77 >> 8 = 76
        assert_eq!(out.as_slice(), &[255, 76]);
    }

    #[test]
    fn native_request_is_identity() {
        let native = bytevec(&[9, 8, 7]);
        let (out, n) = to_requested(
            native,
            &info(1, 1, 3, SampleDepth::Eight),
            Channels::Native,
            &Limits::default(),
        )
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(out.as_slice(), &[9, 8, 7]);
    }

    #[test]
    fn sixteen_bit_gray_alpha_from_gray() {
        let g: u16 = 0x1234;
        let native = bytevec(&g.to_ne_bytes());
        let (out, _) = to_requested(
            native,
            &info(1, 1, 1, SampleDepth::Sixteen),
            Channels::GrayAlpha,
            &Limits::default(),
        )
        .unwrap();
        let gray = u16::from_ne_bytes([out.as_slice()[0], out.as_slice()[1]]);
        let alpha = u16::from_ne_bytes([out.as_slice()[2], out.as_slice()[3]]);
        assert_eq!(gray, 0x1234);
        assert_eq!(alpha, 65535);
    }

    #[test]
    fn f32_gray_to_rgb() {
        let native = bytevec(&0.5f32.to_ne_bytes());
        let (out, _) = to_requested(
            native,
            &info(1, 1, 1, SampleDepth::F32),
            Channels::Rgb,
            &Limits::default(),
        )
        .unwrap();
        let vals: alloc::vec::Vec<f32> = out
            .as_slice()
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vals, alloc::vec![0.5, 0.5, 0.5]);
    }
}
