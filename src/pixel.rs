//! Typed pixel support for the `rgb` crate's pixel structs.

use crate::info::SampleDepth;

/// Pixel types a [`DecodeOutput`](crate::DecodeOutput) can be viewed as.
pub trait DecodePixel: Copy {
    const CHANNELS: u8;
    const DEPTH: SampleDepth;
}

impl DecodePixel for rgb::RGB8 {
    const CHANNELS: u8 = 3;
    const DEPTH: SampleDepth = SampleDepth::Eight;
}

impl DecodePixel for rgb::RGBA8 {
    const CHANNELS: u8 = 4;
    const DEPTH: SampleDepth = SampleDepth::Eight;
}

impl DecodePixel for rgb::RGB16 {
    const CHANNELS: u8 = 3;
    const DEPTH: SampleDepth = SampleDepth::Sixteen;
}

impl DecodePixel for rgb::RGBA16 {
    const CHANNELS: u8 = 4;
    const DEPTH: SampleDepth = SampleDepth::Sixteen;
}
