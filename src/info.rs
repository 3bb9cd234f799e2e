use crate::error::DecodeError;

/// Image format detected from the input.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JPEG (baseline or progressive DCT).
    Jpeg,
    /// PNG.
    Png,
    /// BMP (Windows bitmap).
    Bmp,
    /// GIF (first image frame).
    Gif,
    /// TGA (Targa).
    Tga,
    /// Photoshop PSD (composited image data).
    Psd,
    /// Radiance HDR/RGBE.
    Hdr,
    /// Softimage PIC.
    Pic,
    /// Binary PGM (P5) / PPM (P6).
    Pnm,
}

impl ImageFormat {
    /// Short lowercase name used in error context.
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Gif => "gif",
            ImageFormat::Tga => "tga",
            ImageFormat::Psd => "psd",
            ImageFormat::Hdr => "hdr",
            ImageFormat::Pic => "pic",
            ImageFormat::Pnm => "pnm",
        }
    }
}

/// Bits per decoded sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleDepth {
    /// 8-bit unsigned samples.
    Eight,
    /// 16-bit unsigned samples, native endian.
    Sixteen,
    /// 32-bit float samples, native endian (HDR).
    F32,
}

impl SampleDepth {
    /// Bytes per sample.
    pub fn bytes(self) -> usize {
        match self {
            SampleDepth::Eight => 1,
            SampleDepth::Sixteen => 2,
            SampleDepth::F32 => 4,
        }
    }
}

/// Requested output channel count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Channels {
    /// Whatever the source image carries natively.
    #[default]
    Native,
    /// 1 channel: grayscale.
    Gray,
    /// 2 channels: grayscale + alpha.
    GrayAlpha,
    /// 3 channels: RGB.
    Rgb,
    /// 4 channels: RGBA.
    Rgba,
}

impl Channels {
    /// Channel count, or `None` for [`Channels::Native`].
    pub fn count(self) -> Option<u8> {
        match self {
            Channels::Native => None,
            Channels::Gray => Some(1),
            Channels::GrayAlpha => Some(2),
            Channels::Rgb => Some(3),
            Channels::Rgba => Some(4),
        }
    }
}

/// Decoded (or probed) image description.
///
/// `width` and `height` always match the format's own header fields;
/// `channels` and `depth` describe the native sample layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Native channel count, 1..=4.
    pub channels: u8,
    pub depth: SampleDepth,
    pub format: ImageFormat,
}

impl ImageInfo {
    /// Probe image dimensions and layout from header bytes without
    /// decoding pixel data. Performs no allocation.
    pub fn from_bytes(data: &[u8]) -> Result<ImageInfo, DecodeError> {
        let format = crate::sniff::detect(data).ok_or(DecodeError::UnsupportedFormat)?;
        match format {
            #[cfg(feature = "jpeg")]
            ImageFormat::Jpeg => crate::jpeg::probe(data),
            #[cfg(feature = "png")]
            ImageFormat::Png => crate::png::probe(data),
            #[cfg(feature = "bmp")]
            ImageFormat::Bmp => crate::bmp::probe(data),
            #[cfg(feature = "gif")]
            ImageFormat::Gif => crate::gif::probe(data),
            #[cfg(feature = "tga")]
            ImageFormat::Tga => crate::tga::probe(data),
            #[cfg(feature = "psd")]
            ImageFormat::Psd => crate::psd::probe(data),
            #[cfg(feature = "hdr")]
            ImageFormat::Hdr => crate::hdr::probe(data),
            #[cfg(feature = "pic")]
            ImageFormat::Pic => crate::pic::probe(data),
            #[cfg(feature = "pnm")]
            ImageFormat::Pnm => crate::pnm::probe(data),
            #[allow(unreachable_patterns)]
            _ => Err(DecodeError::UnsupportedFormat),
        }
    }
}
