use crate::convert;
use crate::error::DecodeError;
use crate::info::{Channels, ImageFormat, ImageInfo, SampleDepth};
use crate::limits::Limits;
use crate::mem::{Allocator, ByteVec, GLOBAL};
use crate::sniff;

/// Per-decode context threaded into every component that allocates.
pub(crate) struct Request<'a> {
    pub channels: Channels,
    pub limits: Limits,
    pub alloc: &'a dyn Allocator,
}

/// A decode operation under construction.
///
/// ```no_run
/// use rasterdec::{Channels, DecodeRequest};
///
/// let data: &[u8] = &[]; // your encoded image bytes
/// let out = DecodeRequest::new(data)
///     .channels(Channels::Rgba)
///     .decode()?;
/// println!("{}x{} {:?}", out.width, out.height, out.format());
/// # Ok::<(), rasterdec::DecodeError>(())
/// ```
pub struct DecodeRequest<'d, 'a> {
    data: &'d [u8],
    req: Request<'a>,
}

impl<'d> DecodeRequest<'d, 'static> {
    /// Decode through the process global allocator.
    pub fn new(data: &'d [u8]) -> Self {
        DecodeRequest {
            data,
            req: Request {
                channels: Channels::Native,
                limits: Limits::default(),
                alloc: &GLOBAL,
            },
        }
    }
}

impl<'d, 'a> DecodeRequest<'d, 'a> {
    /// Requested output channel count (default: native).
    pub fn channels(mut self, channels: Channels) -> Self {
        self.req.channels = channels;
        self
    }

    /// Resource limits (default: [`Limits::default`]).
    pub fn limits(mut self, limits: Limits) -> Self {
        self.req.limits = limits;
        self
    }

    /// Route every allocation this decode makes through `alloc`. The
    /// returned pixels are released through the same allocator on drop.
    pub fn allocator<'b>(self, alloc: &'b dyn Allocator) -> DecodeRequest<'d, 'b> {
        DecodeRequest {
            data: self.data,
            req: Request {
                channels: self.req.channels,
                limits: self.req.limits,
                alloc,
            },
        }
    }

    /// Sniff the format and run the matching container parser.
    pub fn decode(self) -> Result<DecodeOutput<'a>, DecodeError> {
        let format = sniff::detect(self.data).ok_or(DecodeError::UnsupportedFormat)?;
        let (native, info) = decode_native(format, self.data, &self.req)?;
        debug_assert_eq!(
            native.len(),
            info.width as usize
                * info.height as usize
                * usize::from(info.channels)
                * info.depth.bytes()
        );
        let (pixels, channels) =
            convert::to_requested(native, &info, self.req.channels, &self.req.limits)?;
        Ok(DecodeOutput {
            pixels,
            width: info.width,
            height: info.height,
            channels,
            depth: info.depth,
            format: info.format,
        })
    }
}

fn decode_native<'a>(
    format: ImageFormat,
    data: &[u8],
    req: &Request<'a>,
) -> Result<(ByteVec<'a>, ImageInfo), DecodeError> {
    match format {
        #[cfg(feature = "jpeg")]
        ImageFormat::Jpeg => crate::jpeg::decode(data, req),
        #[cfg(feature = "png")]
        ImageFormat::Png => crate::png::decode(data, req),
        #[cfg(feature = "bmp")]
        ImageFormat::Bmp => crate::bmp::decode(data, req),
        #[cfg(feature = "gif")]
        ImageFormat::Gif => crate::gif::decode(data, req),
        #[cfg(feature = "tga")]
        ImageFormat::Tga => crate::tga::decode(data, req),
        #[cfg(feature = "psd")]
        ImageFormat::Psd => crate::psd::decode(data, req),
        #[cfg(feature = "hdr")]
        ImageFormat::Hdr => crate::hdr::decode(data, req),
        #[cfg(feature = "pic")]
        ImageFormat::Pic => crate::pic::decode(data, req),
        #[cfg(feature = "pnm")]
        ImageFormat::Pnm => crate::pnm::decode(data, req),
        #[allow(unreachable_patterns)]
        _ => Err(DecodeError::UnsupportedFormat),
    }
}

/// Decoded image: an interleaved, row-major sample buffer plus its
/// description. The buffer was allocated through the request's allocator
/// and is released through it on drop.
pub struct DecodeOutput<'a> {
    pixels: ByteVec<'a>,
    pub width: u32,
    pub height: u32,
    channels: u8,
    depth: SampleDepth,
    format: ImageFormat,
}

impl<'a> DecodeOutput<'a> {
    /// The sample bytes: `height` rows of `width * channels` samples,
    /// 16-bit and float samples native-endian.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    /// Output channel count (native, or as requested), 1..=4.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Sample depth. Always the source's native depth.
    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    /// The container format the input was decoded from.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// The descriptor for this output.
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            width: self.width,
            height: self.height,
            channels: self.channels,
            depth: self.depth,
            format: self.format,
        }
    }

    /// Reinterpret the samples as a typed pixel slice.
    ///
    /// Returns `None` if `P`'s channel count or depth doesn't match this
    /// output's layout.
    #[cfg(feature = "rgb")]
    pub fn as_pixels<P: crate::pixel::DecodePixel>(&self) -> Option<&[P]>
    where
        [u8]: rgb::AsPixels<P>,
    {
        use rgb::AsPixels as _;
        if P::CHANNELS != self.channels || P::DEPTH != self.depth {
            return None;
        }
        Some(self.pixels().as_pixels())
    }

    /// Zero-copy 2D view of the samples as typed pixels.
    #[cfg(feature = "imgref")]
    pub fn as_imgref<P: crate::pixel::DecodePixel>(&self) -> Option<imgref::ImgRef<'_, P>>
    where
        [u8]: rgb::AsPixels<P>,
    {
        let pixels: &[P] = self.as_pixels()?;
        Some(imgref::ImgRef::new(
            pixels,
            self.width as usize,
            self.height as usize,
        ))
    }
}

impl core::fmt::Debug for DecodeOutput<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodeOutput")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("depth", &self.depth)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Decode with the global allocator and default limits.
pub fn decode(data: &[u8], channels: Channels) -> Result<DecodeOutput<'static>, DecodeError> {
    DecodeRequest::new(data).channels(channels).decode()
}
