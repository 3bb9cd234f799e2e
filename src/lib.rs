//! # rasterdec
//!
//! Multi-format raster image decoder: given a byte slice, sniff the
//! format, validate it, and produce one interleaved row-major buffer of
//! decoded samples — with every heap allocation routed through a
//! caller-supplied [`Allocator`].
//!
//! ## Supported formats
//!
//! - **JPEG** — baseline and progressive DCT, 8-bit, grayscale/YCbCr
//! - **PNG** — all bit depths (1/2/4/8/16) and color types, Adam7 interlace
//! - **BMP** — 1/4/8/16/24/32 bpp, bitfields, palettes (no RLE)
//! - **GIF** — first frame, interlace, transparency
//! - **TGA** — raw and RLE, palettes, grayscale
//! - **PSD** — composited image data, 8/16-bit, PackBits
//! - **HDR** — Radiance RGBE, decoded to linear f32
//! - **PIC** — Softimage
//! - **PNM** — binary PGM (P5) / PPM (P6), 8/16-bit
//!
//! Each format sits behind a Cargo feature of the same name; all are on
//! by default.
//!
//! ## Non-goals
//!
//! - Encoding, resizing, filtering, color management
//! - Animation (GIF decoding returns the first frame)
//! - EXIF orientation and other pixel-irrelevant metadata
//!
//! ## Usage
//!
//! ```no_run
//! use rasterdec::{Channels, DecodeRequest, ImageInfo};
//!
//! let data: &[u8] = &[]; // your encoded image bytes
//!
//! // Probe without decoding
//! let info = ImageInfo::from_bytes(data)?;
//! println!("{}x{} {:?}", info.width, info.height, info.format);
//!
//! // Decode to RGBA through the global allocator
//! let out = DecodeRequest::new(data).channels(Channels::Rgba).decode()?;
//! let pixels: &[u8] = out.pixels();
//! # Ok::<(), rasterdec::DecodeError>(())
//! ```
//!
//! To control allocation, implement [`Allocator`] and pass it with
//! [`DecodeRequest::allocator`]; the returned buffer is released through
//! the same allocator when dropped. Decoding is synchronous and
//! single-threaded per call; concurrent decodes share nothing but the
//! allocator you give them.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod convert;
mod decode;
mod error;
mod info;
mod limits;
#[allow(unsafe_code)]
mod mem;
mod sniff;
mod stream;

#[cfg(feature = "png")]
mod inflate;

#[cfg(feature = "bmp")]
mod bmp;
#[cfg(feature = "gif")]
mod gif;
#[cfg(feature = "hdr")]
mod hdr;
#[cfg(feature = "jpeg")]
mod jpeg;
#[cfg(feature = "pic")]
mod pic;
#[cfg(feature = "png")]
mod png;
#[cfg(feature = "pnm")]
mod pnm;
#[cfg(feature = "psd")]
mod psd;
#[cfg(feature = "tga")]
mod tga;

#[cfg(feature = "rgb")]
pub mod pixel;

// Re-exports
pub use decode::{DecodeOutput, DecodeRequest, decode};
pub use error::DecodeError;
pub use info::{Channels, ImageFormat, ImageInfo, SampleDepth};
pub use limits::{DEFAULT_MAX_DIMENSION, Limits};
pub use mem::{Allocator, Global};
