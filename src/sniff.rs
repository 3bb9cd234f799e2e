//! Format sniffing: non-destructive signature checks over the input
//! prefix, tried in a fixed priority order. Formats with unambiguous
//! magic bytes come first; TGA has no signature at all, so its bounded
//! trial header-parse runs last.

use crate::info::ImageFormat;

pub(crate) fn detect(data: &[u8]) -> Option<ImageFormat> {
    #[cfg(feature = "png")]
    if crate::png::test(data) {
        return Some(ImageFormat::Png);
    }
    #[cfg(feature = "bmp")]
    if crate::bmp::test(data) {
        return Some(ImageFormat::Bmp);
    }
    #[cfg(feature = "gif")]
    if crate::gif::test(data) {
        return Some(ImageFormat::Gif);
    }
    #[cfg(feature = "psd")]
    if crate::psd::test(data) {
        return Some(ImageFormat::Psd);
    }
    #[cfg(feature = "pic")]
    if crate::pic::test(data) {
        return Some(ImageFormat::Pic);
    }
    #[cfg(feature = "jpeg")]
    if crate::jpeg::test(data) {
        return Some(ImageFormat::Jpeg);
    }
    #[cfg(feature = "pnm")]
    if crate::pnm::test(data) {
        return Some(ImageFormat::Pnm);
    }
    #[cfg(feature = "hdr")]
    if crate::hdr::test(data) {
        return Some(ImageFormat::Hdr);
    }
    #[cfg(feature = "tga")]
    if crate::tga::test(data) {
        return Some(ImageFormat::Tga);
    }
    let _ = data;
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_matches_nothing() {
        assert_eq!(detect(&[]), None);
    }

    #[test]
    fn garbage_matches_nothing() {
        assert_eq!(detect(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0]), None);
    }

    #[cfg(feature = "png")]
    #[test]
    fn png_signature_wins() {
        let sig = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(detect(&sig), Some(ImageFormat::Png));
    }

    #[cfg(feature = "gif")]
    #[test]
    fn gif_signature() {
        assert_eq!(detect(b"GIF89a\x01\x00\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(detect(b"GIF87a\x01\x00\x01\x00"), Some(ImageFormat::Gif));
        assert_eq!(detect(b"GIF88a\x01\x00\x01\x00"), None);
    }
}
