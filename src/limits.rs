use crate::error::DecodeError;

/// Default cap on either dimension. Matches the engine's sanity bound for
/// adversarial headers; raise it explicitly if you trust your inputs.
pub const DEFAULT_MAX_DIMENSION: u64 = 1 << 24;

/// Resource limits for a decode operation.
///
/// Dimension limits default to [`DEFAULT_MAX_DIMENSION`]; the pixel and
/// memory caps default to `None` (no limit). All checks run before the
/// output buffer is sized or allocated.
#[derive(Clone, Debug)]
pub struct Limits {
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    /// Maximum pixel count (width * height).
    pub max_pixels: Option<u64>,
    /// Maximum bytes for any single allocation the decoder makes.
    pub max_alloc_bytes: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_width: Some(DEFAULT_MAX_DIMENSION),
            max_height: Some(DEFAULT_MAX_DIMENSION),
            max_pixels: None,
            max_alloc_bytes: None,
        }
    }
}

impl Limits {
    /// No limits at all. The decoder still rejects size arithmetic that
    /// overflows `usize`.
    pub fn none() -> Self {
        Limits {
            max_width: None,
            max_height: None,
            max_pixels: None,
            max_alloc_bytes: None,
        }
    }

    /// Check declared dimensions against limits.
    pub(crate) fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::LimitExceeded("zero width or height"));
        }
        if let Some(max_w) = self.max_width {
            if u64::from(width) > max_w {
                return Err(DecodeError::LimitExceeded("width over limit"));
            }
        }
        if let Some(max_h) = self.max_height {
            if u64::from(height) > max_h {
                return Err(DecodeError::LimitExceeded("height over limit"));
            }
        }
        if let Some(max_px) = self.max_pixels {
            let pixels = u64::from(width) * u64::from(height);
            if pixels > max_px {
                return Err(DecodeError::LimitExceeded("pixel count over limit"));
            }
        }
        Ok(())
    }

    /// Check that an allocation size is within the memory cap.
    pub(crate) fn check_alloc(&self, bytes: usize) -> Result<(), DecodeError> {
        if let Some(max) = self.max_alloc_bytes {
            if bytes as u64 > max {
                return Err(DecodeError::LimitExceeded("allocation over memory limit"));
            }
        }
        Ok(())
    }
}

/// Checked `width * height * samples_per_pixel * bytes_per_sample`.
///
/// Rejects products that overflow `usize` before anything is allocated.
pub(crate) fn checked_output_size(
    width: u32,
    height: u32,
    channels: usize,
    bytes_per_sample: usize,
) -> Result<usize, DecodeError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|wh| wh.checked_mul(channels))
        .and_then(|whc| whc.checked_mul(bytes_per_sample))
        .ok_or(DecodeError::LimitExceeded("image size overflows usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_rejected() {
        let limits = Limits::default();
        assert!(limits.check_dimensions(0, 10).is_err());
        assert!(limits.check_dimensions(10, 0).is_err());
        assert!(limits.check_dimensions(10, 10).is_ok());
    }

    #[test]
    fn pixel_cap_enforced() {
        let limits = Limits {
            max_pixels: Some(64),
            ..Limits::default()
        };
        assert!(limits.check_dimensions(8, 8).is_ok());
        assert_eq!(
            limits.check_dimensions(8, 9),
            Err(DecodeError::LimitExceeded("pixel count over limit"))
        );
    }

    #[test]
    fn output_size_overflow_rejected() {
        assert!(checked_output_size(u32::MAX, u32::MAX, 4, 2).is_err());
        assert_eq!(checked_output_size(4, 3, 3, 1).unwrap(), 36);
    }
}
