//! PNG scanline filter reversal.

use crate::error::DecodeError;

pub(crate) const FILTER_NONE: u8 = 0;
pub(crate) const FILTER_SUB: u8 = 1;
pub(crate) const FILTER_UP: u8 = 2;
pub(crate) const FILTER_AVERAGE: u8 = 3;
pub(crate) const FILTER_PAETH: u8 = 4;

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Reverse one scanline's filter in place. `prev` is the already
/// unfiltered row above, empty for the first row of a pass. `bpp` is the
/// filter unit: bytes per complete pixel, at least 1.
pub(crate) fn unfilter_row(
    filter: u8,
    bpp: usize,
    prev: &[u8],
    row: &mut [u8],
) -> Result<(), DecodeError> {
    let up = |prev: &[u8], i: usize| if prev.is_empty() { 0 } else { prev[i] };
    match filter {
        FILTER_NONE => {}
        FILTER_SUB => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        FILTER_UP => {
            for i in 0..row.len() {
                row[i] = row[i].wrapping_add(up(prev, i));
            }
        }
        FILTER_AVERAGE => {
            for i in 0..row.len() {
                let left = if i >= bpp { u16::from(row[i - bpp]) } else { 0 };
                let above = u16::from(up(prev, i));
                row[i] = row[i].wrapping_add(((left + above) / 2) as u8);
            }
        }
        FILTER_PAETH => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] } else { 0 };
                let above = up(prev, i);
                let upper_left = if i >= bpp { up(prev, i - bpp) } else { 0 };
                row[i] = row[i].wrapping_add(paeth(left, above, upper_left));
            }
        }
        _ => return Err(DecodeError::corrupt("png", "unknown filter type")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_accumulates_left() {
        let mut row = [10, 5, 5, 5];
        unfilter_row(FILTER_SUB, 1, &[], &mut row).unwrap();
        assert_eq!(row, [10, 15, 20, 25]);
    }

    #[test]
    fn up_adds_previous_row() {
        let prev = [1, 2, 3];
        let mut row = [10, 10, 10];
        unfilter_row(FILTER_UP, 1, &prev, &mut row).unwrap();
        assert_eq!(row, [11, 12, 13]);
    }

    #[test]
    fn average_of_left_and_above() {
        let prev = [4, 4];
        let mut row = [2, 2];
        // first byte: (0 + 4)/2 + 2 = 4; second: (4 + 4)/2 + 2 = 6
        unfilter_row(FILTER_AVERAGE, 1, &prev, &mut row).unwrap();
        assert_eq!(row, [4, 6]);
    }

    #[test]
    fn paeth_picks_nearest_predictor() {
        assert_eq!(paeth(10, 20, 30), 10); // p = 0, left closest
        assert_eq!(paeth(10, 20, 15), 15); // p = 15, upper-left exact
        assert_eq!(paeth(0, 20, 0), 20);
        assert_eq!(paeth(100, 100, 1), 100); // left/above tie goes left
    }

    #[test]
    fn first_row_treats_above_as_zero() {
        let mut row = [7, 1];
        unfilter_row(FILTER_PAETH, 1, &[], &mut row).unwrap();
        assert_eq!(row, [7, 8]);
    }

    #[test]
    fn unknown_filter_is_corrupt() {
        let mut row = [0u8; 2];
        assert!(unfilter_row(9, 1, &[], &mut row).is_err());
    }
}
