//! Local binary pattern texture measure
//!
//! Every interior pixel gets an 8-bit code: one bit per neighbor, set when
//! the neighbor is at least as bright as the center. Bits are packed
//! most-significant first in [`NEIGHBOR_OFFSETS`] order. The variance of all
//! codes is the `texture_variance` feature; flat or regular textures produce
//! few distinct codes and a low variance.
//!
//! Codes are built one offset at a time over whole rows rather than pixel by
//! pixel, which keeps the inner loop a straight slice comparison.

use super::super::stats;
use image::GrayImage;
use rayon::prelude::*;

/// `(dy, dx)` of each neighbor, first entry is bit 7
pub const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// LBP codes for the `(w - 2) × (h - 2)` interior, row-major
pub fn lbp_codes(gray: &GrayImage) -> Vec<u8> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width < 3 || height < 3 {
        return vec![];
    }

    let inner_w = width - 2;
    let data = gray.as_raw();
    let mut codes = vec![0u8; inner_w * (height - 2)];

    codes.par_chunks_mut(inner_w).enumerate().for_each(|(row, out)| {
        let y = row + 1;
        let center = &data[y * width + 1..y * width + 1 + inner_w];

        for (bit, &(dy, dx)) in NEIGHBOR_OFFSETS.iter().enumerate() {
            let ny = (y as isize + dy) as usize;
            let start = (ny * width + 1) as isize + dx;
            let start = start as usize;
            let neighbor = &data[start..start + inner_w];
            let shift = 7 - bit;

            for ((code, &c), &n) in out.iter_mut().zip(center).zip(neighbor) {
                *code |= u8::from(n >= c) << shift;
            }
        }
    });

    codes
}

pub fn texture_variance(gray: &GrayImage) -> f64 {
    stats::variance(&lbp_codes(gray))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Straightforward per-pixel version for cross-checking
    fn lbp_reference(gray: &GrayImage) -> Vec<u8> {
        let (w, h) = gray.dimensions();
        let mut codes = Vec::new();
        for y in 1..h as isize - 1 {
            for x in 1..w as isize - 1 {
                let center = gray.get_pixel(x as u32, y as u32).0[0];
                let mut code = 0u8;
                for &(dy, dx) in &NEIGHBOR_OFFSETS {
                    let n = gray.get_pixel((x + dx) as u32, (y + dy) as u32).0[0];
                    code = (code << 1) | u8::from(n >= center);
                }
                codes.push(code);
            }
        }
        codes
    }

    #[test]
    fn test_flat_image_codes_are_all_ones() {
        let gray = GrayImage::from_pixel(5, 4, Luma([77]));
        let codes = lbp_codes(&gray);
        assert_eq!(codes.len(), 3 * 2);
        assert!(codes.iter().all(|&c| c == 0xFF));
        assert_eq!(texture_variance(&gray), 0.0);
    }

    #[test]
    fn test_bright_center_scores_zero() {
        let gray = GrayImage::from_fn(3, 3, |x, y| Luma([if x == 1 && y == 1 { 200 } else { 10 }]));
        assert_eq!(lbp_codes(&gray), vec![0]);
    }

    #[test]
    fn test_bit_order_is_msb_first() {
        // Only the top-left neighbor is brighter than the center
        let gray = GrayImage::from_fn(3, 3, |x, y| {
            Luma([match (x, y) {
                (0, 0) => 255,
                (1, 1) => 100,
                _ => 0,
            }])
        });
        assert_eq!(lbp_codes(&gray), vec![0b1000_0000]);

        // Only the bottom-right neighbor
        let gray = GrayImage::from_fn(3, 3, |x, y| {
            Luma([match (x, y) {
                (2, 2) => 255,
                (1, 1) => 100,
                _ => 0,
            }])
        });
        assert_eq!(lbp_codes(&gray), vec![0b0000_0001]);
    }

    #[test]
    fn test_batch_matches_per_pixel_reference() {
        let gray = GrayImage::from_fn(17, 11, |x, y| Luma([((x * 37 + y * 91) % 251) as u8]));
        assert_eq!(lbp_codes(&gray), lbp_reference(&gray));
    }

    #[test]
    fn test_too_small_for_interior() {
        assert!(lbp_codes(&GrayImage::new(2, 10)).is_empty());
        assert_eq!(texture_variance(&GrayImage::new(10, 2)), 0.0);
    }
}
