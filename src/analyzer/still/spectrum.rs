//! Frequency-domain view of a grayscale image
//!
//! 2D FFT (rows, then columns), zero frequency shifted to the center, then
//! `ln(|F| + 1)`. The variance of that log-magnitude spectrum is the
//! `frequency_variance` feature.

use super::super::stats;
use image::GrayImage;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

/// Row-major transpose of a `width × height` buffer
fn transpose<T: Copy + Send + Sync>(data: &[T], width: usize, height: usize) -> Vec<T> {
    (0..width * height)
        .into_par_iter()
        .map(|i| {
            let (row, col) = (i / height, i % height);
            data[col * width + row]
        })
        .collect()
}

/// In-place FFT of every `len`-sized row of `buffer`
fn fft_rows(planner: &mut FftPlanner<f64>, buffer: &mut [Complex<f64>], len: usize) {
    let fft = planner.plan_fft_forward(len);
    buffer.par_chunks_mut(len).for_each(|row| fft.process(row));
}

/// Full complex 2D spectrum, row-major, unshifted
pub fn fft2(gray: &GrayImage) -> Vec<Complex<f64>> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width == 0 || height == 0 {
        return vec![];
    }

    let mut planner = FftPlanner::new();
    let mut buffer: Vec<Complex<f64>> =
        gray.as_raw().iter().map(|&p| Complex::new(p as f64, 0.0)).collect();

    fft_rows(&mut planner, &mut buffer, width);
    let mut columns = transpose(&buffer, width, height);
    fft_rows(&mut planner, &mut columns, height);
    transpose(&columns, height, width)
}

/// Move the zero-frequency term to the center (`h/2`, `w/2`)
pub fn fftshift<T: Copy + Default>(data: &[T], width: usize, height: usize) -> Vec<T> {
    let mut shifted = vec![T::default(); data.len()];
    for y in 0..height {
        let dest_y = (y + height / 2) % height;
        for x in 0..width {
            let dest_x = (x + width / 2) % width;
            shifted[dest_y * width + dest_x] = data[y * width + x];
        }
    }
    shifted
}

/// Centered `ln(|F| + 1)` spectrum, row-major
pub fn log_magnitude_spectrum(gray: &GrayImage) -> Vec<f64> {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let magnitudes: Vec<f64> = fft2(gray).par_iter().map(|c| (c.norm() + 1.0).ln()).collect();
    fftshift(&magnitudes, width, height)
}

pub fn frequency_variance(gray: &GrayImage) -> f64 {
    stats::variance(&log_magnitude_spectrum(gray))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_fft2_of_constant_is_pure_dc() {
        let gray = GrayImage::from_pixel(8, 4, Luma([3]));
        let spectrum = fft2(&gray);

        assert!((spectrum[0].re - 96.0).abs() < 1e-9);
        for c in &spectrum[1..] {
            assert!(c.norm() < 1e-9);
        }
    }

    #[test]
    fn test_fft2_matches_separable_cosine() {
        // cos along x at 1 cycle per 4 px: energy at (kx = ±1, ky = 0)
        let gray = GrayImage::from_fn(4, 2, |x, _| Luma([[2, 1, 0, 1][x as usize]]));
        let spectrum = fft2(&gray);
        // DC = 8 samples * mean 1
        assert!((spectrum[0].re - 8.0).abs() < 1e-9);
        assert!((spectrum[1].norm() - 4.0).abs() < 1e-9);
        assert!((spectrum[3].norm() - 4.0).abs() < 1e-9);
        assert!(spectrum[2].norm() < 1e-9);
        for c in &spectrum[4..] {
            assert!(c.norm() < 1e-9);
        }
    }

    #[test]
    fn test_fftshift_moves_origin_to_center() {
        let data: Vec<u32> = (0..12).collect();
        let shifted = fftshift(&data, 4, 3);
        // Origin (0, 0) lands at (y = 1, x = 2)
        assert_eq!(shifted[1 * 4 + 2], 0);
        // Same element set, just permuted
        let mut sorted = shifted.clone();
        sorted.sort();
        assert_eq!(sorted, data);
    }

    #[test]
    fn test_transpose_roundtrip() {
        let data: Vec<u32> = (0..15).collect();
        let t = transpose(&data, 5, 3);
        assert_eq!(t[0..3], [0, 5, 10]);
        assert_eq!(transpose(&t, 3, 5), data);
    }

    #[test]
    fn test_constant_image_has_low_frequency_variance() {
        let gray = GrayImage::from_pixel(64, 64, Luma([200]));
        assert!(frequency_variance(&gray) < 1.0);
    }

    #[test]
    fn test_empty_image() {
        assert!(fft2(&GrayImage::new(0, 0)).is_empty());
        assert_eq!(frequency_variance(&GrayImage::new(0, 0)), 0.0);
    }
}
