//! Canny edge detection
//!
//! 3×3 Sobel gradients with replicated borders, L1 magnitude
//! (`|gx| + |gy|`), non-maximum suppression along the quantized gradient
//! direction, then hysteresis: pixels above `high` seed edges, which grow
//! through 8-connected neighbors above `low`.
//!
//! No Gaussian pre-blur is applied, so thresholds are in raw Sobel units.

use image::GrayImage;
use rayon::prelude::*;

/// tan(22.5°)
const TAN_22_5: f64 = 0.414_213_562_373_095;
/// tan(67.5°)
const TAN_67_5: f64 = 2.414_213_562_373_095;

const NOT_EDGE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

struct Gradients {
    width: usize,
    height: usize,
    gx: Vec<i32>,
    gy: Vec<i32>,
    magnitude: Vec<i32>,
}

impl Gradients {
    fn magnitude_at(&self, x: isize, y: isize) -> i32 {
        if x < 0 || y < 0 || x >= self.width as isize || y >= self.height as isize {
            return 0;
        }
        self.magnitude[y as usize * self.width + x as usize]
    }
}

fn sobel(gray: &GrayImage) -> Gradients {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    let data = gray.as_raw();

    let at = |x: isize, y: isize| -> i32 {
        let x = x.clamp(0, width as isize - 1) as usize;
        let y = y.clamp(0, height as isize - 1) as usize;
        data[y * width + x] as i32
    };

    let rows: Vec<(Vec<i32>, Vec<i32>)> = (0..height)
        .into_par_iter()
        .map(|y| {
            let y = y as isize;
            let mut gx = Vec::with_capacity(width);
            let mut gy = Vec::with_capacity(width);
            for x in 0..width as isize {
                gx.push(
                    (at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1))
                        - (at(x - 1, y - 1) + 2 * at(x - 1, y) + at(x - 1, y + 1)),
                );
                gy.push(
                    (at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1))
                        - (at(x - 1, y - 1) + 2 * at(x, y - 1) + at(x + 1, y - 1)),
                );
            }
            (gx, gy)
        })
        .collect();

    let mut gx = Vec::with_capacity(width * height);
    let mut gy = Vec::with_capacity(width * height);
    for (row_x, row_y) in rows {
        gx.extend(row_x);
        gy.extend(row_y);
    }
    let magnitude = gx.iter().zip(&gy).map(|(a, b)| a.abs() + b.abs()).collect();

    Gradients { width, height, gx, gy, magnitude }
}

/// Classify each pixel after non-maximum suppression
fn suppress(grad: &Gradients, low: f64, high: f64) -> Vec<u8> {
    let width = grad.width;

    (0..grad.width * grad.height)
        .into_par_iter()
        .map(|i| {
            let m = grad.magnitude[i];
            if (m as f64) <= low {
                return NOT_EDGE;
            }

            let x = (i % width) as isize;
            let y = (i / width) as isize;
            let (gx, gy) = (grad.gx[i], grad.gy[i]);
            let ax = gx.abs() as f64;
            let ay = gy.abs() as f64;

            let is_max = if ay < ax * TAN_22_5 {
                // Horizontal gradient: compare left/right
                m > grad.magnitude_at(x - 1, y) && m >= grad.magnitude_at(x + 1, y)
            } else if ay > ax * TAN_67_5 {
                // Vertical gradient: compare up/down
                m > grad.magnitude_at(x, y - 1) && m >= grad.magnitude_at(x, y + 1)
            } else {
                let s = if (gx ^ gy) < 0 { -1 } else { 1 };
                m > grad.magnitude_at(x - s, y - 1) && m > grad.magnitude_at(x + s, y + 1)
            };

            if !is_max {
                NOT_EDGE
            } else if (m as f64) > high {
                STRONG
            } else {
                WEAK
            }
        })
        .collect()
}

/// Edge map, `true` where an edge was found (row-major)
pub fn canny(gray: &GrayImage, low: f64, high: f64) -> Vec<bool> {
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let grad = sobel(gray);
    let classes = suppress(&grad, low, high);
    let (width, height) = (grad.width, grad.height);

    let mut edges = vec![false; classes.len()];
    let mut stack: Vec<usize> = Vec::new();
    for (i, &c) in classes.iter().enumerate() {
        if c == STRONG {
            edges[i] = true;
            stack.push(i);
        }
    }

    // Hysteresis: grow strong edges through weak neighbors
    while let Some(i) = stack.pop() {
        let x = (i % width) as isize;
        let y = (i / width) as isize;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let j = ny as usize * width + nx as usize;
                if classes[j] == WEAK && !edges[j] {
                    edges[j] = true;
                    stack.push(j);
                }
            }
        }
    }

    edges
}

/// Fraction of pixels marked as edges
pub fn edge_density(gray: &GrayImage, low: f64, high: f64) -> f64 {
    let total = gray.width() as usize * gray.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let edges = canny(gray, low, high).into_iter().filter(|&e| e).count();
    edges as f64 / total as f64
}
