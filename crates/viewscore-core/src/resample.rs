//! Area-averaging resampling.
//!
//! Each output pixel is the coverage-weighted mean of the source pixels its
//! footprint overlaps, which avoids the aliasing a point or bilinear filter
//! produces on large downscales (e.g. supersampled renders).

use image::RgbImage;

/// Resize `src` to `width` × `height` by area averaging.
pub fn resize_area(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    if src.dimensions() == (width, height) {
        return src.clone();
    }

    let (src_w, src_h) = src.dimensions();
    let x_taps = area_taps(src_w, width);
    let y_taps = area_taps(src_h, height);

    // Horizontal pass into a float buffer of src_h rows.
    let row_len = width as usize * 3;
    let mut tmp = vec![0f32; src_h as usize * row_len];
    for y in 0..src_h {
        let row = &mut tmp[y as usize * row_len..(y as usize + 1) * row_len];
        for (ox, taps) in x_taps.iter().enumerate() {
            for &(sx, w) in taps {
                let p = src.get_pixel(sx, y);
                for c in 0..3 {
                    row[ox * 3 + c] += p[c] as f32 * w;
                }
            }
        }
    }

    let mut out = RgbImage::new(width, height);
    for (oy, taps) in y_taps.iter().enumerate() {
        for ox in 0..width as usize {
            let mut acc = [0f32; 3];
            for &(sy, w) in taps {
                let base = sy as usize * row_len + ox * 3;
                for c in 0..3 {
                    acc[c] += tmp[base + c] * w;
                }
            }
            let px = out.get_pixel_mut(ox as u32, oy as u32);
            for c in 0..3 {
                px[c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// For each destination index, the source indices it covers and their
/// normalised weights.
fn area_taps(src: u32, dst: u32) -> Vec<Vec<(u32, f32)>> {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|o| {
            let start = o as f64 * scale;
            let end = start + scale;
            let mut taps = Vec::new();
            let mut i = start.floor() as u32;
            while (i as f64) < end && i < src {
                let covered = end.min(i as f64 + 1.0) - start.max(i as f64);
                if covered > 0.0 {
                    taps.push((i, (covered / scale) as f32));
                }
                i += 1;
            }
            taps
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_color_survives_resize() {
        let src = RgbImage::from_pixel(100, 60, Rgb([200, 10, 30]));
        for (w, h) in [(512, 512), (7, 3), (100, 60), (33, 200)] {
            let out = resize_area(&src, w, h);
            assert_eq!(out.dimensions(), (w, h));
            assert!(out.pixels().all(|p| *p == Rgb([200, 10, 30])));
        }
    }

    #[test]
    fn integer_downscale_averages_blocks() {
        let mut src = RgbImage::new(2, 2);
        src.put_pixel(0, 0, Rgb([0, 0, 0]));
        src.put_pixel(1, 0, Rgb([100, 100, 100]));
        src.put_pixel(0, 1, Rgb([200, 200, 200]));
        src.put_pixel(1, 1, Rgb([100, 100, 100]));

        let out = resize_area(&src, 1, 1);
        assert_eq!(*out.get_pixel(0, 0), Rgb([100, 100, 100]));
    }

    #[test]
    fn checkerboard_downscale_is_uniform_gray() {
        let src = RgbImage::from_fn(64, 64, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([254, 254, 254])
            }
        });
        let out = resize_area(&src, 16, 16);
        assert!(out.pixels().all(|p| *p == Rgb([127, 127, 127])));
    }

    #[test]
    fn taps_sum_to_one() {
        for (src, dst) in [(10, 3), (3, 10), (512, 224), (800, 512)] {
            for taps in area_taps(src, dst) {
                let total: f32 = taps.iter().map(|(_, w)| w).sum();
                assert!((total - 1.0).abs() < 1e-4, "{src}->{dst}: {total}");
            }
        }
    }
}
