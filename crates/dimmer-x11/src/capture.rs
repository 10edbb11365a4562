//! Pixel statistics for brightness sampling

/// Mean of the colour channels over a row of 32-bit pixels.
///
/// Pixels are BGRX; the padding byte is skipped. Trailing bytes that do not
/// form a whole pixel are ignored.
pub fn mean_luminance(data: &[u8], bytes_per_pixel: usize) -> f64 {
    if bytes_per_pixel < 3 {
        return 0.0;
    }

    let mut total: u64 = 0;
    let mut pixels: u64 = 0;
    for pixel in data.chunks_exact(bytes_per_pixel) {
        total += pixel[0] as u64 + pixel[1] as u64 + pixel[2] as u64;
        pixels += 1;
    }

    if pixels == 0 {
        0.0
    } else {
        total as f64 / (pixels * 3) as f64
    }
}

/// Row offsets of `rows` scanlines spread evenly over `height`.
///
/// Each scanline sits in the middle of its band. Never returns more rows than
/// the monitor has.
pub fn scanline_offsets(height: u16, rows: u16) -> Vec<u16> {
    let rows = rows.min(height).max(1);
    let band = height as f64 / rows as f64;
    (0..rows)
        .map(|i| ((i as f64 + 0.5) * band) as u16)
        .map(|row| row.min(height.saturating_sub(1)))
        .collect()
}
