use std::path::Path;

use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use ndarray::Array2;

use crate::error::{ApeepError, Result};
use crate::frame::LabeledMask;

/// Colour of particle pixels in masked images.
const MASK_OVERLAY: [u8; 3] = [255, 0, 0];

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert a [0, 1] image to 8-bit grey.
pub fn to_gray_image(data: &Array2<f32>) -> Result<GrayImage> {
    let (h, w) = data.dim();
    let pixels: Vec<u8> = data.iter().map(|&v| to_u8(v)).collect();
    GrayImage::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| ApeepError::InvalidConfig(format!("cannot build a {w}x{h} image")))
}

/// Save a [0, 1] image as 8-bit grayscale PNG.
pub fn save_png(data: &Array2<f32>, path: &Path) -> Result<()> {
    to_gray_image(data)?.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a label mask as PNG: black particles on a white background.
pub fn save_mask_png(labels: &LabeledMask, path: &Path) -> Result<()> {
    let (h, w) = labels.dim();
    let mut img = GrayImage::new(w as u32, h as u32);
    for ((row, col), &l) in labels.indexed_iter() {
        let val = if l == 0 { 255 } else { 0 };
        img.put_pixel(col as u32, row as u32, Luma([val]));
    }
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save `data` as RGB PNG with the particles of `labels` painted over it.
pub fn save_masked_png(data: &Array2<f32>, labels: &LabeledMask, path: &Path) -> Result<()> {
    if data.dim() != labels.dim() {
        return Err(ApeepError::InvalidConfig(format!(
            "mask shape {:?} does not match image shape {:?}",
            labels.dim(),
            data.dim()
        )));
    }
    let (h, w) = data.dim();
    let mut img = RgbImage::new(w as u32, h as u32);
    for ((row, col), &v) in data.indexed_iter() {
        let px = if labels[[row, col]] == 0 {
            let g = to_u8(v);
            [g, g, g]
        } else {
            MASK_OVERLAY
        };
        img.put_pixel(col as u32, row as u32, Rgb(px));
    }
    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Load an image file as grey levels in [0, 1].
pub fn load_image(path: &Path) -> Result<Array2<f32>> {
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f32>::zeros((h as usize, w as usize));

    for (col, row, pixel) in gray.enumerate_pixels() {
        data[[row as usize, col as usize]] = pixel.0[0] as f32 / 65535.0;
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_png_round_trip_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        let data = array![[0.0f32, 1.0], [0.5, 2.0]];
        save_png(&data, &path).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.dim(), (2, 2));
        assert_eq!(back[[0, 0]], 0.0);
        assert_eq!(back[[0, 1]], 1.0);
        assert_eq!(back[[1, 1]], 1.0);
    }

    #[test]
    fn test_mask_is_black_on_white() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.png");
        let labels = array![[0u32, 3], [0, 0]];
        save_mask_png(&labels, &path).unwrap();
        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 0);
    }
}
