use crate::config::QuantizationConfig;
use crate::error::Error;
use crate::image::Image;
use crate::session::{QuantizationResult, Session};

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// Quantizes each image with its own [`Session`], in parallel if the `threads` feature is enabled.
///
/// Sessions share nothing but the read-only images and config. Results are in the same order as the images.
#[must_use]
pub fn quantize_batch(images: &[Image<'_>], config: QuantizationConfig) -> Vec<Result<QuantizationResult, Error>> {
    images.par_iter()
        .map(|image| Session::new(config).quantize(image))
        .collect()
}

#[test]
fn batch_matches_sequential() {
    use crate::Pixel;
    let images: Vec<_> = (0..6u8).map(|n| {
        let px: Vec<_> = (0..40 * 30u32).map(|i| Pixel::new((i as u8).wrapping_mul(n), (i / 40) as u8 * 8, n * 40, 255)).collect();
        Image::new(px, 40, 30).unwrap()
    }).collect();
    let config = QuantizationConfig::new().with_max_colors(16).with_speed(8);

    let batch = quantize_batch(&images, config);
    assert_eq!(images.len(), batch.len());
    for (image, res) in images.iter().zip(batch) {
        let res = res.unwrap();
        let single = crate::quantize(image, config).unwrap();
        assert_eq!(single.achieved_quality(), res.achieved_quality());
        assert_eq!(single.image(), res.image());
    }
}

#[test]
fn batch_reports_each_error() {
    let images = [Image::new(vec![crate::Pixel::new(0, 0, 0, 255)], 1, 1).unwrap()];
    let res = quantize_batch(&images, QuantizationConfig::new().with_speed(0));
    assert!(matches!(res[0], Err(Error::InvalidConfig(_))));
    assert!(quantize_batch(&[], QuantizationConfig::new()).is_empty());
}
