//! Converts RGBA images to 8-bit with alpha channel.
//!
//! The pipeline is: count colors ([`build_histogram`]), pick a palette ([`build_palette`]),
//! map pixels to it with optional dithering ([`remap`]). [`Session`] runs all three,
//! and rejects the result if it doesn't meet the minimum quality.
//!
//! Reading and writing image files is up to the caller.
//!
//! ```ignore
//! let image = palquant::Image::from_rgba_bytes(&rgba_bytes, width, height)?;
//! let config = palquant::QuantizationConfig::new().with_quality(70, 99).with_speed(5);
//! let (indexed, quality) = palquant::quantize(&image, config)?.into_result()?;
//! ```
#![warn(missing_docs)]
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

mod batch;
mod config;
mod error;
mod hist;
mod image;
mod kmeans;
mod mediancut;
mod nearest;
mod pal;
mod pixel;
mod quant;
mod remap;
mod session;

#[cfg(not(feature = "threads"))]
mod rayoff;

pub use crate::batch::quantize_batch;
pub use crate::config::QuantizationConfig;
pub use crate::error::{ConfigError, Error};
pub use crate::hist::{build_histogram, ColorHistogram, HistogramEntry};
pub use crate::image::Image;
pub use crate::pal::{Palette, MAX_COLORS};
pub use crate::pixel::Pixel;
pub use crate::quant::build_palette;
pub use crate::remap::{remap, IndexedImage};
pub use crate::session::{quantize, ControlFlow, FixedRange, LogSink, Outcome, PaletteSizePolicy, QualityScaled, QuantizationResult, Session, SessionState};

#[cfg(feature = "log")]
pub use crate::session::LogFacade;

use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
struct OrdFloat<T>(T);

impl OrdFloat<f32> {
    #[inline(always)]
    pub fn new(v: f32) -> Self {
        debug_assert!(!v.is_nan());
        Self(v)
    }
}

impl Eq for OrdFloat<f32> {}
impl Ord for OrdFloat<f32> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

#[test]
fn poke_it() {
    let width = 10usize;
    let height = 10usize;
    let mut fakebitmap = vec![Pixel::new(255, 255, 255, 255); width * height];

    fakebitmap[0] = Pixel::new(0x55, 0x66, 0x77, 255);

    // Configure the library
    let config = QuantizationConfig::new().with_speed(5).with_quality(70, 99);

    // Describe the bitmap
    let img = Image::new(&fakebitmap[..], width, height).unwrap();

    // The magic happens in quantize()
    let res = match quantize(&img, config) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err:?}"),
    };
    assert_eq!(Outcome::Success, res.outcome());
    assert_eq!(Some(100), res.achieved_quality());

    let (indexed, _) = res.into_result().unwrap();
    let palette = indexed.palette();

    assert_eq!(width * height, indexed.indices().len());
    assert_eq!(Pixel::new(255, 255, 255, 255), palette[0]);
    assert_eq!(Pixel::new(0x55, 0x66, 0x77, 255), palette[1]);
    assert_eq!(1, indexed.indices()[0]);
    assert!(indexed.indices()[1..].iter().all(|&i| i == 0));
}

#[test]
fn thread() {
    let config = QuantizationConfig::new();
    std::thread::spawn(move || {
        let b = vec![Pixel::new(0, 0, 0, 255); 4];
        let img = Image::new(b, 2, 2).unwrap();
        quantize(&img, config).unwrap();
    }).join().unwrap();
}

#[test]
fn ord_float() {
    let mut v = [OrdFloat::new(2.), OrdFloat::new(-1.), OrdFloat::new(0.5)];
    v.sort();
    assert_eq!(OrdFloat::new(-1.), v[0]);
    assert_eq!(OrdFloat::new(2.), v[2]);
}
