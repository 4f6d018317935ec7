use crate::error::*;
use crate::pixel::{effective_gamma, gamma_lut, FColor, Pixel};
use rgb::FromSlice;
use std::borrow::Cow;

/// Decoded RGBA bitmap, row-major, with no padding between rows.
///
/// Produced by whatever decodes the file. The library only ever reads it,
/// so it can be shared between sessions running on different threads.
#[derive(Clone, Debug)]
pub struct Image<'pixels> {
    pixels: Cow<'pixels, [Pixel]>,
    width: usize,
    height: usize,
    gamma: f64,
}

impl Image<'static> {
    /// Make an image from RGBA pixels.
    ///
    /// The `pixels` argument can be `Vec<Pixel>`, or `Box<[Pixel]>` or `&[Pixel]`.
    /// See [`Image::new_borrowed`] for a non-copying alternative.
    #[inline]
    pub fn new<VecRGBA>(pixels: VecRGBA, width: usize, height: usize) -> Result<Self, Error> where VecRGBA: Into<Box<[Pixel]>> {
        let pixels: Box<[Pixel]> = pixels.into();
        Self::check_size(pixels.len(), width, height)?;
        let mut pixels = pixels.into_vec();
        pixels.truncate(width * height);
        Ok(Self { pixels: Cow::Owned(pixels), width, height, gamma: 0. })
    }
}

impl<'pixels> Image<'pixels> {
    /// Describe dimensions of a slice of RGBA pixels
    ///
    /// The slice may be longer than `width * height`. Extra pixels are ignored.
    #[inline]
    pub fn new_borrowed(pixels: &'pixels [Pixel], width: usize, height: usize) -> Result<Self, Error> {
        Self::check_size(pixels.len(), width, height)?;
        Ok(Self { pixels: Cow::Borrowed(&pixels[..width * height]), width, height, gamma: 0. })
    }

    /// Raw interleaved R, G, B, A samples, 4 bytes per pixel
    #[inline]
    pub fn from_rgba_bytes(bytes: &'pixels [u8], width: usize, height: usize) -> Result<Self, Error> {
        Self::new_borrowed(bytes.as_rgba(), width, height)
    }

    /// Gamma of the input pixels. Use 0.0 if the image is sRGB (most images are).
    pub fn with_gamma(mut self, gamma: f64) -> Result<Self, Error> {
        if !(0. ..1.).contains(&gamma) {
            return Err(ConfigError::GammaOutOfRange.into());
        }
        self.gamma = gamma;
        Ok(self)
    }

    fn check_size(len: usize, width: usize, height: usize) -> Result<(), Error> {
        let area = width.checked_mul(height).ok_or(ValueOutOfRange)?;
        if area > isize::MAX as usize / std::mem::size_of::<FColor>() {
            return Err(ValueOutOfRange);
        }
        if len < area {
            return Err(BufferTooSmall);
        }
        Ok(())
    }

    /// Width of the image in pixels
    #[inline(always)]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the image in pixels
    #[inline(always)]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// All pixels, row after row
    #[inline(always)]
    #[must_use]
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// Zero width or height
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Slices of `width` pixels
    #[inline]
    pub fn rows(&self) -> impl Iterator<Item = &[Pixel]> {
        // chunks_exact panics on 0
        self.pixels.chunks_exact(self.width.max(1))
    }

    /// Input gamma, with 0 resolved to sRGB
    #[inline]
    #[must_use]
    pub fn gamma(&self) -> f64 {
        effective_gamma(self.gamma)
    }

    /// Converts a row to the internal color representation
    pub(crate) fn row_f(&self, lut: &[f32; 256], row: usize, out: &mut Vec<FColor>) {
        out.clear();
        let start = row * self.width;
        out.extend(self.pixels[start..start + self.width].iter().map(|&px| FColor::from_rgba(lut, px)));
    }

    pub(crate) fn gamma_lut(&self) -> [f32; 256] {
        gamma_lut(self.gamma())
    }
}

#[test]
fn sizes() {
    let px = vec![Pixel::new(0, 0, 0, 255); 8];
    Image::new_borrowed(&px, 1, 1).unwrap();
    Image::new_borrowed(&px, 4, 2).unwrap();
    Image::new_borrowed(&px, 8, 1).unwrap();
    assert_eq!(Err(BufferTooSmall), Image::new_borrowed(&px, 9, 1).map(|_| ()));
    assert_eq!(Err(BufferTooSmall), Image::new_borrowed(&px, 4, 3).map(|_| ()));
    assert_eq!(Err(ValueOutOfRange), Image::new_borrowed(&px, usize::MAX, 2).map(|_| ()));

    let img = Image::new(px, 2, 2).unwrap();
    assert_eq!(4, img.pixels().len());
    assert_eq!(2, img.rows().count());
}

#[test]
fn empty() {
    let img = Image::new(Vec::<Pixel>::new(), 0, 0).unwrap();
    assert!(img.is_empty());
    assert_eq!(0, img.rows().count());
    let img = Image::new(Vec::<Pixel>::new(), 5, 0).unwrap();
    assert!(img.is_empty());
}

#[test]
fn bytes() {
    let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let img = Image::from_rgba_bytes(&bytes, 2, 1).unwrap();
    assert_eq!(Pixel::new(5, 6, 7, 8), img.pixels()[1]);
    assert!(Image::from_rgba_bytes(&bytes, 3, 1).is_err());
}

#[test]
fn gamma() {
    let px = [Pixel::new(1, 2, 3, 4)];
    let img = Image::new_borrowed(&px, 1, 1).unwrap();
    assert!((img.gamma() - 0.45455).abs() < 1e-9);
    let img = img.with_gamma(0.5).unwrap();
    assert_eq!(0.5, img.gamma());
    assert!(img.with_gamma(1.5).is_err());
}

#[test]
fn send() {
    fn is_send<T: Send + Sync>() {}
    is_send::<Image<'static>>();
}
