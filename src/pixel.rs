use std::ops::{Deref, DerefMut};

/// 8-bit RGBA in sRGB. This is the only color format *publicly* used by the library.
pub type Pixel = rgb::RGBA8;

#[allow(clippy::upper_case_acronyms)]
pub(crate) type ARGBF = rgb::alt::ARGB<f32>;

pub(crate) const INTERNAL_GAMMA: f64 = 0.57;
/// Gamma assumed when the caller passes 0
pub(crate) const SRGB_GAMMA: f64 = 0.45455;

pub(crate) const WEIGHT_A: f32 = 0.625;
pub(crate) const WEIGHT_R: f32 = 0.5;
pub(crate) const WEIGHT_G: f32 = 1.;
pub(crate) const WEIGHT_B: f32 = 0.45;

/// Colors are not in 0..1 range after channel weighting, so MSE gets scaled back
pub(crate) const WEIGHT_MSE: f64 = 0.45;

pub(crate) const MIN_OPAQUE_A: f32 = 1. / 256. * WEIGHT_A;

/// Premultiplied, channel-weighted ARGB in internal gamma.
///
/// All distances and averages are computed on this representation.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub(crate) struct FColor(pub ARGBF);

impl FColor {
    /// Perceptual distance, squared.
    ///
    /// The color is compared as if composited on both black and white background,
    /// and the worse of the two is taken per channel, so that alpha differences count.
    #[inline(always)]
    pub fn diff(&self, other: &FColor) -> f32 {
        let alphas = other.0.a - self.0.a;
        let black = self.0 - other.0;
        let white = ARGBF {
            a: 0.,
            r: black.r + alphas,
            g: black.g + alphas,
            b: black.b + alphas,
        };
        (black.r * black.r).max(white.r * white.r) +
        (black.g * black.g).max(white.g * white.g) +
        (black.b * black.b).max(white.b * white.b)
    }

    /// Brightness with channel weights undone, used to tell apart otherwise equally good splits
    #[inline]
    pub fn luma(&self) -> f32 {
        self.r * (0.299 / WEIGHT_R) + self.g * (0.587 / WEIGHT_G) + self.b * (0.114 / WEIGHT_B)
    }

    pub fn to_rgba(self, gamma: f64) -> Pixel {
        if self.a < MIN_OPAQUE_A {
            return Pixel::new(0, 0, 0, 0);
        }

        let r = (WEIGHT_A / WEIGHT_R) * self.r / self.a;
        let g = (WEIGHT_A / WEIGHT_G) * self.g / self.a;
        let b = (WEIGHT_A / WEIGHT_B) * self.b / self.a;
        let a = (256. / WEIGHT_A) * self.a;

        let gamma = (gamma / INTERNAL_GAMMA) as f32;
        debug_assert!(gamma.is_finite());

        // 256, because numbers are in range 1..255.9999… rounded down
        Pixel {
            r: (r.powf(gamma) * 256.) as u8,
            g: (g.powf(gamma) * 256.) as u8,
            b: (b.powf(gamma) * 256.) as u8,
            a: a as u8,
        }
    }

    pub fn from_rgba(gamma_lut: &[f32; 256], px: Pixel) -> Self {
        let a = f32::from(px.a) / 255.;
        Self(ARGBF {
            a: a * WEIGHT_A,
            r: gamma_lut[px.r as usize] * WEIGHT_R * a,
            g: gamma_lut[px.g as usize] * WEIGHT_G * a,
            b: gamma_lut[px.b as usize] * WEIGHT_B * a,
        })
    }
}

impl Deref for FColor {
    type Target = ARGBF;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for FColor {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<ARGBF> for FColor {
    #[inline(always)]
    fn from(x: ARGBF) -> Self {
        Self(x)
    }
}

#[inline]
pub(crate) fn gamma_lut(gamma: f64) -> [f32; 256] {
    debug_assert!(gamma > 0.);
    let mut tmp = [0.; 256];
    for (i, t) in tmp.iter_mut().enumerate() {
        *t = ((i as f32) / 255.).powf((INTERNAL_GAMMA / gamma) as f32);
    }
    tmp
}

/// Gamma 0 means sRGB
#[inline]
pub(crate) fn effective_gamma(gamma: f64) -> f64 {
    if gamma > 0. { gamma } else { SRGB_GAMMA }
}

#[inline]
pub(crate) fn posterize_channel(color: u8, bits: u8) -> u8 {
    if bits == 0 {
        color
    } else {
        (color & !((1 << bits) - 1)) | (color >> (8 - bits))
    }
}

#[test]
fn diff_test() {
    let a = FColor(ARGBF {a: 1., r: 0.2, g: 0.3, b: 0.5});
    let b = FColor(ARGBF {a: 1., r: 0.3, g: 0.3, b: 0.5});
    let c = FColor(ARGBF {a: 1., r: 1., g: 0.3, b: 0.5});
    let d = FColor(ARGBF {a: 0., r: 1., g: 0.3, b: 0.5});
    assert!(a.diff(&b) < b.diff(&c));
    assert!(c.diff(&b) < c.diff(&d));
    assert_eq!(0., c.diff(&c));
}

#[test]
fn roundtrip() {
    let lut = gamma_lut(SRGB_GAMMA);
    for i in 0..=255u8 {
        let px = Pixel::new(i, 255 - i, i / 2, 255);
        assert_eq!(px, FColor::from_rgba(&lut, px).to_rgba(SRGB_GAMMA));
    }
    assert_eq!(Pixel::new(0, 0, 0, 0), FColor::from_rgba(&lut, Pixel::new(10, 20, 30, 0)).to_rgba(SRGB_GAMMA));
}

#[test]
fn luma_orders_gray() {
    let lut = gamma_lut(SRGB_GAMMA);
    let dark = FColor::from_rgba(&lut, Pixel::new(20, 20, 20, 255));
    let light = FColor::from_rgba(&lut, Pixel::new(200, 200, 200, 255));
    let green = FColor::from_rgba(&lut, Pixel::new(0, 255, 0, 255));
    let blue = FColor::from_rgba(&lut, Pixel::new(0, 0, 255, 255));
    assert!(dark.luma() < light.luma());
    assert!(blue.luma() < green.luma());
}

#[test]
fn posterize() {
    assert_eq!(255, posterize_channel(255, 2));
    assert_eq!(0, posterize_channel(3, 2));
    assert_eq!(17, posterize_channel(17, 0));
}
