use crate::error::ConfigError;
use crate::pal::MAX_COLORS;
use crate::quant::quality_to_mse;

/// Settings for one quantization session.
///
/// This is a plain value: build it once, pass it to [`Session::new`][crate::Session::new]
/// or [`quantize`][crate::quantize]. Bounds are checked when the session starts.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuantizationConfig {
    /// Range 0-100, roughly like JPEG. If it can't be met, the result is [`Outcome::QualityTooLow`][crate::Outcome::QualityTooLow].
    ///
    /// 0 means best effort, never rejects.
    pub min_quality: u8,
    /// Range 0-100. If less than 100, the library will try to use fewer colors.
    pub max_quality: u8,
    /// 1-11. Faster speeds generate images of lower quality.
    pub speed: u8,
    /// 0.0-1.0. 0 disables error diffusion.
    pub dither_strength: f32,
    /// 2-256
    pub max_colors: u16,
    /// Number of least significant bits to ignore (0-4).
    ///
    /// Useful for generating palettes for VGA, 15-bit textures, or other retro platforms.
    pub min_posterization: u8,
    /// Move transparent color to the last entry in the palette
    pub last_index_transparent: bool,
    /// Gamma of the palette colors. 0 means sRGB.
    pub output_gamma: f64,
}

/// The library's own defaults: no minimum quality and speed 4, a balance of quality and time.
/// Apps wanting to reject poor results, or to spend more time, set `with_quality(50, 100)` and `with_speed(1)`.
impl Default for QuantizationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_quality: 0,
            max_quality: 100,
            speed: 4,
            dither_strength: 1.,
            max_colors: MAX_COLORS as u16,
            min_posterization: 0,
            last_index_transparent: false,
            output_gamma: 0.,
        }
    }
}

impl QuantizationConfig {
    /// Same as `default()`: any quality, speed 4, full dithering, 256 colors
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Quality 0-100. Below `minimum` the result is rejected, `target` is where it stops trying to get better.
    #[inline]
    #[must_use]
    pub fn with_quality(mut self, minimum: u8, target: u8) -> Self {
        self.min_quality = minimum;
        self.max_quality = target;
        self
    }

    /// 1-11, where 1 is slowest and best
    #[inline]
    #[must_use]
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }

    /// 0.0-1.0
    #[inline]
    #[must_use]
    pub fn with_dither_strength(mut self, strength: f32) -> Self {
        self.dither_strength = strength;
        self
    }

    /// 2-256
    #[inline]
    #[must_use]
    pub fn with_max_colors(mut self, colors: u16) -> Self {
        self.max_colors = colors;
        self
    }

    /// 0-4 low bits to ignore
    #[inline]
    #[must_use]
    pub fn with_min_posterization(mut self, bits: u8) -> Self {
        self.min_posterization = bits;
        self
    }

    /// See [`QuantizationConfig::last_index_transparent`]
    #[inline]
    #[must_use]
    pub fn with_last_index_transparent(mut self, is_last: bool) -> Self {
        self.last_index_transparent = is_last;
        self
    }

    /// 0 for sRGB, otherwise less than 1
    #[inline]
    #[must_use]
    pub fn with_output_gamma(mut self, gamma: f64) -> Self {
        self.output_gamma = gamma;
        self
    }

    /// Checks every bound, reporting the first one that is violated
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_quality > 100 || self.max_quality > 100 {
            return Err(ConfigError::QualityOutOfRange);
        }
        if self.min_quality > self.max_quality {
            return Err(ConfigError::QualityOrder);
        }
        if !(1..=11).contains(&self.speed) {
            return Err(ConfigError::SpeedOutOfRange);
        }
        // written this way to reject NaN
        if !(0. ..=1.).contains(&self.dither_strength) {
            return Err(ConfigError::DitherOutOfRange);
        }
        if !(2..=MAX_COLORS as u16).contains(&self.max_colors) {
            return Err(ConfigError::MaxColorsOutOfRange);
        }
        if self.min_posterization > 4 {
            return Err(ConfigError::PosterizationOutOfRange);
        }
        if !(0. ..1.).contains(&self.output_gamma) {
            return Err(ConfigError::GammaOutOfRange);
        }
        Ok(())
    }

    /// MSE that must not be exceeded, if any
    pub(crate) fn max_mse(&self) -> Option<f64> {
        (self.min_quality > 0).then(|| quality_to_mse(self.min_quality))
    }

    /// `target_mse`, user asked for perfect quality
    pub(crate) fn target_mse(&self, posterize_bits: u8) -> (f64, bool) {
        let target = quality_to_mse(self.max_quality);
        let aim_for_perfect_quality = target == 0.;
        // posterization already costs this much, there's no point aiming lower
        let mut target_mse = target.max((f64::from(1u16 << posterize_bits) / 1024.).powi(2));
        if let Some(max_mse) = self.max_mse() {
            target_mse = target_mse.min(max_mse);
        }
        (target_mse, aim_for_perfect_quality)
    }

    #[inline]
    pub(crate) fn tuning(&self) -> Tuning {
        Tuning::for_speed(self.speed)
    }
}

/// Speed setting unpacked into the knobs the individual stages use
#[derive(Debug, Copy, Clone)]
pub(crate) struct Tuning {
    kmeans_iterations: u16,
    kmeans_iteration_limit: f64,
    feedback_loop_trials: u16,
    pub max_histogram_entries: u32,
    pub min_posterization_input: u8,
}

impl Tuning {
    pub fn for_speed(speed: u8) -> Self {
        let value = i32::from(speed.clamp(1, 11));
        if value == 11 {
            // no refinement at all, and coarser histogram
            return Self {
                kmeans_iterations: 0,
                kmeans_iteration_limit: 1. / f64::from(1 << 13),
                feedback_loop_trials: 0,
                max_histogram_entries: 1 << 16,
                min_posterization_input: 2,
            };
        }
        let mut iterations = (8 - value).max(0) as u16;
        iterations += iterations * iterations / 2;
        Self {
            kmeans_iterations: iterations,
            kmeans_iteration_limit: 1. / f64::from(1 << (23 - value)),
            feedback_loop_trials: (56 - 9 * value).max(0) as u16,
            max_histogram_entries: ((1 << 17) + (1 << 18) * (10 - value)) as u32,
            min_posterization_input: if value >= 8 { 1 } else { 0 },
        }
    }

    /// Big histograms get fewer trials
    #[must_use]
    pub fn feedback_loop_trials(&self, hist_items: usize) -> u16 {
        shrink_for_size(self.feedback_loop_trials, hist_items)
    }

    /// returns iterations, `iteration_limit`
    #[must_use]
    pub fn kmeans_iterations(&self, hist_items: usize) -> (u16, f64) {
        let iterations = shrink_for_size(self.kmeans_iterations, hist_items);
        let limit = if hist_items > 100_000 { self.kmeans_iteration_limit * 2. } else { self.kmeans_iteration_limit };
        (iterations, limit)
    }
}

fn shrink_for_size(mut n: u16, hist_items: usize) -> u16 {
    for threshold in [5000, 25000, 50000, 100_000] {
        if hist_items > threshold {
            n = (n * 3 + 3) / 4;
        }
    }
    n
}

#[test]
fn defaults() {
    let c = QuantizationConfig::new();
    assert_eq!((0, 100, 4, 256), (c.min_quality, c.max_quality, c.speed, c.max_colors));
    assert_eq!(1., c.dither_strength);
    assert_eq!(0, c.min_posterization);
    assert!(!c.last_index_transparent);
}

#[test]
fn validation() {
    let c = QuantizationConfig::default();
    assert_eq!(Ok(()), c.validate());
    assert_eq!(Err(ConfigError::QualityOrder), c.with_quality(50, 40).validate());
    assert_eq!(Err(ConfigError::QualityOutOfRange), c.with_quality(0, 101).validate());
    assert_eq!(Err(ConfigError::SpeedOutOfRange), c.with_speed(0).validate());
    assert_eq!(Err(ConfigError::SpeedOutOfRange), c.with_speed(12).validate());
    assert_eq!(Ok(()), c.with_speed(11).validate());
    assert_eq!(Err(ConfigError::DitherOutOfRange), c.with_dither_strength(1.5).validate());
    assert_eq!(Err(ConfigError::DitherOutOfRange), c.with_dither_strength(f32::NAN).validate());
    assert_eq!(Err(ConfigError::MaxColorsOutOfRange), c.with_max_colors(1).validate());
    assert_eq!(Err(ConfigError::MaxColorsOutOfRange), c.with_max_colors(257).validate());
    assert_eq!(Err(ConfigError::PosterizationOutOfRange), c.with_min_posterization(5).validate());
    assert_eq!(Err(ConfigError::GammaOutOfRange), c.with_output_gamma(1.).validate());
}

#[test]
fn counters() {
    let t = Tuning::for_speed(10);
    let (iter, _) = t.kmeans_iterations(1000);
    assert_eq!(iter, 0);
    assert_eq!(0, t.feedback_loop_trials(1000));
    assert_eq!(1, t.min_posterization_input);

    let t = Tuning::for_speed(1);
    let (iter, limit) = t.kmeans_iterations(1000);
    assert!(iter > 10);
    assert!(limit > 0. && limit < 0.001);
    assert!(t.feedback_loop_trials(1000) > t.feedback_loop_trials(200_000));
    assert!(t.max_histogram_entries > Tuning::for_speed(10).max_histogram_entries);

    let t = Tuning::for_speed(11);
    assert_eq!(0, t.kmeans_iterations(10).0);
    assert_eq!(2, t.min_posterization_input);
}

#[test]
fn mse_targets() {
    let c = QuantizationConfig::default();
    let (target_mse, perfect) = c.target_mse(0);
    assert!(perfect);
    assert!(target_mse < 0.0001);
    assert_eq!(None, c.max_mse());

    let c = c.with_quality(50, 80);
    let (target_mse, perfect) = c.target_mse(0);
    let max_mse = c.max_mse().unwrap();
    assert!(!perfect);
    assert!(target_mse > 0. && target_mse < 0.01);
    assert!(max_mse > target_mse && max_mse < 0.01);
}
