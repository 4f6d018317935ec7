use crate::config::QuantizationConfig;
use crate::error::*;
use crate::hist::build_histogram_posterized;
use crate::image::Image;
use crate::pal::{PalLen, MAX_COLORS};
use crate::pixel::effective_gamma;
use crate::quant::{build_palette_for_goal, mse_to_standard_mse, quality_to_mse, PaletteGoal};
use crate::remap::{remap_to_palette, IndexedImage};
use std::fmt;
use std::sync::Arc;

/// Where a [`Session`] is in the pipeline
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, nothing done yet
    Idle,
    /// Counting colors of the image
    Sampling,
    /// Choosing the palette
    PaletteBuilding,
    /// Mapping pixels to the palette
    Remapping,
    /// Finished, quality was good enough
    Done,
    /// Finished without a usable image
    Rejected,
}

impl fmt::Display for SessionState {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Sampling => "sampling",
            Self::PaletteBuilding => "palette building",
            Self::Remapping => "remapping",
            Self::Done => "done",
            Self::Rejected => "rejected",
        })
    }
}

/// Receives human-readable progress messages.
///
/// Any `Fn(&str) + Send + Sync` closure is a sink. Messages are only informative.
pub trait LogSink: Send + Sync {
    /// A line of text
    fn log(&self, message: &str);

    /// Called on every state change of the session
    fn transition(&self, from: SessionState, to: SessionState) {
        self.log(&format!("{from} -> {to}"));
    }
}

impl<F: Fn(&str) + Send + Sync> LogSink for F {
    #[inline]
    fn log(&self, message: &str) {
        self(message);
    }
}

/// Sends messages to the [`log`](https://lib.rs/log) crate: transitions at debug level, the rest at info.
#[cfg(feature = "log")]
#[derive(Debug, Default, Copy, Clone)]
pub struct LogFacade;

#[cfg(feature = "log")]
impl LogSink for LogFacade {
    fn log(&self, message: &str) {
        log::info!("{}", message.trim_start());
    }

    fn transition(&self, from: SessionState, to: SessionState) {
        log::debug!("{from} -> {to}");
    }
}

/// Result of the progress callback
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlFlow {
    /// Continue processing as normal
    Continue = 1,
    /// Abort processing and fail
    Break = 0,
}

/// Decides how many colors the palette gets, before the quality gate is checked.
///
/// The session clamps the answer to `1..=config.max_colors`, with min <= max.
pub trait PaletteSizePolicy: Send + Sync {
    /// Returns `(min_colors, max_colors)`
    fn palette_size(&self, config: &QuantizationConfig, histogram_len: usize, pixel_count: usize) -> (u16, u16);
}

/// Default policy. Never more colors than pixels, and a higher quality floor asks for more colors.
///
/// `max = min(max_colors, pixels)`, `min = max * min_quality / 400`, at least 1.
#[derive(Debug, Default, Copy, Clone)]
pub struct QualityScaled;

impl PaletteSizePolicy for QualityScaled {
    fn palette_size(&self, config: &QuantizationConfig, _histogram_len: usize, pixel_count: usize) -> (u16, u16) {
        let max = pixel_count.min(usize::from(config.max_colors)).max(1) as u16;
        let min = (u32::from(max) * u32::from(config.min_quality) / 400) as u16;
        (min.clamp(1, max), max)
    }
}

/// Always the same range, e.g. to force a full palette
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedRange {
    /// At least this many colors, if the image has them
    pub min: u16,
    /// At most this many colors
    pub max: u16,
}

impl PaletteSizePolicy for FixedRange {
    #[inline]
    fn palette_size(&self, _: &QuantizationConfig, _: usize, _: usize) -> (u16, u16) {
        (self.min, self.max)
    }
}

/// How the session ended
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The image met the minimum quality
    Success,
    /// The best palette at this size couldn't reach the minimum quality, or the image was empty
    QualityTooLow,
    /// The progress callback asked to stop
    Aborted,
}

/// Outcome of [`Session::quantize`]. The image is only there on success.
#[derive(Clone, Debug)]
pub struct QuantizationResult {
    outcome: Outcome,
    quality: Option<u8>,
    image: Option<IndexedImage>,
    state: SessionState,
}

impl QuantizationResult {
    /// Whether there's an image
    #[inline]
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// 0-100, present iff the outcome is `Success`
    #[inline]
    #[must_use]
    pub fn achieved_quality(&self) -> Option<u8> {
        if self.outcome == Outcome::Success { self.quality } else { None }
    }

    /// Quality that was measured, even if it was too low. `None` if remapping didn't run.
    #[inline]
    #[must_use]
    pub fn measured_quality(&self) -> Option<u8> {
        self.quality
    }

    /// Where the session stopped: `Done` on success, `Rejected` otherwise
    #[inline]
    #[must_use]
    pub fn final_state(&self) -> SessionState {
        self.state
    }

    /// Present iff the outcome is `Success`
    #[inline]
    #[must_use]
    pub fn image(&self) -> Option<&IndexedImage> {
        self.image.as_ref()
    }

    /// For `?`. Outcomes other than `Success` become [`Error::QualityTooLow`] or [`Error::Aborted`].
    pub fn into_result(self) -> Result<(IndexedImage, u8), Error> {
        match (self.outcome, self.image, self.quality) {
            (Outcome::Success, Some(image), Some(quality)) => Ok((image, quality)),
            (Outcome::Aborted, ..) => Err(Aborted),
            _ => Err(QualityTooLow),
        }
    }

    fn rejected(quality: Option<u8>) -> Self {
        Self { outcome: Outcome::QualityTooLow, quality, image: None, state: SessionState::Rejected }
    }

    fn aborted() -> Self {
        Self { outcome: Outcome::Aborted, quality: None, image: None, state: SessionState::Rejected }
    }
}

type ProgressCallback = dyn Fn(f32) -> ControlFlow + Send + Sync;

/// Quantizes one image: histogram, palette, remap, then the quality gate.
///
/// The session is used up by [`Session::quantize`]. To try again with other settings, make a new one.
pub struct Session {
    config: QuantizationConfig,
    log: Option<Arc<dyn LogSink>>,
    progress: Option<Arc<ProgressCallback>>,
    size_policy: Arc<dyn PaletteSizePolicy>,
    state: SessionState,
}

impl Session {
    /// Settings are checked when the session starts, not here
    #[must_use]
    pub fn new(config: QuantizationConfig) -> Self {
        Self {
            config,
            log: None,
            progress: None,
            size_policy: Arc::new(QualityScaled),
            state: SessionState::Idle,
        }
    }

    /// Messages about state changes and progress go there
    #[must_use]
    pub fn with_log_sink<S: LogSink + 'static>(mut self, sink: S) -> Self {
        self.log = Some(Arc::new(sink));
        self
    }

    /// Called with 0-100 percent done. Returning [`ControlFlow::Break`] stops the session with [`Outcome::Aborted`].
    #[must_use]
    pub fn with_progress_callback<F: Fn(f32) -> ControlFlow + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Replaces the default [`QualityScaled`] policy
    #[must_use]
    pub fn with_palette_size_policy<P: PaletteSizePolicy + 'static>(mut self, policy: P) -> Self {
        self.size_policy = Arc::new(policy);
        self
    }

    /// Settings this session was made with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &QuantizationConfig {
        &self.config
    }

    /// Runs the whole pipeline once.
    ///
    /// Invalid settings are an `Err` and nothing else happens. Everything else, including an image
    /// too hard to quantize at this quality, is an `Ok` with the [`Outcome`].
    pub fn quantize(mut self, image: &Image<'_>) -> Result<QuantizationResult, Error> {
        self.config.validate()?;

        let log = self.log.take();
        let progress = self.progress.take();
        let reporter = Reporter { log: log.as_deref(), progress: progress.as_deref() };

        let result = self.run(image, &reporter);
        match result {
            Err(Aborted) => {
                reporter.verbose_print("  aborted");
                self.enter(SessionState::Rejected, &reporter);
                Ok(QuantizationResult::aborted())
            },
            other => other,
        }
    }

    fn run(&mut self, image: &Image<'_>, reporter: &Reporter<'_>) -> Result<QuantizationResult, Error> {
        let config = self.config;
        let tuning = config.tuning();

        self.enter(SessionState::Sampling, reporter);
        let posterize_bits = config.min_posterization.max(tuning.min_posterization_input);
        let hist = build_histogram_posterized(image, tuning.max_histogram_entries as usize, posterize_bits);
        reporter.verbose_print(format!("  made histogram...{} colors found", hist.len()));
        if hist.is_empty() {
            reporter.verbose_print("  image has no pixels");
            self.enter(SessionState::Rejected, reporter);
            return Ok(QuantizationResult::rejected(None));
        }
        if reporter.progress(10.) {
            return Err(Aborted);
        }

        self.enter(SessionState::PaletteBuilding, reporter);
        let (min_colors, max_colors) = self.palette_size(hist.len(), image.width() * image.height());
        let (target_mse, aim_for_perfect_quality) = config.target_mse(hist.posterize_bits());
        let output_gamma = effective_gamma(config.output_gamma);
        let goal = PaletteGoal {
            min_colors,
            max_colors,
            target_mse,
            aim_for_perfect_quality,
            max_mse: config.max_mse(),
            tuning,
            output_gamma,
            posterize_output: config.min_posterization,
            last_index_transparent: config.last_index_transparent,
        };
        let (palette, palette_error) = build_palette_for_goal(&hist, &goal, reporter)?;
        drop(hist);
        reporter.verbose_print(format!("  {} colors in palette (allowed {min_colors}-{max_colors})", palette.len()));
        if reporter.progress(70.) {
            return Err(Aborted);
        }

        self.enter(SessionState::Remapping, reporter);
        let (indexed, quality) = remap_to_palette(image, palette, output_gamma, config.dither_strength, palette_error, reporter)?;

        if quality < config.min_quality {
            let mse = mse_to_standard_mse(quality_to_mse(quality));
            reporter.verbose_print(format!("  image degradation MSE={mse:0.3} (Q={quality}) exceeded limit of Q={}", config.min_quality));
            self.enter(SessionState::Rejected, reporter);
            return Ok(QuantizationResult::rejected(Some(quality)));
        }
        reporter.verbose_print(format!("  remapped with Q={quality}"));
        // a Break at 100% still discards the result
        if reporter.progress(100.) {
            return Err(Aborted);
        }
        self.enter(SessionState::Done, reporter);

        Ok(QuantizationResult {
            outcome: Outcome::Success,
            quality: Some(quality),
            image: Some(indexed),
            state: self.state,
        })
    }

    /// Whatever the policy says, stays within what the config and palette allow
    fn palette_size(&self, histogram_len: usize, pixel_count: usize) -> (PalLen, PalLen) {
        let (min, max) = self.size_policy.palette_size(&self.config, histogram_len, pixel_count);
        let max = max.clamp(1, self.config.max_colors.min(MAX_COLORS as PalLen).max(1));
        (min.clamp(1, max), max)
    }

    fn enter(&mut self, next: SessionState, reporter: &Reporter<'_>) {
        reporter.transition(self.state, next);
        self.state = next;
    }
}

impl fmt::Debug for Session {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("log", &self.log.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Quantizes an image with a fresh [`Session`] and no callbacks
pub fn quantize(image: &Image<'_>, config: QuantizationConfig) -> Result<QuantizationResult, Error> {
    Session::new(config).quantize(image)
}

/// The session's callbacks, as seen by the pipeline stages
pub(crate) struct Reporter<'a> {
    log: Option<&'a dyn LogSink>,
    progress: Option<&'a ProgressCallback>,
}

impl Reporter<'_> {
    #[inline]
    pub fn silent() -> Self {
        Reporter { log: None, progress: None }
    }

    /// true means abort
    #[inline]
    pub fn progress(&self, percent: f32) -> bool {
        match self.progress {
            Some(f) => f(percent) == ControlFlow::Break,
            None => false,
        }
    }

    #[inline]
    pub fn verbose_print(&self, msg: impl AsRef<str>) {
        if let Some(log) = self.log {
            log.log(msg.as_ref());
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) {
        if let Some(log) = self.log {
            log.transition(from, to);
        }
    }
}

#[test]
fn size_policies() {
    let config = QuantizationConfig::new().with_quality(80, 100).with_max_colors(100);
    assert_eq!((20, 100), QualityScaled.palette_size(&config, 5000, 1000));
    assert_eq!((1, 4), QualityScaled.palette_size(&config, 1, 4));
    assert_eq!((1, 1), QualityScaled.palette_size(&config, 0, 0));
    assert_eq!((1, 100), QualityScaled.palette_size(&config.with_quality(0, 100), 5000, 1000));

    let s = Session::new(config).with_palette_size_policy(FixedRange { min: 300, max: 500 });
    assert_eq!((100, 100), s.palette_size(10, 10));
    let s = Session::new(config).with_palette_size_policy(FixedRange { min: 0, max: 0 });
    assert_eq!((1, 1), s.palette_size(10, 10));
}

#[test]
fn logs_transitions() {
    use std::sync::Mutex;
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = {
        let lines = lines.clone();
        move |msg: &str| lines.lock().unwrap().push(msg.to_string())
    };
    let px = vec![crate::Pixel::new(1, 2, 3, 255); 16];
    let img = Image::new(px, 4, 4).unwrap();
    let res = Session::new(QuantizationConfig::new()).with_log_sink(sink).quantize(&img).unwrap();
    assert_eq!(Outcome::Success, res.outcome());
    assert_eq!(SessionState::Done, res.final_state());

    let lines = lines.lock().unwrap();
    let transitions: Vec<_> = lines.iter().filter(|l| l.contains(" -> ")).map(String::as_str).collect();
    assert_eq!(vec!["idle -> sampling", "sampling -> palette building", "palette building -> remapping", "remapping -> done"], transitions);
    assert!(lines.iter().any(|l| l.contains("colors found")));
}

#[test]
fn invalid_config_logs_nothing() {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let img = Image::new(vec![crate::Pixel::new(1, 2, 3, 255); 4], 2, 2).unwrap();
    let res = Session::new(QuantizationConfig::new().with_quality(50, 40))
        .with_log_sink(move |_: &str| { c.fetch_add(1, SeqCst); })
        .quantize(&img);
    assert_eq!(Err(Error::InvalidConfig(ConfigError::QualityOrder)), res.map(|r| r.outcome()));
    assert_eq!(0, calls.load(SeqCst));
}

#[test]
fn abort() {
    let px: Vec<_> = (0..64 * 64u32).map(|i| crate::Pixel::new(i as u8, (i >> 4) as u8, (i >> 8) as u8, 255)).collect();
    let img = Image::new(px, 64, 64).unwrap();
    // 100 is only reported once remapping has finished
    for stop_at in [5., 40., 90., 100.] {
        let res = Session::new(QuantizationConfig::new().with_speed(3))
            .with_progress_callback(move |p| if p >= stop_at { ControlFlow::Break } else { ControlFlow::Continue })
            .quantize(&img)
            .unwrap();
        assert_eq!(Outcome::Aborted, res.outcome(), "{stop_at}");
        assert_eq!(SessionState::Rejected, res.final_state());
        assert!(res.image().is_none());
        assert_eq!(None, res.achieved_quality());
        assert_eq!(Err(Aborted), res.into_result().map(|_| ()));
    }
}

#[test]
fn empty_image_is_too_low_quality() {
    let img = Image::new(Vec::<crate::Pixel>::new(), 0, 0).unwrap();
    let res = quantize(&img, QuantizationConfig::new()).unwrap();
    assert_eq!(Outcome::QualityTooLow, res.outcome());
    assert_eq!(None, res.measured_quality());
    assert_eq!(SessionState::Rejected, res.final_state());
    assert_eq!(Err(QualityTooLow), res.into_result().map(|_| ()));
}
