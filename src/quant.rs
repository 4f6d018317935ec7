use crate::config::Tuning;
use crate::error::*;
use crate::hist::{ColorHistogram, HistogramInternal};
use crate::kmeans::Kmeans;
use crate::mediancut::mediancut;
use crate::pal::{move_transparent_last, new_palette_unchecked, PalF, PalLen, Palette, MAX_COLORS};
use crate::pixel::{posterize_channel, WEIGHT_MSE};
use crate::session::Reporter;
use rgb::ComponentMap;
use std::cmp::Reverse;

/// What the palette has to satisfy, derived from the configuration and the size policy
#[derive(Debug, Clone)]
pub(crate) struct PaletteGoal {
    pub min_colors: PalLen,
    pub max_colors: PalLen,
    pub target_mse: f64,
    /// Max quality 100 was asked for, so exact colors are best whenever they fit
    pub aim_for_perfect_quality: bool,
    pub max_mse: Option<f64>,
    pub tuning: Tuning,
    pub output_gamma: f64,
    pub posterize_output: u8,
    pub last_index_transparent: bool,
}

/// Picks between `min_colors` and `max_colors` colors that best represent the histogram.
///
/// There's no quality target, so the palette will use as many colors as it can. `speed` is 1-11, as in the config.
/// If the histogram has fewer colors than `min_colors`, these colors are the palette.
pub fn build_palette(histogram: &ColorHistogram, min_colors: u16, max_colors: u16, speed: u8) -> Result<Palette, Error> {
    if !(1..=11).contains(&speed) {
        return Err(ConfigError::SpeedOutOfRange.into());
    }
    if min_colors == 0 || min_colors > max_colors || usize::from(max_colors) > MAX_COLORS {
        return Err(ValueOutOfRange);
    }
    let goal = PaletteGoal {
        min_colors,
        max_colors,
        target_mse: 0.,
        aim_for_perfect_quality: true,
        max_mse: None,
        tuning: Tuning::for_speed(speed),
        output_gamma: histogram.gamma(),
        posterize_output: 0,
        last_index_transparent: false,
    };
    Ok(build_palette_for_goal(histogram, &goal, &Reporter::silent())?.0)
}

/// Returns the palette and its average error against the histogram, if it was measured
pub(crate) fn build_palette_for_goal(histogram: &ColorHistogram, goal: &PaletteGoal, reporter: &Reporter<'_>) -> Result<(Palette, Option<f64>), Error> {
    if histogram.is_empty() {
        return Err(EmptyInput);
    }
    let mut hist = histogram.to_internal()?;
    let (palette, palette_error) = find_best_palette(goal, &mut hist, reporter)?;

    if let Some(mse) = palette_error {
        reporter.verbose_print(format!("  palette MSE={:0.3} (Q={})", mse_to_standard_mse(mse), mse_to_quality(mse)));
    }
    Ok((finalize_palette(&palette, histogram, goal), palette_error))
}

fn find_best_palette(goal: &PaletteGoal, hist: &mut HistogramInternal, reporter: &Reporter<'_>) -> Result<(PalF, Option<f64>), Error> {
    let few_input_colors = hist.items.len() <= goal.max_colors as usize;
    // if there's no way to reach min_colors, don't bother splitting
    if few_input_colors && (goal.aim_for_perfect_quality || hist.items.len() <= goal.min_colors as usize) {
        return Ok(palette_from_histogram(hist));
    }
    let target_mse = goal.target_mse;

    let mut max_colors = goal.max_colors;
    let total_trials = goal.tuning.feedback_loop_trials(hist.items.len()) as i16;
    let mut trials_left = total_trials;
    let mut best_palette = None;
    let mut target_mse_overshoot = if total_trials > 0 { 1.05 } else { 1. };
    let mut fails_in_a_row = 0;
    let mut palette_error = None;
    let mut palette = loop {
        let max_mse_per_color = target_mse.max(palette_error.unwrap_or(quality_to_mse(1))).max(quality_to_mse(51)) * 1.2;
        let mut new_palette = mediancut(hist, goal.min_colors, max_colors, target_mse * target_mse_overshoot, max_mse_per_color)?;

        let stage_done = 1. - (f32::from(trials_left.max(0)) / f32::from(total_trials + 1)).powi(2);
        reporter.verbose_print(format!("  selecting colors...{}%", (100. * stage_done) as u8));

        if trials_left <= 0 {
            break Some(new_palette);
        }

        let first_run_of_target_mse = best_palette.is_none() && target_mse > 0.;
        let total_error = Kmeans::iteration(hist, &mut new_palette, !first_run_of_target_mse)?;
        if best_palette.is_none() || total_error < palette_error.unwrap_or(f64::MAX) || (total_error <= target_mse && new_palette.len() < max_colors as usize) {
            if total_error < target_mse && total_error > 0. {
                // if number of colors could be reduced, try to keep it that way
                target_mse_overshoot = (target_mse_overshoot * 1.25).min(target_mse / total_error);
            }
            palette_error = Some(total_error);
            max_colors = max_colors.min(new_palette.len() as PalLen + 1).max(goal.min_colors);
            trials_left -= 1;
            fails_in_a_row = 0;
            best_palette = Some(new_palette);
        } else {
            fails_in_a_row += 1;
            target_mse_overshoot = 1.;
            trials_left -= 5 + fails_in_a_row;
        }
        if reporter.progress(10. + stage_done * 40.) {
            return Err(Aborted);
        }
        if trials_left <= 0 {
            break best_palette;
        }
    }.ok_or(ValueOutOfRange)?;

    refine_palette(&mut palette, goal, hist, &mut palette_error, reporter)?;

    Ok((palette, palette_error))
}

/// K-means passes until the error stops improving
fn refine_palette(palette: &mut PalF, goal: &PaletteGoal, hist: &mut HistogramInternal, palette_error: &mut Option<f64>, reporter: &Reporter<'_>) -> Result<(), Error> {
    let (iterations, iteration_limit) = goal.tuning.kmeans_iterations(hist.items.len());
    if iterations == 0 {
        return Ok(());
    }
    reporter.verbose_print("  moving colormap towards local minimum");
    let mut i = 0;
    while i < iterations {
        if reporter.progress(50. + f32::from(i) / f32::from(iterations) * 20.) {
            return Err(Aborted);
        }

        let pal_err = Kmeans::iteration(hist, palette, false)?;
        debug_assert!(pal_err < 1e20);
        let previous_palette_error = palette_error.replace(pal_err);

        if let Some(previous_palette_error) = previous_palette_error {
            if (previous_palette_error - pal_err).abs() < iteration_limit {
                break;
            }
        }
        i += if pal_err > goal.max_mse.unwrap_or(1e20) * 1.5 { 2 } else { 1 };
    }
    Ok(())
}

fn palette_from_histogram(hist: &HistogramInternal) -> (PalF, Option<f64>) {
    let mut hist_pal = PalF::new();
    for item in &hist.items {
        hist_pal.push(item.color, item.perceptual_weight);
    }
    (hist_pal, Some(0.))
}

/// Rounds to RGBA and makes sure there are at least `min_colors` unique entries, if the histogram has that many
fn finalize_palette(palette: &PalF, histogram: &ColorHistogram, goal: &PaletteGoal) -> Palette {
    let mut entries: Vec<_> = palette.to_rgba_entries(goal.output_gamma, goal.posterize_output)
        .into_iter().map(|(px, _)| px).collect();

    if entries.len() < goal.min_colors as usize {
        // rounding may have merged some colors, so the most popular input colors fill the gap
        let mut by_popularity: Vec<_> = histogram.entries().iter().collect();
        by_popularity.sort_by_key(|e| Reverse(e.count));
        for e in by_popularity {
            if entries.len() >= goal.min_colors as usize {
                break;
            }
            let px = e.color.map(|c| posterize_channel(c, goal.posterize_output));
            if !entries.contains(&px) {
                entries.push(px);
            }
        }
    }

    if goal.last_index_transparent {
        move_transparent_last(&mut entries);
    }
    new_palette_unchecked(entries)
}

pub(crate) fn quality_to_mse(quality: u8) -> f64 {
    if quality == 0 {
        return 1e20; // + epsilon for floating point errors
    }
    if quality >= 100 {
        return 0.;
    }
    let extra_low_quality_fudge = (0.016 / (0.001 + f64::from(quality)) - 0.001).max(0.);
    WEIGHT_MSE * (extra_low_quality_fudge + 2.5 / (210. + f64::from(quality)).powf(1.2) * (100.1 - f64::from(quality)) / 100.)
}

pub(crate) fn mse_to_quality(mse: f64) -> u8 {
    for i in (1..101).rev() {
        if mse <= quality_to_mse(i) + 0.000001 {
            return i;
        }
    }
    0
}

/// MSE on the familiar 0-65535 scale, for logging
pub(crate) fn mse_to_standard_mse(mse: f64) -> f64 {
    (mse * 65536. / 6.) / WEIGHT_MSE
}

#[test]
fn quality_curve() {
    assert_eq!(0., quality_to_mse(100));
    assert_eq!(100, mse_to_quality(0.));
    assert_eq!(0, mse_to_quality(1e30));
    let mut prev = 0.;
    for q in (1..100).rev() {
        let mse = quality_to_mse(q);
        assert!(mse > prev);
        assert_eq!(q, mse_to_quality(mse));
        prev = mse;
    }
}

#[cfg(test)]
fn noisy_histogram() -> ColorHistogram {
    use crate::hist::HistogramEntry;
    use crate::Pixel;
    let entries: Vec<_> = (0..1000u32).map(|i| HistogramEntry {
        color: Pixel::new((i * 7) as u8, (i * 13 / 5) as u8, (i * 31 / 7) as u8, 255),
        count: 1 + i % 7,
    }).collect();
    ColorHistogram::from_entries(&entries, 0.).unwrap()
}

#[test]
fn palette_sizes() {
    let hist = noisy_histogram();
    for speed in [1, 4, 10, 11] {
        let pal = build_palette(&hist, 1, 16, speed).unwrap();
        assert!(!pal.is_empty() && pal.len() <= 16, "{speed}");
        let pal = build_palette(&hist, 32, 64, speed).unwrap();
        assert!(pal.len() >= 32 && pal.len() <= 64, "{speed}");
        for (i, c) in pal.iter().enumerate() {
            assert!(!pal[..i].contains(c));
        }
    }
}

#[test]
fn few_colors_are_kept() {
    use crate::hist::HistogramEntry;
    use crate::Pixel;
    let colors = [Pixel::new(255, 0, 0, 255), Pixel::new(0, 0, 255, 128), Pixel::new(0, 0, 0, 0)];
    let entries: Vec<_> = colors.iter().enumerate().map(|(i, &color)| HistogramEntry { color, count: 10 - i as u32 }).collect();
    let hist = ColorHistogram::from_entries(&entries, 0.).unwrap();

    let pal = build_palette(&hist, 8, 16, 4).unwrap();
    assert_eq!(3, pal.len());
    for c in colors {
        assert!(pal.contains(&c), "{c:?} {pal:?}");
    }
}

#[test]
fn rejects_bad_arguments() {
    let hist = noisy_histogram();
    assert_eq!(Err(ValueOutOfRange), build_palette(&hist, 0, 16, 4));
    assert_eq!(Err(ValueOutOfRange), build_palette(&hist, 20, 16, 4));
    assert_eq!(Err(ValueOutOfRange), build_palette(&hist, 1, 300, 4));
    assert_eq!(Err(Error::InvalidConfig(ConfigError::SpeedOutOfRange)), build_palette(&hist, 1, 16, 0));
    let empty = ColorHistogram::from_entries(&[], 0.).unwrap();
    assert_eq!(Err(EmptyInput), build_palette(&empty, 1, 16, 4));
}

#[test]
fn same_every_time() {
    let hist = noisy_histogram();
    let a = build_palette(&hist, 1, 32, 3).unwrap();
    let b = build_palette(&hist, 1, 32, 3).unwrap();
    assert_eq!(a, b);
}
