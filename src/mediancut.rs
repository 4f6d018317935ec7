use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::pal::{PalF, PalLen};
use crate::pixel::{FColor, ARGBF};
use crate::quant::quality_to_mse;
use crate::OrdFloat;
use rgb::ComponentMap;
use rgb::ComponentSlice;
use std::cmp::{Ordering, Reverse};

struct MedianCutter<'hist> {
    boxes: Vec<MBox<'hist>>,
    hist_total_perceptual_weight: f64,
    target_colors: PalLen,
    min_colors: PalLen,
}

struct MBox<'hist> {
    /// Histogram entries that fell into this bucket
    colors: &'hist mut [HistItem],
    /// Center color selected to represent the colors
    avg_color: FColor,
    /// Difference from the average color, per channel, weighed using `adjusted_weight`
    variance: ARGBF,
    /// Same as variance, but of brightness only
    luma_variance: f32,
    adjusted_weight_sum: f64,
    total_error: Option<f64>,
    /// max color difference between `avg_color` and any histogram entry
    max_error: f32,
}

impl<'hist> MBox<'hist> {
    fn new(hist: &'hist mut [HistItem]) -> Self {
        let weight_sum = hist.iter().map(|a| {
            debug_assert!(a.adjusted_weight.is_finite());
            debug_assert!(a.adjusted_weight > 0.);
            f64::from(a.adjusted_weight)
        }).sum();
        let avg_color = weighed_average_color(hist);
        Self::with_color(hist, weight_sum, avg_color)
    }

    fn new_split(hist: &'hist mut [HistItem], adjusted_weight_sum: f64, other_boxes: &[MBox<'_>]) -> Self {
        debug_assert!(!hist.is_empty());
        let mut avg_color = weighed_average_color(hist);
        // It's possible that an average color will end up being bad for every entry,
        // so prefer picking actual colors so that at least one histogram entry will be satisfied.
        if (hist.len() < 500 && hist.len() > 2) || Self::is_useless_color(&avg_color, hist, other_boxes) {
            avg_color = hist.iter().min_by_key(|a| OrdFloat::new(avg_color.diff(&a.color))).map(|a| a.color).unwrap_or_default();
        }
        Self::with_color(hist, adjusted_weight_sum, avg_color)
    }

    fn with_color(hist: &'hist mut [HistItem], adjusted_weight_sum: f64, avg_color: FColor) -> Self {
        let mut variance = ARGBF::default();
        let mut luma_variance = 0.;
        let mut max_error = 0_f32;
        let avg_luma = avg_color.luma();
        for a in hist.iter() {
            variance += (avg_color.0 - a.color.0).map(|c| c * c) * a.adjusted_weight;
            let dl = avg_luma - a.color.luma();
            luma_variance += dl * dl * a.adjusted_weight;
            max_error = max_error.max(avg_color.diff(&a.color));
        }
        Self {
            colors: hist,
            avg_color,
            variance,
            luma_variance,
            adjusted_weight_sum,
            total_error: None,
            max_error,
        }
    }

    /// All colors are better served by some other box
    fn is_useless_color(new_avg_color: &FColor, colors: &[HistItem], other_boxes: &[MBox<'_>]) -> bool {
        colors.iter().all(move |c| {
            let own_box_diff = new_avg_color.diff(&c.color);
            other_boxes.iter().any(move |other| other.avg_color.diff(&c.color) < own_box_diff)
        })
    }

    fn compute_total_error(&mut self) -> f64 {
        let avg = self.avg_color;
        let e = self.colors.iter().map(move |a| f64::from(avg.diff(&a.color)) * f64::from(a.perceptual_weight)).sum::<f64>();
        self.total_error = Some(e);
        e
    }

    /// Sort key puts the channel with the highest variance first
    fn prepare_sort(&mut self) {
        let vars = self.variance.as_slice();
        let mut channels = [0, 1, 2, 3];
        channels.sort_by_key(|&ch| Reverse(OrdFloat::new(vars[ch])));

        for a in self.colors.iter_mut() {
            let chans = a.color.as_slice();
            // Only the first channel really matters. But other channels are included, because when trying median cut
            // many times with different histogram weights, I don't want sort randomness to influence the outcome.
            a.mc_sort_value = (((chans[channels[0]] * 65535.) as u32) << 16)
                | ((chans[channels[2]] + chans[channels[1]] / 2. + chans[channels[3]] / 4.) * 65535.) as u32;
        }
    }

    fn median_color(&mut self) -> FColor {
        let len = self.colors.len();
        let (_, mid_item, _) = self.colors.select_nth_unstable_by_key(len / 2, |a| a.mc_sort_value);
        mid_item.color
    }

    /// Weight of colors far from the median is boosted, so the split doesn't just halve the pixel count
    fn prepare_color_weight_total(&mut self) -> f64 {
        let median = self.median_color();
        self.colors.iter_mut().map(move |a| {
            let w = median.diff(&a.color).sqrt() * (1. + a.adjusted_weight).sqrt();
            debug_assert!(w.is_finite());
            a.mc_color_weight = w;
            f64::from(w)
        })
        .sum()
    }

    fn split(mut self, other_boxes: &[MBox<'_>]) -> [Self; 2] {
        self.prepare_sort();
        let half_weight = self.prepare_color_weight_total() / 2.;
        self.colors.sort_by_key(|a| a.mc_sort_value);

        // first index where the running weight reaches half, but both sides must be non-empty
        let mut running = 0.;
        let break_at = self.colors.iter()
            .position(|a| {
                running += f64::from(a.mc_color_weight);
                running >= half_weight
            })
            .map_or(self.colors.len() / 2, |i| i + 1)
            .clamp(1, self.colors.len() - 1);

        let (left, right) = self.colors.split_at_mut(break_at);
        let left_sum = left.iter().map(|a| f64::from(a.adjusted_weight)).sum();
        let right_sum = self.adjusted_weight_sum - left_sum;

        [MBox::new_split(left, left_sum, other_boxes),
         MBox::new_split(right, right_sum, other_boxes)]
    }

    /// How badly the box needs splitting
    fn split_priority(&self, max_mse: f64) -> f64 {
        let cv = self.variance.r.max(self.variance.g).max(self.variance.b);
        let mut thissum = self.adjusted_weight_sum * f64::from(cv.max(self.variance.a));
        if f64::from(self.max_error) > max_mse {
            thissum = thissum * f64::from(self.max_error) / max_mse;
        }
        thissum
    }
}

impl<'hist> MedianCutter<'hist> {
    fn new(hist: &'hist mut HistogramInternal, min_colors: PalLen, target_colors: PalLen) -> Result<Self, Error> {
        let hist_total_perceptual_weight = hist.total_perceptual_weight;

        let mut boxes = Vec::new();
        boxes.try_reserve(target_colors as usize)?;

        let used_clusters = hist.clusters.iter().filter(|c| c.begin != c.end).count();
        if used_clusters <= target_colors as usize / 3 {
            let mut rest = &mut hist.items[..];
            // clusters are sorted and contiguous
            for c in hist.clusters.iter().filter(|c| c.begin != c.end) {
                let (this_box, tail) = rest.split_at_mut(c.end - c.begin);
                rest = tail;
                boxes.push(MBox::new(this_box));
            }
            debug_assert!(rest.is_empty());
        } else {
            boxes.push(MBox::new(&mut hist.items[..]));
        }

        Ok(Self {
            boxes,
            hist_total_perceptual_weight,
            target_colors,
            min_colors: min_colors.min(target_colors),
        })
    }

    fn total_box_error_below_target(&mut self, mut target_mse: f64) -> bool {
        target_mse *= self.hist_total_perceptual_weight;
        let mut total_error = self.boxes.iter().filter_map(|mb| mb.total_error).sum::<f64>();
        if total_error > target_mse {
            return false;
        }
        for mb in self.boxes.iter_mut().filter(|mb| mb.total_error.is_none()) {
            total_error += mb.compute_total_error();
            if total_error > target_mse {
                return false;
            }
        }
        true
    }

    fn cut(mut self, target_mse: f64, max_mse: f64) -> PalF {
        let max_mse = max_mse.max(quality_to_mse(20));

        while self.boxes.len() < self.target_colors as usize {
            // first splits boxes that exceed quality limit (to have colors for things like odd green pixel),
            // later raises the limit to allow large smooth areas/gradients get colors.
            let fraction_done = self.boxes.len() as f64 / f64::from(self.target_colors);
            let current_max_mse = max_mse + fraction_done * 16. * max_mse;
            let Some(bi) = self.take_best_splittable_box(current_max_mse) else { break };

            let halves = bi.split(&self.boxes);
            self.boxes.extend(halves);

            if self.boxes.len() >= self.min_colors as usize && self.total_box_error_below_target(target_mse) {
                break;
            }
        }

        self.into_palette()
    }

    /// Equal priorities are decided by brightness spread, since that's what is most visible
    fn take_best_splittable_box(&mut self, max_mse: f64) -> Option<MBox<'hist>> {
        let mut best: Option<(usize, f64, f32)> = None;
        for (i, b) in self.boxes.iter().enumerate().filter(|(_, b)| b.colors.len() > 1) {
            let priority = b.split_priority(max_mse);
            let better = match best {
                None => true,
                Some((_, best_priority, best_luma)) => match priority.partial_cmp(&best_priority) {
                    Some(Ordering::Greater) => true,
                    Some(Ordering::Equal) => b.luma_variance > best_luma,
                    _ => false,
                },
            };
            if better {
                best = Some((i, priority, b.luma_variance));
            }
        }
        best.map(|(i, ..)| self.boxes.swap_remove(i))
    }

    fn into_palette(mut self) -> PalF {
        let mut palette = PalF::new();

        for (i, b) in self.boxes.iter_mut().enumerate() {
            b.colors.iter_mut().for_each(move |a| a.likely_palette_index = i as _);

            // store total color popularity (perceptual_weight is approximation of it)
            let pop = b.colors.iter().map(|a| f64::from(a.perceptual_weight)).sum::<f64>();
            palette.push(b.avg_color, pop as f32);
        }
        palette
    }
}

/// Splits the histogram into at most `target_colors` boxes, and at least `min_colors` if there are that many colors.
#[inline(never)]
pub(crate) fn mediancut(hist: &mut HistogramInternal, min_colors: PalLen, target_colors: PalLen, target_mse: f64, max_mse_per_color: f64) -> Result<PalF, Error> {
    Ok(MedianCutter::new(hist, min_colors, target_colors)?.cut(target_mse, max_mse_per_color))
}

fn weighed_average_color(hist: &[HistItem]) -> FColor {
    debug_assert!(!hist.is_empty());
    let mut t = FColor::default();
    let mut sum = 0.;
    for c in hist {
        sum += c.adjusted_weight;
        t.0 += c.color.0 * c.adjusted_weight;
    }
    if sum != 0. {
        t.0 /= sum;
    }
    t
}

#[cfg(test)]
fn gradient_hist(n: u8) -> HistogramInternal {
    use crate::hist::{ColorHistogram, HistogramEntry};
    use crate::pixel::Pixel;
    let entries: Vec<_> = (0..n).map(|i| HistogramEntry { color: Pixel::new(i, 255 - i, i / 2, 255), count: 1 + u32::from(i % 3) }).collect();
    ColorHistogram::from_entries(&entries, 0.).unwrap().to_internal().unwrap()
}

#[test]
fn splits_to_target() {
    let mut hist = gradient_hist(200);
    let pal = mediancut(&mut hist, 1, 16, 0., quality_to_mse(50)).unwrap();
    assert_eq!(16, pal.len());
    assert!(hist.items.iter().all(|i| (i.likely_palette_index as usize) < 16));
}

#[test]
fn stops_early_but_not_below_min() {
    let mut hist = gradient_hist(200);
    let loose = mediancut(&mut hist, 1, 64, 1., quality_to_mse(50)).unwrap();
    assert!(loose.len() < 64);

    let mut hist = gradient_hist(200);
    let pal = mediancut(&mut hist, 40, 64, 1., quality_to_mse(50)).unwrap();
    assert!(pal.len() >= 40 && pal.len() <= 64);
}

#[test]
fn few_colors_never_duplicate() {
    let mut hist = gradient_hist(3);
    let pal = mediancut(&mut hist, 1, 16, 0., quality_to_mse(50)).unwrap();
    assert_eq!(3, pal.len());
}
