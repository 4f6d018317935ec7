use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::nearest::Nearest;
use crate::pal::{PalF, PalIndex};
use crate::pixel::FColor;
use rgb::alt::ARGB;
use rgb::ComponentMap;

pub(crate) struct Kmeans {
    averages: Vec<ColorAvg>,
    weighed_diff_sum: f64,
}

#[derive(Copy, Clone, Default)]
struct ColorAvg {
    pub sum: ARGB<f64>,
    pub total: f64,
}

/// K-Means iteration: new palette color is computed from weighted average of colors that map best to that palette entry.
impl Kmeans {
    #[inline]
    pub fn new(pal_len: usize) -> Result<Self, Error> {
        let mut averages = Vec::new();
        averages.try_reserve_exact(pal_len)?;
        averages.resize(pal_len, ColorAvg::default());
        Ok(Self {
            averages,
            weighed_diff_sum: 0.,
        })
    }

    #[inline]
    pub fn update_color(&mut self, px: FColor, value: f32, matched: PalIndex) {
        let c = &mut self.averages[matched as usize];
        c.sum += (px.0 * value).map(f64::from);
        c.total += f64::from(value);
    }

    pub fn finalize(self, palette: &mut PalF) -> f64 {
        for (avg, (color, pop)) in self.averages.iter().zip(palette.iter_mut()) {
            let total = avg.total;
            *pop = total as f32;
            if total > 0. {
                *color = avg.sum.map(move |c| (c / total) as f32).into();
            }
        }
        self.weighed_diff_sum
    }

    /// Moves palette entries to the centers of their colors. Returns the new average error.
    ///
    /// With `adjust_weight`, colors that remain poorly matched get more weight in the next pass.
    #[inline(never)]
    pub(crate) fn iteration(hist: &mut HistogramInternal, palette: &mut PalF, adjust_weight: bool) -> Result<f64, Error> {
        if hist.items.is_empty() {
            return Ok(0.);
        }

        let mut kmeans = Kmeans::new(palette.len())?;
        {
            let n = Nearest::new(palette)?;
            kmeans.iterate_batch(&mut hist.items, &n, palette.as_slice(), adjust_weight);
        }
        let diff = kmeans.finalize(palette) / hist.total_perceptual_weight;

        // kmeans may have obsoleted some palette entries. Replace them with any entry from the histogram
        // (it happens so rarely that there's no point doing something smarter)
        palette.iter_mut().filter(|(_, p)| **p == 0.).zip(hist.items.iter()).for_each(|((c, _), item)| {
            *c = item.color;
        });
        Ok(diff)
    }

    fn iterate_batch(&mut self, batch: &mut [HistItem], n: &Nearest<'_>, colors: &[FColor], adjust_weight: bool) {
        self.weighed_diff_sum += batch.iter_mut().map(|item| {
            let px = item.color;
            let (matched, mut diff) = n.search(&px, item.likely_palette_index);
            item.likely_palette_index = matched;
            if adjust_weight {
                let remapped = colors[matched as usize];
                let (_, new_diff) = n.search(&FColor(px.0 + px.0 - remapped.0), matched);
                diff = new_diff;
                item.adjusted_weight = (item.perceptual_weight + 2. * item.adjusted_weight) * (0.5 + diff);
            }
            debug_assert!(f64::from(diff) < 1e20);
            self.update_color(px, item.adjusted_weight, matched);
            f64::from(diff * item.perceptual_weight)
        }).sum::<f64>();
    }
}

#[test]
fn moves_to_center() {
    use crate::hist::{ColorHistogram, HistogramEntry};
    use crate::Pixel;

    let hist = ColorHistogram::from_entries(&[
        HistogramEntry { color: Pixel::new(10, 10, 10, 255), count: 1 },
        HistogramEntry { color: Pixel::new(30, 30, 30, 255), count: 1 },
        HistogramEntry { color: Pixel::new(250, 250, 250, 255), count: 1 },
    ], 0.).unwrap();
    let mut internal = hist.to_internal().unwrap();
    let lut = crate::pixel::gamma_lut(hist.gamma());

    let mut pal = PalF::new();
    pal.push(FColor::from_rgba(&lut, Pixel::new(0, 0, 0, 255)), 1.);
    pal.push(FColor::from_rgba(&lut, Pixel::new(255, 255, 255, 255)), 1.);

    let before = Kmeans::iteration(&mut internal, &mut pal, false).unwrap();
    let after = Kmeans::iteration(&mut internal, &mut pal, false).unwrap();
    assert!(after < before);

    let dark = pal.as_slice()[0].to_rgba(hist.gamma());
    assert!(dark.r > 10 && dark.r < 30, "{dark:?}");
    assert_eq!(Pixel::new(250, 250, 250, 255), pal.as_slice()[1].to_rgba(hist.gamma()));
    assert!(internal.items.iter().all(|i| i.likely_palette_index < 2));
}
