use crate::error::*;
use crate::image::Image;
use crate::pal::PalIndex;
use crate::pixel::{effective_gamma, gamma_lut, FColor, Pixel};
use std::collections::HashMap;
use std::fmt;

/// Beyond this the colors are too coarse to be worth keeping apart
const MAX_POSTERIZE_BITS: u8 = 7;

/// Key 0 is only for fully transparent pixels. Visible colors that posterize to all zeros go here.
/// Posterized keys never have the low bit of alpha set, so only the color (0, 0, 0, 1) itself shares it.
const VISIBLE_ZERO_KEY: u32 = u32::from_ne_bytes([0, 0, 0, 1]);

/// Number of pixels in a given color
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistogramEntry {
    /// The color
    pub color: Pixel,
    /// Importance of the color (e.g. number of occurrences)
    pub count: u32,
}

/// Weighted frequency of colors in an image.
///
/// Colors that differ only in the posterized low bits share one entry, represented by their average.
/// Entries are in a stable order for the same input.
#[derive(Debug, Clone)]
pub struct ColorHistogram {
    entries: Vec<HistogramEntry>,
    posterize_bits: u8,
    gamma: f64,
}

/// Counts colors of the image.
///
/// If there are more than `max_histogram_size` distinct colors, precision is reduced
/// (neighboring colors merged) until the histogram fits. When the precision can't get any lower,
/// the closest pairs of colors are merged. The budget is at least 1 entry.
///
/// Fully transparent pixels are kept in their own entry, unless the budget forces merging it.
#[must_use]
pub fn build_histogram(image: &Image<'_>, max_histogram_size: usize) -> ColorHistogram {
    build_histogram_posterized(image, max_histogram_size, 0)
}

pub(crate) fn build_histogram_posterized(image: &Image<'_>, max_histogram_size: usize, posterize_bits: u8) -> ColorHistogram {
    let mut builder = HistogramBuilder::new(posterize_bits.min(MAX_POSTERIZE_BITS));

    // assume large images repeat their colors a lot
    let surface_area = image.width() * image.height();
    let estimated_colors = (surface_area / if surface_area > 512 * 512 { 7 } else { 5 }).min(250_000);
    builder.hashmap.reserve(estimated_colors.min(max_histogram_size.saturating_add(1)));

    for row in image.rows() {
        for &px in row {
            builder.add_color(px, 1);
        }
        // cheaper to merge early than to grow the map to the image's full color count
        while builder.hashmap.len() > max_histogram_size.saturating_mul(2) && builder.posterize_bits < MAX_POSTERIZE_BITS {
            builder.reduce_precision();
        }
    }
    while builder.hashmap.len() > max_histogram_size && builder.posterize_bits < MAX_POSTERIZE_BITS {
        builder.reduce_precision();
    }
    builder.finish(image.gamma(), max_histogram_size)
}

impl ColorHistogram {
    /// For when colors have been already counted elsewhere.
    ///
    /// Identical colors are merged. Entries with count 0 are skipped.
    /// The gamma may be 0 to mean sRGB.
    pub fn from_entries(entries: &[HistogramEntry], gamma: f64) -> Result<Self, Error> {
        if !(0. ..1.).contains(&gamma) {
            return Err(ConfigError::GammaOutOfRange.into());
        }
        let mut builder = HistogramBuilder::new(0);
        builder.hashmap.try_reserve(entries.len())?;
        for e in entries {
            builder.add_color(e.color, e.count);
        }
        Ok(builder.finish(effective_gamma(gamma), usize::MAX))
    }

    /// Colors with their counts, in a stable order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    /// Number of distinct (posterized) colors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The image had no pixels
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many low bits per channel had to be ignored
    #[inline]
    #[must_use]
    pub fn posterize_bits(&self) -> u8 {
        self.posterize_bits
    }

    /// Gamma of the colors, never 0
    #[inline]
    #[must_use]
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Sum of all counts. For a histogram of an image, that's the number of pixels.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.count)).sum()
    }

    pub(crate) fn to_internal(&self) -> Result<HistogramInternal, Error> {
        let lut = gamma_lut(self.gamma);

        let mut items = Vec::new();
        items.try_reserve_exact(self.entries.len())?;

        // Limit perceptual weight to 1/10th of the image surface area to prevent
        // a single color from dominating all others.
        let max_perceptual_weight = (0.1 * self.total_count() as f64) as f32;

        items.extend(self.entries.iter().map(|e| {
            let weight = (e.count as f32).min(max_perceptual_weight).max(f32::MIN_POSITIVE);
            HistItem {
                color: FColor::from_rgba(&lut, e.color),
                adjusted_weight: weight,
                perceptual_weight: weight,
                mc_color_weight: 0.,
                mc_sort_value: 0,
                likely_palette_index: 0,
                cluster: cluster_index(e.color),
            }
        }));
        // groups extreme colors together, order within a cluster stays stable
        items.sort_by_key(|item| item.cluster);

        let mut clusters = [Cluster { begin: 0, end: 0 }; MAX_CLUSTERS];
        for (i, item) in items.iter().enumerate() {
            let c = &mut clusters[item.cluster as usize];
            if c.begin == c.end {
                c.begin = i;
            }
            c.end = i + 1;
        }

        let total_perceptual_weight = items.iter().map(|a| f64::from(a.perceptual_weight)).sum();
        Ok(HistogramInternal { items, total_perceptual_weight, clusters })
    }
}

/// Accumulated pixels of one posterized color
#[derive(Copy, Clone, Default)]
struct Bucket {
    count: u32,
    pixels: u64,
    sum: [u64; 4],
}

impl Bucket {
    fn merge(&mut self, other: &Bucket) {
        self.count = self.count.saturating_add(other.count);
        self.pixels += other.pixels;
        for (m, s) in self.sum.iter_mut().zip(other.sum) {
            *m += s;
        }
    }

    /// Average of all pixels that fell into the bucket
    fn average(&self) -> [u8; 4] {
        let n = self.pixels.max(1);
        self.sum.map(|s| ((s + n / 2) / n).min(255) as u8)
    }

    fn distance(&self, other: &Bucket) -> u32 {
        self.average().iter().zip(other.average()).map(|(&a, b)| {
            let d = u32::from(a.abs_diff(b));
            d * d
        }).sum()
    }
}

struct HistogramBuilder {
    /// The key is the posterized RGBA cast to u32
    hashmap: HashMap<u32, Bucket, U32Hasher>,
    posterize_bits: u8,
}

impl HistogramBuilder {
    fn new(posterize_bits: u8) -> Self {
        Self {
            hashmap: HashMap::with_hasher(U32Hasher(0)),
            posterize_bits,
        }
    }

    #[inline(always)]
    fn posterize_mask(&self) -> u32 {
        let channel_mask = 255u8 << self.posterize_bits;
        u32::from_ne_bytes([channel_mask; 4])
    }

    /// Only fully transparent colors get key 0
    #[inline(always)]
    fn posterized_key(&self, key: u32) -> u32 {
        let posterized = key & self.posterize_mask();
        if posterized == 0 && key != 0 { VISIBLE_ZERO_KEY } else { posterized }
    }

    #[inline(always)]
    fn add_color(&mut self, px: Pixel, count: u32) {
        if count == 0 {
            return;
        }
        // all fully transparent colors are the same
        let (key, px) = if px.a != 0 {
            (self.posterized_key(u32::from_ne_bytes([px.r, px.g, px.b, px.a])), px)
        } else {
            (0, Pixel::new(0, 0, 0, 0))
        };
        let bucket = self.hashmap.entry(key).or_default();
        // it can overflow on images over 2^32 pixels large
        bucket.count = bucket.count.saturating_add(count);
        let c = u64::from(count);
        bucket.pixels += c;
        bucket.sum[0] += u64::from(px.r) * c;
        bucket.sum[1] += u64::from(px.g) * c;
        bucket.sum[2] += u64::from(px.b) * c;
        bucket.sum[3] += u64::from(px.a) * c;
    }

    /// Merges buckets that differ only in one more low bit
    fn reduce_precision(&mut self) {
        self.posterize_bits += 1;

        let new_size = (self.hashmap.len() / 3).max(16);
        let old = std::mem::replace(&mut self.hashmap, HashMap::with_capacity_and_hasher(new_size, U32Hasher(0)));
        for (key, b) in old {
            let key = self.posterized_key(key);
            self.hashmap.entry(key).or_default().merge(&b);
        }
    }

    fn finish(self, gamma: f64, max_histogram_size: usize) -> ColorHistogram {
        let mut keyed: Vec<_> = self.hashmap.into_iter().collect();
        keyed.sort_unstable_by_key(|&(key, _)| key);
        merge_closest(&mut keyed, max_histogram_size.max(1));

        let entries = keyed.into_iter().map(|(_, bucket)| {
            let [r, g, b, a] = bucket.average();
            HistogramEntry {
                color: Pixel::new(r, g, b, a),
                count: bucket.count,
            }
        }).collect();

        ColorHistogram {
            entries,
            posterize_bits: self.posterize_bits,
            gamma,
        }
    }
}

/// For when there are still too many colors at the coarsest precision.
/// Only a handful of buckets can be left by then, so pairwise search is fine.
fn merge_closest(keyed: &mut Vec<(u32, Bucket)>, max_size: usize) {
    while keyed.len() > max_size {
        let mut closest = (u32::MAX, 0, 1);
        for (i, (_, a)) in keyed.iter().enumerate() {
            for (j, (_, b)) in keyed.iter().enumerate().skip(i + 1) {
                let dist = a.distance(b);
                if dist < closest.0 {
                    closest = (dist, i, j);
                }
            }
        }
        let (_, keep, gone) = closest;
        let (_, b) = keyed.remove(gone);
        keyed[keep].1.merge(&b);
    }
}

#[derive(Clone)]
pub(crate) struct HistItem {
    pub color: FColor,
    pub adjusted_weight: f32,
    pub perceptual_weight: f32,
    /// temporary in median cut
    pub mc_color_weight: f32,
    pub mc_sort_value: u32,
    /// Speeds up nearest search in k-means
    pub likely_palette_index: PalIndex,
    cluster: u8,
}

impl fmt::Debug for HistItem {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistItem")
            .field("color", &self.color)
            .field("adjusted_weight", &self.adjusted_weight)
            .field("perceptual_weight", &self.perceptual_weight)
            .finish()
    }
}

/// Clusters form initial boxes for quantization, to ensure extreme colors are better represented
pub(crate) const MAX_CLUSTERS: usize = 16;

#[inline]
fn cluster_index(color: Pixel) -> u8 {
    ((color.r >> 7) << 3) | ((color.g >> 7) << 2) | ((color.b >> 7) << 1) | (color.a >> 7)
}

pub(crate) struct HistogramInternal {
    pub items: Vec<HistItem>,
    pub total_perceptual_weight: f64,
    pub clusters: [Cluster; MAX_CLUSTERS],
}

/// Pre-grouped colors, range of `items`
#[derive(Copy, Clone, Debug)]
pub(crate) struct Cluster {
    pub begin: usize,
    pub end: usize,
}

// Simple deterministic hasher for the color hashmap
impl std::hash::BuildHasher for U32Hasher {
    type Hasher = Self;
    #[inline(always)]
    fn build_hasher(&self) -> Self {
        Self(0)
    }
}

pub(crate) struct U32Hasher(pub u32);
impl std::hash::Hasher for U32Hasher {
    // magic constant from fxhash. For a single 32-bit key that's all it needs!
    #[inline(always)]
    fn finish(&self) -> u64 { u64::from(self.0).wrapping_mul(0x517cc1b727220a95) }
    #[inline(always)]
    fn write_u32(&mut self, i: u32) { self.0 = i; }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.rotate_left(5) ^ u32::from(b);
        }
    }
}

#[test]
fn counts_colors() {
    let px = [Pixel::new(255, 0, 0, 255), Pixel::new(255, 0, 0, 255), Pixel::new(0, 0, 255, 255), Pixel::new(9, 9, 9, 0)];
    let img = Image::new_borrowed(&px, 2, 2).unwrap();
    let hist = build_histogram(&img, 1000);
    assert_eq!(3, hist.len());
    assert_eq!(4, hist.total_count());
    assert_eq!(0, hist.posterize_bits());
    // transparent is key 0, so it sorts first
    assert_eq!(HistogramEntry { color: Pixel::new(0, 0, 0, 0), count: 1 }, hist.entries()[0]);
    assert!(hist.entries().contains(&HistogramEntry { color: Pixel::new(255, 0, 0, 255), count: 2 }));
}

#[test]
fn merges_to_budget() {
    let px: Vec<_> = (0..=255u8).map(|i| Pixel::new(i, i, i, 255)).collect();
    let img = Image::new_borrowed(&px, 16, 16).unwrap();
    assert_eq!(256, build_histogram(&img, 1000).len());

    let hist = build_histogram(&img, 40);
    assert!(hist.len() <= 40);
    assert!(hist.posterize_bits() >= 3);
    assert_eq!(256, hist.total_count());
    // merged colors are averaged, not truncated
    assert!(hist.entries().iter().all(|e| e.color.r == e.color.g && e.color.g == e.color.b));
    assert!(hist.entries().last().unwrap().color.r > 240);
}

#[test]
fn tiny_budget() {
    // all combinations of extreme channels, which bit dropping alone can't merge any further
    let px: Vec<_> = (0..64u8).map(|i| {
        let on = |bit: u8| if (i >> bit) & 1 != 0 { 255 } else { 0 };
        Pixel::new(on(0), on(1), on(2), on(3).max(128))
    }).collect();
    let img = Image::new_borrowed(&px, 8, 8).unwrap();
    assert_eq!(16, build_histogram(&img, 100).len());

    for budget in [0, 1, 4, 15] {
        let hist = build_histogram(&img, budget);
        assert!(hist.len() <= budget.max(1), "{budget} gave {}", hist.len());
        assert_eq!(64, hist.total_count());
    }
    assert_eq!(1, build_histogram(&img, 0).len());
}

#[test]
fn transparent_is_never_merged_into_visible() {
    let px = [Pixel::new(0, 0, 0, 0), Pixel::new(1, 1, 1, 1)];
    let img = Image::new_borrowed(&px, 2, 1).unwrap();
    for bits in 1..=MAX_POSTERIZE_BITS {
        let hist = build_histogram_posterized(&img, 100, bits);
        assert_eq!(2, hist.len(), "{bits}");
        assert_eq!(HistogramEntry { color: Pixel::new(0, 0, 0, 0), count: 1 }, hist.entries()[0]);
        assert_eq!(HistogramEntry { color: Pixel::new(1, 1, 1, 1), count: 1 }, hist.entries()[1]);
    }

    // a dark shadow over a transparent background
    let mut px = vec![Pixel::new(0, 0, 0, 0); 100];
    for p in &mut px[..30] {
        *p = Pixel::new(20, 20, 20, 100);
    }
    let img = Image::new_borrowed(&px, 10, 10).unwrap();
    let hist = build_histogram_posterized(&img, 100, MAX_POSTERIZE_BITS);
    assert_eq!(HistogramEntry { color: Pixel::new(0, 0, 0, 0), count: 70 }, hist.entries()[0]);
    assert_eq!(HistogramEntry { color: Pixel::new(20, 20, 20, 100), count: 30 }, hist.entries()[1]);
}

#[test]
fn empty_image() {
    let img = Image::new(Vec::<Pixel>::new(), 0, 0).unwrap();
    let hist = build_histogram(&img, 100);
    assert!(hist.is_empty());
    assert_eq!(0, hist.to_internal().unwrap().items.len());
}

#[test]
fn manual_entries() {
    let hist = ColorHistogram::from_entries(&[
        HistogramEntry { color: Pixel::new(1, 2, 3, 255), count: 5 },
        HistogramEntry { color: Pixel::new(1, 2, 3, 255), count: 5 },
        HistogramEntry { color: Pixel::new(200, 2, 3, 255), count: 0 },
    ], 0.).unwrap();
    assert_eq!(1, hist.len());
    assert_eq!(10, hist.entries()[0].count);
    assert!(ColorHistogram::from_entries(&[], 2.).is_err());
}

#[test]
fn internal_clusters() {
    let px = [Pixel::new(255, 255, 255, 255), Pixel::new(0, 0, 0, 255), Pixel::new(1, 1, 1, 255)];
    let img = Image::new_borrowed(&px, 3, 1).unwrap();
    let hist = build_histogram(&img, 100).to_internal().unwrap();
    assert_eq!(3, hist.items.len());
    let used: Vec<_> = hist.clusters.iter().filter(|c| c.begin != c.end).collect();
    assert_eq!(2, used.len());
    assert_eq!(0, used[0].begin);
    assert_eq!(3, used[1].end);
}
