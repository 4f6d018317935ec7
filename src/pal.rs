use crate::error::*;
use crate::pixel::{gamma_lut, posterize_channel, FColor, Pixel};
use crate::OrdFloat;
use arrayvec::ArrayVec;
use rgb::ComponentMap;
use std::cmp::Reverse;
use std::ops::Deref;

pub type PalIndex = u8;
pub type PalLen = u16;

/// Palettes are stored on the stack, and really large ones would cause stack overflows
pub const MAX_COLORS: usize = 256;

/// Colors of a quantized image, most popular first.
///
/// Entries are unique. The order has no meaning beyond being the indices used by
/// [`IndexedImage`][crate::IndexedImage], but it is the same for the same input and settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<Pixel>,
}

impl Palette {
    /// Use an existing palette, e.g. to remap an image to colors of a previous result.
    ///
    /// Needs 1-256 colors, without duplicates.
    pub fn new(entries: Vec<Pixel>) -> Result<Self, Error> {
        if entries.is_empty() {
            return Err(EmptyInput);
        }
        if entries.len() > MAX_COLORS {
            return Err(ValueOutOfRange);
        }
        for (i, c) in entries.iter().enumerate() {
            if entries[..i].contains(c) {
                return Err(ValueOutOfRange);
            }
        }
        Ok(Self { entries })
    }

    /// Palette colors
    #[inline(always)]
    #[must_use]
    pub fn as_slice(&self) -> &[Pixel] {
        &self.entries
    }

    /// Palette colors, by value
    #[inline]
    #[must_use]
    pub fn into_vec(self) -> Vec<Pixel> {
        self.entries
    }

    /// Back to the internal representation, for remapping
    pub(crate) fn to_pal_f(&self, gamma: f64) -> PalF {
        let lut = gamma_lut(gamma);
        let mut pal = PalF::new();
        for &c in &self.entries {
            // order is popularity, so earlier entries are preferred when searching
            pal.push(FColor::from_rgba(&lut, c), (MAX_COLORS - pal.len()) as f32);
        }
        pal
    }
}

impl Deref for Palette {
    type Target = [Pixel];

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

/// A palette of premultiplied ARGB 4xf32 colors in internal gamma, with popularity of each
#[derive(Clone, Debug)]
pub(crate) struct PalF {
    colors: ArrayVec<FColor, MAX_COLORS>,
    pops: ArrayVec<f32, MAX_COLORS>,
}

impl PalF {
    #[inline]
    pub fn new() -> Self {
        Self {
            colors: ArrayVec::new(),
            pops: ArrayVec::new(),
        }
    }

    #[inline(always)]
    pub fn push(&mut self, color: FColor, popularity: f32) {
        debug_assert!(popularity >= 0.);
        self.pops.push(popularity);
        self.colors.push(color);
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[FColor] {
        &self.colors
    }

    #[inline(always)]
    pub fn pop_as_slice(&self) -> &[f32] {
        &self.pops
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.colors.len(), self.pops.len());
        self.colors.len()
    }

    #[inline(always)]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut FColor, &mut f32)> {
        self.colors.iter_mut().zip(self.pops.iter_mut())
    }

    /// Rounds colors to 8 bits, most popular first, merging entries that became identical.
    ///
    /// Popularity of merged entries is summed.
    pub fn to_rgba_entries(&self, gamma: f64, posterize: u8) -> ArrayVec<(Pixel, f32), MAX_COLORS> {
        let mut sorted: ArrayVec<_, MAX_COLORS> = self.colors.iter().copied().zip(self.pops.iter().copied()).collect();
        // stable, so equally popular colors keep their order
        sorted.sort_by_key(|&(_, pop)| Reverse(OrdFloat::new(pop)));

        let mut out = ArrayVec::<(Pixel, f32), MAX_COLORS>::new();
        for (color, pop) in sorted {
            let px = color.to_rgba(gamma).map(|c| posterize_channel(c, posterize));
            match out.iter_mut().find(|(existing, _)| *existing == px) {
                Some((_, existing_pop)) => *existing_pop += pop,
                None => out.push((px, pop)),
            }
        }
        out
    }
}

/// Most transparent entry goes last, if requested. Everything else stays in popularity order.
pub(crate) fn move_transparent_last(entries: &mut [Pixel]) {
    let alpha_index = entries.iter().enumerate()
        .filter(|(_, c)| c.a < 255)
        .min_by_key(|(_, c)| c.a)
        .map(|(i, _)| i);
    if let Some(alpha_index) = alpha_index {
        let last = entries.len() - 1;
        entries[alpha_index..].rotate_left(1);
        debug_assert!(entries[last].a < 255);
    }
}

pub(crate) fn new_palette_unchecked(entries: Vec<Pixel>) -> Palette {
    debug_assert!(!entries.is_empty() && entries.len() <= MAX_COLORS);
    Palette { entries }
}

#[test]
fn pal_test() {
    let mut p = PalF::new();
    let lut = gamma_lut(0.45455);
    for i in 0..=255u8 {
        let rgba = Pixel::new(i, i, i, 100 + i / 2);
        p.push(FColor::from_rgba(&lut, rgba), f32::from(i));
        assert_eq!(i as usize + 1, p.len());
        assert_eq!(i as usize + 1, p.pop_as_slice().len());
        assert_eq!(i as usize + 1, p.iter_mut().count());
    }

    let entries = p.to_rgba_entries(0.45455, 0);
    assert_eq!(256, entries.len());
    // most popular first
    assert_eq!(Pixel::new(255, 255, 255, 227), entries[0].0);
    assert_eq!(Pixel::new(0, 0, 0, 100), entries[255].0);
}

#[test]
fn merges_duplicates() {
    let mut p = PalF::new();
    let lut = gamma_lut(0.45455);
    p.push(FColor::from_rgba(&lut, Pixel::new(10, 20, 30, 255)), 1.);
    p.push(FColor::from_rgba(&lut, Pixel::new(200, 20, 30, 255)), 5.);
    p.push(FColor::from_rgba(&lut, Pixel::new(11, 21, 31, 255)), 2.);
    let entries = p.to_rgba_entries(0.45455, 2);
    assert_eq!(2, entries.len());
    assert_eq!(5., entries[0].1);
    assert_eq!(3., entries[1].1);
}

#[test]
fn validates() {
    assert_eq!(Err(EmptyInput), Palette::new(vec![]));
    assert_eq!(Err(ValueOutOfRange), Palette::new(vec![Pixel::new(1, 2, 3, 4); 2]));
    let p = Palette::new(vec![Pixel::new(1, 2, 3, 4), Pixel::new(4, 3, 2, 1)]).unwrap();
    assert_eq!(2, p.len());
    let f = p.to_pal_f(0.45455);
    assert!(f.pop_as_slice()[0] > f.pop_as_slice()[1]);
}

#[test]
fn transparent_last() {
    let mut e = vec![Pixel::new(0, 0, 0, 0), Pixel::new(1, 1, 1, 255), Pixel::new(2, 2, 2, 255)];
    move_transparent_last(&mut e);
    assert_eq!(Pixel::new(0, 0, 0, 0), e[2]);
    assert_eq!(Pixel::new(1, 1, 1, 255), e[0]);
}
