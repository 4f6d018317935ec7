use crate::error::*;
use crate::pal::{PalF, PalIndex, MAX_COLORS};
use crate::pixel::FColor;
use crate::OrdFloat;

/// Vantage-point tree over palette colors, for finding the closest entry
pub(crate) struct Nearest<'pal> {
    root: Node,
    palette: &'pal PalF,
    /// Quarter of the squared distance to the closest other palette entry.
    /// Anything closer than that to an entry can't have a better match.
    nearest_other_color_dist: [f32; MAX_COLORS],
}

impl<'pal> Nearest<'pal> {
    #[inline(never)]
    pub fn new(palette: &'pal PalF) -> Result<Self, Error> {
        if palette.len() > MAX_COLORS {
            return Err(ValueOutOfRange);
        }
        let mut indexes: Vec<PalIndex> = (0..palette.len()).map(|idx| idx as PalIndex).collect();
        if indexes.is_empty() {
            return Err(EmptyInput);
        }
        let mut handle = Nearest {
            root: vp_create_node(&mut indexes, palette),
            palette,
            nearest_other_color_dist: [0.; MAX_COLORS],
        };
        for (i, color) in palette.as_slice().iter().enumerate() {
            let mut best = Visitor::new(Some(i as PalIndex));
            vp_search_node(&handle.root, color, &mut best);
            handle.nearest_other_color_dist[i] = best.distance_squared / 4.;
        }
        Ok(handle)
    }

    /// Returns index of the closest palette entry and its squared distance.
    ///
    /// `likely_colormap_index` is just a hint, and may be out of range.
    #[inline]
    pub fn search(&self, px: &FColor, likely_colormap_index: PalIndex) -> (PalIndex, f32) {
        let mut best_candidate = match self.palette.as_slice().get(likely_colormap_index as usize) {
            Some(pal_px) => {
                let guess_diff = px.diff(pal_px);
                if guess_diff < self.nearest_other_color_dist[likely_colormap_index as usize] {
                    return (likely_colormap_index, guess_diff);
                }
                Visitor {
                    distance: guess_diff.sqrt(),
                    distance_squared: guess_diff,
                    idx: likely_colormap_index,
                    exclude: None,
                }
            },
            None => Visitor::new(None),
        };

        vp_search_node(&self.root, px, &mut best_candidate);
        (best_candidate.idx, best_candidate.distance_squared)
    }
}

struct Visitor {
    distance: f32,
    distance_squared: f32,
    idx: PalIndex,
    exclude: Option<PalIndex>,
}

impl Visitor {
    #[inline]
    fn new(exclude: Option<PalIndex>) -> Self {
        Self { distance: f32::INFINITY, distance_squared: f32::INFINITY, idx: 0, exclude }
    }

    /// Equally distant entries are resolved in favor of the lower index, so the result doesn't depend on tree shape
    #[inline]
    fn visit(&mut self, distance: f32, distance_squared: f32, idx: PalIndex) {
        if self.exclude == Some(idx) {
            return;
        }
        if distance_squared < self.distance_squared || (distance_squared == self.distance_squared && idx < self.idx) {
            self.distance = distance;
            self.distance_squared = distance_squared;
            self.idx = idx;
        }
    }
}

struct Node {
    vantage_point: FColor,
    inner: NodeInner,
    idx: PalIndex,
}

const LEAF_MAX_SIZE: usize = 6;

enum NodeInner {
    Nodes {
        radius: f32,
        radius_squared: f32,
        near: Box<Node>,
        far: Box<Node>,
    },
    Leaf {
        len: u8,
        idxs: [PalIndex; LEAF_MAX_SIZE],
        colors: Box<[FColor; LEAF_MAX_SIZE]>,
    },
}

fn vp_create_node(indexes: &mut [PalIndex], items: &PalF) -> Node {
    debug_assert!(!indexes.is_empty());
    let palette = items.as_slice();

    let most_popular_item = indexes.iter().enumerate().max_by_key(move |&(_, &idx)| {
        OrdFloat::new(items.pop_as_slice()[usize::from(idx)])
    }).map(|(n, _)| n).unwrap_or_default();
    indexes.swap(most_popular_item, 0);
    let Some((&mut ref_idx, indexes)) = indexes.split_first_mut() else {
        unreachable!()
    };

    let vantage_point = palette[usize::from(ref_idx)];
    indexes.sort_by_key(move |&i| OrdFloat::new(vantage_point.diff(&palette[usize::from(i)])));

    let num_indexes = indexes.len();

    let inner = if num_indexes <= LEAF_MAX_SIZE {
        let mut colors = [FColor::default(); LEAF_MAX_SIZE];
        let mut idxs = [0; LEAF_MAX_SIZE];

        for (&i, (color, idx)) in indexes.iter().zip(colors.iter_mut().zip(idxs.iter_mut())) {
            *idx = i;
            *color = palette[usize::from(i)];
        }
        NodeInner::Leaf {
            len: num_indexes as _,
            idxs,
            colors: Box::new(colors),
        }
    } else {
        let half_index = num_indexes / 2;
        let (near, far) = indexes.split_at_mut(half_index);
        let radius_squared = vantage_point.diff(&palette[usize::from(far[0])]);
        NodeInner::Nodes {
            radius: radius_squared.sqrt(),
            radius_squared,
            near: Box::new(vp_create_node(near, items)),
            far: Box::new(vp_create_node(far, items)),
        }
    };

    Node { inner, vantage_point, idx: ref_idx }
}

fn vp_search_node(mut node: &Node, needle: &FColor, best_candidate: &mut Visitor) {
    loop {
        let distance_squared = node.vantage_point.diff(needle);
        let distance = distance_squared.sqrt();

        best_candidate.visit(distance, distance_squared, node.idx);

        match node.inner {
            NodeInner::Nodes { radius, radius_squared, ref near, ref far } => {
                // most likely side first, to narrow the best distance as soon as possible
                if distance_squared < radius_squared {
                    vp_search_node(near, needle, best_candidate);
                    // the answer may be just outside the radius, but not farther than the best distance so far
                    if distance >= radius - best_candidate.distance {
                        node = far;
                        continue;
                    }
                } else {
                    vp_search_node(far, needle, best_candidate);
                    if distance <= radius + best_candidate.distance {
                        node = near;
                        continue;
                    }
                }
                break;
            },
            NodeInner::Leaf { len, ref idxs, ref colors } => {
                for (color, &idx) in colors.iter().zip(idxs.iter()).take(len as usize) {
                    let distance_squared = color.diff(needle);
                    best_candidate.visit(distance_squared.sqrt(), distance_squared, idx);
                }
                break;
            },
        }
    }
}

#[cfg(test)]
fn test_palette(colors: &[crate::Pixel]) -> PalF {
    let lut = crate::pixel::gamma_lut(0.45455);
    let mut pal = PalF::new();
    for (i, &c) in colors.iter().enumerate() {
        pal.push(FColor::from_rgba(&lut, c), (colors.len() - i) as f32);
    }
    pal
}

#[test]
fn finds_exact_and_closest() {
    use crate::Pixel;
    let colors: Vec<_> = (0..40u8).map(|i| Pixel::new(i * 6, 255 - i * 6, (i * 37) % 255, 255)).collect();
    let pal = test_palette(&colors);
    let n = Nearest::new(&pal).unwrap();
    let lut = crate::pixel::gamma_lut(0.45455);

    for (i, &c) in colors.iter().enumerate() {
        let (idx, diff) = n.search(&FColor::from_rgba(&lut, c), 0);
        assert_eq!(i, idx as usize);
        assert_eq!(0., diff);
    }

    // brute force agrees
    for seed in 0..200u32 {
        let px = FColor::from_rgba(&lut, Pixel::new(seed as u8, (seed * 7) as u8, (seed * 13) as u8, 255));
        let (idx, diff) = n.search(&px, (seed % 300) as PalIndex);
        let best = pal.as_slice().iter().map(|c| c.diff(&px)).fold(f32::INFINITY, f32::min);
        assert_eq!(best, diff);
        assert_eq!(best, pal.as_slice()[idx as usize].diff(&px));
    }
}

#[test]
fn rejects_empty() {
    assert!(Nearest::new(&PalF::new()).is_err());
}
