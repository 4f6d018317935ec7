use crate::error::*;
use crate::image::Image;
use crate::nearest::Nearest;
use crate::pal::{PalIndex, Palette};
use crate::pixel::{FColor, Pixel, ARGBF};
use crate::quant::{mse_to_quality, quality_to_mse};
use crate::session::Reporter;

/// Palette indices for every pixel of an image, plus the palette itself.
///
/// Every index is a valid position in the palette.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedImage {
    width: usize,
    height: usize,
    indices: Vec<PalIndex>,
    palette: Palette,
}

impl IndexedImage {
    /// Same as the source image
    #[inline(always)]
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Same as the source image
    #[inline(always)]
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// One index per pixel, row after row
    #[inline(always)]
    #[must_use]
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Colors the indices point to
    #[inline(always)]
    #[must_use]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// `None` if out of bounds
    #[inline]
    #[must_use]
    pub fn index_at(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.indices.get(y * self.width + x).copied()
    }

    /// Palette colors looked up for every pixel
    #[must_use]
    pub fn to_rgba(&self) -> Vec<Pixel> {
        self.indices.iter().map(|&i| self.palette[usize::from(i)]).collect()
    }

    /// For writing the image out with a codec
    #[must_use]
    pub fn into_parts(self) -> (Palette, Vec<u8>) {
        (self.palette, self.indices)
    }
}

/// Maps every pixel of the image to the closest palette entry, returns the indexed image and its quality (0-100).
///
/// `dither_strength` 0 maps each pixel independently. Above that, Floyd-Steinberg error diffusion is used,
/// scanning every row left to right. The palette is assumed to be in the image's gamma.
///
/// The quality compares the palette color chosen for each pixel against the original pixel.
pub fn remap(image: &Image<'_>, palette: &Palette, dither_strength: f32) -> Result<(IndexedImage, u8), Error> {
    remap_to_palette(image, palette.clone(), image.gamma(), dither_strength, None, &Reporter::silent())
}

/// `palette_error` of the palette construction, if known, limits how much error dithering may carry.
pub(crate) fn remap_to_palette(image: &Image<'_>, palette: Palette, palette_gamma: f64, dither_strength: f32, palette_error: Option<f64>, reporter: &Reporter<'_>) -> Result<(IndexedImage, u8), Error> {
    if !(0. ..=1.).contains(&dither_strength) {
        return Err(ConfigError::DitherOutOfRange.into());
    }
    let width = image.width();
    let height = image.height();

    let mut indices = Vec::new();
    indices.try_reserve_exact(width * height)?;

    let remapping_error = {
        let pal_f = palette.to_pal_f(palette_gamma);
        let n = Nearest::new(&pal_f)?;
        let mapper = Mapper { image, nearest: &n, colors: pal_f.as_slice(), reporter };
        if dither_strength == 0. {
            mapper.remap_nearest(&mut indices)?
        } else {
            let max_dither_error = (palette_error.unwrap_or(quality_to_mse(80)) * 2.4).max(quality_to_mse(35)) as f32;
            mapper.remap_floyd(&mut indices, dither_strength, max_dither_error)?
        }
    };
    debug_assert_eq!(indices.len(), width * height);
    debug_assert!(indices.iter().all(|&i| usize::from(i) < palette.len()));

    let pixels = width * height;
    let mse = if pixels > 0 { remapping_error / pixels as f64 } else { 0. };
    let quality = mse_to_quality(mse);
    Ok((IndexedImage { width, height, indices, palette }, quality))
}

struct Mapper<'a> {
    image: &'a Image<'a>,
    nearest: &'a Nearest<'a>,
    colors: &'a [FColor],
    reporter: &'a Reporter<'a>,
}

impl Mapper<'_> {
    fn row_progress(&self, row: usize) -> Result<(), Error> {
        if self.reporter.progress(80. + 20. * row as f32 / self.image.height() as f32) {
            return Err(Aborted);
        }
        Ok(())
    }

    /// Returns the sum of squared distances
    fn remap_nearest(&self, output: &mut Vec<PalIndex>) -> Result<f64, Error> {
        let lut = self.image.gamma_lut();
        let mut row_f = Vec::new();
        row_f.try_reserve_exact(self.image.width())?;

        let mut remapping_error = 0.;
        for row in 0..self.image.height() {
            self.row_progress(row)?;
            self.image.row_f(&lut, row, &mut row_f);
            let mut last_match = 0;
            for px in &row_f {
                let (matched, diff) = self.nearest.search(px, last_match);
                last_match = matched;
                remapping_error += f64::from(diff);
                output.push(matched);
            }
        }
        Ok(remapping_error)
    }

    /// Floyd-Steinberg, always scanning left to right, so the error only flows right and down.
    ///
    /// Returns the sum of distances between the original pixels and the colors chosen for them.
    fn remap_floyd(&self, output: &mut Vec<PalIndex>, dither_strength: f32, max_dither_error: f32) -> Result<f64, Error> {
        let width = self.image.width();
        let lut = self.image.gamma_lut();
        let mut row_f = Vec::new();
        row_f.try_reserve_exact(width)?;

        // +2 saves from checking out of bounds access
        let errwidth = width + 2;
        let mut err_data = Vec::new();
        err_data.try_reserve_exact(errwidth * 2)?;
        err_data.resize(errwidth * 2, FColor::default());
        let (mut thiserr, mut nexterr) = err_data.split_at_mut(errwidth);

        // response to this value is non-linear and without it any value < 0.8 would give almost no dithering
        let dither_level = (1. - (1. - dither_strength) * (1. - dither_strength)) * (15. / 16.);

        let mut remapping_error = 0.;
        for row in 0..self.image.height() {
            self.row_progress(row)?;
            self.image.row_f(&lut, row, &mut row_f);
            nexterr.fill(FColor::default());

            let mut last_match = 0;
            for (col, input_px) in row_f.iter().enumerate() {
                let spx = get_dithered_pixel(dither_level, max_dither_error, thiserr[col + 1], *input_px);
                let (matched, _) = self.nearest.search(&spx, last_match);
                last_match = matched;
                let output_px = self.colors[matched as usize];
                remapping_error += f64::from(input_px.diff(&output_px));
                output.push(matched);

                let mut err = spx.0 - output_px.0;
                // This prevents crazy green pixels popping out of the blue (or red or black! ;)
                if err.r * err.r + err.g * err.g + err.b * err.b + err.a * err.a > max_dither_error {
                    err *= 0.75;
                }
                thiserr[col + 2].0 += err * (7. / 16.);
                nexterr[col + 2].0 += err * (1. / 16.);
                nexterr[col + 1].0 += err * (5. / 16.);
                nexterr[col].0 += err * (3. / 16.);
            }
            std::mem::swap(&mut thiserr, &mut nexterr);
        }
        Ok(remapping_error)
    }
}

fn get_dithered_pixel(dither_level: f32, max_dither_error: f32, thiserr: FColor, px: FColor) -> FColor {
    let s = thiserr.0 * dither_level;
    let dither_error = s.r * s.r + s.g * s.g + s.b * s.b + s.a * s.a;
    if dither_error < 2. / 256. / 256. {
        // don't dither areas that don't have noticeable error
        return px;
    }

    let mut ratio: f32 = 1.;
    const MAX_OVERFLOW: f32 = 1.1;
    const MAX_UNDERFLOW: f32 = -0.1;
    // allowing some overflow prevents undithered bands caused by clamping of all channels
    for (p, e) in [(px.r, s.r), (px.g, s.g), (px.b, s.b)] {
        if p + e > MAX_OVERFLOW {
            ratio = ratio.min((MAX_OVERFLOW - p) / e);
        } else if p + e < MAX_UNDERFLOW {
            ratio = ratio.min((MAX_UNDERFLOW - p) / e);
        }
    }
    if dither_error > max_dither_error {
        ratio *= 0.8;
    }
    FColor(ARGBF {
        a: (px.a + s.a).clamp(0., 1.),
        r: px.r + s.r * ratio,
        g: px.g + s.g * ratio,
        b: px.b + s.b * ratio,
    })
}

#[cfg(test)]
fn gradient(width: usize, height: usize) -> Vec<Pixel> {
    (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        Pixel::new((x * 255 / width) as u8, (y * 255 / height) as u8, 128, 255)
    }).collect()
}

#[test]
fn exact_palette() {
    let px = [Pixel::new(1, 2, 3, 255), Pixel::new(200, 100, 0, 255), Pixel::new(1, 2, 3, 255), Pixel::new(0, 0, 0, 0)];
    let img = Image::new_borrowed(&px, 2, 2).unwrap();
    let palette = Palette::new(vec![Pixel::new(0, 0, 0, 0), Pixel::new(1, 2, 3, 255), Pixel::new(200, 100, 0, 255)]).unwrap();
    for dither in [0., 0.5, 1.] {
        let (indexed, quality) = remap(&img, &palette, dither).unwrap();
        assert_eq!(100, quality);
        assert_eq!(&[1, 2, 1, 0], indexed.indices());
        assert_eq!(px.to_vec(), indexed.to_rgba());
        assert_eq!(Some(2), indexed.index_at(1, 0));
        assert_eq!(None, indexed.index_at(2, 0));
        assert_eq!(None, indexed.index_at(0, 2));
        assert_eq!(None, indexed.index_at(1, usize::MAX));
        assert_eq!(None, indexed.index_at(usize::MAX, usize::MAX));
    }
}

#[test]
fn undithered_is_nearest() {
    let px = gradient(37, 23);
    let img = Image::new_borrowed(&px, 37, 23).unwrap();
    let palette = Palette::new((0..7u8).map(|i| Pixel::new(i * 40, 255 - i * 30, 128, 255)).collect()).unwrap();
    let (indexed, _) = remap(&img, &palette, 0.).unwrap();

    let lut = img.gamma_lut();
    let pal_f: Vec<_> = palette.iter().map(|&c| FColor::from_rgba(&lut, c)).collect();
    for (&p, &idx) in px.iter().zip(indexed.indices()) {
        let p = FColor::from_rgba(&lut, p);
        let best = pal_f.iter().map(|c| c.diff(&p)).fold(f32::INFINITY, f32::min);
        assert_eq!(best, pal_f[usize::from(idx)].diff(&p));
    }
}

#[test]
fn dithering_spreads_error() {
    let px = vec![Pixel::new(128, 128, 128, 255); 32 * 32];
    let img = Image::new_borrowed(&px, 32, 32).unwrap();
    let palette = Palette::new(vec![Pixel::new(0, 0, 0, 255), Pixel::new(255, 255, 255, 255)]).unwrap();

    let (flat, flat_q) = remap(&img, &palette, 0.).unwrap();
    let first = flat.indices()[0];
    assert!(flat.indices().iter().all(|&i| i == first));

    let (dithered, dithered_q) = remap(&img, &palette, 1.).unwrap();
    assert!(dithered.indices().contains(&0) && dithered.indices().contains(&1));
    // per-pixel error goes up, even though the average color is closer
    assert!(dithered_q <= flat_q);
    assert_eq!(dithered, remap(&img, &palette, 1.).unwrap().0);
}

#[test]
fn bad_input() {
    let px = gradient(4, 4);
    let img = Image::new_borrowed(&px, 4, 4).unwrap();
    let palette = Palette::new(vec![Pixel::new(0, 0, 0, 255)]).unwrap();
    assert_eq!(Err(Error::InvalidConfig(ConfigError::DitherOutOfRange)), remap(&img, &palette, 2.).map(|_| ()));

    let empty = Image::new(Vec::<Pixel>::new(), 0, 3).unwrap();
    let (indexed, quality) = remap(&empty, &palette, 1.).unwrap();
    assert!(indexed.indices().is_empty());
    assert_eq!(100, quality);
}
