use palquant::*;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;

fn noise(width: usize, height: usize, mut seed: u32) -> Vec<Pixel> {
    (0..width * height).map(|_| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let [r, g, b, _] = seed.to_le_bytes();
        Pixel::new(r, g, b, 255)
    }).collect()
}

fn gradient(width: usize, height: usize) -> Vec<Pixel> {
    (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        Pixel::new((x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) * 2) as u8, (255 - y) as u8)
    }).collect()
}

/// Four far apart groups of three close shades
fn grouped() -> Vec<Pixel> {
    let bases = [(20u8, 20u8, 200u8), (200, 30, 30), (30, 200, 40), (230, 230, 210)];
    (0..48 * 48).map(|i| {
        let (r, g, b) = bases[(i / 7) % 4];
        let shade = (i % 3) as u8 * 9;
        Pixel::new(r + shade, g + shade, b - shade, 255)
    }).collect()
}

#[test]
fn four_identical_red_pixels() {
    let px = vec![Pixel::new(255, 0, 0, 255); 4];
    let img = Image::new(px, 2, 2).unwrap();
    let res = quantize(&img, QuantizationConfig::new().with_max_colors(16)).unwrap();

    assert_eq!(Outcome::Success, res.outcome());
    assert_eq!(Some(100), res.achieved_quality());
    let (indexed, quality) = res.into_result().unwrap();
    assert_eq!(100, quality);
    assert_eq!(&[Pixel::new(255, 0, 0, 255)], indexed.palette().as_slice());
    assert_eq!(&[0, 0, 0, 0], indexed.indices());
}

#[test]
fn too_few_colors_for_min_quality() {
    let px = noise(64, 64, 12345);
    let img = Image::new_borrowed(&px, 64, 64).unwrap();
    let config = QuantizationConfig::new().with_quality(90, 100).with_max_colors(8);
    let res = quantize(&img, config).unwrap();

    assert_eq!(Outcome::QualityTooLow, res.outcome());
    assert!(res.image().is_none());
    assert_eq!(None, res.achieved_quality());
    assert!(res.measured_quality().unwrap() < 90);
    assert_eq!(Err(Error::QualityTooLow), res.into_result().map(|_| ()));

    // the same palette size is fine with a relaxed minimum
    let res = quantize(&img, config.with_quality(0, 100)).unwrap();
    assert_eq!(Outcome::Success, res.outcome());
    assert!(res.image().unwrap().palette().len() <= 8);
}

#[test]
fn inverted_quality_range_runs_nothing() {
    let logged = Arc::new(AtomicUsize::new(0));
    let progressed = Arc::new(AtomicUsize::new(0));
    let px = gradient(16, 16);
    let img = Image::new_borrowed(&px, 16, 16).unwrap();

    let session = {
        let logged = logged.clone();
        let progressed = progressed.clone();
        Session::new(QuantizationConfig::new().with_quality(50, 40))
            .with_log_sink(move |_: &str| { logged.fetch_add(1, SeqCst); })
            .with_progress_callback(move |_| { progressed.fetch_add(1, SeqCst); ControlFlow::Continue })
    };
    let err = session.quantize(&img).unwrap_err();
    assert_eq!(Error::InvalidConfig(ConfigError::QualityOrder), err);
    assert_eq!(0, logged.load(SeqCst));
    assert_eq!(0, progressed.load(SeqCst));
}

#[test]
fn other_config_errors() {
    let px = gradient(4, 4);
    let img = Image::new_borrowed(&px, 4, 4).unwrap();
    let base = QuantizationConfig::new();
    for (config, expected) in [
        (base.with_speed(0), ConfigError::SpeedOutOfRange),
        (base.with_speed(12), ConfigError::SpeedOutOfRange),
        (base.with_dither_strength(-0.1), ConfigError::DitherOutOfRange),
        (base.with_quality(0, 101), ConfigError::QualityOutOfRange),
        (base.with_max_colors(300), ConfigError::MaxColorsOutOfRange),
    ] {
        assert_eq!(Error::InvalidConfig(expected), quantize(&img, config).unwrap_err());
    }
}

#[test]
fn same_result_every_time() {
    let px = gradient(97, 61);
    let img = Image::new_borrowed(&px, 97, 61).unwrap();
    for speed in [1, 4, 10] {
        let config = QuantizationConfig::new().with_speed(speed).with_quality(0, 90).with_max_colors(40);
        let a = quantize(&img, config).unwrap();
        let b = quantize(&img, config).unwrap();
        assert_eq!(a.achieved_quality(), b.achieved_quality());
        assert_eq!(a.image(), b.image());
    }
}

#[test]
fn more_colors_never_hurt() {
    let px = grouped();
    let img = Image::new_borrowed(&px, 48, 48).unwrap();
    let mut prev = 0;
    for max_colors in [2, 4, 12, 16, 64] {
        let config = QuantizationConfig::new().with_dither_strength(0.).with_max_colors(max_colors);
        let q = quantize(&img, config).unwrap().achieved_quality().unwrap();
        assert!(q >= prev, "{max_colors} colors gave {q}, fewer gave {prev}");
        prev = q;
    }
    assert_eq!(100, prev);
}

#[test]
fn undithered_session_matches_plain_remap() {
    let px = noise(50, 40, 99);
    let img = Image::new_borrowed(&px, 50, 40).unwrap();
    let res = quantize(&img, QuantizationConfig::new().with_dither_strength(0.).with_max_colors(32)).unwrap();
    let (indexed, quality) = res.into_result().unwrap();

    let (again, again_quality) = remap(&img, indexed.palette(), 0.).unwrap();
    assert_eq!(indexed.indices(), again.indices());
    assert_eq!(quality, again_quality);
}

#[test]
fn indices_in_bounds() {
    let images = [(noise(33, 17, 7), 33, 17), (gradient(64, 3), 64, 3), (gradient(1, 100), 1, 100)];
    for (px, w, h) in &images {
        let img = Image::new_borrowed(px, *w, *h).unwrap();
        for dither in [0., 0.3, 1.] {
            for max_colors in [2, 7, 256] {
                let config = QuantizationConfig::new().with_dither_strength(dither).with_max_colors(max_colors).with_speed(6);
                let (indexed, _) = quantize(&img, config).unwrap().into_result().unwrap();
                assert_eq!(w * h, indexed.indices().len());
                assert_eq!((*w, *h), (indexed.width(), indexed.height()));
                let len = indexed.palette().len();
                assert!(len >= 1 && len <= max_colors as usize);
                assert!(indexed.indices().iter().all(|&i| (i as usize) < len));
                for (i, c) in indexed.palette().iter().enumerate() {
                    assert!(!indexed.palette()[..i].contains(c));
                }
            }
        }
    }
}

#[test]
fn histogram_and_palette_steps() {
    let px = gradient(100, 100);
    let img = Image::new_borrowed(&px, 100, 100).unwrap();
    let hist = build_histogram(&img, 500);
    assert!(hist.len() <= 500);
    assert_eq!(10_000, hist.total_count());

    let palette = build_palette(&hist, 10, 20, 5).unwrap();
    assert!(palette.len() >= 10 && palette.len() <= 20);

    let (indexed, quality) = remap(&img, &palette, 0.5).unwrap();
    assert!(quality < 100);
    assert_eq!(palette, *indexed.palette());
}

#[test]
fn transparent_goes_last() {
    let mut px = gradient(20, 20);
    for p in px.iter_mut().step_by(5) {
        *p = Pixel::new(0, 0, 0, 0);
    }
    let img = Image::new_borrowed(&px, 20, 20).unwrap();
    let config = QuantizationConfig::new().with_last_index_transparent(true).with_max_colors(16);
    let (indexed, _) = quantize(&img, config).unwrap().into_result().unwrap();
    assert_eq!(Some(&Pixel::new(0, 0, 0, 0)), indexed.palette().last());
}

#[test]
fn posterized_palette() {
    let px = noise(30, 30, 3);
    let img = Image::new_borrowed(&px, 30, 30).unwrap();
    let config = QuantizationConfig::new().with_min_posterization(2).with_max_colors(64);
    let (indexed, _) = quantize(&img, config).unwrap().into_result().unwrap();
    for c in indexed.palette().iter() {
        for ch in [c.r, c.g, c.b, c.a] {
            assert_eq!(ch >> 6, ch & 3, "{c:?}");
        }
    }
}

#[test]
fn forced_palette_size() {
    let px = gradient(64, 64);
    let img = Image::new_borrowed(&px, 64, 64).unwrap();
    let res = Session::new(QuantizationConfig::new().with_quality(0, 40))
        .with_palette_size_policy(FixedRange { min: 100, max: 120 })
        .quantize(&img)
        .unwrap();
    let len = res.image().unwrap().palette().len();
    assert!(len >= 100 && len <= 120, "{len}");
}

#[test]
fn sessions_on_many_threads() {
    let px = gradient(80, 60);
    let img = Image::new_borrowed(&px, 80, 60).unwrap();
    let config = QuantizationConfig::new().with_max_colors(24);
    let expected = quantize(&img, config).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| quantize(&img, config).unwrap())).collect();
        for h in handles {
            let res = h.join().unwrap();
            assert_eq!(expected.image(), res.image());
        }
    });

    let batch = quantize_batch(&[img.clone(), img.clone(), img], config);
    for res in batch {
        assert_eq!(expected.image(), res.unwrap().image());
    }
}

#[test]
fn png_in_png_out() {
    let px = gradient(40, 30);
    let png = lodepng::encode32(&px, 40, 30).unwrap();

    let decoded = lodepng::decode32(&png).unwrap();
    let img = Image::new(decoded.buffer, decoded.width, decoded.height).unwrap();
    let (indexed, _) = quantize(&img, QuantizationConfig::new().with_max_colors(64)).unwrap().into_result().unwrap();

    let mut encoder = lodepng::Encoder::new();
    encoder.set_auto_convert(false);
    encoder.info_raw_mut().colortype = lodepng::ColorType::PALETTE;
    encoder.info_raw_mut().set_bitdepth(8);
    encoder.info_png_mut().color.colortype = lodepng::ColorType::PALETTE;
    encoder.info_png_mut().color.set_bitdepth(8);
    for &c in indexed.palette().iter() {
        encoder.info_raw_mut().palette_add(c).unwrap();
        encoder.info_png_mut().color.palette_add(c).unwrap();
    }
    let png8 = encoder.encode(indexed.indices(), indexed.width(), indexed.height()).unwrap();

    let back = lodepng::decode32(&png8).unwrap();
    assert_eq!((40, 30), (back.width, back.height));
    assert_eq!(indexed.to_rgba(), back.buffer);
}

#[test]
fn progress_goes_up() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let px = noise(40, 40, 5);
    let img = Image::new_borrowed(&px, 40, 40).unwrap();
    let s = seen.clone();
    let res = Session::new(QuantizationConfig::new().with_speed(2).with_max_colors(32))
        .with_progress_callback(move |p| { s.lock().unwrap().push(p); ControlFlow::Continue })
        .quantize(&img)
        .unwrap();
    assert_eq!(Outcome::Success, res.outcome());

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|&p| (0. ..=100.).contains(&p)));
    assert_eq!(Some(&100.), seen.last());
}
