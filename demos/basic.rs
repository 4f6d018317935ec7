//! `cargo run --example basic -- input.png output.png [min_quality] [max_quality] [speed] [dither]`

use palquant::{Image, Outcome, QuantizationConfig, Session};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (Some(input), Some(output)) = (args.get(0), args.get(1)) else {
        eprintln!("usage: basic input.png output.png [min_quality] [max_quality] [speed] [dither]");
        std::process::exit(1);
    };
    let num = |i: usize, default: f32| args.get(i).and_then(|a| a.parse().ok()).unwrap_or(default);

    // Image loading/saving is outside scope of this library
    let bitmap = match lodepng::decode32_file(input) {
        Ok(b) => b,
        Err(err) => {
            eprintln!("Can't read {input}: {err}");
            std::process::exit(1);
        },
    };
    let img = Image::new(bitmap.buffer, bitmap.width, bitmap.height).expect("decoder gave consistent size");

    let config = QuantizationConfig::new()
        .with_quality(num(2, 0.) as u8, num(3, 100.) as u8)
        .with_speed(num(4, 4.) as u8)
        .with_dither_strength(num(5, 1.));

    let res = match Session::new(config).with_log_sink(|msg: &str| eprintln!("{msg}")).quantize(&img) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err}"),
    };
    if res.outcome() != Outcome::Success {
        eprintln!("{:?} (measured quality {:?})", res.outcome(), res.measured_quality());
        std::process::exit(99);
    }
    let (indexed, quality) = res.into_result().expect("checked above");

    let mut encoder = lodepng::Encoder::new();
    encoder.set_auto_convert(false);
    encoder.info_raw_mut().colortype = lodepng::ColorType::PALETTE;
    encoder.info_raw_mut().set_bitdepth(8);
    encoder.info_png_mut().color.colortype = lodepng::ColorType::PALETTE;
    encoder.info_png_mut().color.set_bitdepth(8);
    for &c in indexed.palette().iter() {
        encoder.info_raw_mut().palette_add(c).expect("at most 256 colors");
        encoder.info_png_mut().color.palette_add(c).expect("at most 256 colors");
    }
    if let Err(err) = encoder.encode_file(output, indexed.indices(), indexed.width(), indexed.height()) {
        eprintln!("Can't write {output}: {err}");
        std::process::exit(1);
    }

    println!("Done! {} colors, {}% quality", indexed.palette().len(), quality);
}
