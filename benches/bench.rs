#![feature(test)]

extern crate test;
use test::Bencher;

use palquant::*;

fn test_image() -> (Vec<Pixel>, usize, usize) {
    let (width, height) = (512, 384);
    let mut seed = 1u32;
    let px = (0..width * height).map(|i| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let (x, y) = (i % width, i / width);
        let noise = (seed & 15) as u8;
        Pixel::new((x / 2) as u8 ^ noise, (y * 2 / 3) as u8, ((x + y) / 4) as u8 + noise, 255 - (y / 8) as u8)
    }).collect();
    (px, width, height)
}

#[bench]
fn histogram(b: &mut Bencher) {
    let (px, width, height) = test_image();
    b.iter(move || {
        let img = Image::new_borrowed(&px, width, height).unwrap();
        build_histogram(&img, 1 << 17)
    });
}

#[bench]
fn palette_s4(b: &mut Bencher) {
    let (px, width, height) = test_image();
    let img = Image::new_borrowed(&px, width, height).unwrap();
    let hist = build_histogram(&img, 1 << 17);
    b.iter(move || build_palette(&hist, 1, 256, 4).unwrap());
}

#[bench]
fn remap_ord(b: &mut Bencher) {
    let (px, width, height) = test_image();
    let img = Image::new_borrowed(&px, width, height).unwrap();
    let palette = build_palette(&build_histogram(&img, 1 << 17), 1, 256, 10).unwrap();
    b.iter(move || remap(&img, &palette, 0.).unwrap());
}

#[bench]
fn remap_floyd(b: &mut Bencher) {
    let (px, width, height) = test_image();
    let img = Image::new_borrowed(&px, width, height).unwrap();
    let palette = build_palette(&build_histogram(&img, 1 << 17), 1, 256, 10).unwrap();
    b.iter(move || remap(&img, &palette, 1.).unwrap());
}

#[bench]
fn quantize_s8(b: &mut Bencher) {
    let (px, width, height) = test_image();
    let config = QuantizationConfig::new().with_speed(8);
    b.iter(move || {
        let img = Image::new_borrowed(&px, width, height).unwrap();
        quantize(&img, config).unwrap()
    });
}

#[bench]
fn quantize_s1(b: &mut Bencher) {
    let (px, width, height) = test_image();
    let config = QuantizationConfig::new().with_speed(1);
    b.iter(move || {
        let img = Image::new_borrowed(&px, width, height).unwrap();
        quantize(&img, config).unwrap()
    });
}
