//! Accent color extraction from poster images

use std::collections::HashMap;
use std::path::Path;

use crate::types::{PaletteResult, Rgb};

/// Posters are shrunk to fit this box before sampling
const SAMPLE_SIZE: u32 = 256;
const SWATCH_COUNT: usize = 12;

const MIN_SATURATION: f64 = 0.1;
const MIN_LIGHTNESS: f64 = 0.05;
const MAX_LIGHTNESS: f64 = 0.95;

/// Fallback swatches must have every channel strictly inside (10, 245)
const CHANNEL_FLOOR: u8 = 10;
const CHANNEL_CEILING: u8 = 245;

/// A candidate color and the share of pixels behind it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Swatch {
    pub rgb: Rgb,
    pub proportion: f64,
}

/// Saturation and lightness in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsl {
    pub s: f64,
    pub l: f64,
}

pub fn to_hsl(rgb: Rgb) -> Hsl {
    let r = f64::from(rgb.r) / 255.0;
    let g = f64::from(rgb.g) / 255.0;
    let b = f64::from(rgb.b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    let delta = max - min;

    if delta == 0.0 {
        return Hsl { s: 0.0, l };
    }
    Hsl {
        s: delta / (1.0 - (2.0 * l - 1.0).abs()),
        l,
    }
}

#[derive(Default)]
struct Bucket {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

/// Most common colors of an image, at most `count`, ordered by prevalence.
///
/// Pixels are grouped by the top four bits of each channel; a swatch is the
/// mean color of its group.
pub fn extract_swatches(pixels: impl Iterator<Item = Rgb>, count: usize) -> Vec<Swatch> {
    let mut buckets: HashMap<(u8, u8, u8), Bucket> = HashMap::new();
    let mut total = 0u64;
    for px in pixels {
        let bucket = buckets.entry((px.r >> 4, px.g >> 4, px.b >> 4)).or_default();
        bucket.r += u64::from(px.r);
        bucket.g += u64::from(px.g);
        bucket.b += u64::from(px.b);
        bucket.count += 1;
        total += 1;
    }

    let mut ranked: Vec<_> = buckets.into_iter().collect();
    // Key order breaks ties so the result does not depend on hash order
    ranked.sort_by(|(ka, a), (kb, b)| b.count.cmp(&a.count).then(ka.cmp(kb)));

    ranked
        .into_iter()
        .take(count)
        .map(|(_, bucket)| Swatch {
            rgb: Rgb::new(
                (bucket.r / bucket.count) as u8,
                (bucket.g / bucket.count) as u8,
                (bucket.b / bucket.count) as u8,
            ),
            proportion: bucket.count as f64 / total as f64,
        })
        .collect()
}

fn inside_channel_band(rgb: Rgb) -> bool {
    [rgb.r, rgb.g, rgb.b]
        .iter()
        .all(|&c| c > CHANNEL_FLOOR && c < CHANNEL_CEILING)
}

/// Largest share wins; on a tie the earlier swatch is kept
fn most_prevalent<'a>(candidates: impl Iterator<Item = &'a Swatch>) -> Option<&'a Swatch> {
    candidates.min_by(|a, b| b.proportion.total_cmp(&a.proportion))
}

/// Pick the most "pleasant" swatch: saturated, mid-lightness.
///
/// Falls back to the most prevalent swatch away from black and white, then to
/// the most prevalent swatch of all. Ties go to the earlier swatch.
pub fn choose_accent(swatches: &[Swatch]) -> Option<Rgb> {
    let mut best: Option<(f64, Rgb)> = None;
    for swatch in swatches {
        let hsl = to_hsl(swatch.rgb);
        if hsl.s < MIN_SATURATION || hsl.l < MIN_LIGHTNESS || hsl.l > MAX_LIGHTNESS {
            continue;
        }
        let score = hsl.s - (hsl.l - 0.5).abs();
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, swatch.rgb));
        }
    }
    if let Some((_, rgb)) = best {
        return Some(rgb);
    }

    most_prevalent(swatches.iter().filter(|s| inside_channel_band(s.rgb)))
        .or_else(|| most_prevalent(swatches.iter()))
        .map(|s| s.rgb)
}

/// Accent color of a saved poster, or `None` if it is missing or undecodable
pub fn extract_accent(path: &Path) -> Option<PaletteResult> {
    if !path.exists() {
        return None;
    }
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(path = %path.display(), "color extraction failed: {}", e);
            return None;
        }
    };

    let sample = if img.width() > SAMPLE_SIZE || img.height() > SAMPLE_SIZE {
        img.thumbnail(SAMPLE_SIZE, SAMPLE_SIZE)
    } else {
        img
    };
    let sample = sample.to_rgb8();
    let swatches = extract_swatches(
        sample.pixels().map(|p| Rgb::new(p[0], p[1], p[2])),
        SWATCH_COUNT,
    );
    choose_accent(&swatches).map(PaletteResult::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn swatch(r: u8, g: u8, b: u8, proportion: f64) -> Swatch {
        Swatch {
            rgb: Rgb::new(r, g, b),
            proportion,
        }
    }

    #[test]
    fn test_to_hsl() {
        let red = to_hsl(Rgb::new(255, 0, 0));
        assert_eq!((red.s, red.l), (1.0, 0.5));
        let gray = to_hsl(Rgb::new(128, 128, 128));
        assert_eq!(gray.s, 0.0);
        assert!((to_hsl(Rgb::new(255, 255, 255)).l - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_swatches_ranked_by_prevalence() {
        let mut pixels = vec![Rgb::new(200, 30, 30); 30];
        pixels.extend(vec![Rgb::new(20, 20, 20); 70]);
        let swatches = extract_swatches(pixels.into_iter(), 12);
        assert_eq!(swatches.len(), 2);
        assert_eq!(swatches[0].rgb, Rgb::new(20, 20, 20));
        assert!((swatches[0].proportion - 0.7).abs() < 1e-9);
        assert_eq!(swatches[1].rgb, Rgb::new(200, 30, 30));
    }

    #[test]
    fn test_swatch_is_bucket_mean() {
        let pixels = vec![Rgb::new(100, 100, 100), Rgb::new(102, 104, 106)];
        let swatches = extract_swatches(pixels.into_iter(), 12);
        assert_eq!(swatches, vec![swatch(101, 102, 103, 1.0)]);
    }

    #[test]
    fn test_choose_prefers_saturated_midtones() {
        let swatches = [
            swatch(128, 128, 128, 0.5),
            swatch(120, 90, 80, 0.3),
            swatch(220, 40, 60, 0.2),
        ];
        assert_eq!(choose_accent(&swatches), Some(Rgb::new(220, 40, 60)));
    }

    #[test]
    fn test_choose_falls_back_to_band() {
        // all gray: excluded by saturation, first one in the channel band wins
        let swatches = [
            swatch(0, 0, 0, 0.5),
            swatch(100, 100, 100, 0.3),
            swatch(250, 250, 250, 0.2),
        ];
        assert_eq!(choose_accent(&swatches), Some(Rgb::new(100, 100, 100)));
    }

    #[test]
    fn test_choose_falls_back_to_most_prevalent() {
        let swatches = [swatch(0, 0, 0, 0.6), swatch(255, 255, 255, 0.4)];
        assert_eq!(choose_accent(&swatches), Some(Rgb::new(0, 0, 0)));
        assert_eq!(choose_accent(&[]), None);
    }

    #[test]
    fn test_fallback_uses_proportion_not_position() {
        let swatches = [
            swatch(100, 100, 100, 0.2),
            swatch(0, 0, 0, 0.5),
            swatch(60, 60, 60, 0.3),
        ];
        assert_eq!(choose_accent(&swatches), Some(Rgb::new(60, 60, 60)));

        let swatches = [swatch(255, 255, 255, 0.4), swatch(0, 0, 0, 0.6)];
        assert_eq!(choose_accent(&swatches), Some(Rgb::new(0, 0, 0)));

        let tied = [swatch(90, 90, 90, 0.5), swatch(80, 80, 80, 0.5)];
        assert_eq!(choose_accent(&tied), Some(Rgb::new(90, 90, 90)));
    }

    #[test]
    fn test_extract_accent_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poster.png");
        let img = RgbImage::from_fn(600, 900, |_, y| {
            if y < 600 {
                image::Rgb([128, 128, 128])
            } else {
                image::Rgb([30, 90, 200])
            }
        });
        DynamicImage::ImageRgb8(img).save(&path).unwrap();

        let accent = extract_accent(&path).unwrap();
        let hsl = to_hsl(accent.rgb);
        assert!(hsl.s > 0.5, "expected the blue band, got {:?}", accent.rgb);
        assert!(!accent.light);
    }

    #[test]
    fn test_extract_accent_missing_or_broken() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(extract_accent(&dir.path().join("nope.jpg")), None);

        let broken = dir.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();
        assert_eq!(extract_accent(&broken), None);
    }
}
