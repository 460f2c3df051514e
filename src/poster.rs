//! Poster download and normalization to JPEG

use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::scrape::{BgmClient, FetchError};
use crate::utils::sanitize_filename;

/// Extension all posters end up with
pub const CANONICAL_EXTENSION: &str = "jpg";

/// File extension implied by a response's `Content-Type`
pub fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.contains("png") => "png",
        Some(ct) if ct.contains("webp") => "webp",
        _ => "jpg",
    }
}

/// `{title}_{id}` with characters that are illegal in file names removed
pub fn poster_stem(title: &str, subject_id: &str) -> String {
    format!("{}_{}", sanitize_filename(title), subject_id)
}

/// Height after scaling `width x height` down to `max_width`, never below 1
fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let scaled = (u64::from(height) * u64::from(max_width) + u64::from(width) / 2) / u64::from(width);
    scaled.max(1) as u32
}

fn reencode(path: &Path, max_width: Option<u32>) -> Result<PathBuf, image::ImageError> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let img = match max_width {
        Some(max) if img.width() > max => {
            let height = scaled_height(img.width(), img.height(), max);
            img.resize_exact(max, height, FilterType::Lanczos3)
        }
        _ => img,
    };

    let target = path.with_extension(CANONICAL_EXTENSION);
    // The downloaded file stays intact until the new one is complete
    let staging = path.with_extension(format!("{}.tmp", CANONICAL_EXTENSION));
    let written = img
        .to_rgb8()
        .save_with_format(&staging, ImageFormat::Jpeg)
        .and_then(|()| fs::rename(&staging, &target).map_err(image::ImageError::IoError));
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    if target != path {
        fs::remove_file(path)?;
    }
    Ok(target)
}

/// Bring a freshly written poster to the canonical format and width.
///
/// JPEGs already within the width limit are left untouched. If decoding or
/// re-encoding fails the original file is kept as it was downloaded.
pub fn normalize_poster(path: &Path, extension: &str, max_width: Option<u32>) -> PathBuf {
    if extension == CANONICAL_EXTENSION {
        let fits = match (max_width, image::image_dimensions(path)) {
            (None, _) => true,
            (Some(max), Ok((width, _))) => width <= max,
            // Undecodable: re-encoding would fail the same way
            (Some(_), Err(_)) => true,
        };
        if fits {
            return path.to_path_buf();
        }
    }

    match reencode(path, max_width) {
        Ok(target) => {
            tracing::debug!(from = %path.display(), to = %target.display(), "poster re-encoded");
            target
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                "poster re-encode failed, keeping the original file: {}",
                e
            );
            path.to_path_buf()
        }
    }
}

/// Why a poster could not be stored
#[derive(Debug, thiserror::Error)]
pub enum PosterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to write {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Write `bytes` to `path` as-is
pub fn save_bytes(bytes: &[u8], path: &Path) -> Result<(), PosterError> {
    fs::write(path, bytes).map_err(|source| PosterError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Write downloaded poster bytes into `dir` and normalize them
pub fn store_poster(
    bytes: &[u8],
    content_type: Option<&str>,
    dir: &Path,
    stem: &str,
    max_width: Option<u32>,
) -> Result<PathBuf, PosterError> {
    let extension = extension_for(content_type);
    let path = dir.join(format!("{}.{}", stem, extension));
    save_bytes(bytes, &path)?;
    Ok(normalize_poster(&path, extension, max_width))
}

fn fetch_poster(
    client: &BgmClient,
    subject_id: &str,
    title: &str,
    dir: &Path,
    image_type: &str,
    max_width: Option<u32>,
) -> Result<PathBuf, PosterError> {
    let fetched = client.fetch_image(subject_id, image_type)?;
    let stem = poster_stem(title, subject_id);
    store_poster(
        &fetched.bytes,
        fetched.content_type.as_deref(),
        dir,
        &stem,
        max_width,
    )
}

/// Fetch a subject's cover and store it. Failures are logged and yield `None`;
/// nothing here is retried.
pub fn download_poster(
    client: &BgmClient,
    subject_id: &str,
    title: &str,
    dir: &Path,
    image_type: &str,
    max_width: Option<u32>,
) -> Option<PathBuf> {
    match fetch_poster(client, subject_id, title, dir, image_type, max_width) {
        Ok(path) => {
            tracing::info!(subject_id, "poster saved: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::error!(
                subject_id,
                stage = "poster",
                "poster unavailable: {:#}",
                anyhow::Error::new(e)
            );
            None
        }
    }
}
