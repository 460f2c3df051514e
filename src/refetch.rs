//! Download the posters referenced by an existing review document again

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use crate::poster::{save_bytes, PosterError};
use crate::scrape::{subject_id_from_link, BgmClient};
use crate::utils::sanitize_filename;

pub const DEFAULT_IMAGE_TYPE: &str = "common";
pub const DEFAULT_OUT_DIR: &str = "anime_posters_new";

static CARD_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.border.rounded-lg").unwrap());
static SUBJECT_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[href*="/subject/"]"#).unwrap());
static IMG_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());

/// What a card says about its poster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardPoster {
    pub subject_id: String,
    /// Base name of the card's `img src`
    pub file_name: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CardError {
    #[error("card has no subject link or no image")]
    MissingLinkOrImage,

    #[error("no subject id in link \"{0}\"")]
    MissingSubjectId(String),

    #[error("image of subject {0} has no src")]
    MissingSrc(String),
}

fn parse_card(card: ElementRef<'_>) -> Result<CardPoster, CardError> {
    let link = card.select(&SUBJECT_LINK_SELECTOR).next();
    let img = card.select(&IMG_SELECTOR).next();
    let (Some(link), Some(img)) = (link, img) else {
        return Err(CardError::MissingLinkOrImage);
    };

    let href = link.value().attr("href").unwrap_or_default();
    let subject_id = subject_id_from_link(href)
        .ok_or_else(|| CardError::MissingSubjectId(href.to_string()))?
        .to_string();

    let file_name = img
        .value()
        .attr("src")
        .and_then(|src| Path::new(src).file_name())
        .map(|name| sanitize_filename(&name.to_string_lossy()))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CardError::MissingSrc(subject_id.clone()))?;

    Ok(CardPoster {
        subject_id,
        file_name,
    })
}

/// Every well-formed card in a document, in document order
pub fn find_card_posters(content: &str) -> Vec<CardPoster> {
    let document = Html::parse_document(content);
    document
        .select(&CARD_SELECTOR)
        .filter_map(|card| match parse_card(card) {
            Ok(poster) => Some(poster),
            Err(e) => {
                tracing::warn!(stage = "refetch", "skipping card: {}", e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefetchSummary {
    pub cards: usize,
    pub saved: usize,
}

/// Re-download every card's poster into `out_dir` under the file name the card uses
pub fn run_refetch(
    client: &BgmClient,
    document: &Path,
    out_dir: &Path,
    image_type: &str,
    delay: Duration,
) -> Result<RefetchSummary> {
    let content = fs::read_to_string(document)
        .with_context(|| format!("Failed to read document: {}", document.display()))?;
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let posters = find_card_posters(&content);
    if posters.is_empty() {
        tracing::warn!(document = %document.display(), "no cards found");
        return Ok(RefetchSummary::default());
    }
    tracing::info!("found {} cards", posters.len());

    let mut summary = RefetchSummary {
        cards: posters.len(),
        saved: 0,
    };
    for (i, poster) in posters.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            thread::sleep(delay);
        }
        let path = out_dir.join(&poster.file_name);
        let result = client
            .fetch_image(&poster.subject_id, image_type)
            .map_err(PosterError::from)
            .and_then(|fetched| save_bytes(&fetched.bytes, &path));
        match result {
            Ok(()) => {
                tracing::info!(subject_id = %poster.subject_id, "saved {}", path.display());
                summary.saved += 1;
            }
            Err(e) => tracing::error!(
                subject_id = %poster.subject_id,
                stage = "refetch",
                "download failed: {:#}",
                anyhow::Error::new(e)
            ),
        }
    }
    Ok(summary)
}
