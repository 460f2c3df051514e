//! The end-to-end review run: list, filter, fetch posters, render

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::thread;

use crate::config::Config;
use crate::dates::{classify, SeasonInfo};
use crate::generate::{render_document, write_document, RenderOptions};
use crate::palette::extract_accent;
use crate::poster::download_poster;
use crate::scrape::{BgmClient, Lister, PageSource};
use crate::types::{Bucket, ListingItem, PaletteResult, Status};
use crate::utils::osc8_file_link;

fn setup_directory(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        tracing::info!("created directory {}", dir.display());
    }
    Ok(())
}

/// Walk every status tab and gather rows, keeping the first row seen per subject
pub fn collect_items<S: PageSource>(source: &S, config: &Config) -> Vec<ListingItem> {
    let lister = Lister::new(
        source,
        &config.site_url,
        Some(config.window()),
        config.page_delay(),
    );

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for status in Status::ALL {
        tracing::info!(status = status.as_str(), "listing");
        let listing = lister.list_status(status);
        tracing::info!(
            status = status.as_str(),
            pages = listing.pages,
            stop = ?listing.stop,
            "collected {} items",
            listing.items.len()
        );
        for item in listing.items {
            if seen.insert(item.subject_id.clone()) {
                items.push(item);
            } else {
                tracing::warn!(subject_id = %item.subject_id, status = status.as_str(), "duplicate subject skipped");
            }
        }
    }
    items
}

/// Keep rows collected inside the window, bucket them by air date and drop
/// the ones whose air date is unknown. Result is ordered by rating, highest first.
pub fn select_items(items: Vec<ListingItem>, config: &Config) -> Vec<ListingItem> {
    let window = config.window();
    let mut selected: Vec<ListingItem> = items
        .into_iter()
        .filter(|item| {
            item.rating_date
                .as_deref()
                .is_some_and(|d| window.contains_text(d))
        })
        .filter_map(|mut item| {
            let bucket = classify(item.air_date.as_deref(), config.target);
            if bucket == Bucket::Unknown {
                tracing::warn!(subject_id = %item.subject_id, title = %item.title, "no usable air date, dropped");
                return None;
            }
            item.bucket = Some(bucket);
            Some(item)
        })
        .collect();
    selected.sort_by(|a, b| b.rating.cmp(&a.rating));
    selected
}

fn fetch_posters(client: &BgmClient, items: &mut [ListingItem], config: &Config) -> usize {
    let poster_dir = config.poster_dir();
    let total = items.len();
    let mut fetched = 0;
    for (i, item) in items.iter_mut().enumerate() {
        tracing::info!("[{:02}/{:02}] poster for {} ({})", i + 1, total, item.title, item.subject_id);
        item.poster_path = download_poster(
            client,
            &item.subject_id,
            &item.title,
            &poster_dir,
            &config.image_type,
            config.max_width(),
        );
        if item.poster_path.is_some() {
            fetched += 1;
        }
        if i + 1 < total && !config.poster_delay().is_zero() {
            thread::sleep(config.poster_delay());
        }
    }
    fetched
}

/// Accent colors for every item that will get a card
pub fn accents_for(items: &[ListingItem]) -> HashMap<String, PaletteResult> {
    items
        .iter()
        .filter(|item| item.bucket == Some(Bucket::CurrentSeason))
        .filter_map(|item| {
            let accent = extract_accent(item.poster_path.as_deref()?)?;
            Some((item.subject_id.clone(), accent))
        })
        .collect()
}

fn log_buckets(items: &[ListingItem]) {
    for bucket in [Bucket::CurrentSeason, Bucket::PreviousSeason, Bucket::Older] {
        let count = items.iter().filter(|i| i.bucket == Some(bucket)).count();
        tracing::info!(bucket = bucket.as_str(), "{} items", count);
    }
}

pub fn run_review(config: &Config) -> Result<()> {
    let window = config.window();
    let season = SeasonInfo::for_target(config.target);
    tracing::info!(
        user = %config.user_id,
        target = %config.target,
        season = season.season.as_str(),
        year = season.year,
        "collecting entries rated between {} and {}",
        window.start,
        window.end
    );

    setup_directory(&config.output_dir())?;
    setup_directory(&config.poster_dir())?;

    let client = BgmClient::new(config)?;

    let collected = collect_items(&client, config);
    tracing::info!("listing done, {} items collected", collected.len());

    let mut items = select_items(collected, config);
    if items.is_empty() {
        tracing::warn!("no entries matched the configured window, nothing to write");
        return Ok(());
    }
    tracing::info!("{} items retained", items.len());
    log_buckets(&items);

    let fetched = fetch_posters(&client, &mut items, config);
    tracing::info!("{}/{} posters fetched", fetched, items.len());

    let accents = accents_for(&items);
    let opts = RenderOptions {
        target: config.target,
        today: chrono::Local::now().date_naive(),
        poster_dir_name: &config.poster_dir_name,
    };
    let document = render_document(&items, &accents, &opts);

    let path = config.document_path();
    write_document(&path, &document)?;
    println!("Generated {}", osc8_file_link(&path, &path.to_string_lossy()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::tests::{page, row, FakeSource};
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn config() -> Config {
        let mut config = Config::new("950475", "2025-07".parse().unwrap());
        config.page_delay_ms = 0;
        config.poster_delay_ms = 0;
        config
    }

    #[test]
    fn test_single_item_end_to_end() {
        let source = FakeSource::new(vec![(
            (Status::Collect, 1),
            page(
                &[row(400602, "Test Show", "12话 / 2025-07-15 / 监督", "2025-07-20", Some(8))],
                false,
            ),
        )]);
        let config = config();

        let collected = collect_items(&source, &config);
        assert_eq!(collected.len(), 1);

        let mut items = select_items(collected, &config);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].bucket, Some(Bucket::CurrentSeason));

        items[0].poster_path = Some(PathBuf::from("x/bgm_posters/Test Show_400602.jpg"));
        let opts = RenderOptions {
            target: config.target,
            today: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            poster_dir_name: &config.poster_dir_name,
        };
        let doc = render_document(&items, &accents_for(&items), &opts);
        assert!(doc.contains("<strong>8/10</strong>"));
        assert!(doc.contains("./bgm_posters/Test Show_400602.jpg"));
    }

    #[test]
    fn test_old_collection_stops_and_is_excluded() {
        let source = FakeSource::new(vec![
            (
                (Status::Collect, 1),
                page(&[row(1, "Ancient", "2023-01-05", "2024-01-01", Some(9))], true),
            ),
            (
                (Status::Collect, 2),
                page(&[row(2, "Unreached", "2025-07-05", "2025-07-10", Some(9))], false),
            ),
        ]);
        let config = config();

        let collected = collect_items(&source, &config);
        assert!(collected.is_empty());
        assert!(!source.requests.borrow().contains(&(Status::Collect, 2)));
        assert!(select_items(collected, &config).is_empty());
    }

    #[test]
    fn test_statuses_are_all_listed_and_deduplicated() {
        let source = FakeSource::new(vec![
            (
                (Status::Collect, 1),
                page(&[row(1, "A", "2025-07-05", "2025-07-10", Some(7))], false),
            ),
            (
                (Status::OnHold, 1),
                page(
                    &[
                        row(1, "A again", "2025-07-05", "2025-07-11", None),
                        row(2, "B", "2025-04-05", "2025-08-11", None),
                    ],
                    false,
                ),
            ),
            // dropped tab fails outright; earlier tabs are unaffected
        ]);
        let items = collect_items(&source, &config());
        let ids: Vec<_> = items.iter().map(|i| (i.subject_id.as_str(), i.status)).collect();
        assert_eq!(ids, vec![("1", Status::Collect), ("2", Status::OnHold)]);
    }

    #[test]
    fn test_select_items_filters_buckets_and_sorts() {
        let make = |id: &str, air: Option<&str>, rated: Option<&str>, rating: u8| ListingItem {
            subject_id: id.to_string(),
            title: id.to_string(),
            link: format!("https://bgm.tv/subject/{}", id),
            air_date: air.map(str::to_string),
            rating_date: rated.map(str::to_string),
            rating,
            comment: None,
            status: Status::Collect,
            bucket: None,
            poster_path: None,
        };
        let items = vec![
            make("1", Some("2025-07-01"), Some("2025-07-02"), 5),
            make("2", Some("2025-05-01"), Some("2025-10-31"), 9),
            make("3", Some("2019"), Some("2025/08/01"), 0),
            make("4", None, Some("2025-07-02"), 10),
            make("5", Some("2025-07-01"), Some("2025-11-01"), 10),
            make("6", Some("2025-07-01"), None, 10),
            make("7", Some("2025-08-01"), Some("2025-09"), 5),
        ];
        let selected = select_items(items, &config());
        let got: Vec<_> = selected
            .iter()
            .map(|i| (i.subject_id.as_str(), i.bucket.unwrap()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("2", Bucket::PreviousSeason),
                ("1", Bucket::CurrentSeason),
                ("7", Bucket::CurrentSeason),
                ("3", Bucket::Older),
            ]
        );
    }

    #[test]
    fn test_accents_skip_items_without_cards() {
        let dir = tempfile::tempdir().unwrap();
        let poster = dir.path().join("p.png");
        image::RgbImage::from_pixel(8, 8, image::Rgb([200, 40, 40]))
            .save(&poster)
            .unwrap();

        let mut current = ListingItem {
            subject_id: "1".to_string(),
            title: "c".to_string(),
            link: String::new(),
            air_date: None,
            rating_date: None,
            rating: 0,
            comment: None,
            status: Status::Collect,
            bucket: Some(Bucket::CurrentSeason),
            poster_path: Some(poster.clone()),
        };
        let mut older = current.clone();
        older.subject_id = "2".to_string();
        older.bucket = Some(Bucket::Older);
        let mut missing = current.clone();
        missing.subject_id = "3".to_string();
        missing.poster_path = None;
        current.title = "current".to_string();

        let accents = accents_for(&[current, older, missing]);
        assert_eq!(accents.len(), 1);
        assert!(accents.contains_key("1"));
    }

    #[test]
    fn test_setup_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        setup_directory(&nested).unwrap();
        assert!(nested.is_dir());

        let file = dir.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(setup_directory(&file.join("sub")).is_err());
    }
}
