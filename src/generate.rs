use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::dates::{SeasonInfo, YearMonth};
use crate::types::{Bucket, ListingItem, PaletteResult, Status};
use crate::utils::html_escape;

const FALLBACK_BACKGROUND: &str = "background-color: #374151;";
const NO_COMMENT: &str = "暂无短评。";
const UNKNOWN_DATE: &str = "未知";

/// What the renderer needs besides the items themselves
pub struct RenderOptions<'a> {
    pub target: YearMonth,
    /// Creation date written to the front matter
    pub today: NaiveDate,
    /// Directory name posters live in, relative to the document
    pub poster_dir_name: &'a str,
}

/// Tailwind classes for a card, chosen by how light its accent color is
#[derive(Debug, Clone, PartialEq, Eq)]
struct CardStyle {
    background: String,
    link_class: &'static str,
    prose_class: &'static str,
    border_class: &'static str,
    comment_bg_class: &'static str,
}

impl CardStyle {
    fn for_accent(accent: Option<&PaletteResult>) -> Self {
        match accent {
            Some(accent) if accent.light => Self {
                background: Self::rgba(accent),
                link_class: "text-gray-800 hover:text-sky-600",
                prose_class: "prose",
                border_class: "border-gray-400/50",
                comment_bg_class: "bg-black/10",
            },
            Some(accent) => Self {
                background: Self::rgba(accent),
                ..Self::dark()
            },
            None => Self::dark(),
        }
    }

    fn rgba(accent: &PaletteResult) -> String {
        format!(
            "background-color: rgba({}, {}, {}, 0.75);",
            accent.rgb.r, accent.rgb.g, accent.rgb.b
        )
    }

    fn dark() -> Self {
        Self {
            background: FALLBACK_BACKGROUND.to_string(),
            link_class: "text-white hover:text-sky-300",
            prose_class: "prose prose-invert",
            border_class: "border-gray-500/50",
            comment_bg_class: "bg-white/10",
        }
    }
}

/// JSON string literal, which is also a valid quoted YAML scalar
fn quoted(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn front_matter(opts: &RenderOptions<'_>) -> String {
    let season = SeasonInfo::for_target(opts.target);
    let title = format!("{}新番观后简评", season.title());
    let description = format!(
        "记录{}年{}月起的{}季新番个人简评。",
        opts.target.year(),
        opts.target.month(),
        season.season.label()
    );
    let tags = [
        "番剧".to_string(),
        "季度总结".to_string(),
        format!("{}年", season.year),
        format!("{}季番", season.season.label()),
    ];
    let tags = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"---
title: {}
date: {}
description: {}
slug: {}
tags: {}
series: ["季度新番"]
series_order: 1
showTableOfContents: true
---
"#,
        quoted(&title),
        opts.today.format("%Y-%m-%d"),
        quoted(&description),
        quoted(&format!("anime-review-{}", opts.target)),
        tags
    )
}

fn overview() -> &'static str {
    r#"
{{< lead >}}
在这里写下你对本季新番的总体概述和看法...
{{< /lead >}}

---
"#
}

fn status_summary(current: &[&ListingItem]) -> String {
    let mut out = String::from("\n## 本季概览\n\n");
    for status in Status::ALL {
        let count = current.iter().filter(|item| item.status == status).count();
        out.push_str(&format!("- {}：{} 部\n", status.label(), count));
    }
    out
}

fn comment_html(comment: Option<&str>) -> String {
    match comment {
        Some(c) => html_escape(c).replace("\r\n", "<br>").replace('\n', "<br>"),
        None => NO_COMMENT.to_string(),
    }
}

fn rating_html(item: &ListingItem) -> String {
    if item.rating > 0 {
        format!("<strong>{}</strong>", item.rating_text())
    } else {
        item.rating_text()
    }
}

/// One rich card; `None` when the item has no poster
fn card_html(item: &ListingItem, accent: Option<&PaletteResult>, poster_dir_name: &str) -> Option<String> {
    let poster_path = item.poster_path.as_ref()?;
    let poster_file = poster_path.file_name()?.to_string_lossy();
    let style = CardStyle::for_accent(accent);
    let title = html_escape(&item.title);

    Some(format!(
        r#"
### {title}

<div class="mb-8 p-4 border rounded-lg dark:border-neutral-700" style="{background}">
    <div class="flex flex-col sm:flex-row gap-4">
        <div class="w-full sm:w-1/4 flex-shrink-0 flex justify-center items-start">
            <img src="./{poster_dir}/{poster_file}" alt="{title} 海报"
                class="rounded-md object-cover w-full max-w-xs mx-auto shadow-md">
        </div>
        <div class="w-full sm:w-3/4 {prose}">
            <div class="pb-3 border-b {border}">
                <h4 class="text-2xl font-bold">
                    <a href="{link}" target="_blank" rel="noopener noreferrer" class="{link_class} transition-colors duration-200">
                        {title}
                    </a>
                </h4>
                <div class="flex items-center mt-2 gap-4">
                    <div class="font-semibold flex items-center">
                        <span class="text-amber-400 flex items-center">{{{{< icon "star" >}}}}</span>
                        <span class="ml-1.5">{rating}</span>
                    </div>
                    <div>
                        <span class="font-medium">状态:</span> {status}
                    </div>
                </div>
            </div>
            <div class="rounded-lg p-4 my-4 {comment_bg}">
                <div class="{prose} max-w-none leading-relaxed">
                    <p>{comment}</p>
                </div>
            </div>
            <div class="mt-4 pt-3 border-t {border} text-sm">
                <div class="flex flex-wrap gap-x-6 gap-y-2">
                    <div><span class="font-medium">放送日期:</span> {air_date}</div>
                    <div><span class="font-medium">评价日期:</span> {rating_date}</div>
                </div>
            </div>
        </div>
    </div>
</div>
"#,
        title = title,
        background = style.background,
        poster_dir = poster_dir_name,
        poster_file = html_escape(&poster_file),
        prose = style.prose_class,
        border = style.border_class,
        link = html_escape(&item.link),
        link_class = style.link_class,
        rating = rating_html(item),
        status = item.status.label(),
        comment_bg = style.comment_bg_class,
        comment = comment_html(item.comment.as_deref()),
        air_date = item.air_date.as_deref().unwrap_or(UNKNOWN_DATE),
        rating_date = html_escape(item.rating_date.as_deref().unwrap_or(UNKNOWN_DATE)),
    ))
}

fn compact_line(item: &ListingItem) -> String {
    let title = item.title.replace('[', "\\[").replace(']', "\\]");
    format!(
        "- [{}]({}) · {} · {} · 放送 {}\n",
        title,
        item.link,
        item.rating_text(),
        item.status.label(),
        item.air_date.as_deref().unwrap_or(UNKNOWN_DATE)
    )
}

fn compact_section(heading: &str, items: &[&ListingItem]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = format!("\n## {}\n\n", heading);
    for item in items {
        out.push_str(&compact_line(item));
    }
    out
}

/// Render the whole review document.
///
/// `items` should already be filtered and sorted; `accents` maps subject ids to
/// the accent color of their poster.
pub fn render_document(
    items: &[ListingItem],
    accents: &HashMap<String, PaletteResult>,
    opts: &RenderOptions<'_>,
) -> String {
    let in_bucket = |bucket: Bucket| {
        items
            .iter()
            .filter(|item| item.bucket == Some(bucket))
            .collect::<Vec<_>>()
    };
    let current = in_bucket(Bucket::CurrentSeason);
    let previous = in_bucket(Bucket::PreviousSeason);
    let older = in_bucket(Bucket::Older);

    let mut doc = front_matter(opts);
    doc.push_str(overview());
    doc.push_str(&status_summary(&current));

    doc.push_str("\n## 本季新番\n");
    let mut without_poster = Vec::new();
    for item in &current {
        match card_html(item, accents.get(&item.subject_id), opts.poster_dir_name) {
            Some(card) => doc.push_str(&card),
            None => without_poster.push(*item),
        }
    }
    if !without_poster.is_empty() {
        doc.push_str("\n#### 未获取到海报\n\n");
        for item in &without_poster {
            doc.push_str(&compact_line(item));
        }
    }

    doc.push_str(&compact_section("上季延续", &previous));
    doc.push_str(&compact_section("往季补番", &older));
    doc
}

/// Write the rendered document, replacing any previous one
pub fn write_document(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .with_context(|| format!("Failed to write document: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;
    use std::path::PathBuf;

    fn item(id: &str, bucket: Bucket, rating: u8, poster: bool) -> ListingItem {
        ListingItem {
            subject_id: id.to_string(),
            title: format!("Title {}", id),
            link: format!("https://bgm.tv/subject/{}", id),
            air_date: Some("2025-07-04".to_string()),
            rating_date: Some("2025-07-20".to_string()),
            rating,
            comment: None,
            status: Status::Collect,
            bucket: Some(bucket),
            poster_path: poster.then(|| PathBuf::from(format!("out/bgm_posters/Title {}_{}.jpg", id, id))),
        }
    }

    fn opts() -> RenderOptions<'static> {
        RenderOptions {
            target: "2025-07".parse().unwrap(),
            today: NaiveDate::from_ymd_opt(2025, 10, 2).unwrap(),
            poster_dir_name: "bgm_posters",
        }
    }

    #[test]
    fn test_front_matter() {
        let doc = render_document(&[], &HashMap::new(), &opts());
        assert!(doc.starts_with("---\ntitle: \"2025年夏季新番观后简评\"\ndate: 2025-10-02\n"));
        assert!(doc.contains("slug: \"anime-review-2025-07\"\n"));
        assert!(doc.contains(r#"tags: ["番剧","季度总结","2025年","夏季番"]"#));
        assert!(doc.contains("showTableOfContents: true\n---\n"));
        assert!(doc.contains("{{< lead >}}"));
    }

    #[test]
    fn test_unrated_never_renders_zero() {
        let items = vec![item("1", Bucket::CurrentSeason, 0, true), item("2", Bucket::Older, 0, false)];
        let doc = render_document(&items, &HashMap::new(), &opts());
        assert!(!doc.contains("0/10"));
        assert_eq!(doc.matches("未评分").count(), 2);
    }

    #[test]
    fn test_rated_card() {
        let items = vec![item("7", Bucket::CurrentSeason, 8, true)];
        let doc = render_document(&items, &HashMap::new(), &opts());
        assert!(doc.contains("<strong>8/10</strong>"));
        assert!(doc.contains(r#"<img src="./bgm_posters/Title 7_7.jpg""#));
        assert!(doc.contains(r#"{{< icon "star" >}}"#));
        assert!(doc.contains(FALLBACK_BACKGROUND));
        assert!(doc.contains("- 看过：1 部"));
        assert!(doc.contains("- 弃番：0 部"));
    }

    #[test]
    fn test_items_without_poster_skip_cards() {
        let items = vec![
            item("1", Bucket::CurrentSeason, 7, false),
            item("2", Bucket::Older, 6, false),
            item("3", Bucket::PreviousSeason, 9, true),
        ];
        let doc = render_document(&items, &HashMap::new(), &opts());
        assert!(!doc.contains("<div class=\"mb-8"));
        assert!(doc.contains("#### 未获取到海报\n\n- [Title 1](https://bgm.tv/subject/1) · 7/10"));
        assert!(doc.contains("## 往季补番\n\n- [Title 2](https://bgm.tv/subject/2) · 6/10 · 看过 · 放送 2025-07-04"));
        assert!(doc.contains("## 上季延续\n\n- [Title 3]"));
    }

    #[test]
    fn test_card_style_follows_accent() {
        let light = PaletteResult::from(Rgb::new(240, 220, 120));
        let dark = PaletteResult::from(Rgb::new(30, 40, 90));

        let style = CardStyle::for_accent(Some(&light));
        assert_eq!(style.background, "background-color: rgba(240, 220, 120, 0.75);");
        assert_eq!(style.prose_class, "prose");
        assert_eq!(style.comment_bg_class, "bg-black/10");

        let style = CardStyle::for_accent(Some(&dark));
        assert_eq!(style.background, "background-color: rgba(30, 40, 90, 0.75);");
        assert_eq!(style.prose_class, "prose prose-invert");

        assert_eq!(CardStyle::for_accent(None), CardStyle::dark());
    }

    #[test]
    fn test_accent_is_looked_up_by_subject() {
        let items = vec![item("5", Bucket::CurrentSeason, 6, true)];
        let accents = HashMap::from([("5".to_string(), PaletteResult::from(Rgb::new(240, 220, 120)))]);
        let doc = render_document(&items, &accents, &opts());
        assert!(doc.contains("rgba(240, 220, 120, 0.75)"));
        assert!(doc.contains("text-gray-800 hover:text-sky-600"));
    }

    #[test]
    fn test_status_summary_counts_every_status() {
        let mut held = item("2", Bucket::CurrentSeason, 0, false);
        held.status = Status::OnHold;
        let collected = item("1", Bucket::CurrentSeason, 7, true);
        assert_eq!(
            status_summary(&[&collected, &held]),
            "\n## 本季概览\n\n- 看过：1 部\n- 搁置：1 部\n- 弃番：0 部\n"
        );
    }

    #[test]
    fn test_poster_file_name_is_escaped() {
        let mut card = item("8", Bucket::CurrentSeason, 7, true);
        card.poster_path = Some(PathBuf::from("out/bgm_posters/Tom & Jerry's_8.jpg"));
        let doc = render_document(&[card], &HashMap::new(), &opts());
        assert!(doc.contains(r#"src="./bgm_posters/Tom &amp; Jerry&#39;s_8.jpg""#));
    }

    #[test]
    fn test_comment_line_breaks_and_escaping() {
        assert_eq!(comment_html(Some("a\r\nb\nc <3")), "a<br>b<br>c &lt;3");
        assert_eq!(comment_html(None), NO_COMMENT);
    }

    #[test]
    fn test_write_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.md");
        write_document(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(write_document(&dir.path().join("missing/index.md"), "x").is_err());
    }
}
