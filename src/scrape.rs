use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::dates::{extract_air_date, parse_collection_date, DateWindow};
use crate::types::{ListingItem, Status};

static ITEM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul#browserItemList > li.item").unwrap());
static TITLE_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3 a.l").unwrap());
static IMAGE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static INFO_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.info.tip").unwrap());
static COLLECT_INFO_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.collectInfo").unwrap());
static COLLECT_DATE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.tip_j").unwrap());
static SPAN_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("span").unwrap());
static COMMENT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#comment_box .text").unwrap());
static PAGER_LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.p").unwrap());

static SUBJECT_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/subject/(\d+)").unwrap());
static STARS_CLASS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^stars(\d+)$").unwrap());

const NEXT_PAGE_TEXT: &str = "››";

/// Network failure talking to the site or the image API
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// A list row that could not be turned into a [`ListingItem`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseItemError {
    #[error("missing title link")]
    MissingTitleLink,

    #[error("missing cover image")]
    MissingImage,

    #[error("no subject id in link \"{0}\"")]
    MissingSubjectId(String),
}

/// Binary response body plus its declared content type
#[derive(Debug)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Blocking client for the list pages and the image API
pub struct BgmClient {
    client: reqwest::blocking::Client,
    site_url: String,
    api_url: String,
    user_id: String,
    page_user_agent: String,
    api_user_agent: String,
}

impl BgmClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(config.timeout());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(FetchError::Client)?);
        }
        let client = builder.build().map_err(FetchError::Client)?;
        Ok(Self {
            client,
            site_url: config.site_url.trim_end_matches('/').to_string(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.trim().to_string(),
            page_user_agent: config.page_user_agent.clone(),
            api_user_agent: config.api_user_agent.clone(),
        })
    }

    pub fn list_url(&self, status: Status, page: u32) -> String {
        format!(
            "{}/anime/list/{}/{}?page={}",
            self.site_url,
            self.user_id,
            status.as_str(),
            page
        )
    }

    pub fn image_url(&self, subject_id: &str, image_type: &str) -> String {
        format!(
            "{}/v0/subjects/{}/image?type={}",
            self.api_url, subject_id, image_type
        )
    }

    fn get(&self, url: &str, user_agent: &str) -> Result<Fetched, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().map_err(request_error)?;

        Ok(Fetched {
            content_type,
            bytes: bytes.to_vec(),
        })
    }

    /// Cover image for a subject; redirects to the CDN are followed
    pub fn fetch_image(&self, subject_id: &str, image_type: &str) -> Result<Fetched, FetchError> {
        let url = self.image_url(subject_id, image_type);
        self.get(&url, &self.api_user_agent)
    }
}

/// Where list pages come from
pub trait PageSource {
    fn fetch_list_page(&self, status: Status, page: u32) -> Result<String, FetchError>;
}

impl PageSource for BgmClient {
    fn fetch_list_page(&self, status: Status, page: u32) -> Result<String, FetchError> {
        let url = self.list_url(status, page);
        tracing::debug!(%url, "requesting list page");
        let fetched = self.get(&url, &self.page_user_agent)?;
        Ok(String::from_utf8_lossy(&fetched.bytes).into_owned())
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn absolute_link(site_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!(
            "{}/{}",
            site_url.trim_end_matches('/'),
            href.trim_start_matches('/')
        )
    }
}

/// Numeric id following `/subject/` in a link
pub fn subject_id_from_link(link: &str) -> Option<&str> {
    SUBJECT_ID_PATTERN
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn star_rating(collect_info: ElementRef<'_>) -> u8 {
    collect_info
        .select(&SPAN_SELECTOR)
        .flat_map(|span| span.value().classes())
        .find_map(|class| {
            STARS_CLASS_PATTERN
                .captures(class)
                .and_then(|caps| caps[1].parse::<u8>().ok())
        })
        .map(|stars| stars.min(10))
        .unwrap_or(0)
}

/// Turn one `li.item` row into a listing entry
pub fn parse_item(
    row: ElementRef<'_>,
    status: Status,
    site_url: &str,
) -> Result<ListingItem, ParseItemError> {
    let title_link = row
        .select(&TITLE_LINK_SELECTOR)
        .next()
        .ok_or(ParseItemError::MissingTitleLink)?;
    let href = title_link
        .value()
        .attr("href")
        .ok_or(ParseItemError::MissingTitleLink)?;
    let title = element_text(title_link);
    if title.is_empty() {
        return Err(ParseItemError::MissingTitleLink);
    }

    row.select(&IMAGE_SELECTOR)
        .find(|img| img.value().attr("src").is_some())
        .ok_or(ParseItemError::MissingImage)?;

    let link = absolute_link(site_url, href);
    let subject_id = subject_id_from_link(&link)
        .ok_or_else(|| ParseItemError::MissingSubjectId(link.clone()))?
        .to_string();

    let air_date = row
        .select(&INFO_SELECTOR)
        .next()
        .and_then(|info| extract_air_date(&element_text(info)));

    let (rating_date, rating) = match row.select(&COLLECT_INFO_SELECTOR).next() {
        Some(collect_info) => {
            let date = collect_info
                .select(&COLLECT_DATE_SELECTOR)
                .next()
                .map(element_text)
                .filter(|d| !d.is_empty());
            (date, star_rating(collect_info))
        }
        None => (None, 0),
    };

    let comment = row
        .select(&COMMENT_SELECTOR)
        .next()
        .map(element_text)
        .filter(|c| !c.is_empty());

    Ok(ListingItem {
        subject_id,
        title,
        link,
        air_date,
        rating_date,
        rating,
        comment,
        status,
        bucket: None,
        poster_path: None,
    })
}

/// Parse every row of a list page, skipping (and logging) malformed ones
pub fn parse_page(document: &Html, status: Status, site_url: &str) -> Vec<ListingItem> {
    document
        .select(&ITEM_SELECTOR)
        .enumerate()
        .filter_map(|(index, row)| match parse_item(row, status, site_url) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(status = status.as_str(), row = index, "skipping list row: {}", e);
                None
            }
        })
        .collect()
}

/// Whether the pager has a "next" control
pub fn has_next_page(document: &Html) -> bool {
    document
        .select(&PAGER_LINK_SELECTOR)
        .any(|a| element_text(a) == NEXT_PAGE_TEXT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The page had no parseable rows
    NoItems,
    /// No "next" control on the page
    LastPage,
    /// A row was collected before the window start
    BeforeWindow,
    /// A page request failed; rows from earlier pages are kept
    FetchFailed,
}

#[derive(Debug)]
pub struct StatusListing {
    pub items: Vec<ListingItem>,
    pub pages: u32,
    pub stop: StopReason,
}

/// Walks the paginated list of one user, one status tab at a time
pub struct Lister<'a, S: PageSource> {
    source: &'a S,
    site_url: String,
    /// When set, pagination stops at the first row collected before `window.start`
    window: Option<DateWindow>,
    delay: Duration,
}

impl<'a, S: PageSource> Lister<'a, S> {
    pub fn new(source: &'a S, site_url: &str, window: Option<DateWindow>, delay: Duration) -> Self {
        Self {
            source,
            site_url: site_url.to_string(),
            window,
            delay,
        }
    }

    /// Split a page's rows at the first one collected before the window.
    /// Returns the rows to keep and whether the cutoff was hit.
    fn cut_at_window(&self, items: Vec<ListingItem>) -> (Vec<ListingItem>, bool) {
        let Some(window) = self.window else {
            return (items, false);
        };
        let cutoff = items.iter().position(|item| {
            item.rating_date
                .as_deref()
                .and_then(parse_collection_date)
                .is_some_and(|d| d.date < window.start)
        });
        match cutoff {
            Some(index) => {
                let mut items = items;
                items.truncate(index);
                (items, true)
            }
            None => (items, false),
        }
    }

    pub fn list_status(&self, status: Status) -> StatusListing {
        let mut items = Vec::new();
        let mut page = 1;

        let stop = loop {
            let html = match self.source.fetch_list_page(status, page) {
                Ok(html) => html,
                Err(e) => {
                    tracing::error!(
                        status = status.as_str(),
                        page,
                        "list request failed, giving up on this status: {:#}",
                        anyhow::Error::new(e)
                    );
                    break StopReason::FetchFailed;
                }
            };

            let document = Html::parse_document(&html);
            let page_items = parse_page(&document, status, &self.site_url);
            let next = has_next_page(&document);
            tracing::info!(status = status.as_str(), page, "found {} items", page_items.len());

            if page_items.is_empty() {
                break StopReason::NoItems;
            }

            let (kept, hit_cutoff) = self.cut_at_window(page_items);
            items.extend(kept);

            if hit_cutoff {
                break StopReason::BeforeWindow;
            }
            if !next {
                break StopReason::LastPage;
            }

            page += 1;
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        };

        tracing::debug!(status = status.as_str(), ?stop, "listing finished");
        StatusListing {
            items,
            pages: page,
            stop,
        }
    }
}
