//! Listing entries and the values derived from them during a run

use std::path::PathBuf;

/// User-assigned disposition of a subject (which list tab it lives on)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Collect,
    OnHold,
    Dropped,
}

impl Status {
    /// Tabs scraped on every run, in order
    pub const ALL: [Status; 3] = [Status::Collect, Status::OnHold, Status::Dropped];

    /// Path segment used by the list endpoint
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Collect => "collect",
            Status::OnHold => "on_hold",
            Status::Dropped => "dropped",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Collect => "看过",
            Status::OnHold => "搁置",
            Status::Dropped => "弃番",
        }
    }
}

/// Where an item lands relative to the target season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    CurrentSeason,
    PreviousSeason,
    Older,
    Unknown,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::CurrentSeason => "current_season",
            Bucket::PreviousSeason => "previous_season",
            Bucket::Older => "older",
            Bucket::Unknown => "unknown",
        }
    }
}

/// One row of a user's list page
#[derive(Debug, Clone, PartialEq)]
pub struct ListingItem {
    /// Numeric subject id, kept as text
    pub subject_id: String,
    pub title: String,
    /// Absolute link to the subject page
    pub link: String,
    /// Normalized air date (`Y-M-D`, `Y-M` or `Y`), None when the info line has no date
    pub air_date: Option<String>,
    /// Collection date as shown on the page
    pub rating_date: Option<String>,
    /// 0 = unrated, otherwise 1-10
    pub rating: u8,
    pub comment: Option<String>,
    pub status: Status,
    /// Set once after filtering
    pub bucket: Option<Bucket>,
    /// Set only after a successful download
    pub poster_path: Option<PathBuf>,
}

impl ListingItem {
    pub fn rating_text(&self) -> String {
        if self.rating > 0 {
            format!("{}/10", self.rating)
        } else {
            "未评分".to_string()
        }
    }
}

/// An 8-bit sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Luma with 0.299/0.587/0.114 weights, normalized to [0, 1]
    pub fn luma(&self) -> f64 {
        (0.299 * f64::from(self.r) + 0.587 * f64::from(self.g) + 0.114 * f64::from(self.b)) / 255.0
    }

    pub fn is_light(&self) -> bool {
        self.luma() > 0.5
    }
}

/// Accent color picked for a poster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteResult {
    pub rgb: Rgb,
    pub light: bool,
}

impl From<Rgb> for PaletteResult {
    fn from(rgb: Rgb) -> Self {
        Self {
            rgb,
            light: rgb.is_light(),
        }
    }
}
