//! Loose date parsing, the collection window and season bucketing

use chrono::{Datelike, Months, NaiveDate};
use regex::{Captures, Regex};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::types::Bucket;

/// How much of a date the source text actually carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Day,
    Month,
    Year,
}

/// A calendar date recovered from loosely formatted text.
///
/// Month precision maps to day 1 and year precision to January 1. This is a
/// coarsening for ordering and bucketing only: a bare `2025` sorts and
/// classifies as 2025-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LooseDate {
    pub date: NaiveDate,
    pub precision: Precision,
}

impl fmt::Display for LooseDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.precision {
            Precision::Day => write!(f, "{}", self.date.format("%Y-%m-%d")),
            Precision::Month => write!(f, "{}", self.date.format("%Y-%m")),
            Precision::Year => write!(f, "{}", self.date.format("%Y")),
        }
    }
}

struct DateRule {
    pattern: Regex,
    precision: Precision,
}

impl DateRule {
    fn apply(&self, text: &str) -> Option<LooseDate> {
        let caps = self.pattern.captures(text)?;
        let year: i32 = caps.name("y")?.as_str().parse().ok()?;
        let month = capture_u32(&caps, "m").unwrap_or(1);
        let day = capture_u32(&caps, "d").unwrap_or(1);
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(LooseDate {
            date,
            precision: self.precision,
        })
    }
}

fn capture_u32(caps: &Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name)?.as_str().parse().ok()
}

/// Ordered list of date patterns; the first rule that yields a valid date wins.
///
/// Patterns capture `y`, and optionally `m` and `d`. A pattern that matches but
/// names an impossible date (`2025-02-30`) falls through to the next rule.
pub struct DateRules {
    rules: Vec<DateRule>,
}

impl DateRules {
    fn new(rules: &[(&str, Precision)]) -> Self {
        let rules = rules
            .iter()
            .map(|(pattern, precision)| DateRule {
                pattern: Regex::new(pattern).unwrap(),
                precision: *precision,
            })
            .collect();
        Self { rules }
    }

    /// Run the rules in order. `None` means no rule produced a date.
    pub fn evaluate(&self, text: &str) -> Option<LooseDate> {
        self.rules.iter().find_map(|rule| rule.apply(text))
    }
}

static COLLECTION_DATE_RULES: LazyLock<DateRules> = LazyLock::new(|| {
    DateRules::new(&[
        (r"^(?P<y>\d{4})-(?P<m>\d{1,2})-(?P<d>\d{1,2})$", Precision::Day),
        (r"^(?P<y>\d{4})/(?P<m>\d{1,2})/(?P<d>\d{1,2})$", Precision::Day),
        (r"^(?P<y>\d{4})-(?P<m>\d{1,2})$", Precision::Month),
        (r"^(?P<y>\d{4})/(?P<m>\d{1,2})$", Precision::Month),
    ])
});

static AIR_DATE_RULES: LazyLock<DateRules> = LazyLock::new(|| {
    DateRules::new(&[
        (
            r"^(?P<y>\d{4})[-/年](?P<m>\d{1,2})[-/月](?P<d>\d{1,2})日?$",
            Precision::Day,
        ),
        (r"^(?P<y>\d{4})[-/年](?P<m>\d{1,2})月?$", Precision::Month),
        (r"^(?P<y>\d{4})年?$", Precision::Year),
    ])
});

// Unanchored, most specific first: these pull a date out of a free-form info line
static AIR_DATE_SEARCH_RULES: LazyLock<DateRules> = LazyLock::new(|| {
    DateRules::new(&[
        (
            r"(?P<y>\d{4})[年/-](?P<m>\d{1,2})[月/-](?P<d>\d{1,2})日?",
            Precision::Day,
        ),
        (r"(?P<y>\d{4})年(?P<m>\d{1,2})月", Precision::Month),
        (r"(?P<y>\d{4})[/-](?P<m>\d{1,2})", Precision::Month),
        (r"(?P<y>\d{4})年?", Precision::Year),
    ])
});

/// Parse a collection ("rated on") date: `Y-M-D`, `Y/M/D`, `Y-M` or `Y/M`
pub fn parse_collection_date(text: &str) -> Option<LooseDate> {
    COLLECTION_DATE_RULES.evaluate(text.trim())
}

/// Parse an air date in normalized (`2025-07-05`) or CJK (`2025年7月5日`) form
pub fn parse_air_date(text: &str) -> Option<LooseDate> {
    AIR_DATE_RULES.evaluate(text.trim())
}

/// Pull the air date out of a list row's info line and normalize it to
/// `Y-M-D`, `Y-M` or `Y` with `-` separators
pub fn extract_air_date(info_text: &str) -> Option<String> {
    AIR_DATE_SEARCH_RULES
        .evaluate(info_text.trim())
        .map(|d| d.to_string())
}

/// A month of the year, always valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct YearMonth {
    first: NaiveDate,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid year-month \"{0}\" (expected YYYY-MM)")]
pub struct ParseYearMonthError(String);

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first| Self { first })
    }

    /// The month a date falls in
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    /// Last calendar day of the month `months` after this one
    pub fn last_day_after(&self, months: u32) -> NaiveDate {
        self.first
            .checked_add_months(Months::new(months.saturating_add(1)))
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }
}

impl FromStr for YearMonth {
    type Err = ParseYearMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static PATTERN: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

        let err = || ParseYearMonthError(s.to_string());
        let caps = PATTERN.captures(s).ok_or_else(err)?;
        let year = caps[1].parse().map_err(|_| err())?;
        let month = caps[2].parse().map_err(|_| err())?;
        Self::new(year, month).ok_or_else(err)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = ParseYearMonthError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first.format("%Y-%m"))
    }
}

/// Inclusive range of collection dates a run cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Whether a raw collection date falls inside the window; unparseable text never does
    pub fn contains_text(&self, text: &str) -> bool {
        parse_collection_date(text).is_some_and(|d| self.contains(d.date))
    }
}

/// Collection window of a review: the target month plus `trailing_months` following months
pub fn get_date_range(target: YearMonth, trailing_months: u32) -> DateWindow {
    DateWindow {
        start: target.first_day(),
        end: target.last_day_after(trailing_months),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn of_month(month: u32) -> Self {
        match month {
            1..=3 => Season::Winter,
            4..=6 => Season::Spring,
            7..=9 => Season::Summer,
            _ => Season::Autumn,
        }
    }

    pub fn months(&self) -> [u32; 3] {
        match self {
            Season::Winter => [1, 2, 3],
            Season::Spring => [4, 5, 6],
            Season::Summer => [7, 8, 9],
            Season::Autumn => [10, 11, 12],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Season::Winter => "冬",
            Season::Spring => "春",
            Season::Summer => "夏",
            Season::Autumn => "秋",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

/// A broadcast quarter of a given year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonInfo {
    pub year: i32,
    pub season: Season,
    pub months: [u32; 3],
}

impl SeasonInfo {
    pub fn new(year: i32, season: Season) -> Self {
        Self {
            year,
            season,
            months: season.months(),
        }
    }

    pub fn for_target(target: YearMonth) -> Self {
        Self::new(target.year(), Season::of_month(target.month()))
    }

    /// The quarter before this one, rolling back a year from winter
    pub fn previous(&self) -> Self {
        match self.season {
            Season::Winter => Self::new(self.year - 1, Season::Autumn),
            Season::Spring => Self::new(self.year, Season::Winter),
            Season::Summer => Self::new(self.year, Season::Spring),
            Season::Autumn => Self::new(self.year, Season::Summer),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && self.months.contains(&date.month())
    }

    /// e.g. `2025年夏季`
    pub fn title(&self) -> String {
        format!("{}年{}季", self.year, self.season.label())
    }
}

/// Bucket an air date against the season of `target`
pub fn classify(air_date: Option<&str>, target: YearMonth) -> Bucket {
    let Some(date) = air_date.and_then(parse_air_date) else {
        return Bucket::Unknown;
    };
    let current = SeasonInfo::for_target(target);
    if current.contains(date.date) {
        Bucket::CurrentSeason
    } else if current.previous().contains(date.date) {
        Bucket::PreviousSeason
    } else {
        Bucket::Older
    }
}
