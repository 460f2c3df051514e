//! Run configuration, loaded from a CONL file and/or command-line overrides

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dates::{get_date_range, DateWindow, YearMonth};

pub const DOCUMENT_NAME: &str = "index.md";

const MAX_WINDOW_MONTHS: u32 = 24;

const DEFAULT_PAGE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const DEFAULT_API_USER_AGENT: &str = "MyAnimePosterDownloader/1.1 (https://github.com/ienone)";

/// Everything one review run needs to know
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bangumi user id (numeric id or username)
    pub user_id: String,
    /// Month the review is written for (`YYYY-MM`)
    pub target: YearMonth,
    /// Proxy applied to every request, e.g. `http://127.0.0.1:7890`
    #[serde(default)]
    pub proxy: Option<String>,
    /// Defaults to `anime-evaluate-{YYYY-MM}`
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_poster_dir_name")]
    pub poster_dir_name: String,
    /// Posters wider than this are downsampled; 0 keeps the original width
    #[serde(default = "default_max_poster_width")]
    pub max_poster_width: u32,
    /// Months after the target month that still count as "this season's" collection dates
    #[serde(default = "default_window_months")]
    pub window_months: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_poster_delay_ms")]
    pub poster_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Image size variant requested from the image API
    #[serde(default = "default_image_type")]
    pub image_type: String,
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_page_user_agent")]
    pub page_user_agent: String,
    #[serde(default = "default_api_user_agent")]
    pub api_user_agent: String,
}

fn default_poster_dir_name() -> String {
    "bgm_posters".to_string()
}

fn default_max_poster_width() -> u32 {
    1200
}

fn default_window_months() -> u32 {
    3
}

fn default_page_delay_ms() -> u64 {
    1000
}

fn default_poster_delay_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_image_type() -> String {
    "large".to_string()
}

fn default_site_url() -> String {
    "https://bgm.tv".to_string()
}

fn default_api_url() -> String {
    "https://api.bgm.tv".to_string()
}

fn default_page_user_agent() -> String {
    DEFAULT_PAGE_USER_AGENT.to_string()
}

fn default_api_user_agent() -> String {
    DEFAULT_API_USER_AGENT.to_string()
}

impl Config {
    /// A config with every optional field at its default
    pub fn new(user_id: impl Into<String>, target: YearMonth) -> Self {
        Self {
            user_id: user_id.into(),
            target,
            proxy: None,
            output_dir: None,
            poster_dir_name: default_poster_dir_name(),
            max_poster_width: default_max_poster_width(),
            window_months: default_window_months(),
            page_delay_ms: default_page_delay_ms(),
            poster_delay_ms: default_poster_delay_ms(),
            timeout_secs: default_timeout_secs(),
            image_type: default_image_type(),
            site_url: default_site_url(),
            api_url: default_api_url(),
            page_user_agent: default_page_user_agent(),
            api_user_agent: default_api_user_agent(),
        }
    }

    /// Load and validate a config file
    pub fn load_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_conl(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    pub fn from_conl(content: &str) -> Result<Self> {
        let config: Self = serde_conl::from_str(content).context("Invalid CONL")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let user_id = self.user_id.trim();
        ensure!(!user_id.is_empty(), "user_id must not be empty");
        ensure!(
            !user_id.contains(['/', '?', '#']),
            "user_id \"{}\" must be a bare id or username",
            self.user_id
        );
        ensure!(
            !self.poster_dir_name.is_empty() && !self.poster_dir_name.contains(['/', '\\']),
            "poster_dir_name \"{}\" must be a single directory name",
            self.poster_dir_name
        );
        if let Some(proxy) = &self.proxy {
            ensure!(
                proxy.starts_with("http://")
                    || proxy.starts_with("https://")
                    || proxy.starts_with("socks5://"),
                "proxy \"{}\" must include a scheme (http://host:port)",
                proxy
            );
        }
        ensure!(self.timeout_secs > 0, "timeout_secs must be positive");
        ensure!(
            self.window_months <= MAX_WINDOW_MONTHS,
            "window_months must be at most {}",
            MAX_WINDOW_MONTHS
        );
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("anime-evaluate-{}", self.target)))
    }

    pub fn poster_dir(&self) -> PathBuf {
        self.output_dir().join(&self.poster_dir_name)
    }

    pub fn document_path(&self) -> PathBuf {
        self.output_dir().join(DOCUMENT_NAME)
    }

    /// Collection dates that count toward this review
    pub fn window(&self) -> DateWindow {
        get_date_range(self.target, self.window_months)
    }

    pub fn max_width(&self) -> Option<u32> {
        (self.max_poster_width > 0).then_some(self.max_poster_width)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn poster_delay(&self) -> Duration {
        Duration::from_millis(self.poster_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
