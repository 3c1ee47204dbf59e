use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "crawler.toml";
const ENV_PREFIX: &str = "CRAWLER";

const BASE_URL: &str = "https://www.procore.com/network/us";

/// (state code, partition name) pairs crawled by default.
const STATES: &[(&str, &str)] = &[
    ("mn", "minnesota"),
    ("ms", "mississippi"),
    ("mo", "missouri"),
    ("mt", "montana"),
    ("ne", "nebraska"),
    ("nv", "nevada"),
    ("nh", "new_hampshire"),
    ("nj", "new_jersey"),
    ("ny", "new_york"),
    ("nc", "north_carolina"),
    ("nd", "north_dakota"),
    ("oh", "ohio"),
    ("ok", "oklahoma"),
    ("or", "oregon"),
    ("pa", "pennsylvania"),
    ("ri", "rhode_island"),
    ("sc", "south_carolina"),
    ("sd", "south_dakota"),
    ("tn", "tennessee"),
    ("ut", "utah"),
    ("vt", "vermont"),
    ("va", "virginia"),
    ("wa", "washington"),
    ("wv", "west_virginia"),
    ("wi", "wisconsin"),
    ("wy", "wyoming"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    pub name: String,
    pub entry_url: String,
}

/// A named checkbox-style filter applied before reading results.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterToggle {
    pub name: String,
    pub selector: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    /// Element that signals the page has rendered.
    pub ready: String,
    /// Result-card links on a search page.
    pub cards: String,
    pub next_page: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Selectors {
            ready: "body".into(),
            cards: "a[data-track-click*='Search Results, Navigation']".into(),
            next_page: "button[aria-label='Go to next page']".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    pub wait_timeout_secs: u64,
    pub settle_ms: u64,
    pub max_pages: usize,
    pub max_attempts: Option<u32>,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub ruleset: Option<PathBuf>,
    pub selectors: Selectors,
    pub filters: Vec<FilterToggle>,
    pub partitions: Vec<PartitionConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/directory.sqlite"),
            workers: 10,
            fetch_timeout_secs: 10,
            wait_timeout_secs: 10,
            settle_ms: 3000,
            max_pages: 500,
            max_attempts: None,
            headless: true,
            chrome_executable: None,
            ruleset: None,
            selectors: Selectors::default(),
            filters: default_filters(),
            partitions: default_partitions(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file (if present), then `CRAWLER_*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let mut settings: Settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        for p in &mut settings.partitions {
            p.name = normalize_partition(&p.name);
        }
        if settings.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        Ok(settings)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn partition(&self, name: &str) -> Option<&PartitionConfig> {
        let name = normalize_partition(name);
        self.partitions.iter().find(|p| p.name == name)
    }
}

/// Lowercase, with anything outside `[a-z0-9]` folded to `_`.
pub fn normalize_partition(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn default_partitions() -> Vec<PartitionConfig> {
    STATES
        .iter()
        .map(|(code, name)| PartitionConfig {
            name: name.to_string(),
            entry_url: format!("{}/{}", BASE_URL, code),
        })
        .collect()
}

fn default_filters() -> Vec<FilterToggle> {
    [
        ("Specialty Contractors", "specialty_contractor"),
        ("General Contractors", "general_contractor"),
    ]
    .iter()
    .map(|(name, key)| FilterToggle {
        name: name.to_string(),
        selector: format!(
            "span[data-track-click='Company Type Options, Update Checkbox, {}']",
            key
        ),
    })
    .collect()
}
