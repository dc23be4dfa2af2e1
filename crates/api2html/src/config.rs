// File: src/config.rs
// Purpose: Route table definitions and the config parser capability

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything needed to build an engine. Immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, alias = "Pages")]
    pub pages: Vec<Page>,

    /// File names under the static dir served at `/<name>`
    #[serde(default, alias = "StaticTXTContent")]
    pub static_txt_content: Vec<String>,

    /// Serve `<static>/robots.txt` at `/robots.txt`
    #[serde(default, alias = "Robots")]
    pub robots: bool,

    /// Serve `<static>/sitemap.xml` at `/sitemap.xml`
    #[serde(default, alias = "Sitemap")]
    pub sitemap: bool,

    /// Template name -> file path
    #[serde(default, alias = "Templates")]
    pub templates: BTreeMap<String, PathBuf>,

    /// Layout name -> file path
    #[serde(default, alias = "Layouts")]
    pub layouts: BTreeMap<String, PathBuf>,

    /// Values exposed to every page under `Extra`
    #[serde(default, alias = "Extra")]
    pub extra: Map<String, Value>,

    #[serde(default, alias = "PublicFolder")]
    pub public_folder: Option<PublicFolder>,
}

/// Directory served as-is under a URL prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicFolder {
    #[serde(rename = "path_to_folder", alias = "Path")]
    pub path: PathBuf,

    #[serde(rename = "url_prefix", alias = "Prefix")]
    pub prefix: String,
}

/// One route definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default, alias = "Name")]
    pub name: String,

    /// Router pattern, e.g. `/posts/:id`
    #[serde(default, alias = "URLPattern")]
    pub url_pattern: String,

    /// Backend URL with `:param` placeholders. Empty for static pages.
    #[serde(default, alias = "BackendURLPattern")]
    pub backend_url_pattern: String,

    #[serde(default, alias = "Template")]
    pub template: String,

    #[serde(default, alias = "Layout")]
    pub layout: String,

    /// Go-style duration (`"30s"`, `"1h30m"`); empty or zero disables caching
    #[serde(default, alias = "CacheTTL")]
    pub cache_ttl: String,

    /// Backend response header that marks a collection payload
    #[serde(default, alias = "Header")]
    pub header: String,

    #[serde(default, alias = "IsArray")]
    pub is_array: bool,

    #[serde(default, alias = "Extra")]
    pub extra: Map<String, Value>,
}

impl Page {
    /// Parsed `cache_ttl`
    pub fn cache_ttl(&self) -> Result<Duration, DurationError> {
        parse_duration(&self.cache_ttl)
    }

    /// Name used in logs: the page name, or its pattern if unnamed
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.url_pattern
        } else {
            &self.name
        }
    }
}

/// Loads a [`Config`] from a path
pub trait ConfigParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Config>;
}

impl<F> ConfigParser for F
where
    F: Fn(&Path) -> Result<Config> + Send + Sync,
{
    fn parse(&self, path: &Path) -> Result<Config> {
        self(path)
    }
}

/// Reads JSON config files, or TOML when the extension is `.toml`
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigParser;

impl ConfigParser for FileConfigParser {
    fn parse(&self, path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        };

        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("invalid duration")]
    Invalid,
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
    #[error("negative durations are not allowed")]
    Negative,
}

/// Parse a Go-style duration: a sequence of decimal numbers with units
/// (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`), e.g. `"300ms"`, `"1.5h"`, `"2h45m"`.
/// An empty string or `"0"` is zero; a bare integer is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    static SEGMENT: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(\d+(?:\.\d*)?|\.\d+)([a-zµμ]*)").unwrap());

    let input = input.trim();
    if input.is_empty() || input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.starts_with('-') {
        return Err(DurationError::Negative);
    }
    let input = input.strip_prefix('+').unwrap_or(input);

    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total: u128 = 0;
    let mut consumed = 0;
    for caps in SEGMENT.captures_iter(input) {
        let whole = caps.get(0).ok_or(DurationError::Invalid)?;
        if whole.start() != consumed {
            return Err(DurationError::Invalid);
        }
        consumed = whole.end();

        let unit_nanos: u128 = match &caps[2] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => return Err(DurationError::Invalid),
            other => return Err(DurationError::UnknownUnit(other.to_string())),
        };

        let (whole_part, fraction) = caps[1].split_once('.').unwrap_or((&caps[1], ""));
        let whole_part: u128 = if whole_part.is_empty() {
            0
        } else {
            whole_part.parse().map_err(|_| DurationError::Invalid)?
        };
        total = whole_part
            .checked_mul(unit_nanos)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or(DurationError::Invalid)?;

        if !fraction.is_empty() {
            let digits = fraction.len().min(18) as u32;
            let numerator: u128 = fraction[..digits as usize]
                .parse()
                .map_err(|_| DurationError::Invalid)?;
            total = numerator
                .checked_mul(unit_nanos)
                .map(|nanos| nanos / 10u128.pow(digits))
                .and_then(|nanos| total.checked_add(nanos))
                .ok_or(DurationError::Invalid)?;
        }
    }

    if consumed != input.len() || consumed == 0 {
        return Err(DurationError::Invalid);
    }

    u64::try_from(total)
        .map(Duration::from_nanos)
        .map_err(|_| DurationError::Invalid)
}
