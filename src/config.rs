#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::platform::{DEFAULT_YT_DLP, YtDlpOptions};
use crate::scraper::DEFAULT_WORKERS;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DB_PATH: &str = "data/videos.db";
pub const DEFAULT_CACHE_DIR: &str = "cache";

#[derive(Debug, Clone, PartialEq)]
pub struct ScraperSettings {
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub fetch_timeout: Option<Duration>,
    pub yt_dlp: PathBuf,
    pub cookies: Option<PathBuf>,
}

impl ScraperSettings {
    pub fn yt_dlp_options(&self) -> YtDlpOptions {
        YtDlpOptions {
            program: self.yt_dlp.clone(),
            socket_timeout: self.fetch_timeout,
            cookies: self.cookies.clone(),
        }
    }
}

/// Values given on the command line; they beat the environment and `.env`.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub db_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub fetch_timeout: Option<Duration>,
    pub yt_dlp: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<ScraperSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ScraperSettings {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> ScraperSettings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let db_path = overrides
        .db_path
        .or_else(|| lookup("SCRAPER_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let cache_dir = overrides
        .cache_dir
        .or_else(|| lookup("SCRAPER_CACHE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    let workers = overrides
        .workers
        .or_else(|| lookup("SCRAPER_WORKERS").and_then(|value| value.parse::<usize>().ok()))
        .filter(|workers| *workers >= 1)
        .unwrap_or(DEFAULT_WORKERS);
    let fetch_timeout = overrides.fetch_timeout.or_else(|| {
        lookup("SCRAPER_FETCH_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    });
    let yt_dlp = overrides
        .yt_dlp
        .or_else(|| lookup("YT_DLP_BIN").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));
    let cookies = lookup("SCRAPER_COOKIES").map(PathBuf::from);

    ScraperSettings {
        db_path,
        cache_dir,
        workers,
        fetch_timeout,
        yt_dlp,
        cookies,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Reads `KEY=value` pairs from a dotenv-style settings file. A missing file
/// yields no settings; comments, blank lines and lines without `=` are skipped.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading settings file {}", path.display()));
        }
    };
    Ok(content.lines().filter_map(parse_setting_line).collect())
}

fn parse_setting_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let (key, value) = line
        .strip_prefix("export ")
        .unwrap_or(line)
        .split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim()).to_string()))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .into_iter()
        .find_map(|quote| value.strip_prefix(quote)?.strip_suffix(quote))
        .unwrap_or(value)
}
