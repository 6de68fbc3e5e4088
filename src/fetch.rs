use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scraper::Html;
use tracing::{debug, info, warn};

use crate::repair::apply_repairs;
use crate::util::ensure_directory;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; icpc-scrape/0.1)";

/// Per-run fetch configuration, passed explicitly so the pipeline stays
/// testable without a full command-line invocation.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Directory for cached pages; None disables the cache entirely.
    pub page_cache_dir: Option<PathBuf>,
    pub repair: bool,
}

pub fn page_url(year: u32) -> String {
    format!("https://icpc.baylor.edu/community/results-{year}")
}

/// Scheme stripped, slashes to underscores, ".html" suffix.
pub fn cache_file_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    format!("{}.html", without_scheme.replace('/', "_"))
}

/// Obtains the standings page for a year and parses it into a document tree.
///
/// A readable cache entry skips the network entirely. Either way the page
/// runs through the repair table (when enabled) and the repaired text is
/// persisted back to the cache before parsing; every repair rule is a no-op
/// on already-repaired markup.
pub fn fetch(year: u32, options: &FetchOptions) -> Result<Html> {
    let url = page_url(year);
    let cache_path = options
        .page_cache_dir
        .as_ref()
        .map(|dir| dir.join(cache_file_name(&url)));

    let raw = match cached_page(cache_path.as_deref()) {
        Some(cached) => cached,
        None => fetch_remote(&url, year)?,
    };

    let page = if options.repair {
        apply_repairs(&raw, year)?
    } else {
        raw
    };

    if let Some(path) = &cache_path {
        if let Err(err) = write_cache(path, &page) {
            warn!(path = %path.display(), error = %err, "failed to write page cache entry");
        }
    }

    Ok(Html::parse_document(&page))
}

fn cached_page(cache_path: Option<&Path>) -> Option<String> {
    let path = cache_path?;
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(page) => {
            info!(path = %path.display(), "using cached page");
            Some(page)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "cache entry unreadable, refetching");
            None
        }
    }
}

fn fetch_remote(url: &str, year: u32) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")?;

    info!(url, year, "fetching standings page");
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("standings request rejected for {url}"))?;

    let body = response
        .bytes()
        .with_context(|| format!("failed to read response body from {url}"))?;
    debug!(url, size = body.len(), "fetched standings page");

    String::from_utf8(body.to_vec())
        .with_context(|| format!("standings page for {year} is not valid utf-8"))
}

fn write_cache(path: &Path, page: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    fs::write(path, page).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_rankings;

    #[test]
    fn page_url_substitutes_the_year() {
        assert_eq!(
            page_url(2009),
            "https://icpc.baylor.edu/community/results-2009"
        );
    }

    #[test]
    fn cache_file_name_strips_scheme_and_flattens_path() {
        assert_eq!(
            cache_file_name("https://icpc.baylor.edu/community/results-2009"),
            "icpc.baylor.edu_community_results-2009.html"
        );
        assert_eq!(
            cache_file_name("http://example.org/a/b"),
            "example.org_a_b.html"
        );
    }

    #[test]
    fn cache_hit_skips_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let url = page_url(2004);
        let cached = dir.path().join(cache_file_name(&url));
        fs::write(
            &cached,
            "<table border=1><form>\
             <tr><td>1</td><td>Acme University</td><td>8</td></tr>\
             </form></table>",
        )
        .unwrap();

        let options = FetchOptions {
            page_cache_dir: Some(dir.path().to_path_buf()),
            repair: true,
        };

        // The URL's host does not resolve from tests; only a cache hit can
        // produce a document here.
        let doc = fetch(2004, &options).unwrap();
        let records = extract_rankings(&doc, 2004).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].university, "Acme University");

        // Repaired text is persisted back to the same cache entry.
        let rewritten = fs::read_to_string(&cached).unwrap();
        assert!(rewritten.contains("<table id=\"rank\""));
        assert!(!rewritten.contains("<form>"));
    }
}
