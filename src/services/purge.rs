use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::config;

static PURGE: Lazy<reqwest::Method> = Lazy::new(|| reqwest::Method::from_bytes(b"PURGE").expect("valid PURGE method"));

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("cache purge failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no app hostname configured for cache purges")]
    MissingHostname,
}

/// Every path a cached copy of the data set may live under: the detail path plus
/// each spelling and ordering of the list filters
pub fn data_set_paths(name: &str, data_group: &str, data_type: &str) -> BTreeSet<String> {
    let groups = [None, Some(format!("data-group={}", data_group)), Some(format!("data_group={}", data_group))];
    let types = [None, Some(format!("data-type={}", data_type)), Some(format!("data_type={}", data_type))];

    let mut paths = BTreeSet::new();
    for g in &groups {
        for t in &types {
            paths.insert(list_path(&[g, t]));
            paths.insert(list_path(&[t, g]));
        }
    }
    paths.insert(format!("/data-sets/{}", name));
    paths
}

fn list_path(parts: &[&Option<String>]) -> String {
    let query = parts.iter().filter_map(|p| p.as_deref()).collect::<Vec<_>>().join("&");
    if query.is_empty() {
        "/data-sets".to_string()
    } else {
        format!("/data-sets?{}", query)
    }
}

pub fn user_paths(email: &str) -> BTreeSet<String> {
    let encoded: String = url::form_urlencoded::byte_serialize(email.as_bytes()).collect();
    BTreeSet::from([format!("/users/{}", encoded)])
}

/// `host:port/path` for every configured cache and path
pub fn purge_urls<'a>(caches: &'a [(String, u16)], paths: &'a BTreeSet<String>) -> impl Iterator<Item = String> + 'a {
    caches
        .iter()
        .flat_map(move |(host, port)| paths.iter().map(move |path| format!("{}:{}{}", host, port, path)))
}

/// Send `PURGE` for each path to every cache, addressed to the app hostname
pub async fn purge(paths: &BTreeSet<String>) -> Result<(), PurgeError> {
    let varnish = &config().varnish;
    if varnish.caches.is_empty() {
        debug!("No caches configured, skipping purge of {} paths", paths.len());
        return Ok(());
    }
    let hostname = varnish.app_hostname.as_deref().ok_or(PurgeError::MissingHostname)?;

    let client = reqwest::Client::new();
    for url in purge_urls(&varnish.caches, paths) {
        client
            .request(PURGE.clone(), &url)
            .header(reqwest::header::HOST, hostname)
            .send()
            .await?
            .error_for_status()?;
        info!("Purged {}", url);
    }
    Ok(())
}

/// Purge, logging any failure instead of returning it
pub async fn purge_or_log(paths: &BTreeSet<String>) {
    if let Err(e) = purge(paths).await {
        error!("Failed to purge caches: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_set_paths_cover_every_list_permutation() {
        let paths = data_set_paths("lpa_volumes", "lpa", "volumes");
        assert_eq!(paths.len(), 14);
        assert!(paths.contains("/data-sets/lpa_volumes"));
        assert!(paths.contains("/data-sets"));
        assert!(paths.contains("/data-sets?data-group=lpa"));
        assert!(paths.contains("/data-sets?data_type=volumes"));
        assert!(paths.contains("/data-sets?data-group=lpa&data_type=volumes"));
        assert!(paths.contains("/data-sets?data-type=volumes&data_group=lpa"));
    }

    #[test]
    fn user_path_is_escaped() {
        let paths = user_paths("someone@example.gov.uk");
        assert!(paths.contains("/users/someone%40example.gov.uk"));
    }

    #[test]
    fn urls_are_built_per_cache() {
        let caches = vec![("https://varnish-1".to_string(), 123), ("https://varnish-2".to_string(), 456)];
        let paths = BTreeSet::from(["/bar".to_string(), "/foo".to_string()]);
        let urls: Vec<String> = purge_urls(&caches, &paths).collect();
        assert_eq!(
            urls,
            vec![
                "https://varnish-1:123/bar",
                "https://varnish-1:123/foo",
                "https://varnish-2:456/bar",
                "https://varnish-2:456/foo",
            ]
        );
    }
}
