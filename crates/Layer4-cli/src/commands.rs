//! Subcommand handlers

use crate::Command;
use anyhow::{bail, Context};
use cachet_core::{
    request_key, resource_key, CacheConfig, CacheManager, FetchOptions, GetOptions, HttpFetcher,
    RequestOptions, SystemHeapProbe,
};
use cachet_foundation::SqliteStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Build a cache backed by the SQLite file at `db_path`
pub fn open_cache(db_path: &Path) -> anyhow::Result<Arc<CacheManager>> {
    let config = CacheConfig::load().context("failed to load cache config")?;
    let store = SqliteStore::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    debug!("Persistent tier at {}", db_path.display());

    let cache = CacheManager::builder()
        .config(config)
        .store(Arc::new(store))
        .fetcher(Arc::new(HttpFetcher::new()))
        .heap_probe(Arc::new(SystemHeapProbe::new()))
        .build()?;
    Ok(cache)
}

/// Parse repeated `Name: value` header flags
pub fn parse_headers(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for line in raw {
        let Some((name, value)) = line.split_once(':') else {
            bail!("invalid header '{}', expected 'Name: value'", line);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("invalid header '{}', empty name", line);
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

pub fn derive_key(
    url: &str,
    resource: bool,
    method: &str,
    body: Option<&str>,
    headers: &BTreeMap<String, String>,
) -> String {
    if resource {
        resource_key(url)
    } else {
        request_key(method, url, body, headers)
    }
}

pub async fn run(cache: &CacheManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Fetch {
            url,
            resource,
            ttl_secs,
            method,
            body,
            headers,
        } => {
            let mut request = RequestOptions::new().method(method);
            for (name, value) in parse_headers(&headers)? {
                request = request.header(name, value);
            }
            if let Some(body) = body {
                request = request.body(body);
            }

            let mut options = FetchOptions::new().request(request);
            if let Some(secs) = ttl_secs {
                options = options.ttl(Duration::from_secs(secs));
            }

            let data = if resource {
                cache.cache_resource(&url, options).await?
            } else {
                cache.cache_api_response(&url, options).await?
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Command::Get { key } => match cache.get(&key, GetOptions::default()) {
            Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
            None => bail!("no live entry for '{}'", key),
        },
        Command::Remove { key } => {
            cache.remove(&key);
            info!("Removed {}", key);
        }
        Command::Clear => {
            cache.clear_all_caches();
            info!("Cleared all cache tiers");
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        }
        // Handled before the cache is opened
        Command::Key { .. } => {}
    }
    Ok(())
}
