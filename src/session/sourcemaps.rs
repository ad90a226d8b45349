//! Source-map loading and position lookup.
//!
//! Maps are fetched lazily, at most once per generated URL, and cached for
//! the life of the session. This is one of the few filesystem-aware parts of
//! the bridge: maps load from local files, `file:` URLs and inline
//! `data:` URLs. Remote (`http(s):`) maps are not fetched.

use crate::error::Result;
use base64::Engine as _;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub url: String,
    /// 1-based.
    pub line: u32,
    /// 0-based.
    pub column: u32,
}

#[derive(Default)]
pub struct SourceMapCache {
    /// generated URL -> source-map URL, as announced by the engine.
    announced: HashMap<String, String>,
    /// generated URL -> parsed map; `None` records a failed load so it is
    /// attempted only once.
    maps: HashMap<String, Option<Rc<sourcemap::SourceMap>>>,
}

impl SourceMapCache {
    /// Remember where the map for `generated_url` lives. Loading happens on
    /// first lookup.
    pub fn announce(&mut self, generated_url: &str, source_map_url: &str) {
        self.announced
            .entry(generated_url.to_string())
            .or_insert_with(|| source_map_url.to_string());
    }

    pub fn has_map(&self, generated_url: &str) -> bool {
        self.announced.contains_key(generated_url)
    }

    /// Translate a generated position into the original source, if a map
    /// exists and covers it. `line` is 1-based, `column` 0-based, as on the
    /// wire.
    pub async fn find_original_location(
        &mut self,
        generated_url: &str,
        line: u32,
        column: u32,
    ) -> Option<OriginalPosition> {
        let map = self.load(generated_url).await?;
        let token = map.lookup_token(line.saturating_sub(1), column)?;
        let url = token.get_source()?;
        Some(OriginalPosition {
            url: resolve_relative(generated_url, url),
            line: token.get_src_line() + 1,
            column: token.get_src_col(),
        })
    }

    async fn load(&mut self, generated_url: &str) -> Option<Rc<sourcemap::SourceMap>> {
        if let Some(cached) = self.maps.get(generated_url) {
            return cached.clone();
        }
        let map_url = self.announced.get(generated_url)?.clone();

        let loaded = match fetch_map(generated_url, &map_url).await {
            Ok(bytes) => match sourcemap::SourceMap::from_slice(&bytes) {
                Ok(map) => Some(Rc::new(map)),
                Err(e) => {
                    log::warn!(target: "session", "bad source map for `{generated_url}`: {e}");
                    None
                }
            },
            Err(e) => {
                log::warn!(target: "session", "cannot load source map `{map_url}`: {e:#}");
                None
            }
        };
        self.maps.insert(generated_url.to_string(), loaded.clone());
        loaded
    }
}

async fn fetch_map(generated_url: &str, map_url: &str) -> Result<Vec<u8>> {
    if let Some(rest) = map_url.strip_prefix("data:") {
        return decode_data_url(rest);
    }
    if map_url.starts_with("http://") || map_url.starts_with("https://") {
        return Err(crate::error::Error::PathMappingMiss(map_url.to_string()));
    }

    let path = if let Some(p) = map_url.strip_prefix("file://") {
        p.to_string()
    } else if map_url.starts_with('/') {
        map_url.to_string()
    } else {
        // Relative to the generated file when that is local.
        let base = generated_url
            .strip_prefix("file://")
            .unwrap_or(generated_url);
        let dir = std::path::Path::new(base)
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."));
        dir.join(map_url).to_string_lossy().into_owned()
    };

    Ok(tokio::fs::read(&path).await?)
}

fn decode_data_url(rest: &str) -> Result<Vec<u8>> {
    // data:[<mediatype>][;base64],<data>
    let Some((meta, data)) = rest.split_once(',') else {
        return Err(crate::error::Error::Truncated);
    };
    if meta.ends_with(";base64") {
        Ok(base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|_| crate::error::Error::Truncated)?)
    } else {
        Ok(data.as_bytes().to_vec())
    }
}

/// Original source URLs inside a map may be relative to the generated file.
fn resolve_relative(generated_url: &str, source: &str) -> String {
    if source.contains("://") || source.starts_with('/') {
        return source.to_string();
    }
    match generated_url.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{source}"),
        None => source.to_string(),
    }
}
