//! Source bookkeeping: actor -> adapter maps, URL <-> path mapping.

use crate::error::Error;
use crate::rdp::actors::SourceActor;
use crate::rdp::forms::SourceForm;
use crate::session::config::{PathMapping, UrlPattern};
use crate::session::registry::Registry;
use regex::Regex;
use std::collections::HashMap;

/// Ordered URL -> path translation. First matching entry wins; literal
/// prefixes are additionally indexed for an O(1) hit on the common case.
pub struct PathMapper {
    entries: Vec<CompiledMapping>,
    /// Literal prefix -> index of the first entry carrying it.
    prefix_index: HashMap<String, usize>,
}

enum CompiledPattern {
    Prefix(String),
    Regex(Regex),
}

struct CompiledMapping {
    pattern: CompiledPattern,
    path: String,
}

impl CompiledMapping {
    fn matched_prefix_len(&self, url: &str) -> Option<usize> {
        match &self.pattern {
            CompiledPattern::Prefix(prefix) => url.starts_with(prefix.as_str()).then(|| prefix.len()),
            CompiledPattern::Regex(re) => re
                .find(url)
                .filter(|found| found.start() == 0)
                .map(|found| found.end()),
        }
    }
}

impl PathMapper {
    pub fn new(mappings: &[PathMapping]) -> Self {
        let mut entries = Vec::with_capacity(mappings.len());
        let mut prefix_index = HashMap::new();
        for mapping in mappings {
            let pattern = match &mapping.url {
                UrlPattern::Prefix(prefix) => {
                    prefix_index
                        .entry(prefix.clone())
                        .or_insert(entries.len());
                    CompiledPattern::Prefix(prefix.clone())
                }
                UrlPattern::Regex { regex } => match Regex::new(regex) {
                    Ok(re) => CompiledPattern::Regex(re),
                    Err(e) => {
                        log::warn!(target: "session", "bad path-mapping regex `{regex}`: {e}");
                        continue;
                    }
                },
            };
            entries.push(CompiledMapping {
                pattern,
                path: mapping.path.clone(),
            });
        }
        Self {
            entries,
            prefix_index,
        }
    }

    /// Translate a URL to a local path. Query strings never contribute.
    pub fn url_to_path(&self, url: &str) -> Option<String> {
        let url = strip_query(url);

        // Fast path: the mapping prefix is the URL's directory part. Entries
        // listed earlier still win, so only the prefix of the first match may
        // be taken from the index.
        if let Some((dir, _)) = url.rsplit_once('/') {
            let candidate = format!("{dir}/");
            if let Some(&index) = self.prefix_index.get(&candidate)
                && !self.entries[..index]
                    .iter()
                    .any(|e| e.matched_prefix_len(url).is_some())
            {
                let entry = &self.entries[index];
                return Some(join_mapped(&entry.path, &url[candidate.len()..]));
            }
        }

        for entry in &self.entries {
            if let Some(len) = entry.matched_prefix_len(url) {
                return Some(join_mapped(&entry.path, &url[len..]));
            }
        }

        // No mapping: local URLs still resolve.
        if let Some(path) = url.strip_prefix("file://") {
            return Some(path.to_string());
        }
        if url.starts_with('/') {
            return Some(url.to_string());
        }
        None
    }

    /// Reverse translation for breakpoint installation.
    pub fn path_to_url(&self, path: &str) -> Option<String> {
        for entry in &self.entries {
            let CompiledPattern::Prefix(prefix) = &entry.pattern else {
                continue;
            };
            if let Some(rest) = path.strip_prefix(entry.path.as_str()) {
                return Some(format!("{}{}", prefix, rest.trim_start_matches('/')));
            }
        }
        if path.starts_with('/') {
            return Some(format!("file://{path}"));
        }
        None
    }
}

fn join_mapped(prefix: &str, rest: &str) -> String {
    if prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/') {
        format!("{prefix}{rest}")
    } else {
        format!("{prefix}/{rest}")
    }
}

pub fn strip_query(url: &str) -> &str {
    match url.split_once('?') {
        Some((base, _)) => base,
        None => url,
    }
}

/// Bridge-side state for one source actor.
pub struct SourceAdapter {
    pub id: i64,
    pub actor: SourceActor,
    pub form: SourceForm,
    pub path: Option<String>,
    pub blackboxed: bool,
    /// Thread adapter ids that observed this source.
    pub threads: Vec<i64>,
}

impl SourceAdapter {
    pub fn url(&self) -> Option<&str> {
        self.form.url.as_deref()
    }
}

/// Owns every source adapter plus the derived lookup maps.
pub struct SourceManager {
    mapper: PathMapper,
    registry: Registry<SourceAdapter>,
    by_actor: HashMap<String, i64>,
    by_url: HashMap<String, i64>,
    by_path: HashMap<String, Vec<i64>>,
}

impl SourceManager {
    pub fn new(mapper: PathMapper) -> Self {
        Self {
            mapper,
            registry: Registry::default(),
            by_actor: HashMap::new(),
            by_url: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// Register the source actor behind `form` for `thread_id`. Returns the
    /// adapter id and whether it was newly created; identical sources shared
    /// across threads coalesce onto one adapter.
    pub fn on_new_source(&mut self, thread_id: i64, actor: SourceActor, form: SourceForm) -> (i64, bool) {
        if let Some(&id) = self.by_actor.get(actor.name()) {
            let adapter = self.registry.get_mut(id).expect("indexed adapter exists");
            if !adapter.threads.contains(&thread_id) {
                adapter.threads.push(thread_id);
            }
            return (id, false);
        }

        let path = match form.url.as_deref() {
            Some(url) => {
                let path = self.mapper.url_to_path(url);
                if path.is_none() {
                    log::debug!(
                        target: "session",
                        "{:#}", Error::PathMappingMiss(url.to_string())
                    );
                }
                path
            }
            None => None,
        };

        let adapter = SourceAdapter {
            id: 0,
            blackboxed: form.is_black_boxed,
            actor,
            form,
            path,
            threads: vec![thread_id],
        };
        let actor_name = adapter.actor.name().to_string();
        let url = adapter.form.url.clone();
        let path = adapter.path.clone();

        let id = self.registry.add(adapter);
        self.registry.get_mut(id).expect("just added").id = id;
        self.by_actor.insert(actor_name, id);
        if let Some(url) = url {
            self.by_url.entry(strip_query(&url).to_string()).or_insert(id);
        }
        if let Some(path) = path {
            self.by_path.entry(path).or_default().push(id);
        }
        (id, true)
    }

    pub fn get(&self, id: i64) -> Option<&SourceAdapter> {
        self.registry.get(id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut SourceAdapter> {
        self.registry.get_mut(id)
    }

    pub fn by_actor(&self, actor: &str) -> Option<&SourceAdapter> {
        self.by_actor.get(actor).and_then(|id| self.registry.get(*id))
    }

    pub fn by_url(&self, url: &str) -> Option<&SourceAdapter> {
        self.by_url
            .get(strip_query(url))
            .and_then(|id| self.registry.get(*id))
    }

    /// Every URL the engine knows for sources mapped to `path`.
    pub fn urls_for_path(&self, path: &str) -> Vec<String> {
        let Some(ids) = self.by_path.get(path) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.registry.get(*id))
            .filter_map(|adapter| adapter.url().map(|u| strip_query(u).to_string()))
            .collect()
    }

    /// The breakpoint URL for an editor path: a live source's URL when one
    /// exists, otherwise the reverse path mapping.
    pub fn url_for_breakpoint_path(&self, path: &str) -> Option<String> {
        self.urls_for_path(path)
            .into_iter()
            .next()
            .or_else(|| self.mapper.path_to_url(path))
    }

    /// Drop a thread's membership everywhere; adapters observed by that
    /// thread alone die with it.
    pub fn dispose_thread(&mut self, thread_id: i64) -> Vec<SourceAdapter> {
        let doomed: Vec<i64> = self
            .registry
            .iter()
            .filter(|(_, adapter)| {
                adapter.threads.contains(&thread_id) && adapter.threads.len() == 1
            })
            .map(|(id, _)| id)
            .collect();

        for adapter in self.registry.values_mut() {
            adapter.threads.retain(|t| *t != thread_id);
        }

        let mut removed = Vec::new();
        for id in doomed {
            if let Some(adapter) = self.registry.remove(id) {
                self.by_actor.remove(adapter.actor.name());
                if let Some(url) = adapter.form.url.as_deref() {
                    let key = strip_query(url);
                    if self.by_url.get(key) == Some(&id) {
                        self.by_url.remove(key);
                    }
                }
                if let Some(path) = &adapter.path {
                    if let Some(ids) = self.by_path.get_mut(path) {
                        ids.retain(|i| *i != id);
                        if ids.is_empty() {
                            self.by_path.remove(path);
                        }
                    }
                }
                removed.push(adapter);
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.registry.clear();
        self.by_actor.clear();
        self.by_url.clear();
        self.by_path.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
