//! Resource Registry - Collection definitions
//!
//! Collections are loaded once from the embedded `collections.json`
//! manifest. Each one maps a name such as `compute.instances` to a path
//! template under its API's base URL. Endpoint overrides from
//! `api_endpoint_overrides/<api>` replace the base URL per invocation.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

/// Embedded collection manifest (compiled into the binary)
const MANIFEST: &str = include_str!("../resources/collections.json");

#[derive(Debug, Clone, Deserialize)]
struct ApiDef {
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CollectionDef {
    name: String,
    api: String,
    path: String,
    #[serde(default)]
    defaults: BTreeMap<String, String>,
    #[serde(default)]
    greedy: bool,
}

/// Root structure of `collections.json`
#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    apis: BTreeMap<String, ApiDef>,
    collections: Vec<CollectionDef>,
}

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A registered resource collection.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub api: String,
    pub path: String,
    pub segments: Vec<Segment>,
    /// Template parameters in path order. The last one names the resource itself.
    pub params: Vec<String>,
    /// Parameter -> `section/property` used when the identifier leaves it unset.
    pub defaults: BTreeMap<String, String>,
    /// The last parameter swallows the rest of the path (object names).
    pub greedy: bool,
    pub default_base_url: String,
}

impl Collection {
    fn from_def(def: CollectionDef, base_url: String) -> Result<Self> {
        let mut segments = Vec::new();
        let mut params = Vec::new();
        for part in def.path.split('/') {
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() || params.iter().any(|p| p == name) {
                    return Err(Error::Internal(format!(
                        "collection {} has an invalid template {}",
                        def.name, def.path
                    )));
                }
                params.push(name.to_string());
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }
        if params.is_empty() {
            return Err(Error::Internal(format!(
                "collection {} has no template parameters",
                def.name
            )));
        }
        Ok(Self {
            name: def.name,
            api: def.api,
            path: def.path,
            segments,
            params,
            defaults: def.defaults,
            greedy: def.greedy,
            default_base_url: base_url,
        })
    }

    /// The parameter holding the resource's own name.
    pub fn name_param(&self) -> &str {
        self.params.last().map(String::as_str).unwrap_or_default()
    }

    /// Match path segments against the whole template.
    pub fn match_full(&self, parts: &[&str]) -> Option<Vec<(String, String)>> {
        self.match_from(0, parts)
    }

    /// Match path segments against a suffix of the template that starts at
    /// a literal segment (`zones/z/instances/i`). Leading parameters are
    /// left for the caller to fill.
    pub fn match_suffix(&self, parts: &[&str]) -> Option<Vec<(String, String)>> {
        if self.greedy || parts.is_empty() || parts.len() >= self.segments.len() {
            return None;
        }
        let start = self.segments.len() - parts.len();
        if !matches!(self.segments[start], Segment::Literal(_)) {
            return None;
        }
        self.match_from(start, parts)
    }

    fn match_from(&self, start: usize, parts: &[&str]) -> Option<Vec<(String, String)>> {
        let segments = &self.segments[start..];
        let mut values = Vec::new();
        let mut index = 0;
        for (i, segment) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(index) != Some(&lit.as_str()) {
                        return None;
                    }
                    index += 1;
                }
                Segment::Param(name) if is_last && self.greedy => {
                    if index >= parts.len() {
                        return None;
                    }
                    let rest = parts[index..].join("/");
                    if rest.is_empty() {
                        return None;
                    }
                    values.push((name.clone(), rest));
                    index = parts.len();
                }
                Segment::Param(name) => {
                    let value = parts.get(index).filter(|v| !v.is_empty())?;
                    values.push((name.clone(), value.to_string()));
                    index += 1;
                }
            }
        }
        (index == parts.len()).then_some(values)
    }

    /// Substitute parameters into the template.
    pub fn expand(&self, params: &[(String, String)], encode: bool) -> Result<String> {
        let mut out = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => out.push(lit.clone()),
                Segment::Param(name) => {
                    let value = params
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.as_str())
                        .ok_or_else(|| Error::RequiredParameter {
                            collection: self.name.clone(),
                            param: name.clone(),
                        })?;
                    if encode {
                        out.push(urlencoding::encode(value).into_owned());
                    } else {
                        out.push(value.to_string());
                    }
                }
            }
        }
        Ok(out.join("/"))
    }
}

fn parse_manifest(content: &str) -> Result<Vec<Collection>> {
    let manifest: Manifest = serde_json::from_str(content)
        .map_err(|e| Error::Internal(format!("Failed to parse collection manifest: {e}")))?;
    let mut collections = Vec::with_capacity(manifest.collections.len());
    for def in manifest.collections {
        let api = manifest.apis.get(&def.api).ok_or_else(|| {
            Error::Internal(format!("collection {} names unknown api {}", def.name, def.api))
        })?;
        let base_url = api.base_url.clone();
        collections.push(Collection::from_def(def, base_url)?);
    }
    Ok(collections)
}

/// Parsed builtin manifest, shared by every registry.
static BUILTIN: OnceLock<std::result::Result<Arc<Vec<Collection>>, String>> = OnceLock::new();

fn builtin_collections() -> Result<Arc<Vec<Collection>>> {
    BUILTIN
        .get_or_init(|| parse_manifest(MANIFEST).map(Arc::new).map_err(|e| e.to_string()))
        .clone()
        .map_err(Error::Internal)
}

/// Lookup table of collections plus the endpoint overrides of one invocation.
#[derive(Debug, Clone)]
pub struct Registry {
    collections: Arc<Vec<Collection>>,
    index: HashMap<String, usize>,
    overrides: HashMap<String, String>,
}

impl Registry {
    /// The builtin collections.
    pub fn builtin() -> Result<Self> {
        Ok(Self::from_collections(builtin_collections()?))
    }

    /// A registry over a custom manifest.
    pub fn from_manifest(content: &str) -> Result<Self> {
        Ok(Self::from_collections(Arc::new(parse_manifest(content)?)))
    }

    fn from_collections(collections: Arc<Vec<Collection>>) -> Self {
        let index = collections
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            collections,
            index,
            overrides: HashMap::new(),
        }
    }

    /// Replace base URLs per API (`api_endpoint_overrides/<api>`).
    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides
            .into_iter()
            .map(|(api, mut url)| {
                if !url.ends_with('/') {
                    url.push('/');
                }
                (api, url)
            })
            .collect();
        self
    }

    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.index
            .get(name)
            .map(|&i| &self.collections[i])
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    /// Effective base URL of an API.
    pub fn base_url(&self, api: &str) -> Option<String> {
        if let Some(url) = self.overrides.get(api) {
            return Some(url.clone());
        }
        self.collections
            .iter()
            .find(|c| c.api == api)
            .map(|c| c.default_base_url.clone())
    }

    /// Effective base URL of a collection.
    pub fn collection_base_url(&self, collection: &Collection) -> String {
        self.overrides
            .get(&collection.api)
            .cloned()
            .unwrap_or_else(|| collection.default_base_url.clone())
    }

    /// Base URLs accepted when parsing a URL for `collection`: the override
    /// (if any) and the default.
    pub fn accepted_base_urls(&self, collection: &Collection) -> Vec<String> {
        let mut bases = vec![];
        if let Some(url) = self.overrides.get(&collection.api) {
            bases.push(url.clone());
        }
        bases.push(collection.default_base_url.clone());
        bases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = Registry::builtin().unwrap();
        assert!(registry.collections().count() > 10);
        let instances = registry.collection("compute.instances").unwrap();
        assert_eq!(instances.params, vec!["project", "zone", "instance"]);
        assert_eq!(instances.name_param(), "instance");
        assert_eq!(instances.defaults.get("zone").map(String::as_str), Some("compute/zone"));
    }

    #[test]
    fn test_unknown_collection() {
        let registry = Registry::builtin().unwrap();
        assert!(matches!(
            registry.collection("compute.nothing"),
            Err(Error::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_template_matching() {
        let registry = Registry::builtin().unwrap();
        let instances = registry.collection("compute.instances").unwrap();
        let parts: Vec<&str> = "projects/p/zones/z/instances/i".split('/').collect();
        let values = instances.match_full(&parts).unwrap();
        assert_eq!(values[2], ("instance".to_string(), "i".to_string()));
        assert!(instances.match_full(&["projects", "p"]).is_none());

        let suffix = instances.match_suffix(&["zones", "z", "instances", "i"]).unwrap();
        assert_eq!(suffix.len(), 2);
        assert!(instances.match_suffix(&["z", "instances", "i"]).is_none());
    }

    #[test]
    fn test_greedy_object_param() {
        let registry = Registry::builtin().unwrap();
        let objects = registry.collection("storage.objects").unwrap();
        let values = objects.match_full(&["b", "bkt", "o", "dir", "file.txt"]).unwrap();
        assert_eq!(values[1], ("object".to_string(), "dir/file.txt".to_string()));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let registry = Registry::builtin().unwrap().with_overrides(HashMap::from([(
            "compute".to_string(),
            "http://localhost:8080/compute/v1".to_string(),
        )]));
        assert_eq!(
            registry.base_url("compute").as_deref(),
            Some("http://localhost:8080/compute/v1/")
        );
        let instances = registry.collection("compute.instances").unwrap();
        assert_eq!(registry.accepted_base_urls(instances).len(), 2);
    }

    #[test]
    fn test_bad_manifest_is_an_error() {
        assert!(Registry::from_manifest("{").is_err());
        let bad_api = r#"{"apis":{},"collections":[{"name":"x.y","api":"x","path":"a/{b}"}]}"#;
        assert!(Registry::from_manifest(bad_api).is_err());
    }
}
