//! Resource references
//!
//! A [`ResourceRef`] names exactly one API resource. References come from
//! [`Registry::parse`], which accepts every form a user may type: a bare
//! name, a full or partial relative name, a self-link URL, an atomic name
//! (`//compute.googleapis.com/projects/p/...`) or a `gs://` URL.

use super::registry::{Collection, Registry};
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Structured identifier of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    collection: String,
    params: Vec<(String, String)>,
    base_url: String,
    relative_name: String,
    self_link: String,
}

impl ResourceRef {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Parameter values in template order.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn get(&self, param: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == param)
            .map(|(_, v)| v.as_str())
    }

    /// The resource's own name (last template parameter).
    pub fn name(&self) -> &str {
        self.params.last().map(|(_, v)| v.as_str()).unwrap_or_default()
    }

    /// `projects/p/zones/z/instances/i`
    pub fn relative_name(&self) -> &str {
        &self.relative_name
    }

    /// Full HTTPS URL under the (possibly overridden) service base URL.
    pub fn self_link(&self) -> &str {
        &self.self_link
    }

    /// `//<service host>/<relative name>`
    pub fn atomic_name(&self) -> String {
        let host = url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        format!("//{}/{}", host, self.relative_name)
    }

    /// `gs://bucket[/object]` for storage references.
    pub fn gs_url(&self) -> Option<String> {
        let bucket = self.get("bucket")?;
        match self.get("object") {
            Some(object) => Some(format!("gs://{bucket}/{object}")),
            None => Some(format!("gs://{bucket}")),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.self_link)
    }
}

/// Where parameters missing from an identifier come from.
#[derive(Default)]
pub struct ParseContext<'a> {
    /// Explicit values, typically from flags such as `--zone`.
    pub overrides: HashMap<String, String>,
    /// Configuration consulted through the collection's defaults.
    pub config: Option<&'a Config>,
}

impl<'a> ParseContext<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            overrides: HashMap::new(),
            config: Some(config),
        }
    }

    pub fn with(mut self, param: &str, value: impl Into<String>) -> Self {
        self.overrides.insert(param.to_string(), value.into());
        self
    }

    fn resolve(&self, collection: &Collection, param: &str) -> Result<Option<String>> {
        if let Some(value) = self.overrides.get(param).filter(|v| !v.is_empty()) {
            return Ok(Some(value.clone()));
        }
        let (Some(config), Some(property)) = (self.config, collection.defaults.get(param)) else {
            return Ok(None);
        };
        let (section, name) = crate::config::properties::split_property_path(property);
        config.get(&section, &name)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').collect()
}

fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

impl Registry {
    /// Build a reference from explicit parameters.
    pub fn create(&self, collection: &str, params: &[(&str, &str)]) -> Result<ResourceRef> {
        let collection = self.collection(collection)?;
        let owned: Vec<(String, String)> = params
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        self.build(collection, &owned)
    }

    fn build(&self, collection: &Collection, values: &[(String, String)]) -> Result<ResourceRef> {
        let mut params = Vec::with_capacity(collection.params.len());
        for param in &collection.params {
            let value = values
                .iter()
                .find(|(n, v)| n == param && !v.is_empty())
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::RequiredParameter {
                    collection: collection.name.clone(),
                    param: param.clone(),
                })?;
            params.push((param.clone(), value));
        }
        let base_url = self.collection_base_url(collection);
        let relative_name = collection.expand(&params, false)?;
        let self_link = format!("{}{}", base_url, collection.expand(&params, true)?);
        Ok(ResourceRef {
            collection: collection.name.clone(),
            params,
            base_url,
            relative_name,
            self_link,
        })
    }

    /// Parse any accepted identifier form into a reference of `collection`.
    pub fn parse(&self, collection: &str, identifier: &str, ctx: &ParseContext<'_>) -> Result<ResourceRef> {
        let wanted = self.collection(collection)?;
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(Error::InvalidResource {
                identifier: identifier.to_string(),
                reason: "the identifier is empty".to_string(),
            });
        }

        if let Some(rest) = identifier.strip_prefix("gs://") {
            return self.parse_gs(wanted, identifier, rest);
        }
        if identifier.starts_with("https://") || identifier.starts_with("http://") {
            return self.parse_url_for(wanted, identifier);
        }
        if let Some(rest) = identifier.strip_prefix("//") {
            return self.parse_atomic(wanted, identifier, rest);
        }
        if identifier.contains('/') && !(wanted.greedy && !identifier.starts_with("b/")) {
            return self.parse_relative(wanted, identifier, ctx);
        }

        let mut values = vec![(wanted.name_param().to_string(), identifier.to_string())];
        self.fill_missing(wanted, &mut values, ctx)?;
        self.build(wanted, &values)
    }

    /// Parse a self-link URL against every collection.
    pub fn parse_any_url(&self, url: &str) -> Result<ResourceRef> {
        let path = strip_query(url);
        for collection in self.collections() {
            for base in self.accepted_base_urls(collection) {
                if let Some(rest) = path.strip_prefix(base.as_str()) {
                    let parts = split_path(rest);
                    if let Some(values) = collection.match_full(&parts) {
                        let values: Vec<_> = values.into_iter().map(|(n, v)| (n, decode(&v))).collect();
                        return self.build(collection, &values);
                    }
                }
            }
        }
        Err(Error::InvalidResource {
            identifier: url.to_string(),
            reason: "the URL does not match any known collection".to_string(),
        })
    }

    fn parse_url_for(&self, wanted: &Collection, url: &str) -> Result<ResourceRef> {
        let parsed = self.parse_any_url(url);
        match parsed {
            Ok(reference) if reference.collection() == wanted.name => Ok(reference),
            Ok(reference) => Err(Error::WrongCollection {
                expected: wanted.name.clone(),
                actual: reference.collection().to_string(),
                path: url.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn parse_atomic(&self, wanted: &Collection, identifier: &str, rest: &str) -> Result<ResourceRef> {
        let (host, path) = rest.split_once('/').ok_or_else(|| Error::InvalidResource {
            identifier: identifier.to_string(),
            reason: "an atomic name needs a service and a path".to_string(),
        })?;
        let parts = split_path(strip_query(path));

        let host_of = |collection: &Collection| {
            url::Url::parse(&collection.default_base_url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        };
        let candidates = std::iter::once(wanted).chain(self.collections().filter(|c| c.name != wanted.name));
        for collection in candidates {
            if host_of(collection).as_deref() != Some(host) {
                continue;
            }
            if let Some(values) = collection.match_full(&parts) {
                if collection.name != wanted.name {
                    return Err(Error::WrongCollection {
                        expected: wanted.name.clone(),
                        actual: collection.name.clone(),
                        path: identifier.to_string(),
                    });
                }
                return self.build(collection, &values);
            }
        }
        Err(Error::InvalidResource {
            identifier: identifier.to_string(),
            reason: format!("it is not a valid name for collection [{}]", wanted.name),
        })
    }

    fn parse_gs(&self, wanted: &Collection, identifier: &str, rest: &str) -> Result<ResourceRef> {
        let (bucket, object) = match rest.split_once('/') {
            Some((bucket, object)) if !object.is_empty() => (bucket, Some(object)),
            Some((bucket, _)) => (bucket, None),
            None => (rest, None),
        };
        if bucket.is_empty() {
            return Err(Error::InvalidResource {
                identifier: identifier.to_string(),
                reason: "the bucket name is empty".to_string(),
            });
        }
        let actual = if object.is_some() { "storage.objects" } else { "storage.buckets" };
        if wanted.name != actual {
            return Err(Error::WrongCollection {
                expected: wanted.name.clone(),
                actual: actual.to_string(),
                path: identifier.to_string(),
            });
        }
        let mut values = vec![("bucket".to_string(), bucket.to_string())];
        if let Some(object) = object {
            values.push(("object".to_string(), object.to_string()));
        }
        self.build(wanted, &values)
    }

    fn parse_relative(&self, wanted: &Collection, identifier: &str, ctx: &ParseContext<'_>) -> Result<ResourceRef> {
        let parts = split_path(identifier);
        if let Some(values) = wanted.match_full(&parts) {
            return self.build(wanted, &values);
        }
        if let Some(mut values) = wanted.match_suffix(&parts) {
            self.fill_missing(wanted, &mut values, ctx)?;
            return self.build(wanted, &values);
        }
        for other in self.collections().filter(|c| c.api == wanted.api && c.name != wanted.name) {
            if other.match_full(&parts).is_some() {
                return Err(Error::WrongCollection {
                    expected: wanted.name.clone(),
                    actual: other.name.clone(),
                    path: identifier.to_string(),
                });
            }
        }
        Err(Error::InvalidResource {
            identifier: identifier.to_string(),
            reason: format!("it does not match the template [{}]", wanted.path),
        })
    }

    fn fill_missing(&self, collection: &Collection, values: &mut Vec<(String, String)>, ctx: &ParseContext<'_>) -> Result<()> {
        for param in &collection.params {
            if values.iter().any(|(n, _)| n == param) {
                continue;
            }
            match ctx.resolve(collection, param)? {
                Some(value) => values.push((param.clone(), value)),
                None => {
                    return Err(Error::RequiredParameter {
                        collection: collection.name.clone(),
                        param: param.clone(),
                    })
                }
            }
        }
        Ok(())
    }
}
