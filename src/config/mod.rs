//! Configuration Management
//!
//! Properties are resolved lazily from four layers, highest first:
//! command-line flags, `CLOUDSDK_<SECTION>_<NAME>` environment variables,
//! the active named configuration, and the installation `properties` file.
//! Built-in defaults apply when no layer sets a value.
//!
//! # Module Structure
//!
//! - [`properties`] - Typed property declarations and validation
//! - [`named`] - Named configurations, atomic writes and the config lock

pub mod named;
pub mod properties;

use crate::error::{Error, Result};
use properties::{PropertyDef, ENDPOINT_OVERRIDES_SECTION};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Name of the configuration used when none has been activated.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Environment variable selecting the active configuration.
pub const ACTIVE_CONFIGURATION_ENV: &str = "CLOUDSDK_ACTIVE_CONFIGURATION";

/// Environment variable relocating the config directory.
pub const CONFIG_DIR_ENV: &str = "CLOUDSDK_CONFIG";

/// Snapshot of the process environment.
///
/// Taking a snapshot at startup keeps property resolution a pure function of
/// its inputs, and lets tests supply their own variables.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Non-empty value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Well-known locations inside the config directory.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$CLOUDSDK_CONFIG`, else the platform config dir, else `~/.gcmd`.
    pub fn discover(env: &Environment) -> Self {
        if let Some(path) = env.get(CONFIG_DIR_ENV) {
            return Self::new(path);
        }
        if let Some(config_dir) = dirs::config_dir() {
            return Self::new(config_dir.join("gcmd"));
        }
        if let Some(home) = dirs::home_dir() {
            return Self::new(home.join(".gcmd"));
        }
        Self::new(".gcmd")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configurations_dir(&self) -> PathBuf {
        self.root.join("configurations")
    }

    pub fn configuration_file(&self, name: &str) -> PathBuf {
        self.configurations_dir().join(format!("config_{name}"))
    }

    pub fn active_config_file(&self) -> PathBuf {
        self.root.join("active_config")
    }

    pub fn installation_properties(&self) -> PathBuf {
        self.root.join("properties")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn legacy_credentials_dir(&self) -> PathBuf {
        self.root.join("legacy_credentials")
    }
}

/// Contents of one ini-style properties file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertiesFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl PropertiesFile {
    /// Parse ini text. Comments start with `#` or `;`.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let mut file = Self::default();
        let mut current: Option<String> = None;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let parse_error = |message: &str| Error::PropertiesParse {
                path: path.to_path_buf(),
                line: index + 1,
                message: message.to_string(),
            };

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| parse_error("unterminated section header"))?
                    .trim();
                if name.is_empty() {
                    return Err(parse_error("empty section name"));
                }
                file.sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_error("expected `name = value`"));
            };
            let Some(section) = current.as_ref() else {
                return Err(parse_error("property outside of a section"));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error("empty property name"));
            }
            file.sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), value.trim().to_string());
        }

        Ok(file)
    }

    /// Load a file. Missing or unreadable files are treated as empty;
    /// malformed content is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(path, &content),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!("Could not read {}: {}", path.display(), e);
                }
                Ok(Self::default())
            }
        }
    }

    pub fn get(&self, section: &str, name: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(name))
            .map(|s| s.as_str())
    }

    pub fn set(&mut self, section: &str, name: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Remove a property, returning whether it was present.
    pub fn unset(&mut self, section: &str, name: &str) -> bool {
        let Some(props) = self.sections.get_mut(section) else {
            return false;
        };
        let removed = props.remove(name).is_some();
        if props.is_empty() {
            self.sections.remove(section);
        }
        removed
    }

    pub fn sections(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.sections
    }

    /// Render back to ini text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (section, props) in &self.sections {
            out.push_str(&format!("[{section}]\n"));
            for (name, value) in props {
                out.push_str(&format!("{name} = {value}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// `section/name` keys that are not declared properties.
    pub fn unknown_properties(&self) -> Vec<String> {
        let mut unknown = Vec::new();
        for (section, props) in &self.sections {
            for name in props.keys() {
                if properties::lookup(section, name).is_none() {
                    unknown.push(format!("{section}/{name}"));
                }
            }
        }
        unknown
    }
}

/// Which layer supplied an effective value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySource {
    Flag,
    Environment,
    ActiveConfiguration,
    Installation,
    Default,
}

/// Effective configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    paths: ConfigPaths,
    env: Environment,
    active_name: String,
    flags: HashMap<(String, String), String>,
    active: PropertiesFile,
    installation: PropertiesFile,
}

impl Config {
    /// Load the active configuration and installation defaults.
    ///
    /// `configuration_flag` is the value of `--configuration`, which wins over
    /// the environment and the `active_config` file.
    pub fn load(
        paths: ConfigPaths,
        env: Environment,
        configuration_flag: Option<&str>,
    ) -> Result<Self> {
        let active_name = resolve_active_name(&paths, &env, configuration_flag);
        tracing::debug!("Active configuration: {}", active_name);

        let active = PropertiesFile::load(&paths.configuration_file(&active_name))?;
        let installation = PropertiesFile::load(&paths.installation_properties())?;

        for unknown in active
            .unknown_properties()
            .into_iter()
            .chain(installation.unknown_properties())
        {
            tracing::warn!("Ignoring unknown property [{}]", unknown);
        }

        Ok(Self {
            paths,
            env,
            active_name,
            flags: HashMap::new(),
            active,
            installation,
        })
    }

    /// A configuration with no files behind it, for embedding and tests.
    pub fn in_memory(env: Environment) -> Self {
        Self {
            paths: ConfigPaths::new(std::env::temp_dir().join("gcmd-in-memory")),
            env,
            active_name: DEFAULT_CONFIGURATION.to_string(),
            flags: HashMap::new(),
            active: PropertiesFile::default(),
            installation: PropertiesFile::default(),
        }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn active_name(&self) -> &str {
        &self.active_name
    }

    /// Install a command-line override (highest precedence).
    pub fn set_flag(&mut self, section: &str, name: &str, value: &str) {
        self.flags
            .insert((section.to_string(), name.to_string()), value.to_string());
    }

    /// Raw value and the layer it came from, without validation.
    pub fn raw(&self, section: &str, name: &str) -> Option<(String, PropertySource)> {
        if let Some(v) = self.flags.get(&(section.to_string(), name.to_string())) {
            return Some((v.clone(), PropertySource::Flag));
        }
        if let Some(v) = self.env.get(&properties::env_var_name(section, name)) {
            return Some((v.to_string(), PropertySource::Environment));
        }
        if let Some(v) = self.active.get(section, name) {
            return Some((v.to_string(), PropertySource::ActiveConfiguration));
        }
        if let Some(v) = self.installation.get(section, name) {
            return Some((v.to_string(), PropertySource::Installation));
        }
        properties::lookup(section, name)
            .and_then(|def| def.default)
            .map(|d| (d.to_string(), PropertySource::Default))
    }

    /// Validated effective value. Unknown properties resolve to `None`.
    pub fn get(&self, section: &str, name: &str) -> Result<Option<String>> {
        let Some(def) = properties::lookup(section, name) else {
            return Ok(None);
        };
        match self.raw(section, name) {
            Some((value, _)) if value.trim().is_empty() => Ok(None),
            Some((value, _)) => properties::normalize_read(&def, section, name, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Effective value, or [`Error::RequiredProperty`] when unset.
    pub fn require(&self, section: &str, name: &str) -> Result<String> {
        self.get(section, name)?.ok_or_else(|| {
            let flag_hint = match (section, name) {
                ("core", "project") => " or pass --project",
                ("compute", "zone") => " or pass --zone",
                ("compute", "region") => " or pass --region",
                _ => "",
            };
            Error::RequiredProperty {
                property: format!("{section}/{name}"),
                hint: format!(
                    "Set it with `gcmd config set {section}/{name} VALUE`{flag_hint}."
                ),
            }
        })
    }

    pub fn get_bool(&self, section: &str, name: &str) -> Result<bool> {
        Ok(self
            .get(section, name)?
            .and_then(|v| properties::parse_bool(&v))
            .unwrap_or(false))
    }

    pub fn get_int(&self, section: &str, name: &str) -> Result<Option<i64>> {
        Ok(self.get(section, name)?.and_then(|v| v.parse().ok()))
    }

    pub fn project(&self) -> Result<Option<String>> {
        self.get("core", "project")
    }

    /// Endpoint overrides keyed by API name.
    pub fn endpoint_overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        for file in [&self.installation, &self.active] {
            if let Some(section) = file.sections().get(ENDPOINT_OVERRIDES_SECTION) {
                for api in section.keys() {
                    if let Ok(Some(url)) = self.get(ENDPOINT_OVERRIDES_SECTION, api) {
                        overrides.insert(api.clone(), url);
                    }
                }
            }
        }
        for (section, api) in self.flags.keys() {
            if section == ENDPOINT_OVERRIDES_SECTION {
                if let Ok(Some(url)) = self.get(section, api) {
                    overrides.insert(api.clone(), url);
                }
            }
        }
        let prefix = format!("CLOUDSDK_{}_", ENDPOINT_OVERRIDES_SECTION.to_uppercase());
        for (key, value) in &self.env.vars {
            if let Some(api) = key.strip_prefix(&prefix) {
                let api = api.to_lowercase();
                if let Ok(Some(url)) = self.get(ENDPOINT_OVERRIDES_SECTION, &api) {
                    overrides.insert(api, url);
                } else {
                    tracing::warn!("Ignoring invalid endpoint override {}={}", key, value);
                }
            }
        }
        overrides
    }

    /// Every property with an effective value, grouped by section.
    pub fn effective(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut out: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let declared = properties::PROPERTIES.iter().map(|p| (p.section, p.name));
        for (section, name) in declared {
            if let Ok(Some(value)) = self.get(section, name) {
                out.entry(section.to_string())
                    .or_default()
                    .insert(name.to_string(), value);
            }
        }
        for (api, url) in self.endpoint_overrides() {
            out.entry(ENDPOINT_OVERRIDES_SECTION.to_string())
                .or_default()
                .insert(api, url);
        }
        out
    }

    /// The property definition behind `section/name`, for error reporting.
    pub fn definition(&self, section: &str, name: &str) -> Result<PropertyDef> {
        properties::require_def(section, name)
    }
}

/// Active configuration name: flag, then environment, then the `active_config` file.
pub fn resolve_active_name(
    paths: &ConfigPaths,
    env: &Environment,
    configuration_flag: Option<&str>,
) -> String {
    if let Some(name) = configuration_flag.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Some(name) = env.get(ACTIVE_CONFIGURATION_ENV) {
        return name.to_string();
    }
    match std::fs::read_to_string(paths.active_config_file()) {
        Ok(content) => {
            let name = content.trim();
            if named::is_valid_configuration_name(name) {
                name.to_string()
            } else {
                if !name.is_empty() {
                    tracing::warn!("Invalid characters in active_config name, using default");
                }
                DEFAULT_CONFIGURATION.to_string()
            }
        }
        Err(_) => DEFAULT_CONFIGURATION.to_string(),
    }
}
