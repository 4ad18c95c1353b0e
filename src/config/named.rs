//! Named configurations
//!
//! Each configuration is an ini file `configurations/config_<name>`; the
//! file `active_config` names the active one. Every mutation takes the
//! config directory lock and writes through a temp file + rename.

use super::{ConfigPaths, PropertiesFile, DEFAULT_CONFIGURATION};
use crate::config::properties;
use crate::console::scoped::{created_dir, scoped, Scoped};
use scopeguard::ScopeGuard;
use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// How long to keep retrying for the config lock.
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Locks older than this are assumed to belong to a crashed process.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Where a property write lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The active named configuration.
    User,
    /// The installation-wide `properties` file.
    Installation,
}

/// Summary of one named configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    pub name: String,
    pub is_active: bool,
    pub properties: PropertiesFile,
}

/// Configuration names: lowercase letter first, then lowercase letters, digits and hyphens.
pub fn is_valid_configuration_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Write `content` to `path` atomically: temp file in the same directory, then rename.
/// Directories created for the write are removed again if it fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Internal(format!("no parent directory for {}", path.display())))?;
    let created = created_dir(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::io("Failed to create temporary file", e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| Error::io("Failed to write temporary file", e))?;
    tmp.flush()
        .map_err(|e| Error::io("Failed to flush temporary file", e))?;
    tmp.persist(path)
        .map_err(|e| Error::io(format!("Failed to replace {}", path.display()), e.error))?;
    ScopeGuard::into_inner(created);
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

/// Take the exclusive config directory lock. Released when the guard drops.
/// Retries block the calling thread; async callers run this on the
/// blocking pool.
pub fn lock(paths: &ConfigPaths) -> Result<Scoped<PathBuf>> {
    let lock_path = paths.lock_file();
    let root = created_dir(paths.root())?;

    for attempt in 0..LOCK_ATTEMPTS {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", std::process::id()) {
                    tracing::debug!("Failed to record owner in {}: {}", lock_path.display(), e);
                }
                tracing::debug!("Acquired config lock {}", lock_path.display());
                ScopeGuard::into_inner(root);
                return Ok(scoped(lock_path, |path: PathBuf| {
                    if let Err(e) = std::fs::remove_file(&path) {
                        tracing::warn!("Failed to release config lock {}: {}", path.display(), e);
                    }
                }));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(&lock_path) {
                    break_stale_lock(&lock_path);
                    continue;
                }
                tracing::debug!("Config lock busy (attempt {})", attempt + 1);
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
            Err(e) => {
                return Err(Error::io(
                    format!("Failed to create lock file {}", lock_path.display()),
                    e,
                ))
            }
        }
    }

    Err(Error::Internal(format!(
        "Timed out waiting for the configuration lock [{}]. If no other command is running, delete the file.",
        lock_path.display()
    )))
}

/// Move a stale lock aside, then delete it. If the moved file turns out to
/// be fresh, another process took the lock in between and it is put back.
/// `hard_link` never replaces an existing lock.
fn break_stale_lock(lock_path: &Path) {
    let aside = lock_path.with_extension(format!("stale-{}", uuid::Uuid::new_v4()));
    if let Err(e) = std::fs::rename(lock_path, &aside) {
        tracing::debug!("Stale config lock {} already gone: {}", lock_path.display(), e);
        return;
    }
    if is_stale(&aside) {
        tracing::warn!("Removing stale config lock {}", lock_path.display());
    } else if let Err(e) = std::fs::hard_link(&aside, lock_path) {
        tracing::warn!("Failed to restore config lock {}: {}", lock_path.display(), e);
    }
    if let Err(e) = std::fs::remove_file(&aside) {
        tracing::warn!("Failed to remove {}: {}", aside.display(), e);
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > STALE_LOCK_AGE)
        .unwrap_or(false)
}

/// Operations on the set of named configurations.
#[derive(Debug, Clone)]
pub struct NamedConfigurations {
    paths: ConfigPaths,
}

impl NamedConfigurations {
    pub fn new(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    /// Name of the active configuration according to `active_config` only.
    pub fn active_name(&self) -> String {
        super::resolve_active_name(&self.paths, &super::Environment::default(), None)
    }

    /// All configurations, sorted by name. The default configuration is
    /// listed even before its file exists.
    pub fn list(&self) -> Result<Vec<ConfigurationInfo>> {
        let active = self.active_name();
        let mut names = vec![];
        if let Ok(entries) = std::fs::read_dir(self.paths.configurations_dir()) {
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(name) = file_name.to_str().and_then(|n| n.strip_prefix("config_")) else {
                    continue;
                };
                if is_valid_configuration_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        if !names.iter().any(|n| n == DEFAULT_CONFIGURATION) {
            names.push(DEFAULT_CONFIGURATION.to_string());
        }
        names.sort();

        names
            .into_iter()
            .map(|name| {
                let properties = PropertiesFile::load(&self.paths.configuration_file(&name))?;
                Ok(ConfigurationInfo {
                    is_active: name == active,
                    name,
                    properties,
                })
            })
            .collect()
    }

    fn exists(&self, name: &str) -> bool {
        name == DEFAULT_CONFIGURATION || self.paths.configuration_file(name).exists()
    }

    /// Create an empty configuration, optionally activating it.
    pub fn create(&self, name: &str, activate: bool) -> Result<()> {
        if !is_valid_configuration_name(name) {
            return Err(Error::invalid_argument(
                "NAME",
                name,
                "configuration names must start with a lowercase letter and contain only \
                 lowercase letters, digits, hyphens and underscores",
            ));
        }
        let _guard = lock(&self.paths)?;
        let path = self.paths.configuration_file(name);
        if path.exists() {
            return Err(Error::AlreadyExists(crate::error::HttpError {
                code: 409,
                status: Some("ALREADY_EXISTS".to_string()),
                reason: None,
                message: format!("Cannot create configuration [{name}], it already exists."),
                url: String::new(),
            }));
        }
        atomic_write(&path, "")?;
        if activate {
            atomic_write(&self.paths.active_config_file(), name)?;
        }
        tracing::info!("Created configuration {}", name);
        Ok(())
    }

    /// Make `name` the active configuration.
    pub fn activate(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(Error::invalid_argument(
                "NAME",
                name,
                format!("configuration [{name}] does not exist"),
            ));
        }
        let _guard = lock(&self.paths)?;
        atomic_write(&self.paths.active_config_file(), name)
    }

    /// Delete a configuration. The active configuration cannot be deleted.
    pub fn delete(&self, name: &str) -> Result<()> {
        if name == self.active_name() {
            return Err(Error::invalid_argument(
                "NAME",
                name,
                format!("cannot delete configuration [{name}], it is the currently active configuration"),
            ));
        }
        if !self.paths.configuration_file(name).exists() {
            return Err(Error::invalid_argument(
                "NAME",
                name,
                format!("configuration [{name}] does not exist"),
            ));
        }
        let _guard = lock(&self.paths)?;
        let path = self.paths.configuration_file(name);
        std::fs::remove_file(&path)
            .map_err(|e| Error::io(format!("Failed to delete {}", path.display()), e))
    }

    fn target_path(&self, scope: Scope, configuration: &str) -> PathBuf {
        match scope {
            Scope::User => self.paths.configuration_file(configuration),
            Scope::Installation => self.paths.installation_properties(),
        }
    }

    /// Validate and persist a property.
    pub fn set_property(
        &self,
        scope: Scope,
        configuration: &str,
        section: &str,
        name: &str,
        value: &str,
    ) -> Result<String> {
        let def = properties::require_def(section, name)?;
        let normalized = properties::validate(&def, section, name, value)?;

        let _guard = lock(&self.paths)?;
        let path = self.target_path(scope, configuration);
        let mut file = PropertiesFile::load(&path)?;
        file.set(section, name, &normalized);
        atomic_write(&path, &file.render())?;
        tracing::info!("Set {}/{} in {}", section, name, path.display());
        Ok(normalized)
    }

    /// Remove a property. Returns whether it was set.
    pub fn unset_property(
        &self,
        scope: Scope,
        configuration: &str,
        section: &str,
        name: &str,
    ) -> Result<bool> {
        properties::require_def(section, name)?;
        let _guard = lock(&self.paths)?;
        let path = self.target_path(scope, configuration);
        let mut file = PropertiesFile::load(&path)?;
        let removed = file.unset(section, name);
        if removed {
            atomic_write(&path, &file.render())?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, NamedConfigurations, ConfigPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::new(dir.path());
        (dir, NamedConfigurations::new(paths.clone()), paths)
    }

    #[test]
    fn test_configuration_names() {
        assert!(is_valid_configuration_name("default"));
        assert!(is_valid_configuration_name("work-2"));
        assert!(!is_valid_configuration_name("Work"));
        assert!(!is_valid_configuration_name("2work"));
        assert!(!is_valid_configuration_name("../etc"));
    }

    #[test]
    fn test_create_activate_list() {
        let (_dir, named, _) = setup();
        named.create("work", false).unwrap();
        assert_eq!(named.active_name(), "default");
        named.activate("work").unwrap();
        assert_eq!(named.active_name(), "work");

        let listed = named.list().unwrap();
        let names: Vec<_> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["default", "work"]);
        assert!(listed.iter().find(|c| c.name == "work").unwrap().is_active);
    }

    #[test]
    fn test_create_existing_fails() {
        let (_dir, named, _) = setup();
        named.create("work", true).unwrap();
        assert!(matches!(named.create("work", false), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_cannot_delete_active() {
        let (_dir, named, _) = setup();
        named.create("work", true).unwrap();
        assert!(named.delete("work").is_err());
        named.activate("default").unwrap();
        named.delete("work").unwrap();
        assert!(named.activate("work").is_err());
    }

    #[test]
    fn test_set_and_unset_property() {
        let (_dir, named, paths) = setup();
        let value = named
            .set_property(Scope::User, "default", "core", "disable_prompts", "Yes")
            .unwrap();
        assert_eq!(value, "true");
        let file = PropertiesFile::load(&paths.configuration_file("default")).unwrap();
        assert_eq!(file.get("core", "disable_prompts"), Some("true"));

        assert!(named.unset_property(Scope::User, "default", "core", "disable_prompts").unwrap());
        assert!(!named.unset_property(Scope::User, "default", "core", "disable_prompts").unwrap());
        assert!(!paths.lock_file().exists());
    }

    #[test]
    fn test_set_invalid_value_is_rejected() {
        let (_dir, named, _) = setup();
        assert!(named
            .set_property(Scope::User, "default", "core", "project", "NOT VALID")
            .is_err());
        assert!(named
            .set_property(Scope::User, "default", "core", "no_such_thing", "x")
            .is_err());
    }

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let (_dir, _named, paths) = setup();
        {
            let guard = lock(&paths).unwrap();
            assert!(guard.exists());
        }
        assert!(!paths.lock_file().exists());
        let _again = lock(&paths).unwrap();
    }

    fn backdate(path: &Path) {
        let old = SystemTime::now() - STALE_LOCK_AGE * 2;
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(old)
            .unwrap();
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let (_dir, _named, paths) = setup();
        std::fs::write(paths.lock_file(), "1\n").unwrap();
        backdate(&paths.lock_file());
        {
            let _guard = lock(&paths).unwrap();
            assert_eq!(std::fs::read_dir(paths.root()).unwrap().count(), 1);
        }
        assert!(!paths.lock_file().exists());
    }

    #[test]
    fn test_fresh_lock_survives_break() {
        let (_dir, _named, paths) = setup();
        std::fs::write(paths.lock_file(), "1\n").unwrap();
        break_stale_lock(&paths.lock_file());
        assert_eq!(std::fs::read_to_string(paths.lock_file()).unwrap(), "1\n");
        let names: Vec<_> = std::fs::read_dir(paths.root())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_failed_write_removes_created_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("deeper");
        let too_long = "x".repeat(300);
        assert!(atomic_write(&nested.join(too_long), "one").is_err());
        assert!(!dir.path().join("nested").exists());

        std::fs::create_dir(dir.path().join("kept")).unwrap();
        assert!(atomic_write(&dir.path().join("kept").join("x".repeat(300)), "one").is_err());
        assert!(dir.path().join("kept").exists());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file");
        atomic_write(&path, "one").unwrap();
        atomic_write(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "two");
    }
}
