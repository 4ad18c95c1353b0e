//! Credentials
//!
//! The request layer only sees a [`TokenSource`]. Which source backs it is
//! decided from configuration: no credentials at all, a token file, a
//! stored account key, or Application Default Credentials.

use crate::config::{Config, ConfigPaths};
use crate::error::{Error, Result};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Key file stored per account under `legacy_credentials/<account>/`.
const ACCOUNT_KEY_FILE: &str = "adc.json";

/// Something that can produce a bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A valid access token, cached where possible.
    async fn token(&self) -> Result<String>;

    /// Drop any cached token and fetch a new one.
    async fn refresh(&self) -> Result<String> {
        self.token().await
    }
}

/// A fixed token, from `auth/access_token_file` or a test.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Read a token file, trimming surrounding whitespace.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::io(format!("Failed to read access token file {}", path.display()), e)
        })?;
        let token = content.trim();
        if token.is_empty() {
            return Err(Error::Unauthenticated(format!(
                "Access token file [{}] is empty.",
                path.display()
            )));
        }
        Ok(Self::new(token))
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Where a [`ProviderTokenSource`] gets its `gcp_auth` provider from.
#[derive(Debug, Clone)]
enum ProviderKind {
    /// Application Default Credentials discovery.
    Default,
    /// A service account key file.
    KeyFile(PathBuf),
}

/// Tokens from a `gcp_auth` provider, with expiry-aware caching.
///
/// The provider is created on first use so that commands which never touch
/// the network never look up credentials.
pub struct ProviderTokenSource {
    kind: ProviderKind,
    provider: OnceCell<Arc<dyn TokenProvider>>,
    token_cache: RwLock<Option<CachedToken>>,
}

impl ProviderTokenSource {
    /// Application Default Credentials.
    pub fn application_default() -> Self {
        Self::with_kind(ProviderKind::Default)
    }

    /// A service account key file.
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self::with_kind(ProviderKind::KeyFile(path.into()))
    }

    fn with_kind(kind: ProviderKind) -> Self {
        Self {
            kind,
            provider: OnceCell::new(),
            token_cache: RwLock::new(None),
        }
    }

    async fn provider(&self) -> Result<&Arc<dyn TokenProvider>> {
        self.provider
            .get_or_try_init(|| async {
                match &self.kind {
                    ProviderKind::Default => gcp_auth::provider().await.map_err(|e| {
                        Error::Unauthenticated(format!(
                            "You do not currently have usable credentials ({e}). \
                             Run 'gcloud auth application-default login' or set \
                             auth/access_token_file."
                        ))
                    }),
                    ProviderKind::KeyFile(path) => gcp_auth::CustomServiceAccount::from_file(path)
                        .map(|account| Arc::new(account) as Arc<dyn TokenProvider>)
                        .map_err(|e| {
                            Error::Unauthenticated(format!(
                                "Failed to load credentials from [{}]: {e}",
                                path.display()
                            ))
                        }),
                }
            })
            .await
    }
}

#[async_trait]
impl TokenSource for ProviderTokenSource {
    async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = self
            .provider()
            .await?
            .token(DEFAULT_SCOPES)
            .await
            .map_err(|e| Error::Unauthenticated(format!("Failed to get access token: {e}")))?;
        let token_str = token.as_str().to_string();

        let expires_at = Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;
        *self.token_cache.write().await = Some(CachedToken {
            token: token_str.clone(),
            expires_at,
        });
        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }

    async fn refresh(&self) -> Result<String> {
        *self.token_cache.write().await = None;
        self.token().await
    }
}

/// Accounts with stored credentials.
pub trait AccountStore: Send + Sync {
    /// Every account with stored credentials, sorted.
    fn accounts(&self) -> Vec<String>;

    /// Key file for an account, if one is stored.
    fn key_file(&self, account: &str) -> Option<PathBuf>;
}

/// Account store backed by `<config_dir>/legacy_credentials/<account>/adc.json`.
#[derive(Debug, Clone)]
pub struct FileAccountStore {
    root: PathBuf,
}

impl FileAccountStore {
    pub fn new(paths: &ConfigPaths) -> Self {
        Self {
            root: paths.legacy_credentials_dir(),
        }
    }

    fn is_safe_account(account: &str) -> bool {
        !account.is_empty()
            && !account.contains(['/', '\\'])
            && account != "."
            && account != ".."
    }
}

impl AccountStore for FileAccountStore {
    fn accounts(&self) -> Vec<String> {
        let mut accounts: Vec<String> = std::fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().join(ACCOUNT_KEY_FILE).is_file())
                    .filter_map(|e| e.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        accounts.sort();
        accounts
    }

    fn key_file(&self, account: &str) -> Option<PathBuf> {
        if !Self::is_safe_account(account) {
            tracing::warn!("Ignoring account with invalid characters: {}", account);
            return None;
        }
        let path = self.root.join(account).join(ACCOUNT_KEY_FILE);
        path.is_file().then_some(path)
    }
}

/// Pick the token source for this invocation.
///
/// `Ok(None)` means requests go out without an `Authorization` header
/// (`auth/disable_credentials`).
pub fn token_source_for(
    config: &Config,
    accounts: &dyn AccountStore,
) -> Result<Option<Arc<dyn TokenSource>>> {
    if config.get_bool("auth", "disable_credentials")? {
        tracing::debug!("Credentials disabled by auth/disable_credentials");
        return Ok(None);
    }
    if let Some(path) = config.get("auth", "access_token_file")? {
        tracing::debug!("Using access token file {}", path);
        return Ok(Some(Arc::new(StaticTokenSource::from_file(Path::new(&path))?)));
    }
    if let Some(account) = config.get("core", "account")? {
        match accounts.key_file(&account) {
            Some(key) => {
                tracing::debug!("Using stored credentials for {}", account);
                return Ok(Some(Arc::new(ProviderTokenSource::key_file(key))));
            }
            None => tracing::debug!(
                "No stored key for account {}, falling back to application default credentials",
                account
            ),
        }
    }
    Ok(Some(Arc::new(ProviderTokenSource::application_default())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new("tok");
        assert_eq!(source.token().await.unwrap(), "tok");
        assert_eq!(source.refresh().await.unwrap(), "tok");
    }

    #[test]
    fn test_token_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "  ya29.secret\n").unwrap();
        let source = StaticTokenSource::from_file(&path).unwrap();
        assert_eq!(source.token, "ya29.secret");

        std::fs::write(&path, "\n").unwrap();
        assert!(matches!(
            StaticTokenSource::from_file(&path),
            Err(Error::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_account_store_lists_accounts_with_keys() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::new(dir.path());
        let creds = paths.legacy_credentials_dir();
        std::fs::create_dir_all(creds.join("b@example.com")).unwrap();
        std::fs::write(creds.join("b@example.com").join(ACCOUNT_KEY_FILE), "{}").unwrap();
        std::fs::create_dir_all(creds.join("a@example.com")).unwrap();
        std::fs::write(creds.join("a@example.com").join(ACCOUNT_KEY_FILE), "{}").unwrap();
        std::fs::create_dir_all(creds.join("nokey@example.com")).unwrap();

        let store = FileAccountStore::new(&paths);
        assert_eq!(store.accounts(), vec!["a@example.com", "b@example.com"]);
        assert!(store.key_file("a@example.com").is_some());
        assert!(store.key_file("nokey@example.com").is_none());
        assert!(store.key_file("../etc").is_none());
    }

    #[test]
    fn test_token_source_selection() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAccountStore::new(&ConfigPaths::new(dir.path()));

        let env = Environment::from_pairs([("CLOUDSDK_AUTH_DISABLE_CREDENTIALS", "true")]);
        let config = Config::in_memory(env);
        assert!(token_source_for(&config, &store).unwrap().is_none());

        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "tok").unwrap();
        let env = Environment::from_pairs([(
            "CLOUDSDK_AUTH_ACCESS_TOKEN_FILE",
            token_path.to_string_lossy().to_string(),
        )]);
        let config = Config::in_memory(env);
        assert!(token_source_for(&config, &store).unwrap().is_some());
    }
}
