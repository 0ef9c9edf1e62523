//! Gateway token resolution and persistence
//!
//! Precedence: explicit override, then the value persisted in the state
//! directory, then a freshly generated value that is written back. The gateway
//! keeps its own copy of the token, so the persisted value must stay stable
//! across restarts.

use crate::error::GatewayError;
use hyper::header::HeaderValue;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Number of random bytes in a generated token (256 bits)
const TOKEN_BYTES: usize = 32;

/// Shared secret used to authenticate proxied traffic to the gateway
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayToken(String);

impl GatewayToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a random hex-encoded token
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GatewayToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GatewayToken(***)")
    }
}

/// Where the active token came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Explicit override; not persisted
    Environment,
    /// Read back from the state directory
    Persisted,
    /// Generated and written to the state directory
    Generated,
    /// Held in memory only, because the token file could not be written or
    /// could not be read; a restart will produce a different token
    Ephemeral { reason: String },
}

#[derive(Debug, Clone)]
pub struct ResolvedToken {
    pub token: GatewayToken,
    pub source: TokenSource,
}

impl ResolvedToken {
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, TokenSource::Ephemeral { .. })
    }
}

/// Resolves the gateway token once per process
pub struct TokenStore {
    path: PathBuf,
    override_value: Option<String>,
    resolved: OnceLock<ResolvedToken>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, override_value: Option<String>) -> Self {
        Self {
            path: path.into(),
            override_value,
            resolved: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the token, resolving it on first use
    pub fn get_or_create(&self) -> ResolvedToken {
        self.resolved.get_or_init(|| self.resolve()).clone()
    }

    fn resolve(&self) -> ResolvedToken {
        if let Some(value) = self
            .override_value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            debug!("Using gateway token from explicit override");
            return ResolvedToken {
                token: GatewayToken::new(value),
                source: TokenSource::Environment,
            };
        }

        match self.read_persisted() {
            Ok(Some(token)) => {
                debug!(path = %self.path.display(), "Using persisted gateway token");
                return ResolvedToken {
                    token,
                    source: TokenSource::Persisted,
                };
            }
            Ok(None) => {}
            Err(e) => {
                // The file may hold the gateway's credential; never overwrite it
                warn!(
                    error = %e,
                    "Persisted gateway token is unreadable; using an in-memory token and leaving the file untouched"
                );
                return ResolvedToken {
                    token: GatewayToken::generate(),
                    source: TokenSource::Ephemeral {
                        reason: e.to_string(),
                    },
                };
            }
        }

        let token = GatewayToken::generate();
        let source = match self.persist(&token) {
            Ok(()) => TokenSource::Generated,
            Err(e) => {
                warn!(
                    error = %e,
                    "Gateway token is held in memory only; a restart will generate a new one and desynchronize from the gateway"
                );
                TokenSource::Ephemeral {
                    reason: e.to_string(),
                }
            }
        };

        ResolvedToken { token, source }
    }

    /// `Ok(None)` when no usable token is stored; an error when a file exists
    /// but cannot be read as text
    fn read_persisted(&self) -> Result<Option<GatewayToken>, GatewayError> {
        let to_error = |source| GatewayError::TokenRead {
            path: self.path.clone(),
            source,
        };

        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(to_error(e)),
        };
        let content = String::from_utf8(bytes).map_err(|e| {
            to_error(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let value = content.trim();
        if value.is_empty() {
            Ok(None)
        } else {
            Ok(Some(GatewayToken::new(value)))
        }
    }

    fn persist(&self, token: &GatewayToken) -> Result<(), GatewayError> {
        let to_error = |source| GatewayError::TokenPersistence {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(to_error)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(to_error)?;
        file.write_all(token.as_str().as_bytes()).map_err(to_error)?;
        file.sync_all().map_err(to_error)?;

        // Mode only applies on creation
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(to_error)?;
        }

        Ok(())
    }
}

/// Precomputed `Authorization: Bearer <token>` header value
#[derive(Clone)]
pub struct BearerCredential {
    value: HeaderValue,
}

impl BearerCredential {
    pub fn new(token: &GatewayToken) -> Result<Self, GatewayError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| GatewayError::InvalidToken)?;
        value.set_sensitive(true);
        Ok(Self { value })
    }

    pub fn header_value(&self) -> &HeaderValue {
        &self.value
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerCredential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_has_256_bits() {
        let token = GatewayToken::generate();
        assert_eq!(token.as_str().len(), TOKEN_BYTES * 2);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, GatewayToken::generate());
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = GatewayToken::new("super-secret");
        assert!(!format!("{:?}", token).contains("super-secret"));
        let credential = BearerCredential::new(&token).unwrap();
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }

    #[test]
    fn test_override_wins_and_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        std::fs::write(&path, "persisted-value").unwrap();

        let store = TokenStore::new(&path, Some("  from-env  ".to_string()));
        let resolved = store.get_or_create();

        assert_eq!(resolved.token.as_str(), "from-env");
        assert_eq!(resolved.source, TokenSource::Environment);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "persisted-value");
    }

    #[test]
    fn test_empty_override_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        std::fs::write(&path, "persisted-value\n").unwrap();

        let resolved = TokenStore::new(&path, Some(String::new())).get_or_create();
        assert_eq!(resolved.token.as_str(), "persisted-value");
        assert_eq!(resolved.source, TokenSource::Persisted);
    }

    #[test]
    fn test_generated_token_is_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("gateway.token");

        let first = TokenStore::new(&path, None).get_or_create();
        assert_eq!(first.source, TokenSource::Generated);
        assert!(path.exists());

        // A new store simulates a process restart on the same volume
        let second = TokenStore::new(&path, None).get_or_create();
        assert_eq!(second.source, TokenSource::Persisted);
        assert_eq!(first.token, second.token);
    }

    #[test]
    fn test_repeated_calls_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("gateway.token"), None);

        let first = store.get_or_create();
        let second = store.get_or_create();
        assert_eq!(first.token, second.token);
        assert_eq!(second.source, TokenSource::Generated);
    }

    #[test]
    fn test_empty_persisted_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        std::fs::write(&path, "   \n").unwrap();

        let resolved = TokenStore::new(&path, None).get_or_create();
        assert_eq!(resolved.source, TokenSource::Generated);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), resolved.token.as_str());
    }

    #[cfg(unix)]
    #[test]
    fn test_persisted_token_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        TokenStore::new(&path, None).get_or_create();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_unwritable_location_degrades_but_yields_token() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = TokenStore::new(blocker.join("gateway.token"), None);

        let resolved = store.get_or_create();
        assert!(resolved.is_degraded());
        assert_eq!(resolved.token.as_str().len(), TOKEN_BYTES * 2);
        // Still stable for this process
        assert_eq!(store.get_or_create().token, resolved.token);
    }

    #[test]
    fn test_unreadable_token_file_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        let original: &[u8] = b"tok\xff\xfe-persisted";
        std::fs::write(&path, original).unwrap();

        let store = TokenStore::new(&path, None);
        let resolved = store.get_or_create();

        assert!(resolved.is_degraded());
        assert_eq!(resolved.token.as_str().len(), TOKEN_BYTES * 2);
        assert_eq!(std::fs::read(&path).unwrap(), original);
        assert_eq!(store.get_or_create().token, resolved.token);
    }

    #[cfg(unix)]
    #[test]
    fn test_token_path_that_is_a_directory_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.token");
        std::fs::create_dir(&path).unwrap();

        let resolved = TokenStore::new(&path, None).get_or_create();

        assert!(matches!(resolved.source, TokenSource::Ephemeral { .. }));
        assert!(path.is_dir());
    }

    #[test]
    fn test_credential_header_value() {
        let credential = BearerCredential::new(&GatewayToken::new("abc123")).unwrap();
        assert_eq!(credential.header_value(), "Bearer abc123");
        assert!(credential.header_value().is_sensitive());
    }

    #[test]
    fn test_credential_rejects_control_characters() {
        assert!(matches!(
            BearerCredential::new(&GatewayToken::new("bad\ntoken")),
            Err(GatewayError::InvalidToken)
        ));
    }
}
