use std::fs;
use std::path::Path;

use rand::RngCore;

use crate::core::config::{AppPaths, Settings};
use crate::core::errors::ApiError;

const MIN_SECRET_LEN: usize = 32;

/// HMAC key used to sign JWTs.
#[derive(Clone)]
pub struct JwtSecret {
    value: Vec<u8>,
}

impl JwtSecret {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret(****)")
    }
}

/// Resolves the signing key: configured `auth.jwt_secret` (or `JWT_KEY`) wins,
/// otherwise a generated key persisted under the data directory is reused.
pub fn init_jwt_secret(settings: &Settings, paths: &AppPaths) -> Result<JwtSecret, ApiError> {
    if let Some(secret) = settings
        .auth
        .jwt_secret
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "Configured JWT secret is shorter than {} bytes; consider a longer key",
                MIN_SECRET_LEN
            );
        }
        return Ok(JwtSecret::new(secret.as_bytes().to_vec()));
    }

    let path = &paths.jwt_secret_path;
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(JwtSecret::new(existing.as_bytes().to_vec()));
        }
    }

    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(ApiError::internal)?;
    }
    fs::write(path, &secret).map_err(|e| {
        ApiError::internal(format!("Failed to persist JWT secret: {}", e))
    })?;
    restrict_permissions(path);
    tracing::info!("Generated a new JWT signing key at {}", path.display());

    Ok(JwtSecret::new(secret.into_bytes()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        if let Err(err) = fs::set_permissions(path, perms) {
            tracing::warn!("Failed to restrict JWT secret permissions: {}", err);
        }
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_secret_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_data_dir(dir.path());
        let mut settings = Settings::default();
        settings.auth.jwt_secret = Some("configured-secret-value".to_string());

        let secret = init_jwt_secret(&settings, &paths).unwrap();

        assert_eq!(secret.as_bytes(), b"configured-secret-value");
        assert!(!paths.jwt_secret_path.exists());
    }

    #[test]
    fn generated_secret_is_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::from_data_dir(dir.path());
        let settings = Settings::default();

        let first = init_jwt_secret(&settings, &paths).unwrap();
        let second = init_jwt_secret(&settings, &paths).unwrap();

        assert_eq!(first.as_bytes().len(), 64);
        assert_eq!(first.as_bytes(), second.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&paths.jwt_secret_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn debug_output_hides_key() {
        let secret = JwtSecret::new(b"topsecret".to_vec());
        assert_eq!(format!("{:?}", secret), "JwtSecret(****)");
    }
}
