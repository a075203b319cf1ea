//! Shared-secret auth for the update sidecar protocol (C9), ported from
//! the reference sidecar's `auth.py`: a single token, generated once and
//! persisted to disk, checked against the `X-Updater-Secret` header
//! using a constant-time comparison.

use std::path::Path;

use data_encoding::BASE64URL_NOPAD;
use rand::RngExt;

use crate::error::{CoreError, Result};

const SECRET_BYTES: usize = 32;

/// Load the shared secret from `path`, generating and persisting a new
/// one if the file does not yet exist.
pub fn get_or_create_secret(path: &str) -> Result<String> {
    let p = Path::new(path);
    if p.exists() {
        let contents = std::fs::read_to_string(p).map_err(CoreError::Io)?;
        return Ok(contents.trim().to_string());
    }

    let secret = generate_secret();
    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent).map_err(CoreError::Io)?;
    }
    std::fs::write(p, &secret).map_err(CoreError::Io)?;
    set_owner_only_permissions(p)?;
    Ok(secret)
}

/// Restrict the secret file to owner read/write (§6: "mode 0600").
#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, permissions).map_err(CoreError::Io)
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn generate_secret() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; SECRET_BYTES];
    rng.fill(&mut bytes[..]);
    BASE64URL_NOPAD.encode(&bytes)
}

/// Constant-time equality check, independent of any early-exit on
/// length mismatch leaking timing information about how much of the
/// provided secret matched.
pub fn validate_secret(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();

    // A length mismatch still walks the full max length so the check's
    // duration does not depend on how long `provided` is relative to
    // `expected`.
    let max_len = expected.len().max(provided.len());
    let mut diff: u8 = (expected.len() != provided.len()) as u8;

    for i in 0..max_len {
        let e = expected.get(i).copied().unwrap_or(0);
        let p = provided.get(i).copied().unwrap_or(0);
        diff |= e ^ p;
    }

    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_a_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret").to_str().unwrap().to_string();

        let first = get_or_create_secret(&path).unwrap();
        let second = get_or_create_secret(&path).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret").to_str().unwrap().to_string();
        get_or_create_secret(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn validate_secret_matches_and_rejects() {
        assert!(validate_secret("abc123", "abc123"));
        assert!(!validate_secret("abc123", "abc124"));
        assert!(!validate_secret("abc123", "abc1234"));
        assert!(!validate_secret("abc123", ""));
    }
}
