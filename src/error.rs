use thiserror::Error;

/// Internal error type for the core's own plumbing (config, IO, storage,
/// serialization). Distinct from [`crate::envelope::ErrorKind`], which is
/// the user-facing taxonomy carried in a [`crate::envelope::SkillResponse`].
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("update executor error: {0}")]
    Update(String),

    #[error("sidecar error: {0}")]
    Sidecar(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let cases: Vec<(CoreError, &str)> = vec![
            (CoreError::Config("bad key".into()), "config error: bad key"),
            (CoreError::Registry("dup intent".into()), "registry error: dup intent"),
            (CoreError::Update("busy".into()), "update executor error: busy"),
            (CoreError::Sidecar("unauthorized".into()), "sidecar error: unauthorized"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
    }
}
