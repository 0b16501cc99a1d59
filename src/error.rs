use std::io;

/// All error types for the tiling engine.
#[derive(thiserror::Error, Debug)]
pub enum TilerError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Storage error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Consistency error: {0}")]
    Consistency(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Task cancelled")]
    Cancelled,
    #[error(transparent)]
    StdIo(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TilerError {
    /// Storage failure at `path`.
    pub fn io(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TilerError::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error is confined to a single tile and must not abort the level.
    pub fn is_tile_local(&self) -> bool {
        matches!(
            self,
            TilerError::Io { .. } | TilerError::StdIo(_) | TilerError::Encoding(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_strings() {
        let e = TilerError::Validation("level 21 exceeds 20".into());
        assert_eq!(e.to_string(), "Validation error: level 21 exceeds 20");

        let e = TilerError::Parse("bad face".into());
        assert_eq!(e.to_string(), "Parse error: bad face");

        let e = TilerError::io("tiles/0/0_0_0.b3dm", "disk full");
        assert_eq!(e.to_string(), "Storage error at tiles/0/0_0_0.b3dm: disk full");

        let e = TilerError::Encoding("too many vertices".into());
        assert_eq!(e.to_string(), "Encoding error: too many vertices");

        let e = TilerError::NotFound("task 7".into());
        assert_eq!(e.to_string(), "Not found: task 7");

        assert_eq!(TilerError::Cancelled.to_string(), "Task cancelled");
    }

    #[test]
    fn from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let e: TilerError = io_err.into();
        assert!(matches!(e, TilerError::StdIo(_)));
        assert!(e.to_string().contains("file missing"));
    }

    #[test]
    fn tile_local_classification() {
        assert!(TilerError::io("a", "b").is_tile_local());
        assert!(TilerError::Encoding("x".into()).is_tile_local());
        assert!(!TilerError::Validation("x".into()).is_tile_local());
        assert!(!TilerError::Cancelled.is_tile_local());
    }
}
