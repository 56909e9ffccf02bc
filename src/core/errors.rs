//! SNR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SnrError>;

/// Top-level error type for the collector.
#[derive(Debug, Error)]
pub enum SnrError {
    #[error("[SNR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SNR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SNR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SNR-1004] invalid schedule {expression:?}: {details}")]
    InvalidSchedule { expression: String, details: String },

    #[error("[SNR-2001] link failure on {port}: {details}")]
    Link { port: String, details: String },

    #[error("[SNR-2002] corrupt frame: {details}")]
    CorruptFrame { details: String },

    #[error("[SNR-2003] stream buffer overflow: {len} bytes exceeds cap {cap}")]
    BufferOverflow { len: usize, cap: usize },

    #[error("[SNR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SNR-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SNR-3002] retention sweep of {root} failed: {details}")]
    Sweep { root: PathBuf, details: String },

    #[error("[SNR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SNR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SnrError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SNR-1001",
            Self::MissingConfig { .. } => "SNR-1002",
            Self::ConfigParse { .. } => "SNR-1003",
            Self::InvalidSchedule { .. } => "SNR-1004",
            Self::Link { .. } => "SNR-2001",
            Self::CorruptFrame { .. } => "SNR-2002",
            Self::BufferOverflow { .. } => "SNR-2003",
            Self::Serialization { .. } => "SNR-2101",
            Self::Io { .. } => "SNR-3001",
            Self::Sweep { .. } => "SNR-3002",
            Self::ChannelClosed { .. } => "SNR-3003",
            Self::Runtime { .. } => "SNR-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Link { .. }
                | Self::Sweep { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for grammar violations.
    #[must_use]
    pub fn corrupt(details: impl Into<String>) -> Self {
        Self::CorruptFrame {
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for SnrError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SnrError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for SnrError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<SnrError> {
        vec![
            SnrError::InvalidConfig {
                details: String::new(),
            },
            SnrError::MissingConfig {
                path: PathBuf::new(),
            },
            SnrError::ConfigParse {
                context: "",
                details: String::new(),
            },
            SnrError::InvalidSchedule {
                expression: String::new(),
                details: String::new(),
            },
            SnrError::Link {
                port: String::new(),
                details: String::new(),
            },
            SnrError::CorruptFrame {
                details: String::new(),
            },
            SnrError::BufferOverflow { len: 0, cap: 0 },
            SnrError::Serialization {
                context: "",
                details: String::new(),
            },
            SnrError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            SnrError::Sweep {
                root: PathBuf::new(),
                details: String::new(),
            },
            SnrError::ChannelClosed { component: "" },
            SnrError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(SnrError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn error_codes_have_snr_prefix() {
        for err in &all_variants() {
            assert!(
                err.code().starts_with("SNR-"),
                "code {} must start with SNR-",
                err.code()
            );
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = SnrError::corrupt("missing }bn* after *bn{");
        let msg = err.to_string();
        assert!(msg.contains("SNR-2002"), "display should contain code: {msg}");
        assert!(msg.contains("}bn*"), "display should contain details: {msg}");
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            SnrError::Link {
                port: "COM1".to_string(),
                details: String::new()
            }
            .is_retryable()
        );
        assert!(SnrError::ChannelClosed { component: "parser" }.is_retryable());
        assert!(
            SnrError::io("/tmp/x", std::io::Error::other("test")).is_retryable()
        );

        assert!(!SnrError::corrupt("bad").is_retryable());
        assert!(
            !SnrError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(!SnrError::BufferOverflow { len: 2, cap: 1 }.is_retryable());
    }

    #[test]
    fn io_convenience_constructor() {
        let err = SnrError::io(
            "/var/snr/images/20240101",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "SNR-3001");
        assert!(err.to_string().contains("/var/snr/images/20240101"));
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: SnrError = toml_err.into();
        assert_eq!(err.code(), "SNR-1003");
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SnrError = json_err.into();
        assert_eq!(err.code(), "SNR-2101");
    }
}
