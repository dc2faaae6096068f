//! # Error Types
//!
//! Error types for the Gantry control plane using `thiserror`.

/// Custom result type for Gantry operations
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for the Gantry control plane
#[derive(thiserror::Error, Debug)]
pub enum GantryError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// No backend-type plugin is registered for the backend's group/kind
    #[error("no backend translator found for {group}/{kind}")]
    NoBackendTranslator { group: String, kind: String },

    /// A policy or backend plugin rejected its input
    #[error("Plugin '{plugin}' error: {message}")]
    Plugin { plugin: String, message: String },

    /// Translation of a single resource failed
    #[error("Translation error for {resource}: {message}")]
    Translation { resource: String, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_yaml::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Status write-back failed after all retry attempts
    #[error("Status sync failed after {attempts} attempts: {message}")]
    StatusSync { message: String, attempts: u32 },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl GantryError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a new configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a new validation error for a specific field
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a missing backend translator error
    pub fn no_backend_translator<G: Into<String>, K: Into<String>>(group: G, kind: K) -> Self {
        Self::NoBackendTranslator { group: group.into(), kind: kind.into() }
    }

    /// Create a new plugin error
    pub fn plugin<P: Into<String>, S: Into<String>>(plugin: P, message: S) -> Self {
        Self::Plugin { plugin: plugin.into(), message: message.into() }
    }

    /// Create a new translation error
    pub fn translation<R: Into<String>, S: Into<String>>(resource: R, message: S) -> Self {
        Self::Translation { resource: resource.into(), message: message.into() }
    }

    /// Create a new status sync error
    pub fn status_sync<S: Into<String>>(message: S, attempts: u32) -> Self {
        Self::StatusSync { message: message.into(), attempts }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Configuration errors are never transient; I/O and status writes may be.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GantryError::Io { .. } | GantryError::StatusSync { .. })
    }

    /// Whether this error is caused by user configuration rather than the control plane
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            GantryError::Config { .. }
                | GantryError::Validation { .. }
                | GantryError::NoBackendTranslator { .. }
                | GantryError::Plugin { .. }
        )
    }
}

impl From<std::io::Error> for GantryError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_yaml::Error> for GantryError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization { source: error, context: "YAML deserialization failed".to_string() }
    }
}

impl From<config::ConfigError> for GantryError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<validator::ValidationErrors> for GantryError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect();
        fields.sort();

        Self::validation(format!("Validation failed: {}", fields.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = GantryError::config("Test configuration error");
        assert!(matches!(error, GantryError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_no_backend_translator_message() {
        let error = GantryError::no_backend_translator("example.io", "Widget");
        assert_eq!(error.to_string(), "no backend translator found for example.io/Widget");
        assert!(error.is_configuration_error());
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = GantryError::validation_field("must not be empty", "role");
        if let GantryError::Validation { field, .. } = error {
            assert_eq!(field, Some("role".to_string()));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GantryError::status_sync("conflict", 5).is_retryable());
        let io: GantryError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(io.is_retryable());
        assert!(!GantryError::plugin("builtin", "bad filter").is_retryable());
        assert!(!GantryError::internal("oops").is_configuration_error());
    }

    #[test]
    fn test_error_conversions() {
        let yaml_error = serde_yaml::from_str::<Vec<u32>>("{not: a list").unwrap_err();
        let error: GantryError = yaml_error.into();
        assert!(matches!(error, GantryError::Serialization { .. }));
    }
}
