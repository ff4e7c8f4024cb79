use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Configuration,
    Execution,
    Normalization,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CanopyError {
    #[error("invalid location specifier: {0}")]
    InvalidLocation(String),

    #[error("invalid value for setting {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("unknown widget: {0}")]
    UnknownWidget(String),

    #[error("invalid widget descriptor {widget}: {message}")]
    InvalidDescriptor { widget: String, message: String },

    #[error("widget {widget} is waiting on setting {key}")]
    PendingSetting { widget: String, key: String },

    #[error("widget {widget} does not support location {location}")]
    UnsupportedLocation { widget: String, location: String },

    #[error("query on {0} has an empty projection")]
    EmptyProjection(String),

    #[error("aggregate query on {table} must group by {column}")]
    MissingGrouping { table: String, column: String },

    #[error("query on {0} requires a geometry binding")]
    MissingGeometry(String),

    #[error("invalid identifier in query: {0}")]
    InvalidIdentifier(String),

    #[error("missing config file canopy.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("query request failed: {0}")]
    QueryHttp(String),

    #[error("query service returned status {status}: {message}")]
    QueryStatus { status: u16, message: String },

    #[error("precomputed request failed: {0}")]
    PrecomputedHttp(String),

    #[error("precomputed service returned status {status}: {message}")]
    PrecomputedStatus { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    Normalization(String),
}

impl CanopyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CanopyError::QueryHttp(_)
            | CanopyError::QueryStatus { .. }
            | CanopyError::PrecomputedHttp(_)
            | CanopyError::PrecomputedStatus { .. } => ErrorClass::Execution,
            CanopyError::Normalization(_) => ErrorClass::Normalization,
            _ => ErrorClass::Configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            CanopyError::EmptyProjection("t".to_string()).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            CanopyError::QueryStatus {
                status: 502,
                message: "bad gateway".to_string()
            }
            .class(),
            ErrorClass::Execution
        );
        assert_eq!(
            CanopyError::Normalization("not an object".to_string()).class(),
            ErrorClass::Normalization
        );
    }
}
