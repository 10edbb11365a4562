use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("Failed to parse KDL")]
    #[diagnostic(code(adaptive_dimmer::config::parse_error))]
    ParseError {
        #[source_code]
        src: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source]
        source: kdl::KdlError,
    },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(adaptive_dimmer::config::invalid))]
    Invalid { message: String },

    #[error("Invalid value for `{field}`: expected {expected}")]
    #[diagnostic(code(adaptive_dimmer::config::invalid_value))]
    InvalidValue { field: String, expected: String },

    #[error("`{field}` = {value} is out of range ({range})")]
    #[diagnostic(code(adaptive_dimmer::config::out_of_range))]
    OutOfRange {
        field: String,
        value: f64,
        range: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
