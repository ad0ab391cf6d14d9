//! CLI-specific error types and exit code mapping

use flowbag_accumulator::AccumulatorError;
use flowbag_aggbag::AggBagError;
use flowbag_core::error::{FieldError, FlowbagError};

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// Input data could not be used (bad argument value, corrupt file).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Interrupted before the outputs were written.
    #[error("cancelled")]
    Cancelled,

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from flowbag-core.
    #[error("{0}")]
    Core(#[from] FlowbagError),

    /// Container engine error.
    #[error("{0}")]
    Engine(#[from] AggBagError),

    /// Record accumulator or text builder error.
    #[error("{0}")]
    Accumulator(#[from] AccumulatorError),
}

impl From<FieldError> for CliError {
    fn from(e: FieldError) -> Self {
        Self::Engine(e.into())
    }
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success                              |
    /// | 1    | General / command error              |
    /// | 2    | Configuration or usage error         |
    /// | 3    | Invalid input data                   |
    /// | 4    | Cancelled (Ctrl-C)                   |
    /// | 10   | IO error                             |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::InvalidInput(_) => 3,
            Self::Cancelled => 4,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) => 1,
            Self::Core(e) => match e {
                FlowbagError::Config(_) => 2,
                FlowbagError::Field(_) => 3,
                FlowbagError::Io(_) => 10,
                FlowbagError::Engine(_) => 1,
            },
            Self::Engine(e) => engine_exit_code(e),
            Self::Accumulator(e) => match e {
                AccumulatorError::Engine(inner) => engine_exit_code(inner),
                AccumulatorError::Configuration { .. } => 2,
                AccumulatorError::Record { .. } | AccumulatorError::Lookup { .. } => 3,
                AccumulatorError::Io(_) => 10,
                AccumulatorError::Cancelled => 4,
            },
        }
    }
}

fn engine_exit_code(e: &AggBagError) -> i32 {
    match e {
        AggBagError::Configuration { .. }
        | AggBagError::UnknownField { .. }
        | AggBagError::AmbiguousField { .. }
        | AggBagError::EmptySchema { .. } => 2,
        AggBagError::SchemaMismatch { .. }
        | AggBagError::UnsupportedField { .. }
        | AggBagError::InvalidValue { .. }
        | AggBagError::Corrupt { .. }
        | AggBagError::UnsupportedVersion { .. }
        | AggBagError::UnsupportedCompression { .. } => 3,
        AggBagError::Cancelled => 4,
        AggBagError::Io(_) => 10,
        AggBagError::Invalidated => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_config_error() {
        let err = CliError::Config("test error".to_owned());
        assert_eq!(err.exit_code(), 2, "config error should return exit code 2");
    }

    #[test]
    fn test_exit_code_invalid_input() {
        let err = CliError::InvalidInput("bad value".to_owned());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_cancelled() {
        assert_eq!(CliError::Cancelled.exit_code(), 4);
        assert_eq!(CliError::Engine(AggBagError::Cancelled).exit_code(), 4);
        assert_eq!(
            CliError::Accumulator(AccumulatorError::Cancelled).exit_code(),
            4
        );
    }

    #[test]
    fn test_exit_code_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CliError::Io(io_err);
        assert_eq!(err.exit_code(), 10, "io error should return exit code 10");
    }

    #[test]
    fn test_exit_code_command_error() {
        let err = CliError::Command("test error".to_owned());
        assert_eq!(
            err.exit_code(),
            1,
            "command error should return exit code 1"
        );
    }

    #[test]
    fn test_exit_code_json_serialize_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid json")
            .expect_err("should fail parsing");
        let err = CliError::JsonSerialize(json_err);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_code_core_config_error() {
        use flowbag_core::error::ConfigError;
        let err: CliError = FlowbagError::Config(ConfigError::FileNotFound {
            path: "flowbag.toml".to_owned(),
        })
        .into();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_engine_errors() {
        let corrupt = CliError::Engine(AggBagError::Corrupt {
            reason: "truncated".to_owned(),
        });
        assert_eq!(corrupt.exit_code(), 3);

        let config = CliError::Engine(AggBagError::Configuration {
            reason: "bad option".to_owned(),
        });
        assert_eq!(config.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_accumulator_wraps_engine() {
        let err = CliError::Accumulator(AccumulatorError::Engine(AggBagError::Corrupt {
            reason: "truncated".to_owned(),
        }));
        assert_eq!(err.exit_code(), 3);

        let record = CliError::Accumulator(AccumulatorError::Record {
            line: 4,
            reason: "too few columns".to_owned(),
        });
        assert_eq!(record.exit_code(), 3);
    }

    #[test]
    fn test_from_field_error_maps_to_engine() {
        let err: CliError = FieldError::UnknownField {
            name: "nope".to_owned(),
        }
        .into();
        assert!(matches!(err, CliError::Engine(AggBagError::UnknownField { .. })));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_error_display_config() {
        let err = CliError::Config("invalid TOML syntax".to_owned());
        let display_str = format!("{}", err);
        assert!(display_str.contains("configuration error"));
        assert!(display_str.contains("invalid TOML syntax"));
    }

    #[test]
    fn test_error_display_command() {
        let err = CliError::Command("execution failed".to_owned());
        assert_eq!(format!("{}", err), "execution failed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let cli_err: CliError = io_err.into();
        match cli_err {
            CliError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("expected Io error variant"),
        }
    }
}
