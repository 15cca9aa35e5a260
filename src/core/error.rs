// Error taxonomy shared by the schema, evaluator and data objects

use crate::io::StreamError;
use thiserror::Error;

/// Problems with a declared schema, detected before any I/O
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown type '{0}'")]
    UnknownType(String),

    #[error("Type '{0}' needs an explicit endian (e.g. '{0}le' or an endian parameter)")]
    EndianRequired(String),

    #[error("Type '{type_name}' is missing mandatory parameter '{param}'")]
    MissingParameter { type_name: String, param: String },

    #[error("Type '{type_name}' was given mutually exclusive parameters '{first}' and '{second}'")]
    ConflictingParameters {
        type_name: String,
        first: String,
        second: String,
    },

    #[error("Duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("Field name '{0}' is reserved")]
    ReservedName(String),

    #[error("Invalid field name '{name}': {reason}")]
    InvalidFieldName { name: String, reason: String },

    #[error("Invalid parameter '{param}' for type '{type_name}': {reason}")]
    InvalidParameter {
        type_name: String,
        param: String,
        reason: String,
    },

    #[error("Invalid schema: {0}")]
    Invalid(String),
}

/// Decoded data that breaks a declared constraint
#[derive(Error, Debug)]
pub enum ValidityError {
    #[error("value {value} failed assertion (expected {expected})")]
    AssertionFailed { value: String, expected: String },

    #[error("selection {0} matches no declared choice")]
    InvalidSelection(String),
}

/// Misuse of the object API
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Cannot write while a read is in progress")]
    WriteDuringRead,

    #[error("Cannot assign a null value")]
    NullAssignment,

    #[error("Choice selection is computed from its selection parameter and cannot be set")]
    SelectionIsComputed,

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("Invalid path '{0}'")]
    InvalidPath(String),
}

/// Failures while evaluating a parameter
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Unknown name '{0}'")]
    UnknownName(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Cannot parse expression '{input}': {reason}")]
    Parse { input: String, reason: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("{}: {}", render_path(.path), .error)]
    Validity {
        path: Vec<String>,
        error: ValidityError,
    },

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Renders a debug path such as `obj.header.items[2]`
pub fn render_path(path: &[String]) -> String {
    let mut out = String::from("obj");
    for seg in path {
        if !seg.starts_with('[') {
            out.push('.');
        }
        out.push_str(seg);
    }
    out
}

impl Error {
    pub fn validity(error: ValidityError) -> Self {
        Error::Validity {
            path: Vec::new(),
            error,
        }
    }

    /// Prefixes the debug path of a validity error with an enclosing field
    pub fn within(self, segment: impl Into<String>) -> Self {
        match self {
            Error::Validity { mut path, error } => {
                path.insert(0, segment.into());
                Error::Validity { path, error }
            }
            other => other,
        }
    }

    /// True when the error means the input ran out
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Stream(e) if e.is_eof())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Stream(StreamError::Io(e))
    }
}

pub(crate) fn mismatch(expected: &'static str, found: &crate::core::Value) -> Error {
    Error::Eval(EvalError::TypeMismatch {
        expected,
        found: found.type_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_path() {
        let err = Error::validity(ValidityError::AssertionFailed {
            value: "3".into(),
            expected: "4".into(),
        })
        .within("len")
        .within("[2]")
        .within("items");
        assert_eq!(
            err.to_string(),
            "obj.items[2].len: value 3 failed assertion (expected 4)"
        );
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::Stream(StreamError::EndOfStream).is_eof());
        assert!(Error::Stream(StreamError::Truncated {
            expected: 2,
            actual: 1
        })
        .is_eof());
        assert!(!Error::Stream(StreamError::Unseekable).is_eof());
        assert!(!Error::Usage(UsageError::NullAssignment).is_eof());
    }
}
