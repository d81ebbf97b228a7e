use std::sync::Arc;

use thiserror::Error;

/// a set of format definitions that cannot become a registry. nothing is usable after one of
/// these; fix the table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("formats `{first}` and `{second}` can both match word {witness:#018x}")]
    AmbiguousFormats {
        first: Arc<str>,
        second: Arc<str>,
        /// a word satisfying both predicates.
        witness: u64,
    },

    #[error("format `{0}` is defined more than once")]
    DuplicateFormat(Arc<str>),

    #[error("{name:?} is not a usable definition name: names must be non-empty and contain no `.`")]
    InvalidName { name: Arc<str> },

    #[error("format `{format}`: two variants of discriminant `{field}` are both named `{variant}`")]
    DuplicateVariant {
        format: Arc<str>,
        field: Arc<str>,
        variant: Arc<str>,
    },

    #[error("format `{format}`: variant `{variant}` fixes bits its parents already fix differently")]
    UnreachableVariant { format: Arc<str>, variant: Arc<str> },

    #[error("format `{format}`: fixed value {value:#x} has bits outside fixed mask {mask:#x}")]
    InvalidPredicate { format: Arc<str>, mask: u64, value: u64 },

    #[error("format `{format}`: field `{field}` (offset {offset}, width {width}) does not fit in 64 bits")]
    InvalidField {
        format: Arc<str>,
        field: Arc<str>,
        offset: u32,
        width: u32,
    },

    #[error("format `{format}`: member `{member}` starts above the previous member")]
    MemberOverlap { format: Arc<str>, member: Arc<str> },

    #[error("format `{format}`: bad bit pattern {pattern:?} for `{member}`")]
    BadPattern {
        format: Arc<str>,
        member: Arc<str>,
        pattern: String,
    },

    #[error("format `{format}`: field `{field}` is declared twice")]
    DuplicateField { format: Arc<str>, field: Arc<str> },

    #[error("format `{format}`: fields `{first}` and `{second}` overlap")]
    OverlappingFields {
        format: Arc<str>,
        first: Arc<str>,
        second: Arc<str>,
    },

    #[error("format `{format}`: field `{field}` is only partly covered by fixed bits")]
    AliasedField { format: Arc<str>, field: Arc<str> },

    #[error("format `{format}`: discriminant `{field}` names no field")]
    UnknownDiscriminantField { format: Arc<str>, field: Arc<str> },

    #[error("format `{format}`: discriminant `{field}` is signed")]
    SignedDiscriminant { format: Arc<str>, field: Arc<str> },

    #[error("format `{format}`: discriminant `{field}` has value {value} twice")]
    DuplicateDiscriminantKey {
        format: Arc<str>,
        field: Arc<str>,
        value: u64,
    },

    #[error("format `{format}`: discriminant `{field}` cannot hold value {value}")]
    DiscriminantKeyOutOfRange {
        format: Arc<str>,
        field: Arc<str>,
        value: u64,
    },

    #[error("format `{format}`: discriminant `{field}` is already resolved further up the chain")]
    RedundantDiscriminant { format: Arc<str>, field: Arc<str> },

    #[error("format `{format}`: discriminant chain is deeper than {max}")]
    DiscriminantTooDeep { format: Arc<str>, max: usize },
}

/// why a single word did not decode. recoverable: the next word is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("no format matches word {word:#018x}")]
    UnknownFormat { word: u64 },

    #[error("format `{format}` has no variant for {field} = {value} (word {word:#018x})")]
    UnknownDiscriminant {
        format: Arc<str>,
        field: Arc<str>,
        value: u64,
        word: u64,
    },

    #[error("exhausted input")]
    ExhaustedInput,

    #[error("read error: {0}")]
    Io(&'static str),
}

impl From<yaxpeax_arch::ReadError> for DecodeError {
    fn from(err: yaxpeax_arch::ReadError) -> Self {
        match err {
            yaxpeax_arch::ReadError::ExhaustedInput => DecodeError::ExhaustedInput,
            yaxpeax_arch::ReadError::IOError(msg) => DecodeError::Io(msg),
        }
    }
}

impl yaxpeax_arch::DecodeError for DecodeError {
    fn data_exhausted(&self) -> bool {
        matches!(self, DecodeError::ExhaustedInput)
    }
    fn bad_opcode(&self) -> bool {
        matches!(self, DecodeError::UnknownFormat { .. })
    }
    fn bad_operand(&self) -> bool {
        matches!(self, DecodeError::UnknownDiscriminant { .. })
    }
    fn description(&self) -> &'static str {
        match self {
            DecodeError::UnknownFormat { .. } => "unknown instruction format",
            DecodeError::UnknownDiscriminant { .. } => "unknown discriminant value",
            DecodeError::ExhaustedInput => "exhausted input",
            DecodeError::Io(_) => "io error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no handler registered for `{key}`")]
    UnhandledFormat { key: Arc<str> },

    #[error("word {word:#018x} was never decoded")]
    Undecoded { word: u64 },

    #[error("`{key}` cannot be viewed as `{view}`")]
    ViewMismatch { key: Arc<str>, view: &'static str },
}

/// failure to load a declarative format table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("malformed format table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("format `{format}`: each member must be an object with exactly one key, found {keys}")]
    Member { format: String, keys: usize },

    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

/// anything [`decode_and_dispatch`](crate::decode_and_dispatch) can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
