#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed schema document: {0}")]
    Parsing(String),
    #[error("expected a {expected}, not {value}")]
    TypeMismatch {
        expected: &'static str,
        value: serde_json::Value,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("column type is neither atomic nor key-valued: {0}")]
    UnknownColumnType(serde_json::Value),
    #[error("value matches no encoding of its column type: {0}")]
    MalformedValue(serde_json::Value),
}

impl Error {
    pub(crate) fn mismatch(expected: &'static str, value: &serde_json::Value) -> Self {
        Self::TypeMismatch {
            expected,
            value: value.clone(),
        }
    }
}
