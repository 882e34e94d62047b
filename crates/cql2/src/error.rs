use thiserror::Error;

#[derive(Debug, Error)]
pub enum Cql2Error {
    #[error("cql2 parse error: {0}")]
    Parse(String),

    #[error("cql2 validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Cql2Error>;
