use thiserror::Error;

/// Decision-engine errors.
#[derive(Debug, Error)]
pub enum AbrError {
    #[error("no representation to choose from")]
    EmptyRepresentations,
}

pub type AbrResult<T> = Result<T, AbrError>;
