use thiserror::Error;

use crate::db::DatabaseError;
use crate::reader::ReaderError;
use crate::validator::ValidatorError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The file's header is unusable. Retrying cannot help.
    #[error("{0}")]
    Structural(ReaderError),

    #[error("{0}")]
    Reader(ReaderError),

    #[error("{0}")]
    Validator(#[from] ValidatorError),

    #[error("{0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Whether a redelivery of the same job could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::Structural(_))
    }
}

impl From<ReaderError> for PipelineError {
    fn from(e: ReaderError) -> Self {
        if e.is_structural() {
            PipelineError::Structural(e)
        } else {
            PipelineError::Reader(e)
        }
    }
}
