//! Errors surfaced by the audio core.
//!
//! Only stream-open failures are caller-visible. Over/underrun conditions are
//! absorbed by the regulator and never show up here.

use std::collections::TryReserveError;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum AudioError {
    /// A buffer could not be allocated.
    #[error("could not allocate {what}")]
    Resource {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    /// The platform refused to create, configure or start the output stream.
    #[error("{context}")]
    Init {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Codec parameters or frames the audio core cannot handle.
    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
}

impl AudioError {
    pub(crate) fn init(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Init {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Allocates a zeroed `Vec` without aborting on allocation failure.
pub(crate) fn try_alloc_zeroed<T: Copy + Default>(
    len: usize,
    what: &'static str,
) -> Result<Vec<T>, AudioError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|source| AudioError::Resource { what, source })?;
    buf.resize(len, T::default());
    Ok(buf)
}
