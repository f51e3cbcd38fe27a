use thiserror::Error;

/// Error delivered to every caller of a coalesced flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoalesceError<E> {
    /// The loader returned an error.
    #[error("loader failed: {0}")]
    Loader(E),

    /// The loader panicked. The panic is contained inside the flight and
    /// reported to every waiter.
    #[error("loader panicked: {0}")]
    LoaderPanicked(String),

    /// The flight was torn down (runtime shutdown, task abort) before it
    /// produced a result.
    #[error("flight was aborted before producing a result")]
    FlightAborted,
}

impl<E> CoalesceError<E> {
    /// Returns the loader's own error if that is what failed the flight.
    pub fn into_loader_error(self) -> Option<E> {
        match self {
            CoalesceError::Loader(e) => Some(e),
            _ => None,
        }
    }
}
