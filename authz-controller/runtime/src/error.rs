use crate::{core, k8s::store};
use kube::runtime::finalizer;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Core(#[from] core::Error),

    #[error("{kind} {name} not found")]
    ScopeNotFound { kind: &'static str, name: String },

    #[error("{}", display_all(.0))]
    Aggregate(Vec<Error>),

    #[error(transparent)]
    Finalizer(Box<finalizer::Error<Error>>),
}

impl Error {
    /// Whether the object is malformed, so that retrying before it changes is pointless.
    pub fn is_invalid(&self) -> bool {
        match self {
            Self::Core(e) => e.is_invalid(),
            Self::Store(store::Error::Invalid(_)) => true,
            Self::Aggregate(errors) => errors.iter().all(Self::is_invalid),
            Self::Finalizer(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.is_invalid()
                }
                finalizer::Error::UnnamedObject | finalizer::Error::InvalidFinalizer => true,
                _ => false,
            },
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }

    pub fn scope(kind: &'static str, name: impl Into<String>) -> Self {
        Self::ScopeNotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<finalizer::Error<Error>> for Error {
    fn from(error: finalizer::Error<Error>) -> Self {
        Self::Finalizer(Box::new(error))
    }
}

/// Folds the errors of a best-effort pass into one.
pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(Error::Aggregate(errors)),
    }
}

fn display_all(errors: &[Error]) -> String {
    let messages = errors.iter().map(ToString::to_string).collect::<Vec<_>>();
    format!("{} errors: {}", errors.len(), messages.join("; "))
}

/// Treats a missing object as already deleted.
pub(crate) fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        result => result,
    }
}
