pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("role template inheritance cycle: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("role template {0} not found")]
    RoleTemplateNotFound(String),

    #[error("role template {name} exceeds the maximum inheritance depth of {depth}")]
    InheritanceTooDeep { name: String, depth: usize },

    #[error("binding {0} has no subject")]
    NoSubject(String),

    #[error("binding {0} has more than one kind of subject set")]
    AmbiguousSubject(String),

    #[error("invalid service account reference {0:?}")]
    InvalidServiceAccount(String),

    #[error("invalid scope reference {0:?}")]
    InvalidScope(String),
}

impl Error {
    /// Invalid objects are not retried until they change.
    ///
    /// A missing role template may still be created, so it is the only retryable error.
    pub fn is_invalid(&self) -> bool {
        !matches!(self, Self::RoleTemplateNotFound(_))
    }
}
