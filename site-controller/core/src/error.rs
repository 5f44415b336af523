use crate::ports::PortRange;

/// Failures that affect a single binding or a single persisted-configuration update.
///
/// None of these are fatal to the controller: binding-level errors are logged and reported on the
/// binding's status, and store-level errors are returned to whoever requested the update.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Every port in the router's port range is held by another binding.
    #[error("no free router port in range {0}")]
    PoolExhausted(PortRange),

    /// A selector currently matches no eligible pods.
    #[error("No matches for selector")]
    NoMatchingEndpoints,

    /// The persisted configuration lacks the key or marker an update depends on.
    #[error("could not retrieve {0} from router configuration")]
    MissingConfigKey(String),

    /// An optimistic-concurrency update kept conflicting with concurrent writers.
    #[error("update conflicted after {attempts} attempts")]
    ConflictExceeded { attempts: usize },

    /// A binding whose spec can't be turned into router configuration.
    #[error("invalid binding: {0}")]
    InvalidBindingSpec(String),

    /// Persisted configuration that could not be parsed.
    #[error("invalid router configuration: {0}")]
    InvalidConfig(String),
}
