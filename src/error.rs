//! Error types shared across the crate.

/// The error type returned by fallible operations in this crate.
///
/// Shape, alias, select, and domain errors are always detected at the
/// dispatch boundary before any backend call is made; a failed operation
/// never partially commits its effect. Backend-raised [`Error::Device`]
/// failures surface as-is and are never retried.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Shape or stride incompatibility: a failed reshape, a gemm dimension
    /// mismatch, or an operand whose dimensions cannot satisfy an
    /// operation's layout requirements.
    #[error("shape error: {0}")]
    Shape(String),

    /// Two operation arguments alias in a way the operation's contract
    /// forbids.
    #[error("alias error: {0}")]
    Alias(String),

    /// A `select` call used non-monotonic or non-contiguous indices along
    /// some axis.
    #[error("select error: {0}")]
    Select(String),

    /// A numeric conversion produced an out-of-range value and the caller
    /// did not request `unchecked` behavior.
    #[error("domain error: {0}")]
    Domain(String),

    /// A backend reported a failure (allocation failure, kernel fault, ...).
    /// The core does not retry device errors.
    #[error("device error: {0}")]
    Device(String),

    /// An operation's arguments belong to more than one driver.
    #[error("cross-driver error: {0}")]
    CrossDriver(String),

    /// A required context field (driver, device, stream, or datatype) was
    /// missing at every level of the ambient context stack.
    #[error("no context error: {0}")]
    NoContext(String),

    /// [`driver::registry::driver`](crate::driver::registry::driver) was
    /// called with a name that has no registered factory.
    #[error("unknown driver error: {0}")]
    UnknownDriver(String),

    /// One or more resources failed to release when a
    /// [`scope`](crate::scope) exited. The first failure is reported as
    /// `primary`; any further failures are aggregated into `secondary` and
    /// never mask it.
    #[error("resource error: {primary}")]
    Resource {
        /// The first release failure encountered.
        primary: Box<Error>,
        /// Any additional release failures, in the order they occurred.
        secondary: Vec<Error>,
    },
}

impl Error {
    /// Builds a [`Error::Resource`] from a non-empty sequence of release
    /// failures, keeping the first as `primary`.
    ///
    /// # Panics
    ///
    /// Panics if `failures` is empty; callers are expected to only invoke
    /// this once at least one release has failed.
    #[must_use]
    pub fn aggregate_resource_failures(mut failures: Vec<Error>) -> Error {
        assert!(
            !failures.is_empty(),
            "aggregate_resource_failures requires at least one failure"
        );
        let primary = failures.remove(0);
        Error::Resource {
            primary: Box::new(primary),
            secondary: failures,
        }
    }
}
