//! Result type definition and extension traits.
//!
//! Provides combinators for the lookups that dominate reconciliation code,
//! where "not found" is usually an answer rather than a failure.

use crate::error::Error;
use crate::resource::ResourceKind;

/// The standard Result type for cumulus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Turn a `NotFound` error into `Ok(None)`, keeping every other error.
    ///
    /// # Errors
    /// Returns the original error when it is not `NotFound`.
    fn not_found_as_none(self) -> Result<Option<T>>;

    /// Inspect the error without consuming the Result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn not_found_as_none(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

/// Extension trait for Option types.
pub trait OptionExt<T> {
    /// Convert `None` into a `NotFound` error for the given resource.
    ///
    /// # Errors
    /// Returns `Error::NotFound` when the option is empty.
    fn ok_or_not_found(self, kind: ResourceKind, name: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, kind: ResourceKind, name: &str) -> Result<T> {
        self.ok_or_else(|| Error::not_found(kind, name))
    }
}

/// Expect at most one match from a lookup.
///
/// Zero matches is `Ok(None)`; more than one is an `Ambiguous` error, never a
/// silent pick.
///
/// # Errors
/// Returns `Error::Ambiguous` when more than one item matched.
pub fn at_most_one<T>(kind: ResourceKind, name: &str, mut items: Vec<T>) -> Result<Option<T>> {
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        count => Err(Error::ambiguous(kind, name, count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Call;

    #[test]
    fn test_not_found_as_none_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.not_found_as_none().ok(), Some(Some(42)));
    }

    #[test]
    fn test_not_found_as_none_maps_not_found() {
        let result: Result<i32> = Err(Error::not_found(ResourceKind::Port, "p"));
        assert_eq!(result.not_found_as_none().ok(), Some(None));
    }

    #[test]
    fn test_not_found_as_none_keeps_other_errors() {
        let call = Call::get(ResourceKind::Port, "p");
        let result: Result<i32> = Err(Error::transport(&call, "timeout"));
        assert!(result.not_found_as_none().is_err());
    }

    #[test]
    fn test_inspect_error() {
        let result: Result<i32> = Err(Error::invalid_record("test"));
        let mut called = false;
        let _ = result.inspect_error(|_| {
            called = true;
        });
        assert!(called);
    }

    #[test]
    fn test_ok_or_not_found() {
        let opt: Option<i32> = None;
        let err = opt.ok_or_not_found(ResourceKind::Flavor, "m1.large");
        assert!(err.as_ref().is_err_and(Error::is_not_found));
    }

    #[test]
    fn test_at_most_one() {
        assert_eq!(
            at_most_one::<i32>(ResourceKind::Instance, "a", vec![]).ok(),
            Some(None)
        );
        assert_eq!(
            at_most_one(ResourceKind::Instance, "a", vec![7]).ok(),
            Some(Some(7))
        );
        let many = at_most_one(ResourceKind::Instance, "a", vec![1, 2]);
        assert!(matches!(many, Err(Error::Ambiguous { count: 2, .. })));
    }
}
