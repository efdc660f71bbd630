//! Unwrap helpers with good error messages.
//!
//! These helpers replace `unwrap()` and `expect()` in test code, providing
//! better error messages with `#[track_caller]` for accurate panic locations.
//!
//! # When to use
//!
//! - Use `must` when you have a `Result` that should succeed in tests
//! - Use `must_some` when you have an `Option` that should be `Some`
//! - Use `must_fail` when an update operation is expected to fail and the
//!   error itself is under test

use std::fmt::Debug;

use hostflash_errors::UpdateError;

/// Unwrap a `Result`, panicking with context on error.
///
/// # Example
///
/// ```rust
/// use hostflash_test_helpers::must;
///
/// let result: Result<i32, &str> = Ok(42);
/// let value = must(result);
/// assert_eq!(value, 42);
/// ```
///
/// # Panics
///
/// Panics if the result is `Err`, with a message including the error value.
#[track_caller]
pub fn must<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must: unexpected Err: {e:?}"),
    }
}

/// Unwrap an `Option`, panicking with a custom message if `None`.
///
/// # Example
///
/// ```rust
/// use hostflash_test_helpers::must_some;
///
/// let value = must_some(Some(42), "expected a value");
/// assert_eq!(value, 42);
/// ```
///
/// # Panics
///
/// Panics if the option is `None`, with the provided message.
#[track_caller]
pub fn must_some<T>(option: Option<T>, msg: &str) -> T {
    match option {
        Some(v) => v,
        None => panic!("must_some: {msg}"),
    }
}

/// Unwrap a `Result` with a custom context message.
///
/// # Panics
///
/// Panics if the result is `Err`, with the context and error value.
#[track_caller]
pub fn must_with<T, E: Debug>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("must_with: {context}: {e:?}"),
    }
}

/// Extract the error of an operation that must fail.
///
/// # Example
///
/// ```rust
/// use hostflash_errors::{ErrorKind, UpdateError};
/// use hostflash_test_helpers::must_fail;
///
/// let result: Result<(), UpdateError> = Err(UpdateError::cancelled("stop"));
/// assert_eq!(must_fail(result).kind(), ErrorKind::Cancelled);
/// ```
///
/// # Panics
///
/// Panics if the result is `Ok`, with the success value.
#[track_caller]
pub fn must_fail<T: Debug>(result: Result<T, UpdateError>) -> UpdateError {
    match result {
        Ok(v) => panic!("must_fail: unexpected Ok: {v:?}"),
        Err(e) => e,
    }
}
