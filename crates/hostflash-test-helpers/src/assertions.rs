//! Assertion macros for update tests.

/// Assert that a `Result<_, UpdateError>` failed with the given kind.
///
/// # Example
///
/// ```rust
/// use hostflash_errors::{ErrorKind, UpdateError};
/// use hostflash_test_helpers::assert_error_kind;
///
/// let result: Result<(), UpdateError> = Err(UpdateError::not_mapped("BAR[2]"));
/// assert_error_kind!(result, ErrorKind::NotMapped);
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:expr $(,)?) => {
        match $result {
            Ok(value) => panic!(
                "assertion failed: expected {:?} error, got Ok({:?})",
                $kind, value
            ),
            Err(err) => {
                if err.kind() != $kind {
                    panic!(
                        "assertion failed: expected {:?} error, got {:?}: {}",
                        $kind,
                        err.kind(),
                        err
                    );
                }
            }
        }
    };
}

/// Assert that a sequence is strictly increasing, such as chunk offsets.
///
/// # Example
///
/// ```rust
/// use hostflash_test_helpers::assert_monotonic;
///
/// assert_monotonic!(&[0usize, 1024, 2048]);
/// ```
#[macro_export]
macro_rules! assert_monotonic {
    ($collection:expr $(,)?) => {
        let collection = $collection;
        let mut iter = collection.iter();
        if let Some(mut prev) = iter.next() {
            for (i, curr) in iter.enumerate() {
                if prev >= curr {
                    panic!(
                        "assertion failed: sequence is not strictly monotonic\n  violation at index {}: {:?} >= {:?}",
                        i, prev, curr
                    );
                }
                prev = curr;
            }
        }
    };
}

/// Assert that `needle` occurs in `haystack` as an ordered subsequence.
///
/// # Example
///
/// ```rust
/// use hostflash_test_helpers::assert_in_order;
///
/// assert_in_order!(&["acquire", "enable", "write", "disable", "release"], &["acquire", "write", "release"]);
/// ```
#[macro_export]
macro_rules! assert_in_order {
    ($haystack:expr, $needle:expr $(,)?) => {
        let haystack = $haystack;
        let needle = $needle;
        let mut pending = needle.iter().peekable();
        for item in haystack.iter() {
            if pending.peek().is_some_and(|want| *want == item) {
                pending.next();
            }
        }
        if let Some(missing) = pending.next() {
            panic!(
                "assertion failed: {:?} not found in order\n  haystack: {:?}",
                missing, haystack
            );
        }
    };
}
