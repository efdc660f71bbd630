//! Scoped acquire/release brackets.
//!
//! A locker runs `acquire`, then the body, then `release` on every exit path
//! once `acquire` has succeeded. Lockers nest: the body of one bracket can
//! open another, and the inner release always runs before the outer one.
//!
//! ```
//! use hostflash_engine::locker::with_lock;
//!
//! let mut log = Vec::new();
//! let result: Result<u32, String> = with_lock(
//!     &mut log,
//!     |log| { log.push("acquire"); Ok(()) },
//!     |log| { log.push("release"); Ok(()) },
//!     |log| { log.push("body"); Err("body failed".to_string()) },
//! );
//! assert_eq!(result, Err("body failed".to_string()));
//! assert_eq!(log, ["acquire", "body", "release"]);
//! ```

use std::fmt::Display;

use tracing::{trace, warn};

/// What to do when `release` fails after a successful body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
    /// Surface the release failure to the caller
    #[default]
    Propagate,
    /// Log the release failure and keep the body's result
    LogOnly,
}

/// A named acquire/release bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locker {
    name: &'static str,
    policy: ReleasePolicy,
}

impl Locker {
    /// Create a locker that propagates release failures.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            policy: ReleasePolicy::Propagate,
        }
    }

    /// Make release fire-and-forget: its failure is logged, never returned.
    #[must_use]
    pub const fn best_effort(mut self) -> Self {
        self.policy = ReleasePolicy::LogOnly;
        self
    }

    /// Name used in log events.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Release policy in effect.
    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Run `body` between `acquire` and `release`.
    ///
    /// If `acquire` fails its error is returned and neither `body` nor
    /// `release` runs. Otherwise `release` runs exactly once whatever `body`
    /// returns. A body error takes precedence over a release error.
    ///
    /// # Errors
    ///
    /// Returns the first of: the acquire error, the body error, or (with
    /// [`ReleasePolicy::Propagate`]) the release error.
    pub fn run<T, R, E, A, Rel, B>(
        &self,
        target: &mut T,
        acquire: A,
        release: Rel,
        body: B,
    ) -> Result<R, E>
    where
        T: ?Sized,
        E: Display,
        A: FnOnce(&mut T) -> Result<(), E>,
        Rel: FnOnce(&mut T) -> Result<(), E>,
        B: FnOnce(&mut T) -> Result<R, E>,
    {
        acquire(target)?;
        trace!(locker = self.name, "acquired");

        let outcome = body(target);
        let released = release(target);

        match (outcome, released) {
            (Ok(value), Ok(())) => {
                trace!(locker = self.name, "released");
                Ok(value)
            }
            (Ok(value), Err(release_err)) => match self.policy {
                ReleasePolicy::Propagate => Err(release_err),
                ReleasePolicy::LogOnly => {
                    warn!(locker = self.name, error = %release_err, "release failed");
                    Ok(value)
                }
            },
            (Err(body_err), Ok(())) => {
                trace!(locker = self.name, "released after failure");
                Err(body_err)
            }
            (Err(body_err), Err(release_err)) => {
                warn!(
                    locker = self.name,
                    error = %release_err,
                    "release failed while unwinding from: {body_err}"
                );
                Err(body_err)
            }
        }
    }
}

/// Run `body` bracketed by `acquire` and `release` with a propagating locker.
///
/// # Errors
///
/// See [`Locker::run`].
pub fn with_lock<T, R, E, A, Rel, B>(target: &mut T, acquire: A, release: Rel, body: B) -> Result<R, E>
where
    T: ?Sized,
    E: Display,
    A: FnOnce(&mut T) -> Result<(), E>,
    Rel: FnOnce(&mut T) -> Result<(), E>,
    B: FnOnce(&mut T) -> Result<R, E>,
{
    Locker::new("resource").run(target, acquire, release, body)
}
