//! Tracing session guard
//!
//! At most one tracing session may be active on a compilation thread.
//! [`TracingSession::enter`] acquires the session and the returned guard
//! releases it when dropped, including during unwinding.

use std::cell::Cell;
use std::marker::PhantomData;

use thiserror::Error;

thread_local! {
    static TRACING: Cell<bool> = const { Cell::new(false) };
}

/// Session guard failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A session was entered while another one is active
    #[error("Cannot nest tracing contexts.")]
    Reentry,

    /// An operation that requires an active session ran outside of one
    #[error("{0}")]
    NotTracing(String),
}

/// Scoped tracing session
///
/// Holding a `TracingSession` means the current thread is tracing.
/// The guard is neither `Send` nor `Sync`: the flag it owns is per thread.
#[derive(Debug)]
pub struct TracingSession {
    _not_send: PhantomData<*const ()>,
}

impl TracingSession {
    /// Enter a new session. Fails immediately if one is already active.
    pub fn enter() -> Result<Self, SessionError> {
        TRACING.with(|flag| {
            if flag.get() {
                return Err(SessionError::Reentry);
            }
            flag.set(true);
            Ok(TracingSession {
                _not_send: PhantomData,
            })
        })
    }

    /// Leave the session. Equivalent to dropping the guard.
    pub fn exit(self) {}

    /// Whether a session is active on this thread
    pub fn is_active() -> bool {
        TRACING.with(|flag| flag.get())
    }

    /// Fail with `msg` unless a session is active
    pub fn check_active(msg: &str) -> Result<(), SessionError> {
        if Self::is_active() {
            Ok(())
        } else {
            Err(SessionError::NotTracing(msg.to_string()))
        }
    }
}

impl Drop for TracingSession {
    fn drop(&mut self) {
        TRACING.with(|flag| flag.set(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_and_exit() {
        assert!(!TracingSession::is_active());
        let session = TracingSession::enter().unwrap();
        assert!(TracingSession::is_active());
        session.exit();
        assert!(!TracingSession::is_active());
    }

    #[test]
    fn test_reentry_fails() {
        let _session = TracingSession::enter().unwrap();
        assert_eq!(TracingSession::enter().unwrap_err(), SessionError::Reentry);
        // The failed attempt must not release the outer session
        assert!(TracingSession::is_active());
    }

    #[test]
    fn test_released_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _session = TracingSession::enter().unwrap();
            panic!("abnormal exit");
        });
        assert!(result.is_err());
        assert!(!TracingSession::is_active());
    }

    #[test]
    fn test_check_active() {
        let err = TracingSession::check_active("needs tracing").unwrap_err();
        assert_eq!(format!("{}", err), "needs tracing");
        let _session = TracingSession::enter().unwrap();
        assert!(TracingSession::check_active("needs tracing").is_ok());
    }
}
