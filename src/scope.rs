//! Resource scope (C1): a nestable, per-thread stack of release callbacks.
//!
//! `with_scope` pushes a frame, runs its body, and pops the frame, releasing
//! every resource registered with [`track`] in reverse order — on both
//! normal and unwinding exit. A tracked resource is released exactly once;
//! `detach` removes it from the innermost scope before that happens, for
//! transfer to an outer scope or the caller.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

/// A value that can be released exactly once, for tracking by a [`scope`](self).
pub trait Resource {
    /// Releases this resource. Called at most once per [`track`] call.
    ///
    /// # Errors
    ///
    /// Implementations return an error describing why release failed
    /// (backend OOM during a deferred free, a still-outstanding view, ...).
    fn release(&self) -> Result<(), Error>;
}

type ReleaseFn = Box<dyn FnOnce() -> Result<(), Error>>;

struct Frame {
    entries: Vec<(u64, ReleaseFn)>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// A resource registered with the current innermost scope by [`track`].
///
/// Derefs to the wrapped resource for ergonomic use; pass it to [`detach`]
/// to remove its release callback before the scope exits.
pub struct Tracked<R> {
    id: u64,
    resource: R,
}

impl<R> std::ops::Deref for Tracked<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

/// Pushes a new scope, runs `body`, then pops the scope and releases every
/// resource registered with [`track`] during `body`, innermost-registered
/// first (reverse registration order).
///
/// If `body` returns `Err`, that error is returned even if release also
/// fails (release failures are logged, not silently dropped, but they
/// never mask the error that caused the scope to unwind). If `body`
/// succeeds but release fails, the aggregated
/// [`Error::Resource`](crate::error::Error::Resource) is returned.
///
/// # Errors
///
/// Propagates `body`'s error, or an aggregated [`Error::Resource`] if every
/// other part of `body` succeeded but one or more tracked resources failed
/// to release.
pub fn with_scope<T>(body: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    SCOPES.with(|scopes| scopes.borrow_mut().push(Frame { entries: Vec::new() }));

    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    let release_result = pop_and_release();

    match outcome {
        Ok(Ok(value)) => release_result.map(|()| value),
        Ok(Err(body_err)) => {
            if let Err(release_err) = release_result {
                log::error!("scope release failed while propagating {body_err}: {release_err}");
            }
            Err(body_err)
        }
        Err(panic) => {
            if let Err(release_err) = release_result {
                log::error!("scope release failed during an unwinding panic: {release_err}");
            }
            panic::resume_unwind(panic);
        }
    }
}

fn pop_and_release() -> Result<(), Error> {
    let frame = SCOPES.with(|scopes| {
        scopes
            .borrow_mut()
            .pop()
            .expect("pop_and_release called without a matching push")
    });
    let mut failures = Vec::new();
    for (_, release) in frame.entries.into_iter().rev() {
        if let Err(err) = release() {
            log::warn!("resource release failed: {err}");
            failures.push(err);
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::aggregate_resource_failures(failures))
    }
}

/// Registers `resource`'s release callback with the innermost scope and
/// returns a handle to it.
///
/// # Panics
///
/// Panics if called outside any [`with_scope`] body.
pub fn track<R>(resource: R) -> Tracked<R>
where
    R: Resource + Clone + 'static,
{
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let for_release = resource.clone();
    SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        let frame = scopes
            .last_mut()
            .expect("track() called outside with_scope");
        frame
            .entries
            .push((id, Box::new(move || for_release.release())));
    });
    Tracked { id, resource }
}

/// Removes `tracked`'s release callback from the innermost scope and
/// returns the underlying resource, un-tracked. A no-op (beyond unwrapping)
/// if the innermost scope is not the one that tracked it.
pub fn detach<R>(tracked: Tracked<R>) -> R {
    SCOPES.with(|scopes| {
        if let Some(frame) = scopes.borrow_mut().last_mut() {
            frame.entries.retain(|(id, _)| *id != tracked.id);
        }
    });
    tracked.resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct Counter(Arc<Mutex<Vec<&'static str>>>, &'static str);

    impl Resource for Counter {
        fn release(&self) -> Result<(), Error> {
            self.0.lock().unwrap().push(self.1);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct Failing;

    impl Resource for Failing {
        fn release(&self) -> Result<(), Error> {
            Err(Error::Device("simulated release failure".into()))
        }
    }

    #[test]
    fn releases_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        with_scope(|| {
            track(Counter(log.clone(), "a"));
            track(Counter(log.clone(), "b"));
            Ok(())
        })
        .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn detach_prevents_release() {
        let log = Arc::new(Mutex::new(Vec::new()));
        with_scope(|| {
            let tracked = track(Counter(log.clone(), "a"));
            let _resource = detach(tracked);
            Ok(())
        })
        .unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn body_error_takes_priority_over_release_failure() {
        let result: Result<(), Error> = with_scope(|| {
            track(Failing);
            Err(Error::Shape("body failed".into()))
        });
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn release_failures_are_aggregated() {
        let result: Result<(), Error> = with_scope(|| {
            track(Failing);
            track(Failing);
            Ok(())
        });
        match result {
            Err(Error::Resource { secondary, .. }) => assert_eq!(secondary.len(), 1),
            other => panic!("expected aggregated resource error, got {other:?}"),
        }
    }

    #[test]
    fn nested_scopes_release_independently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        with_scope(|| {
            track(Counter(log.clone(), "outer"));
            with_scope(|| {
                track(Counter(log.clone(), "inner"));
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["inner", "outer"]);
    }
}
