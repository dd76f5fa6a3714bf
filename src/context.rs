//! Ambient context (C7): a per-thread stack of partial
//! `{driver, device, stream, datatype, unchecked}` overrides.
//!
//! `with_context` pushes a frame for the duration of its body; lookups made
//! during that body resolve each field from the innermost frame that sets
//! it, falling back to outer frames, and finally failing with
//! [`Error::NoContext`] if no frame ever set it. This is scoped dynamic
//! state, not a global singleton — every tensor-creating operation also
//! accepts explicit overrides that bypass it entirely.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::driver::{Device, Driver, Stream};
use crate::element::DataType;
use crate::error::Error;

/// A partial set of context overrides, pushed by [`with_context`].
///
/// Unset fields resolve from the next-outermost active context, which is
/// why every field is optional rather than required up front.
#[derive(Clone, Default)]
pub struct ContextOptions {
    driver: Option<Arc<dyn Driver>>,
    device: Option<Arc<dyn Device>>,
    stream: Option<Arc<dyn Stream>>,
    datatype: Option<DataType>,
    unchecked: Option<bool>,
}

impl ContextOptions {
    /// An empty set of overrides.
    #[must_use]
    pub fn new() -> ContextOptions {
        ContextOptions::default()
    }

    /// Overrides the ambient driver.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> ContextOptions {
        self.driver = Some(driver);
        self
    }

    /// Overrides the ambient device.
    #[must_use]
    pub fn device(mut self, device: Arc<dyn Device>) -> ContextOptions {
        self.device = Some(device);
        self
    }

    /// Overrides the ambient stream.
    #[must_use]
    pub fn stream(mut self, stream: Arc<dyn Stream>) -> ContextOptions {
        self.stream = Some(stream);
        self
    }

    /// Overrides the ambient datatype used by tensor-creating operations
    /// that do not specify one explicitly.
    #[must_use]
    pub fn datatype(mut self, datatype: DataType) -> ContextOptions {
        self.datatype = Some(datatype);
        self
    }

    /// Overrides the ambient `unchecked` flag for numeric conversions.
    #[must_use]
    pub fn unchecked(mut self, unchecked: bool) -> ContextOptions {
        self.unchecked = Some(unchecked);
        self
    }
}

thread_local! {
    static CONTEXTS: RefCell<Vec<ContextOptions>> = const { RefCell::new(Vec::new()) };
}

/// A fully-resolved view of the ambient context stack at the moment
/// [`Context::current`] was called.
pub struct Context {
    driver: Option<Arc<dyn Driver>>,
    device: Option<Arc<dyn Device>>,
    stream: Option<Arc<dyn Stream>>,
    datatype: Option<DataType>,
    unchecked: bool,
}

impl Context {
    /// Resolves the current thread's context by walking its stack from
    /// innermost to outermost, taking the first frame that sets each field.
    #[must_use]
    pub fn current() -> Context {
        CONTEXTS.with(|contexts| {
            let contexts = contexts.borrow();
            let mut driver = None;
            let mut device = None;
            let mut stream = None;
            let mut datatype = None;
            let mut unchecked = None;
            for frame in contexts.iter().rev() {
                driver = driver.or_else(|| frame.driver.clone());
                device = device.or_else(|| frame.device.clone());
                stream = stream.or_else(|| frame.stream.clone());
                datatype = datatype.or(frame.datatype);
                unchecked = unchecked.or(frame.unchecked);
            }
            Context {
                driver,
                device,
                stream,
                datatype,
                unchecked: unchecked.unwrap_or(false),
            }
        })
    }

    /// The resolved ambient driver.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoContext`] if no active frame set a driver.
    pub fn driver(&self) -> Result<Arc<dyn Driver>, Error> {
        self.driver
            .clone()
            .ok_or_else(|| Error::NoContext("no driver set in the ambient context".into()))
    }

    /// The resolved ambient device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoContext`] if no active frame set a device.
    pub fn device(&self) -> Result<Arc<dyn Device>, Error> {
        self.device
            .clone()
            .ok_or_else(|| Error::NoContext("no device set in the ambient context".into()))
    }

    /// The resolved ambient stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoContext`] if no active frame set a stream.
    pub fn stream(&self) -> Result<Arc<dyn Stream>, Error> {
        self.stream
            .clone()
            .ok_or_else(|| Error::NoContext("no stream set in the ambient context".into()))
    }

    /// The resolved ambient datatype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoContext`] if no active frame set a datatype.
    pub fn datatype(&self) -> Result<DataType, Error> {
        self.datatype
            .ok_or_else(|| Error::NoContext("no datatype set in the ambient context".into()))
    }

    /// The resolved ambient `unchecked` flag; `false` if never set.
    #[must_use]
    pub fn unchecked(&self) -> bool {
        self.unchecked
    }
}

/// Pushes `opts` onto the current thread's context stack, runs `body`, then
/// pops it — on both normal and unwinding exit.
///
/// # Errors
///
/// Propagates whatever `body` returns.
pub fn with_context<T>(opts: ContextOptions, body: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
    CONTEXTS.with(|contexts| contexts.borrow_mut().push(opts));
    let outcome = panic::catch_unwind(AssertUnwindSafe(body));
    CONTEXTS.with(|contexts| {
        contexts.borrow_mut().pop();
    });
    match outcome {
        Ok(result) => result,
        Err(panic) => panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu;

    #[test]
    fn missing_context_fails_with_no_context() {
        assert!(matches!(Context::current().driver(), Err(Error::NoContext(_))));
    }

    #[test]
    fn inner_context_overrides_outer() {
        let driver = cpu::driver();
        with_context(ContextOptions::new().datatype(DataType::F32), || {
            assert_eq!(Context::current().datatype().unwrap(), DataType::F32);
            with_context(ContextOptions::new().datatype(DataType::I32).driver(driver.clone()), || {
                let ctx = Context::current();
                assert_eq!(ctx.datatype().unwrap(), DataType::I32);
                assert_eq!(ctx.driver().unwrap().name(), driver.name());
                Ok(())
            })
        })
        .unwrap();
        assert!(matches!(Context::current().datatype(), Err(Error::NoContext(_))));
    }

    #[test]
    fn outer_fields_are_visible_through_inner_frame() {
        let driver = cpu::driver();
        with_context(ContextOptions::new().driver(driver.clone()), || {
            with_context(ContextOptions::new().unchecked(true), || {
                let ctx = Context::current();
                assert_eq!(ctx.driver().unwrap().name(), driver.name());
                assert!(ctx.unchecked());
                Ok(())
            })
        })
        .unwrap();
    }
}
