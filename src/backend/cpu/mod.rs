//! The reference CPU backend (C8): a complete, synchronous implementation
//! of the Driver/Device/Stream/Buffer contracts, registered under the name
//! `"cpu"`. Every math operation runs inline on the calling thread; there is
//! no actual queueing or asynchrony, only the bookkeeping the traits
//! require of a backend that might have some.

mod buffer;
mod device;
mod driver;
mod stream;

use std::sync::Arc;

use crate::driver::Driver;

pub use buffer::CpuBuffer;
pub use device::CpuDevice;
pub use driver::CpuDriver;
pub use stream::CpuStream;

/// Builds a fresh `"cpu"` driver instance. Called once by
/// [`crate::driver::registry::registry`] to seed the default registration;
/// callers that want an independent CPU driver (e.g. for test isolation)
/// may call it again.
#[must_use]
pub fn driver() -> Arc<dyn Driver> {
    log::debug!("constructing cpu driver");
    Arc::new(CpuDriver::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_reports_its_own_name() {
        assert_eq!(driver().name(), "cpu");
    }
}
