//! Backend implementations. The reference [`cpu`] backend ships with the
//! crate and self-registers under the driver name `"cpu"` the first time
//! [`crate::driver::registry::driver`] is consulted; any other backend is
//! an external collaborator that implements the same four capability
//! traits and registers itself the same way.

pub mod cpu;
