//! A portable compute-abstraction core.
//!
//! This crate defines the driver/device/stream/buffer contract that every
//! backend must satisfy, a dimensions (shape + strides + offset) descriptor
//! with reshape/select/transpose/broadcast math, a tensor view layer built on
//! top of both, and a per-stream math dispatch table for elementwise,
//! reduction, and matrix-multiply operations.
//!
//! A single in-process reference backend ([`backend::cpu`]) is included and
//! registered under the driver name `"cpu"`; other backends are external
//! collaborators that implement [`driver::Driver`]/[`driver::Device`]/
//! [`driver::Stream`]/[`driver::DeviceBuffer`] and register themselves with
//! [`driver::registry::register_driver`].

pub mod backend;
pub mod context;
pub mod dims;
pub mod driver;
pub mod element;
pub mod error;
pub mod math;
pub mod scope;
pub mod tensor;

pub use context::{Context, ContextOptions, with_context};
pub use dims::{Dimensions, Selector};
pub use element::{DataType, Element, Scalar};
pub use error::Error;
pub use scope::{detach, track, with_scope};
pub use tensor::{Tensor, TensorOptions, ToTensorOptions};
