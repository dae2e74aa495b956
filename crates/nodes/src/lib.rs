//! `nodes` crate — the `Executor` trait, the executor registry, and the
//! built-in executor implementations.
//!
//! Every executor — built-in and user-registered alike — implements
//! [`Executor`]. The engine crate's task runner dispatches execution
//! through this trait object, looking it up by name in an
//! [`ExecutorRegistry`].

pub mod builtins;
pub mod error;
pub mod mock;
pub mod registry;
pub mod traits;

pub use builtins::builtins;
pub use error::NodeError;
pub use registry::{ExecutorRegistry, RegistryError};
pub use traits::{ExecutionContext, Executor};
