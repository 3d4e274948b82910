pub mod cli;
pub mod config;
pub mod dispatch;
pub mod export;
pub mod host;
pub mod marshal;
pub mod math_api;
pub mod reflection;
pub mod registry;
pub mod system;

pub use dispatch::GenericDispatcher;
pub use host::{HostManager, HostStatus};
pub use marshal::{DispatchResult, MarshalKind, MarshalledValue};
pub use reflection::{ReflectionSnapshot, Reflector};
pub use registry::NativeRegistry;
pub use system::ScriptingSystem;
