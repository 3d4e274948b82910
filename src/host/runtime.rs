//! Contract every embeddable managed runtime satisfies.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::marshal::MarshalledValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeTypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

pub type MessageCallback = Arc<dyn Fn(MessageLevel, &str) + Send + Sync>;
pub type ExceptionCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct RuntimeSettings {
    pub runtime_directory: PathBuf,
    pub message_callback: MessageCallback,
    pub exception_callback: ExceptionCallback,
}

impl RuntimeSettings {
    /// Settings whose callbacks discard everything.
    pub fn silent(runtime_directory: impl Into<PathBuf>) -> Self {
        Self {
            runtime_directory: runtime_directory.into(),
            message_callback: Arc::new(|_, _| {}),
            exception_callback: Arc::new(|_| {}),
        }
    }
}

impl fmt::Debug for RuntimeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeSettings").field("runtime_directory", &self.runtime_directory).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeInitStatus {
    Success,
    /// The runtime's support library is missing from the runtime directory.
    SupportLibraryNotFound,
    SupportLibraryInitError,
    /// No runtime installation could be located.
    RuntimeNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAssembly {
    pub id: AssemblyId,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum AssemblyLoadError {
    #[error("assembly not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read assembly {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid assembly {}: {message}", .path.display())]
    Invalid { path: PathBuf, message: String },
    #[error("unknown load context {0:?}")]
    UnknownContext(ContextId),
    #[error("runtime is not initialized")]
    NotInitialized,
}

impl AssemblyLoadError {
    pub fn invalid(path: &Path, message: impl Into<String>) -> Self {
        AssemblyLoadError::Invalid { path: path.to_path_buf(), message: message.into() }
    }
}

/// Value shapes an internal call can exchange with managed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalType {
    String,
    Int64,
    Bool,
    Void,
}

pub type InternalFn = Arc<dyn Fn(&[MarshalledValue]) -> MarshalledValue + Send + Sync>;

/// Native function exposed to managed code under `class_name.name`.
#[derive(Clone)]
pub struct InternalCall {
    pub class_name: String,
    pub name: String,
    pub params: Vec<InternalType>,
    pub returns: InternalType,
    pub function: InternalFn,
}

impl InternalCall {
    pub fn new(
        class_name: impl Into<String>,
        name: impl Into<String>,
        params: Vec<InternalType>,
        returns: InternalType,
        function: impl Fn(&[MarshalledValue]) -> MarshalledValue + Send + Sync + 'static,
    ) -> Self {
        Self { class_name: class_name.into(), name: name.into(), params, returns, function: Arc::new(function) }
    }

    pub fn invoke(&self, args: &[MarshalledValue]) -> MarshalledValue {
        (self.function)(args)
    }
}

impl fmt::Debug for InternalCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalCall")
            .field("class_name", &self.class_name)
            .field("name", &self.name)
            .field("params", &self.params)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

/// Runtime driven by [`HostManager`](super::HostManager). Implementations own every managed
/// object they hand out; ids stay meaningful only until their load context is unloaded.
pub trait ManagedRuntime {
    fn initialize(&mut self, settings: &RuntimeSettings) -> RuntimeInitStatus;

    fn shutdown(&mut self);

    fn create_load_context(&mut self, name: &str) -> ContextId;

    /// Drops every assembly and instance owned by the context.
    fn unload_load_context(&mut self, context: ContextId);

    fn load_assembly(&mut self, context: ContextId, path: &Path) -> Result<LoadedAssembly, AssemblyLoadError>;

    fn find_type(&mut self, assembly: AssemblyId, full_name: &str) -> Option<RuntimeTypeId>;

    fn create_instance(&mut self, assembly: AssemblyId, type_id: RuntimeTypeId) -> Result<ObjectId>;

    fn invoke_method(&mut self, object: ObjectId, method: &str, args: &[MarshalledValue]) -> Result<MarshalledValue>;

    fn set_field(&mut self, object: ObjectId, field: &str, value: MarshalledValue) -> Result<()>;

    fn destroy_instance(&mut self, object: ObjectId);

    fn register_internal_calls(&mut self, assembly: AssemblyId, calls: &[InternalCall]) -> Result<()>;
}
