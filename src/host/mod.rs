//! Lifecycle of the embedded managed runtime: boot, core and user load contexts, type lookup,
//! instances and hot reload of the user assembly.

mod handles;
mod memory;
mod rhai_runtime;
mod runtime;
mod watch;

pub use handles::{AssemblyArena, AssemblyEntry, AssemblyHandle, ManagedObject, TypeHandle};
pub use memory::{InMemoryRuntime, MemoryAssembly, MemoryFields, MemoryMethod, MemoryType};
pub use rhai_runtime::RhaiRuntime;
pub use runtime::{
    AssemblyId, AssemblyLoadError, ContextId, ExceptionCallback, InternalCall, InternalFn, InternalType,
    LoadedAssembly, ManagedRuntime, MessageCallback, MessageLevel, ObjectId, RuntimeInitStatus, RuntimeSettings,
    RuntimeTypeId,
};
pub use watch::{AssemblyChange, AssemblyRole, AssemblyWatcher};

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::HostConfig;
use crate::marshal::MarshalledValue;

pub const CORE_CONTEXT_NAME: &str = "KestrelCore";
pub const USER_CONTEXT_NAME: &str = "KestrelUser";
pub const ASSEMBLY_EXTENSION: &str = "rhai";
const MAX_LOGGED_MESSAGE: usize = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostStatus {
    #[error("success")]
    Success,
    #[error("host is not initialized")]
    NotInitialized,
    #[error("runtime support library not found")]
    CoralManagedNotFound,
    #[error("runtime support library failed to initialize")]
    CoralInitError,
    #[error("managed runtime not found")]
    DotNetNotFound,
    #[error("core assembly failed to load")]
    AssemblyLoadFailed,
    #[error("host is already initialized")]
    AlreadyInitialized,
}

impl HostStatus {
    pub fn is_success(self) -> bool {
        self == HostStatus::Success
    }
}

impl From<RuntimeInitStatus> for HostStatus {
    fn from(status: RuntimeInitStatus) -> Self {
        match status {
            RuntimeInitStatus::Success => HostStatus::Success,
            RuntimeInitStatus::SupportLibraryNotFound => HostStatus::CoralManagedNotFound,
            RuntimeInitStatus::SupportLibraryInitError => HostStatus::CoralInitError,
            RuntimeInitStatus::RuntimeNotFound => HostStatus::DotNetNotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Uninitialized,
    Initializing,
    Ready,
    ReloadingUser,
    ShuttingDown,
}

/// Owns one managed runtime and the core and user load contexts inside it.
///
/// The core assembly is loaded into its own context and preloaded into the user context so user
/// code can resolve core types; only the user context is torn down on reload. Reloading while
/// calls into managed code are in flight on another path is not supported.
pub struct HostManager {
    state: HostState,
    config: HostConfig,
    runtime: Box<dyn ManagedRuntime>,
    core_context: Option<ContextId>,
    user_context: Option<ContextId>,
    assemblies: AssemblyArena,
    core_assembly: Option<AssemblyHandle>,
    user_assembly: Option<AssemblyHandle>,
    core_types: HashMap<String, TypeHandle>,
    user_types: HashMap<String, TypeHandle>,
    internal_calls: Vec<InternalCall>,
    core_path: PathBuf,
}

impl HostManager {
    pub fn new(runtime: Box<dyn ManagedRuntime>) -> Self {
        Self {
            state: HostState::Uninitialized,
            config: HostConfig::default(),
            runtime,
            core_context: None,
            user_context: None,
            assemblies: AssemblyArena::new(),
            core_assembly: None,
            user_assembly: None,
            core_types: HashMap::new(),
            user_types: HashMap::new(),
            internal_calls: Vec::new(),
            core_path: PathBuf::new(),
        }
    }

    pub fn with_rhai() -> Self {
        Self::new(Box::new(RhaiRuntime::new()))
    }

    /// Table registered against the core assembly on the next `initialize`.
    pub fn set_internal_calls(&mut self, calls: Vec<InternalCall>) {
        self.internal_calls = calls;
    }

    pub fn initialize(&mut self, config: HostConfig) -> HostStatus {
        if self.state != HostState::Uninitialized {
            log::warn!("[host] initialize called while {:?}", self.state);
            return HostStatus::AlreadyInitialized;
        }
        self.state = HostState::Initializing;
        self.config = config;

        let settings = log_settings(&self.config.runtime_directory);
        let status = HostStatus::from(self.runtime.initialize(&settings));
        if !status.is_success() {
            log::error!(
                "[host] failed to start managed runtime from '{}': {status}",
                self.config.runtime_directory.display()
            );
            self.state = HostState::Uninitialized;
            return status;
        }

        let core_context = self.runtime.create_load_context(CORE_CONTEXT_NAME);
        let user_context = self.runtime.create_load_context(USER_CONTEXT_NAME);
        self.core_context = Some(core_context);
        self.user_context = Some(user_context);

        self.core_path = self.resolve_core_path();
        if !self.core_path.exists() {
            log::error!(
                "[host] core assembly not found at '{}'. Build the core scripts and copy {}.{ASSEMBLY_EXTENSION} \
                 there, or set host.core_assembly_path.",
                self.core_path.display(),
                self.config.expected_core_assembly_name
            );
        }

        let core = match self.runtime.load_assembly(core_context, &self.core_path) {
            Ok(loaded) => loaded,
            Err(err) => {
                log::error!("[host] failed to load core assembly: {:#}", anyhow::Error::new(err));
                self.teardown();
                return HostStatus::AssemblyLoadFailed;
            }
        };
        if core.name != self.config.expected_core_assembly_name {
            log::error!(
                "[host] core assembly is named '{}' but '{}' was expected",
                core.name,
                self.config.expected_core_assembly_name
            );
        }
        let core_id = core.id;
        self.core_assembly = Some(self.assemblies.insert(AssemblyEntry {
            id: core.id,
            name: core.name,
            context: core_context,
            path: self.core_path.clone(),
        }));

        if !self.internal_calls.is_empty() {
            match self.runtime.register_internal_calls(core_id, &self.internal_calls) {
                Ok(()) => log::info!("[host] registered {} internal calls", self.internal_calls.len()),
                Err(err) => log::error!("[host] failed to register internal calls: {err:#}"),
            }
        }

        if let Err(err) = self.runtime.load_assembly(user_context, &self.core_path) {
            log::warn!("[host] failed to preload core into the user context: {:#}", anyhow::Error::new(err));
        }
        self.load_user_assembly(user_context);

        self.state = HostState::Ready;
        log::info!("[host] ready (core: '{}')", self.core_path.display());
        HostStatus::Success
    }

    pub fn shutdown(&mut self) {
        if self.state == HostState::Uninitialized {
            return;
        }
        self.state = HostState::ShuttingDown;
        self.teardown();
        log::info!("[host] shut down");
    }

    /// Unloads everything and stops the runtime; leaves the manager `Uninitialized`.
    fn teardown(&mut self) {
        self.core_types.clear();
        self.user_types.clear();
        self.user_assembly = None;
        self.core_assembly = None;
        for context in [self.user_context.take(), self.core_context.take()].into_iter().flatten() {
            self.assemblies.release_context(context);
            self.runtime.unload_load_context(context);
        }
        self.runtime.shutdown();
        self.state = HostState::Uninitialized;
    }

    fn resolve_core_path(&self) -> PathBuf {
        if !self.config.core_assembly_path.as_os_str().is_empty() {
            return self.config.core_assembly_path.clone();
        }
        self.config
            .project_path
            .join("Bin")
            .join("Scripts")
            .join(format!("{}.{ASSEMBLY_EXTENSION}", self.config.expected_core_assembly_name))
    }

    fn load_user_assembly(&mut self, context: ContextId) -> bool {
        let path = self.config.user_assembly_path.clone();
        if path.as_os_str().is_empty() {
            log::info!("[host] no user assembly configured");
            return true;
        }
        match self.runtime.load_assembly(context, &path) {
            Ok(loaded) => {
                log::info!("[host] loaded user assembly '{}'", loaded.name);
                self.user_assembly =
                    Some(self.assemblies.insert(AssemblyEntry { id: loaded.id, name: loaded.name, context, path }));
                true
            }
            Err(err) => {
                log::warn!("[host] user scripts disabled: {:#}", anyhow::Error::new(err));
                false
            }
        }
    }

    /// Loads an extra assembly into the user context.
    pub fn load_assembly(&mut self, path: impl AsRef<Path>) -> Option<AssemblyHandle> {
        let path = path.as_ref();
        let context = match (self.state, self.user_context) {
            (HostState::Ready, Some(context)) => context,
            _ => {
                log::warn!("[host] cannot load '{}': host is not ready", path.display());
                return None;
            }
        };
        match self.runtime.load_assembly(context, path) {
            Ok(loaded) => Some(self.assemblies.insert(AssemblyEntry {
                id: loaded.id,
                name: loaded.name,
                context,
                path: path.to_path_buf(),
            })),
            Err(err) => {
                log::error!("[host] failed to load assembly: {:#}", anyhow::Error::new(err));
                None
            }
        }
    }

    /// Rebuilds the user context from disk. Core handles and cached core types survive; every
    /// user handle goes stale.
    pub fn reload_user_assemblies(&mut self) -> bool {
        if self.state != HostState::Ready {
            log::warn!("[host] reload requested while {:?}", self.state);
            return false;
        }
        if !self.config.enable_hot_reload {
            log::warn!("[host] hot reload is disabled");
            return false;
        }
        self.state = HostState::ReloadingUser;
        self.user_types.clear();
        self.user_assembly = None;
        if let Some(context) = self.user_context.take() {
            self.assemblies.release_context(context);
            self.runtime.unload_load_context(context);
        }
        let context = self.runtime.create_load_context(USER_CONTEXT_NAME);
        self.user_context = Some(context);

        let reloaded = match self.runtime.load_assembly(context, &self.core_path) {
            Ok(_) => self.load_user_assembly(context),
            Err(err) => {
                log::warn!("[host] reload failed to preload core: {:#}", anyhow::Error::new(err));
                false
            }
        };
        self.state = HostState::Ready;
        if reloaded {
            log::info!("[host] user assemblies reloaded");
        }
        reloaded
    }

    pub fn core_type(&mut self, full_name: &str) -> Option<TypeHandle> {
        if !self.is_initialized() {
            return None;
        }
        resolve_type(&mut *self.runtime, &self.assemblies, &mut self.core_types, self.core_assembly, full_name, "core")
    }

    pub fn user_type(&mut self, full_name: &str) -> Option<TypeHandle> {
        if !self.is_initialized() {
            return None;
        }
        resolve_type(&mut *self.runtime, &self.assemblies, &mut self.user_types, self.user_assembly, full_name, "user")
    }

    pub fn create_instance(&mut self, type_handle: TypeHandle) -> ManagedObject {
        if !self.is_initialized() {
            return ManagedObject::empty();
        }
        let Some(entry) = self.assemblies.get(type_handle.assembly) else {
            log::warn!("[host] cannot create instance: type handle is stale");
            return ManagedObject::empty();
        };
        match self.runtime.create_instance(entry.id, type_handle.local) {
            Ok(object) => ManagedObject::new(object, type_handle),
            Err(err) => {
                log::warn!("[host] failed to create instance in '{}': {err:#}", entry.name);
                ManagedObject::empty()
            }
        }
    }

    pub fn invoke_method(
        &mut self,
        object: &ManagedObject,
        method: &str,
        args: &[MarshalledValue],
    ) -> Option<MarshalledValue> {
        let object_id = self.live_object(object, method)?;
        match self.runtime.invoke_method(object_id, method, args) {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("[host] {method} failed: {}", truncate_message(&format!("{err:#}")));
                None
            }
        }
    }

    pub fn set_field(&mut self, object: &ManagedObject, field: &str, value: MarshalledValue) -> bool {
        let Some(object_id) = self.live_object(object, field) else {
            return false;
        };
        match self.runtime.set_field(object_id, field, value) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("[host] failed to set field '{field}': {err:#}");
                false
            }
        }
    }

    pub fn destroy_instance(&mut self, object: ManagedObject) {
        // Instances of unloaded assemblies went with their context.
        if let (Some(object_id), Some(handle)) = (object.object_id(), object.type_handle()) {
            if self.is_type_valid(handle) {
                self.runtime.destroy_instance(object_id);
            }
        }
    }

    fn live_object(&self, object: &ManagedObject, member: &str) -> Option<ObjectId> {
        if !self.is_initialized() {
            return None;
        }
        let (Some(object_id), Some(handle)) = (object.object_id(), object.type_handle()) else {
            log::warn!("[host] '{member}' used on an empty managed object");
            return None;
        };
        if !self.is_type_valid(handle) {
            log::warn!("[host] '{member}' used on an instance whose assembly was unloaded");
            return None;
        }
        Some(object_id)
    }

    pub fn is_assembly_valid(&self, handle: AssemblyHandle) -> bool {
        self.assemblies.contains(handle)
    }

    pub fn is_type_valid(&self, handle: TypeHandle) -> bool {
        self.assemblies.contains(handle.assembly)
    }

    pub fn assembly(&self, handle: AssemblyHandle) -> Option<&AssemblyEntry> {
        self.assemblies.get(handle)
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, HostState::Ready | HostState::ReloadingUser)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn core_assembly(&self) -> Option<AssemblyHandle> {
        self.core_assembly
    }

    pub fn user_assembly(&self) -> Option<AssemblyHandle> {
        self.user_assembly
    }

    pub fn core_assembly_path(&self) -> &Path {
        &self.core_path
    }
}

impl Drop for HostManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_type(
    runtime: &mut dyn ManagedRuntime,
    assemblies: &AssemblyArena,
    cache: &mut HashMap<String, TypeHandle>,
    assembly: Option<AssemblyHandle>,
    full_name: &str,
    label: &str,
) -> Option<TypeHandle> {
    if let Some(cached) = cache.get(full_name).copied() {
        if assemblies.contains(cached.assembly) {
            return Some(cached);
        }
        cache.remove(full_name);
    }
    let handle = assembly?;
    let entry = assemblies.get(handle)?;
    match runtime.find_type(entry.id, full_name) {
        Some(local) => {
            let type_handle = TypeHandle { assembly: handle, local };
            cache.insert(full_name.to_string(), type_handle);
            Some(type_handle)
        }
        None => {
            log::warn!("[host] type '{full_name}' not found in {label} assembly '{}'", entry.name);
            None
        }
    }
}

fn log_settings(runtime_directory: &Path) -> RuntimeSettings {
    RuntimeSettings {
        runtime_directory: runtime_directory.to_path_buf(),
        message_callback: Arc::new(|level: MessageLevel, message: &str| {
            let message = truncate_message(message);
            match level {
                MessageLevel::Info => log::info!("[runtime] {message}"),
                MessageLevel::Warning => log::warn!("[runtime] {message}"),
                MessageLevel::Error => log::error!("[runtime] {message}"),
            }
        }),
        exception_callback: Arc::new(|message: &str| {
            log::error!("[runtime] unhandled exception: {}", truncate_exception(message));
        }),
    }
}

fn truncation_point(message: &str) -> Option<usize> {
    if message.len() <= MAX_LOGGED_MESSAGE {
        return None;
    }
    let mut end = MAX_LOGGED_MESSAGE;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    Some(end)
}

pub(crate) fn truncate_message(message: &str) -> Cow<'_, str> {
    match truncation_point(message) {
        Some(end) => Cow::Owned(format!("{}... (truncated)", &message[..end])),
        None => Cow::Borrowed(message),
    }
}

pub(crate) fn truncate_exception(message: &str) -> Cow<'_, str> {
    match truncation_point(message) {
        Some(end) => Cow::Owned(format!("{}... (truncated, full length: {})", &message[..end], message.len())),
        None => Cow::Borrowed(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORE: &str = "project/Bin/Scripts/Kestrel.Core.rhai";
    const USER: &str = "project/Bin/Scripts/Game.rhai";

    fn core_assembly() -> MemoryAssembly {
        MemoryAssembly::new("Kestrel.Core").with_type(
            MemoryType::new("Kestrel.Core.Clock")
                .field("ticks", MarshalledValue::Int64(0))
                .method("Tick", |fields, _| {
                    let ticks = fields.get("ticks").and_then(MarshalledValue::as_i64).unwrap_or(0) + 1;
                    fields.insert("ticks".into(), MarshalledValue::Int64(ticks));
                    Ok(MarshalledValue::Int64(ticks))
                }),
        )
    }

    fn user_assembly(greeting: &'static str) -> MemoryAssembly {
        MemoryAssembly::new("Game").with_type(
            MemoryType::new("Game.Player")
                .method("Greet", move |_, _| Ok(MarshalledValue::String(greeting.to_string())))
                .method("Fail", |_, _| Err(anyhow::anyhow!("boom"))),
        )
    }

    fn config() -> HostConfig {
        HostConfig {
            project_path: PathBuf::from("project"),
            user_assembly_path: PathBuf::from(USER),
            enable_hot_reload: true,
            ..HostConfig::default()
        }
    }

    fn ready_host() -> (HostManager, InMemoryRuntime) {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, core_assembly());
        probe.define_assembly(USER, user_assembly("hello"));
        let mut host = HostManager::new(Box::new(probe.clone()));
        assert_eq!(host.initialize(config()), HostStatus::Success);
        (host, probe)
    }

    #[test]
    fn default_core_path_resolves_under_project() {
        let (host, probe) = ready_host();
        assert_eq!(host.state(), HostState::Ready);
        assert_eq!(host.core_assembly_path(), Path::new(CORE));
        assert_eq!(probe.live_contexts(), vec![CORE_CONTEXT_NAME.to_string(), USER_CONTEXT_NAME.to_string()]);
        // core, core preloaded into user, user
        assert_eq!(probe.loaded_assembly_count(), 3);
    }

    #[test]
    fn double_initialize_is_rejected_without_state_change() {
        let (mut host, probe) = ready_host();
        assert_eq!(host.initialize(config()), HostStatus::AlreadyInitialized);
        assert_eq!(host.state(), HostState::Ready);
        assert_eq!(probe.live_contexts().len(), 2);
    }

    #[test]
    fn runtime_boot_failures_map_to_host_status() {
        for (failure, expected) in [
            (RuntimeInitStatus::SupportLibraryNotFound, HostStatus::CoralManagedNotFound),
            (RuntimeInitStatus::SupportLibraryInitError, HostStatus::CoralInitError),
            (RuntimeInitStatus::RuntimeNotFound, HostStatus::DotNetNotFound),
        ] {
            let probe = InMemoryRuntime::new();
            probe.fail_initialize_with(failure);
            let mut host = HostManager::new(Box::new(probe.clone()));
            assert_eq!(host.initialize(config()), expected);
            assert_eq!(host.state(), HostState::Uninitialized);
        }
    }

    #[test]
    fn missing_core_tears_the_runtime_down() {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(USER, user_assembly("hello"));
        let mut host = HostManager::new(Box::new(probe.clone()));
        assert_eq!(host.initialize(config()), HostStatus::AssemblyLoadFailed);
        assert_eq!(host.state(), HostState::Uninitialized);
        assert!(!probe.is_initialized());
        assert!(probe.live_contexts().is_empty());
        assert!(host.core_type("Kestrel.Core.Clock").is_none());
    }

    #[test]
    fn missing_user_assembly_only_disables_user_scripts() {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, core_assembly());
        let mut host = HostManager::new(Box::new(probe.clone()));
        assert_eq!(host.initialize(config()), HostStatus::Success);
        assert!(host.user_assembly().is_none());
        assert!(host.user_type("Game.Player").is_none());
        assert!(host.core_type("Kestrel.Core.Clock").is_some());
    }

    #[test]
    fn internal_calls_are_registered_against_core() {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, core_assembly());
        let mut host = HostManager::new(Box::new(probe.clone()));
        host.set_internal_calls(vec![InternalCall::new("Test", "Answer", Vec::new(), InternalType::Int64, |_| {
            MarshalledValue::Int64(42)
        })]);
        assert_eq!(host.initialize(config()), HostStatus::Success);
        assert_eq!(probe.internal_call_names(), vec!["Answer".to_string()]);
        assert_eq!(probe.call_internal("Answer", &[]), Some(MarshalledValue::Int64(42)));
    }

    #[test]
    fn registration_failure_is_not_fatal() {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, core_assembly());
        probe.fail_internal_call_registration(true);
        let mut host = HostManager::new(Box::new(probe.clone()));
        host.set_internal_calls(vec![InternalCall::new("Test", "Noop", Vec::new(), InternalType::Void, |_| {
            MarshalledValue::Void
        })]);
        assert_eq!(host.initialize(config()), HostStatus::Success);
    }

    #[test]
    fn instances_invoke_and_set_fields() {
        let (mut host, _probe) = ready_host();
        let clock = host.core_type("Kestrel.Core.Clock").expect("clock type");
        assert_eq!(host.core_type("Kestrel.Core.Clock"), Some(clock), "lookups are cached");
        let object = host.create_instance(clock);
        assert!(!object.is_empty());
        assert_eq!(host.invoke_method(&object, "Tick", &[]), Some(MarshalledValue::Int64(1)));
        assert!(host.set_field(&object, "ticks", MarshalledValue::Int64(10)));
        assert_eq!(host.invoke_method(&object, "Tick", &[]), Some(MarshalledValue::Int64(11)));
        assert_eq!(host.invoke_method(&object, "Missing", &[]), None);
        host.destroy_instance(object);
        assert_eq!(host.invoke_method(&object, "Tick", &[]), None);
        assert!(host.core_type("Kestrel.Core.Missing").is_none());
    }

    #[test]
    fn shutdown_is_idempotent_and_invalidates_lookups() {
        let (mut host, probe) = ready_host();
        let clock = host.core_type("Kestrel.Core.Clock").expect("clock type");
        host.shutdown();
        host.shutdown();
        assert_eq!(host.state(), HostState::Uninitialized);
        assert!(!host.is_type_valid(clock));
        assert!(host.core_type("Kestrel.Core.Clock").is_none());
        assert!(host.create_instance(clock).is_empty());
        assert!(!probe.is_initialized());
        assert_eq!(host.initialize(config()), HostStatus::Success, "host can be restarted");
    }

    #[test]
    fn reload_replaces_user_handles_and_keeps_core() {
        let (mut host, probe) = ready_host();
        let clock = host.core_type("Kestrel.Core.Clock").expect("clock type");
        let player = host.user_type("Game.Player").expect("player type");
        let old_object = host.create_instance(player);
        assert_eq!(host.invoke_method(&old_object, "Greet", &[]), Some(MarshalledValue::String("hello".into())));

        probe.define_assembly(USER, user_assembly("rebuilt"));
        assert!(host.reload_user_assemblies());
        assert!(!host.is_type_valid(player), "old user handles must be stale");
        assert!(host.is_type_valid(clock), "core handles survive reload");
        assert_eq!(host.invoke_method(&old_object, "Greet", &[]), None);

        let player = host.user_type("Game.Player").expect("reloaded player type");
        let object = host.create_instance(player);
        assert_eq!(host.invoke_method(&object, "Greet", &[]), Some(MarshalledValue::String("rebuilt".into())));
        assert_eq!(host.state(), HostState::Ready);
    }

    #[test]
    fn failed_reload_leaves_host_ready_without_user_assembly() {
        let (mut host, probe) = ready_host();
        probe.remove_assembly(USER);
        assert!(!host.reload_user_assemblies());
        assert_eq!(host.state(), HostState::Ready);
        assert!(host.user_assembly().is_none());
        assert!(host.core_type("Kestrel.Core.Clock").is_some());
    }

    #[test]
    fn reload_requires_hot_reload_enabled() {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, core_assembly());
        let mut host = HostManager::new(Box::new(probe));
        assert!(!host.reload_user_assemblies(), "reload before initialize must fail");
        let status = host.initialize(HostConfig { enable_hot_reload: false, ..config() });
        assert_eq!(status, HostStatus::Success);
        assert!(!host.reload_user_assemblies());
    }

    #[test]
    fn extra_assemblies_load_into_user_context() {
        let (mut host, probe) = ready_host();
        probe.define_assembly("extra.rhai", MemoryAssembly::new("Extra"));
        let handle = host.load_assembly("extra.rhai").expect("extra assembly");
        assert_eq!(host.assembly(handle).map(|entry| entry.name.as_str()), Some("Extra"));
        assert!(host.load_assembly("missing.rhai").is_none());
        assert!(host.reload_user_assemblies());
        assert!(!host.is_assembly_valid(handle), "extra assemblies live in the user context");
    }

    #[test]
    fn long_messages_are_truncated_on_char_boundaries() {
        let short = "fine";
        assert!(matches!(truncate_message(short), Cow::Borrowed("fine")));
        let long = "é".repeat(600);
        let truncated = truncate_message(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() <= MAX_LOGGED_MESSAGE + "... (truncated)".len());
        let exception = truncate_exception(&long);
        assert!(exception.ends_with(&format!("full length: {})", long.len())));
    }
}
