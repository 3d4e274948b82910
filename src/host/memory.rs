//! [`ManagedRuntime`] whose assemblies are defined in Rust. Used by hosts that have no script
//! files on disk and by tests that need to inject load or boot failures.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::runtime::{
    AssemblyId, AssemblyLoadError, ContextId, InternalCall, LoadedAssembly, ManagedRuntime, ObjectId,
    RuntimeInitStatus, RuntimeSettings, RuntimeTypeId,
};
use crate::marshal::MarshalledValue;

pub type MemoryFields = HashMap<String, MarshalledValue>;
pub type MemoryMethod = Arc<dyn Fn(&mut MemoryFields, &[MarshalledValue]) -> Result<MarshalledValue> + Send + Sync>;

#[derive(Clone)]
pub struct MemoryType {
    full_name: String,
    fields: MemoryFields,
    methods: HashMap<String, MemoryMethod>,
}

impl MemoryType {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self { full_name: full_name.into(), fields: HashMap::new(), methods: HashMap::new() }
    }

    pub fn field(mut self, name: impl Into<String>, initial: MarshalledValue) -> Self {
        self.fields.insert(name.into(), initial);
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        method: impl Fn(&mut MemoryFields, &[MarshalledValue]) -> Result<MarshalledValue> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

impl fmt::Debug for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("MemoryType").field("full_name", &self.full_name).field("methods", &methods).finish()
    }
}

#[derive(Debug, Clone)]
pub struct MemoryAssembly {
    name: String,
    types: Vec<MemoryType>,
}

impl MemoryAssembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), types: Vec::new() }
    }

    pub fn with_type(mut self, ty: MemoryType) -> Self {
        self.types.push(ty);
        self
    }
}

struct MemoryObject {
    assembly: AssemblyId,
    type_index: usize,
    fields: MemoryFields,
}

struct LoadedMemoryAssembly {
    context: ContextId,
    assembly: Arc<MemoryAssembly>,
}

#[derive(Default)]
struct MemoryState {
    initialized: bool,
    init_failure: Option<RuntimeInitStatus>,
    fail_internal_calls: bool,
    available: HashMap<PathBuf, Arc<MemoryAssembly>>,
    contexts: HashMap<ContextId, String>,
    loaded: HashMap<AssemblyId, LoadedMemoryAssembly>,
    instances: HashMap<ObjectId, MemoryObject>,
    internal_calls: Vec<InternalCall>,
    next_context: u32,
    next_assembly: u32,
    next_object: u64,
}

/// Cloning shares state, so a clone kept outside the host observes what the host does.
#[derive(Clone, Default)]
pub struct InMemoryRuntime {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `assembly` loadable from `path`, replacing whatever was there.
    pub fn define_assembly(&self, path: impl Into<PathBuf>, assembly: MemoryAssembly) {
        self.state.lock().available.insert(path.into(), Arc::new(assembly));
    }

    pub fn remove_assembly(&self, path: impl AsRef<Path>) {
        self.state.lock().available.remove(path.as_ref());
    }

    /// The next `initialize` returns `status` instead of booting.
    pub fn fail_initialize_with(&self, status: RuntimeInitStatus) {
        self.state.lock().init_failure = Some(status);
    }

    pub fn fail_internal_call_registration(&self, fail: bool) {
        self.state.lock().fail_internal_calls = fail;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Names of load contexts that have not been unloaded, sorted.
    pub fn live_contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().contexts.values().cloned().collect();
        names.sort();
        names
    }

    pub fn loaded_assembly_count(&self) -> usize {
        self.state.lock().loaded.len()
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn internal_call_names(&self) -> Vec<String> {
        self.state.lock().internal_calls.iter().map(|call| call.name.clone()).collect()
    }

    /// Calls a registered internal call the way managed code would.
    pub fn call_internal(&self, name: &str, args: &[MarshalledValue]) -> Option<MarshalledValue> {
        let call = self.state.lock().internal_calls.iter().find(|call| call.name == name).cloned()?;
        Some(call.invoke(args))
    }
}

impl ManagedRuntime for InMemoryRuntime {
    fn initialize(&mut self, _settings: &RuntimeSettings) -> RuntimeInitStatus {
        let mut state = self.state.lock();
        if let Some(status) = state.init_failure.take() {
            return status;
        }
        state.initialized = true;
        RuntimeInitStatus::Success
    }

    fn shutdown(&mut self) {
        let mut state = self.state.lock();
        state.instances.clear();
        state.loaded.clear();
        state.contexts.clear();
        state.internal_calls.clear();
        state.initialized = false;
    }

    fn create_load_context(&mut self, name: &str) -> ContextId {
        let mut state = self.state.lock();
        let id = ContextId(state.next_context);
        state.next_context += 1;
        state.contexts.insert(id, name.to_string());
        id
    }

    fn unload_load_context(&mut self, context: ContextId) {
        let mut state = self.state.lock();
        if state.contexts.remove(&context).is_none() {
            return;
        }
        state.loaded.retain(|_, loaded| loaded.context != context);
        let MemoryState { loaded, instances, .. } = &mut *state;
        instances.retain(|_, object| loaded.contains_key(&object.assembly));
    }

    fn load_assembly(&mut self, context: ContextId, path: &Path) -> Result<LoadedAssembly, AssemblyLoadError> {
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(AssemblyLoadError::NotInitialized);
        }
        if !state.contexts.contains_key(&context) {
            return Err(AssemblyLoadError::UnknownContext(context));
        }
        let assembly =
            state.available.get(path).cloned().ok_or_else(|| AssemblyLoadError::NotFound(path.to_path_buf()))?;
        let id = AssemblyId(state.next_assembly);
        state.next_assembly += 1;
        let name = assembly.name.clone();
        state.loaded.insert(id, LoadedMemoryAssembly { context, assembly });
        Ok(LoadedAssembly { id, name })
    }

    fn find_type(&mut self, assembly: AssemblyId, full_name: &str) -> Option<RuntimeTypeId> {
        let state = self.state.lock();
        let loaded = state.loaded.get(&assembly)?;
        let index = loaded.assembly.types.iter().position(|ty| ty.full_name == full_name)?;
        Some(RuntimeTypeId(index as u32))
    }

    fn create_instance(&mut self, assembly: AssemblyId, type_id: RuntimeTypeId) -> Result<ObjectId> {
        let mut state = self.state.lock();
        let loaded = state.loaded.get(&assembly).ok_or_else(|| anyhow!("assembly {assembly:?} is not loaded"))?;
        let ty = loaded
            .assembly
            .types
            .get(type_id.0 as usize)
            .ok_or_else(|| anyhow!("type {type_id:?} does not exist in '{}'", loaded.assembly.name))?;
        let object = MemoryObject { assembly, type_index: type_id.0 as usize, fields: ty.fields.clone() };
        state.next_object += 1;
        let id = ObjectId(state.next_object);
        state.instances.insert(id, object);
        Ok(id)
    }

    fn invoke_method(&mut self, object: ObjectId, method: &str, args: &[MarshalledValue]) -> Result<MarshalledValue> {
        let (function, mut fields) = {
            let mut state = self.state.lock();
            let MemoryState { loaded, instances, .. } = &mut *state;
            let instance = instances.get_mut(&object).ok_or_else(|| anyhow!("instance {object:?} does not exist"))?;
            let ty = loaded
                .get(&instance.assembly)
                .and_then(|loaded| loaded.assembly.types.get(instance.type_index))
                .ok_or_else(|| anyhow!("instance {object:?} outlived its assembly"))?;
            let function = ty
                .methods
                .get(method)
                .cloned()
                .ok_or_else(|| anyhow!("method '{method}' not found on {}", ty.full_name))?;
            (function, std::mem::take(&mut instance.fields))
        };
        // Unlocked so methods may call back into internal calls.
        let result = function(&mut fields, args);
        if let Some(instance) = self.state.lock().instances.get_mut(&object) {
            instance.fields = fields;
        }
        result
    }

    fn set_field(&mut self, object: ObjectId, field: &str, value: MarshalledValue) -> Result<()> {
        let mut state = self.state.lock();
        let instance = state.instances.get_mut(&object).ok_or_else(|| anyhow!("instance {object:?} does not exist"))?;
        instance.fields.insert(field.to_string(), value);
        Ok(())
    }

    fn destroy_instance(&mut self, object: ObjectId) {
        self.state.lock().instances.remove(&object);
    }

    fn register_internal_calls(&mut self, assembly: AssemblyId, calls: &[InternalCall]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_internal_calls {
            return Err(anyhow!("internal call registration rejected"));
        }
        if !state.loaded.contains_key(&assembly) {
            return Err(anyhow!("assembly {assembly:?} is not loaded"));
        }
        for call in calls {
            state.internal_calls.retain(|existing| existing.name != call.name);
            state.internal_calls.push(call.clone());
        }
        Ok(())
    }
}
