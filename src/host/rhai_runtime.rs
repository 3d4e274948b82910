//! [`ManagedRuntime`] backed by the embedded Rhai engine.
//!
//! An assembly is one `.rhai` file named after its stem. A top-level `const NAMESPACE = "..."`
//! places its types; type `Ns.Name` is the zero-argument factory function `Name`, and methods are
//! script functions called with `this` bound to the instance. Assemblies loaded earlier into the
//! same load context are visible to later ones.

use anyhow::{anyhow, bail, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Scope, AST, INT};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::runtime::{
    AssemblyId, AssemblyLoadError, ContextId, ExceptionCallback, InternalCall, InternalType, LoadedAssembly,
    ManagedRuntime, MessageLevel, ObjectId, RuntimeInitStatus, RuntimeSettings, RuntimeTypeId,
};
use crate::marshal::MarshalledValue;

const NAMESPACE_CONST: &str = "NAMESPACE";
const MAX_INTERNAL_CALL_ARITY: usize = 4;

struct ScriptAssembly {
    name: String,
    context: ContextId,
    namespace: String,
    path: PathBuf,
    /// Functions defined by this file only; used for type lookup.
    own: AST,
    /// This file merged over everything loaded before it in the same context.
    callable: AST,
    types: Vec<String>,
}

struct ScriptInstance {
    assembly: AssemblyId,
    value: Dynamic,
}

struct LoadContext {
    name: String,
    assemblies: Vec<AssemblyId>,
}

pub struct RhaiRuntime {
    engine: Engine,
    initialized: bool,
    runtime_directory: PathBuf,
    exception_callback: Option<ExceptionCallback>,
    contexts: HashMap<ContextId, LoadContext>,
    assemblies: HashMap<AssemblyId, ScriptAssembly>,
    instances: HashMap<ObjectId, ScriptInstance>,
    next_context: u32,
    next_assembly: u32,
    next_object: u64,
}

impl Default for RhaiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiRuntime {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
            initialized: false,
            runtime_directory: PathBuf::new(),
            exception_callback: None,
            contexts: HashMap::new(),
            assemblies: HashMap::new(),
            instances: HashMap::new(),
            next_context: 0,
            next_assembly: 0,
            next_object: 1,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn runtime_directory(&self) -> &Path {
        &self.runtime_directory
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn context_name(&self, context: ContextId) -> Option<&str> {
        self.contexts.get(&context).map(|ctx| ctx.name.as_str())
    }

    pub fn assembly_path(&self, assembly: AssemblyId) -> Option<&Path> {
        self.assemblies.get(&assembly).map(|asm| asm.path.as_path())
    }
}

fn report(callback: &Option<ExceptionCallback>, what: &str, err: Box<EvalAltResult>) -> anyhow::Error {
    let message = format!("{what}: {err}");
    if let Some(callback) = callback {
        callback(&message);
    }
    anyhow!(message)
}

impl ManagedRuntime for RhaiRuntime {
    fn initialize(&mut self, settings: &RuntimeSettings) -> RuntimeInitStatus {
        if !settings.runtime_directory.is_dir() {
            return RuntimeInitStatus::SupportLibraryNotFound;
        }
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        let print = settings.message_callback.clone();
        engine.on_print(move |text| print(MessageLevel::Info, text));
        let debug = settings.message_callback.clone();
        engine.on_debug(move |text, source, pos| {
            let message = match source {
                Some(source) => format!("{source} @ {pos:?} | {text}"),
                None => format!("{pos:?} | {text}"),
            };
            debug(MessageLevel::Warning, &message);
        });
        self.engine = engine;
        self.exception_callback = Some(settings.exception_callback.clone());
        self.runtime_directory = settings.runtime_directory.clone();
        self.initialized = true;
        RuntimeInitStatus::Success
    }

    fn shutdown(&mut self) {
        self.instances.clear();
        self.assemblies.clear();
        self.contexts.clear();
        self.exception_callback = None;
        self.engine = Engine::new();
        self.initialized = false;
    }

    fn create_load_context(&mut self, name: &str) -> ContextId {
        let id = ContextId(self.next_context);
        self.next_context += 1;
        self.contexts.insert(id, LoadContext { name: name.to_string(), assemblies: Vec::new() });
        id
    }

    fn unload_load_context(&mut self, context: ContextId) {
        let Some(ctx) = self.contexts.remove(&context) else {
            return;
        };
        for assembly in &ctx.assemblies {
            self.assemblies.remove(assembly);
        }
        self.instances.retain(|_, instance| !ctx.assemblies.contains(&instance.assembly));
    }

    fn load_assembly(&mut self, context: ContextId, path: &Path) -> Result<LoadedAssembly, AssemblyLoadError> {
        if !self.initialized {
            return Err(AssemblyLoadError::NotInitialized);
        }
        let Some(ctx) = self.contexts.get(&context) else {
            return Err(AssemblyLoadError::UnknownContext(context));
        };
        if !path.is_file() {
            return Err(AssemblyLoadError::NotFound(path.to_path_buf()));
        }
        let source =
            fs::read_to_string(path).map_err(|source| AssemblyLoadError::Io { path: path.to_path_buf(), source })?;
        let own = self.engine.compile(&source).map_err(|err| AssemblyLoadError::invalid(path, err.to_string()))?;

        let mut scope = Scope::new();
        if let Err(err) = self.engine.run_ast_with_scope(&mut scope, &own) {
            return Err(AssemblyLoadError::invalid(path, err.to_string()));
        }
        let namespace = scope.get_value::<ImmutableString>(NAMESPACE_CONST).map(|ns| ns.to_string()).unwrap_or_default();

        let callable = ctx
            .assemblies
            .iter()
            .filter_map(|id| self.assemblies.get(id))
            .fold(AST::empty(), |merged, earlier| merged.merge(&earlier.own))
            .merge(&own);

        let name = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default();
        let id = AssemblyId(self.next_assembly);
        self.next_assembly += 1;
        self.assemblies.insert(
            id,
            ScriptAssembly {
                name: name.clone(),
                context,
                namespace,
                path: path.to_path_buf(),
                own,
                callable,
                types: Vec::new(),
            },
        );
        if let Some(ctx) = self.contexts.get_mut(&context) {
            ctx.assemblies.push(id);
        }
        Ok(LoadedAssembly { id, name })
    }

    fn find_type(&mut self, assembly: AssemblyId, full_name: &str) -> Option<RuntimeTypeId> {
        let asm = self.assemblies.get_mut(&assembly)?;
        let (namespace, short) = full_name.rsplit_once('.').unwrap_or(("", full_name));
        if namespace != asm.namespace {
            return None;
        }
        if let Some(index) = asm.types.iter().position(|known| known == short) {
            return Some(RuntimeTypeId(index as u32));
        }
        let defined = asm.own.iter_functions().any(|func| func.name == short && func.params.is_empty());
        if !defined {
            return None;
        }
        asm.types.push(short.to_string());
        Some(RuntimeTypeId((asm.types.len() - 1) as u32))
    }

    fn create_instance(&mut self, assembly: AssemblyId, type_id: RuntimeTypeId) -> Result<ObjectId> {
        let asm = self.assemblies.get(&assembly).ok_or_else(|| anyhow!("assembly {assembly:?} is not loaded"))?;
        let factory = asm
            .types
            .get(type_id.0 as usize)
            .ok_or_else(|| anyhow!("type {type_id:?} is not resolved in '{}'", asm.name))?;
        let options = CallFnOptions::new().eval_ast(false);
        let value = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut Scope::new(), &asm.callable, factory, ())
            .map_err(|err| report(&self.exception_callback, &format!("{}.{factory}", asm.namespace), err))?;
        let id = ObjectId(self.next_object);
        self.next_object += 1;
        self.instances.insert(id, ScriptInstance { assembly, value });
        Ok(id)
    }

    fn invoke_method(&mut self, object: ObjectId, method: &str, args: &[MarshalledValue]) -> Result<MarshalledValue> {
        let instance = self.instances.get_mut(&object).ok_or_else(|| anyhow!("instance {object:?} does not exist"))?;
        let asm = self
            .assemblies
            .get(&instance.assembly)
            .ok_or_else(|| anyhow!("instance {object:?} outlived its assembly"))?;
        let args: Vec<Dynamic> = args.iter().map(to_dynamic).collect();
        let options = CallFnOptions::new().eval_ast(false).bind_this_ptr(&mut instance.value);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut Scope::new(), &asm.callable, method, args)
            .map_err(|err| report(&self.exception_callback, method, err))?;
        Ok(from_dynamic(result))
    }

    fn set_field(&mut self, object: ObjectId, field: &str, value: MarshalledValue) -> Result<()> {
        let instance = self.instances.get_mut(&object).ok_or_else(|| anyhow!("instance {object:?} does not exist"))?;
        let Some(mut map) = instance.value.write_lock::<Map>() else {
            bail!("instance {object:?} is a {}, not an object map", instance.value.type_name());
        };
        map.insert(field.into(), to_dynamic(&value));
        Ok(())
    }

    fn destroy_instance(&mut self, object: ObjectId) {
        self.instances.remove(&object);
    }

    fn register_internal_calls(&mut self, assembly: AssemblyId, calls: &[InternalCall]) -> Result<()> {
        if !self.assemblies.contains_key(&assembly) {
            bail!("cannot register internal calls: assembly {assembly:?} is not loaded");
        }
        for call in calls {
            register_internal_call(&mut self.engine, call)?;
        }
        Ok(())
    }
}

fn register_internal_call(engine: &mut Engine, call: &InternalCall) -> Result<()> {
    let name = call.name.clone();
    let call = call.clone();
    match call.params.len() {
        0 => {
            engine.register_fn(name, move || invoke_internal(&call, Vec::new()));
        }
        1 => {
            engine.register_fn(name, move |a: Dynamic| invoke_internal(&call, vec![a]));
        }
        2 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic| invoke_internal(&call, vec![a, b]));
        }
        3 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| invoke_internal(&call, vec![a, b, c]));
        }
        4 => {
            engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
                invoke_internal(&call, vec![a, b, c, d])
            });
        }
        arity => bail!(
            "internal call '{}.{}' takes {arity} parameters; at most {MAX_INTERNAL_CALL_ARITY} are supported",
            call.class_name,
            call.name
        ),
    }
    Ok(())
}

fn invoke_internal(call: &InternalCall, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
    let mut values = Vec::with_capacity(args.len());
    for (index, (arg, expected)) in args.into_iter().zip(&call.params).enumerate() {
        let value = match expected {
            InternalType::String => arg.into_immutable_string().map(|text| MarshalledValue::String(text.to_string())),
            InternalType::Int64 => arg.as_int().map(MarshalledValue::Int64),
            InternalType::Bool => arg.as_bool().map(MarshalledValue::Bool),
            InternalType::Void => Ok(MarshalledValue::Void),
        }
        .map_err(|actual| format!("{}: argument {index} expects {expected:?}, got {actual}", call.name))?;
        values.push(value);
    }
    let result = call.invoke(&values);
    let value = match call.returns {
        InternalType::Void => Dynamic::UNIT,
        InternalType::Bool => Dynamic::from_bool(result.as_bool().unwrap_or(false)),
        InternalType::Int64 => Dynamic::from_int(result.as_i64().unwrap_or(0)),
        InternalType::String => Dynamic::from(result.as_str().unwrap_or_default().to_string()),
    };
    Ok(value)
}

pub(crate) fn to_dynamic(value: &MarshalledValue) -> Dynamic {
    match value {
        MarshalledValue::Void | MarshalledValue::Unknown => Dynamic::UNIT,
        MarshalledValue::Bool(v) => Dynamic::from_bool(*v),
        MarshalledValue::Float(v) => Dynamic::from_float(*v as rhai::FLOAT),
        MarshalledValue::Double(v) => Dynamic::from_float(*v as rhai::FLOAT),
        MarshalledValue::String(v) => Dynamic::from(v.clone()),
        MarshalledValue::EntityId(id) => Dynamic::from_int(id.0 as INT),
        MarshalledValue::Object { handle, .. } => Dynamic::from_int(handle.raw() as INT),
        MarshalledValue::UInt64(v) if *v > INT::MAX as u64 => Dynamic::from_float(*v as rhai::FLOAT),
        MarshalledValue::Vector3(_) | MarshalledValue::Quaternion(_) | MarshalledValue::Transform(_) => {
            rhai::serde::to_dynamic(&value.to_json()["value"]).unwrap_or(Dynamic::UNIT)
        }
        integer => integer.as_i64().map(Dynamic::from_int).unwrap_or(Dynamic::UNIT),
    }
}

pub(crate) fn from_dynamic(value: Dynamic) -> MarshalledValue {
    if value.is_unit() {
        return MarshalledValue::Void;
    }
    if let Ok(v) = value.as_bool() {
        return MarshalledValue::Bool(v);
    }
    if let Ok(v) = value.as_int() {
        return MarshalledValue::Int64(v);
    }
    if let Ok(v) = value.as_float() {
        return MarshalledValue::Double(v);
    }
    if value.is::<ImmutableString>() {
        return match value.into_immutable_string() {
            Ok(text) => MarshalledValue::String(text.to_string()),
            Err(_) => MarshalledValue::Unknown,
        };
    }
    rhai::serde::from_dynamic::<serde_json::Value>(&value)
        .ok()
        .and_then(|json| MarshalledValue::from_json(&json, None).ok())
        .unwrap_or(MarshalledValue::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::sync::{Arc, Mutex};

    const GREETER: &str = r#"
        const NAMESPACE = "Kestrel.Demo";

        fn Greeter() { #{ greeting: "hi", count: 0 } }

        fn greet(name) {
            this.count += 1;
            this.greeting + ", " + name
        }

        fn count() { this.count }

        fn shout() { print("LOUD"); }

        fn native_sum(a, b) { Native_Add(a, b) }

        fn spread(v) { v[0] + v[1] + v[2] }
    "#;

    fn runtime_with(source: &str) -> (tempfile::TempDir, RhaiRuntime, AssemblyId) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("Greeter.rhai");
        fs::write(&path, source).expect("write script");
        let mut runtime = RhaiRuntime::new();
        assert_eq!(runtime.initialize(&RuntimeSettings::silent(dir.path())), RuntimeInitStatus::Success);
        let ctx = runtime.create_load_context("test");
        let loaded = runtime.load_assembly(ctx, &path).expect("load assembly");
        assert_eq!(loaded.name, "Greeter");
        (dir, runtime, loaded.id)
    }

    #[test]
    fn missing_runtime_directory_is_reported() {
        let mut runtime = RhaiRuntime::new();
        let status = runtime.initialize(&RuntimeSettings::silent("/definitely/not/a/runtime/dir"));
        assert_eq!(status, RuntimeInitStatus::SupportLibraryNotFound);
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn types_resolve_by_namespace_and_factory() {
        let (_dir, mut runtime, asm) = runtime_with(GREETER);
        assert!(runtime.find_type(asm, "Kestrel.Demo.Greeter").is_some());
        assert_eq!(runtime.find_type(asm, "Kestrel.Demo.Greeter"), runtime.find_type(asm, "Kestrel.Demo.Greeter"));
        assert!(runtime.find_type(asm, "Other.Greeter").is_none(), "namespace must match");
        assert!(runtime.find_type(asm, "Kestrel.Demo.greet").is_none(), "methods with parameters are not types");
    }

    #[test]
    fn methods_mutate_bound_instance() {
        let (_dir, mut runtime, asm) = runtime_with(GREETER);
        let ty = runtime.find_type(asm, "Kestrel.Demo.Greeter").expect("type");
        let obj = runtime.create_instance(asm, ty).expect("instance");
        let args = [MarshalledValue::String("bob".into())];
        assert_eq!(runtime.invoke_method(obj, "greet", &args).expect("greet"), MarshalledValue::String("hi, bob".into()));
        runtime.set_field(obj, "greeting", MarshalledValue::String("yo".into())).expect("set field");
        assert_eq!(runtime.invoke_method(obj, "greet", &args).expect("greet"), MarshalledValue::String("yo, bob".into()));
        assert_eq!(runtime.invoke_method(obj, "count", &[]).expect("count"), MarshalledValue::Int64(2));
        let vector = MarshalledValue::Vector3(Vec3::new(1.0, 2.0, 3.5));
        assert_eq!(runtime.invoke_method(obj, "spread", &[vector]).expect("spread"), MarshalledValue::Double(6.5));
        runtime.destroy_instance(obj);
        assert!(runtime.invoke_method(obj, "count", &[]).is_err());
    }

    #[test]
    fn internal_calls_are_callable_from_scripts() {
        let (_dir, mut runtime, asm) = runtime_with(GREETER);
        let add = InternalCall::new("Test", "Native_Add", vec![InternalType::Int64; 2], InternalType::Int64, |args| {
            let sum = args.iter().filter_map(MarshalledValue::as_i64).sum::<i64>();
            MarshalledValue::Int64(sum)
        });
        runtime.register_internal_calls(asm, &[add]).expect("register");
        let ty = runtime.find_type(asm, "Kestrel.Demo.Greeter").expect("type");
        let obj = runtime.create_instance(asm, ty).expect("instance");
        let result = runtime.invoke_method(obj, "native_sum", &[MarshalledValue::Int32(40), MarshalledValue::Int64(2)]);
        assert_eq!(result.expect("native sum"), MarshalledValue::Int64(42));
    }

    #[test]
    fn print_and_errors_reach_callbacks() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("Greeter.rhai");
        fs::write(&path, GREETER).expect("write script");
        let messages = Arc::new(Mutex::new(Vec::new()));
        let exceptions = Arc::new(Mutex::new(Vec::new()));
        let settings = RuntimeSettings {
            runtime_directory: dir.path().to_path_buf(),
            message_callback: {
                let messages = messages.clone();
                Arc::new(move |_level: MessageLevel, text: &str| messages.lock().expect("lock").push(text.to_string()))
            },
            exception_callback: {
                let exceptions = exceptions.clone();
                Arc::new(move |text: &str| exceptions.lock().expect("lock").push(text.to_string()))
            },
        };
        let mut runtime = RhaiRuntime::new();
        assert_eq!(runtime.initialize(&settings), RuntimeInitStatus::Success);
        let ctx = runtime.create_load_context("test");
        let asm = runtime.load_assembly(ctx, &path).expect("load").id;
        let ty = runtime.find_type(asm, "Kestrel.Demo.Greeter").expect("type");
        let obj = runtime.create_instance(asm, ty).expect("instance");
        runtime.invoke_method(obj, "shout", &[]).expect("shout");
        assert!(runtime.invoke_method(obj, "missing_method", &[]).is_err());
        assert_eq!(messages.lock().expect("lock").as_slice(), ["LOUD".to_string()]);
        assert_eq!(exceptions.lock().expect("lock").len(), 1);
    }

    #[test]
    fn unloading_a_context_drops_its_instances() {
        let (_dir, mut runtime, asm) = runtime_with(GREETER);
        let ty = runtime.find_type(asm, "Kestrel.Demo.Greeter").expect("type");
        runtime.create_instance(asm, ty).expect("instance");
        assert_eq!(runtime.instance_count(), 1);
        runtime.unload_load_context(ContextId(0));
        assert_eq!(runtime.instance_count(), 0);
        assert!(runtime.find_type(asm, "Kestrel.Demo.Greeter").is_none());
    }

    #[test]
    fn invalid_scripts_fail_to_load() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("Broken.rhai");
        fs::write(&path, "fn broken( {").expect("write script");
        let mut runtime = RhaiRuntime::new();
        runtime.initialize(&RuntimeSettings::silent(dir.path()));
        let ctx = runtime.create_load_context("test");
        assert!(matches!(runtime.load_assembly(ctx, &path), Err(AssemblyLoadError::Invalid { .. })));
        let missing = dir.path().join("Missing.rhai");
        assert!(matches!(runtime.load_assembly(ctx, &missing), Err(AssemblyLoadError::NotFound(_))));
    }
}
