use std::sync::Arc;

use crate::config::InteropConfig;
use crate::dispatch::{internal_calls, GenericDispatcher};
use crate::host::{AssemblyRole, AssemblyWatcher, HostManager, HostStatus};
use crate::reflection::Reflector;
use crate::registry::NativeRegistry;

/// Owns the host, the reflector and the dispatcher, and brings them up and down together.
///
/// Startup order: the host boots and loads the core assembly with the reflection internal calls
/// bound, the registry is reflected, and the dispatcher starts serving the new snapshot. A reload
/// rebuilds the user context and re-initializes the dispatcher.
pub struct ScriptingSystem {
    host: HostManager,
    reflector: Reflector,
    dispatcher: Arc<GenericDispatcher>,
    watcher: Option<AssemblyWatcher>,
}

impl ScriptingSystem {
    pub fn new(host: HostManager) -> Self {
        Self { host, reflector: Reflector::new(), dispatcher: Arc::new(GenericDispatcher::new()), watcher: None }
    }

    pub fn with_rhai() -> Self {
        Self::new(HostManager::with_rhai())
    }

    pub fn initialize(&mut self, registry: &NativeRegistry, config: &InteropConfig) -> HostStatus {
        self.host.set_internal_calls(internal_calls(Arc::clone(&self.dispatcher)));
        let status = self.host.initialize(config.host.clone());
        if !status.is_success() {
            return status;
        }
        self.reflector.reflect_from_context(Some(registry));
        self.dispatcher.initialize(self.reflector.shared_snapshot());
        let snapshot = self.reflector.snapshot();
        log::info!(
            "[system] ready: {} classes, {} buses, {} global methods",
            snapshot.class_count(),
            snapshot.ebus_count(),
            snapshot.global_method_count()
        );
        if config.watch_assemblies {
            self.start_watching(config);
        }
        status
    }

    fn start_watching(&mut self, config: &InteropConfig) {
        if !config.host.enable_hot_reload {
            log::info!("[system] assembly watching requested but hot reload is disabled");
            return;
        }
        let mut watcher = match AssemblyWatcher::new() {
            Ok(watcher) => watcher,
            Err(err) => {
                log::warn!("[system] assembly watcher unavailable: {err:?}");
                return;
            }
        };
        let mut targets = vec![(self.host.core_assembly_path().to_path_buf(), AssemblyRole::Core)];
        if !config.host.user_assembly_path.as_os_str().is_empty() {
            targets.push((config.host.user_assembly_path.clone(), AssemblyRole::User));
        }
        for (path, role) in targets {
            if let Err(err) = watcher.watch_assembly(&path, role) {
                log::warn!("[system] cannot watch {} assembly {}: {err:?}", role.label(), path.display());
            }
        }
        self.watcher = Some(watcher);
    }

    /// Polls the assembly watcher. Returns true when a user reload ran and succeeded.
    pub fn update(&mut self, registry: Option<&NativeRegistry>) -> bool {
        let Some(watcher) = self.watcher.as_mut() else {
            return false;
        };
        let changes = watcher.drain_changes();
        let mut user_changed = false;
        for change in &changes {
            match change.role {
                AssemblyRole::Core => {
                    log::warn!("[system] core assembly {} changed; restart to pick it up", change.path.display())
                }
                AssemblyRole::User => user_changed = true,
            }
        }
        user_changed && self.reload(registry)
    }

    /// Rebuilds user assemblies. With a registry the metadata is rebuilt too; either way the
    /// dispatcher restarts on the current snapshot.
    pub fn reload(&mut self, registry: Option<&NativeRegistry>) -> bool {
        let reloaded = self.host.reload_user_assemblies();
        if let Some(registry) = registry {
            self.reflector.reflect_from_context(Some(registry));
        }
        if self.host.is_initialized() {
            self.dispatcher.initialize(self.reflector.shared_snapshot());
        }
        reloaded
    }

    pub fn shutdown(&mut self) {
        self.watcher = None;
        self.dispatcher.shutdown();
        self.host.shutdown();
        self.reflector.clear();
    }

    pub fn host(&self) -> &HostManager {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut HostManager {
        &mut self.host
    }

    pub fn reflector(&self) -> &Reflector {
        &self.reflector
    }

    pub fn dispatcher(&self) -> &Arc<GenericDispatcher> {
        &self.dispatcher
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for ScriptingSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::host::{InMemoryRuntime, MemoryAssembly, MemoryType};
    use crate::marshal::MarshalledValue;
    use crate::math_api;
    use std::path::PathBuf;

    const CORE: &str = "game/Bin/Scripts/Kestrel.Core.rhai";
    const USER: &str = "game/Bin/Scripts/Arena.rhai";

    fn config() -> InteropConfig {
        InteropConfig {
            host: HostConfig {
                project_path: PathBuf::from("game"),
                user_assembly_path: PathBuf::from(USER),
                enable_hot_reload: true,
                ..HostConfig::default()
            },
            ..InteropConfig::default()
        }
    }

    fn system() -> (ScriptingSystem, InMemoryRuntime, NativeRegistry) {
        let probe = InMemoryRuntime::new();
        probe.define_assembly(CORE, MemoryAssembly::new("Kestrel.Core"));
        probe.define_assembly(USER, MemoryAssembly::new("Arena").with_type(MemoryType::new("Arena.Spawner")));
        let mut registry = NativeRegistry::new();
        math_api::register(&mut registry);
        let mut system = ScriptingSystem::new(HostManager::new(Box::new(probe.clone())));
        assert_eq!(system.initialize(&registry, &config()), HostStatus::Success);
        (system, probe, registry)
    }

    fn text(value: &str) -> MarshalledValue {
        MarshalledValue::String(value.to_string())
    }

    #[test]
    fn internal_calls_reach_the_reflected_registry() {
        let (system, probe, _) = system();
        assert!(system.dispatcher().is_initialized());
        assert!(probe.internal_call_names().iter().any(|name| name == "Reflection_InvokeStaticMethod"));
        let exists = probe.call_internal("Reflection_ClassExists", &[text("Vector3")]);
        assert_eq!(exists, Some(MarshalledValue::Bool(true)));
        let args = r#"[{"type":"Vector3","value":[1,2,3]},{"type":"Vector3","value":[4,5,6]}]"#;
        let result = probe
            .call_internal("Reflection_InvokeStaticMethod", &[text("Vector3"), text("Add"), text(args)])
            .expect("registered");
        let json: serde_json::Value = serde_json::from_str(result.as_str().expect("json string")).expect("json");
        assert_eq!(json["success"], serde_json::json!(true), "{json}");
    }

    #[test]
    fn failed_boot_leaves_the_dispatcher_down() {
        let probe = InMemoryRuntime::new();
        let mut system = ScriptingSystem::new(HostManager::new(Box::new(probe.clone())));
        let status = system.initialize(&NativeRegistry::new(), &config());
        assert_eq!(status, HostStatus::AssemblyLoadFailed);
        assert!(!system.dispatcher().is_initialized());
        assert!(!probe.is_initialized());
    }

    #[test]
    fn reload_restarts_the_dispatcher_on_fresh_metadata() {
        let (mut system, _probe, mut registry) = system();
        let before = system.dispatcher().snapshot().expect("snapshot");
        registry.method("Extra_Ping", || true);
        assert!(system.reload(Some(&registry)));
        let after = system.dispatcher().snapshot().expect("snapshot after reload");
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.global_methods().iter().any(|method| method.name == "Extra_Ping"));
        assert!(system.host_mut().user_type("Arena.Spawner").is_some());
    }

    #[test]
    fn shutdown_stops_everything_once() {
        let (mut system, probe, _) = system();
        system.shutdown();
        assert!(!system.dispatcher().is_initialized());
        assert!(!probe.is_initialized());
        assert!(system.reflector().snapshot().is_empty());
        system.shutdown();
        assert!(!system.update(None));
    }
}
