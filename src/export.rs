//! Deterministic JSON export of a [`ReflectionSnapshot`] for offline binding generators.
//!
//! Entries are borrowed views over the snapshot whose field order is the on-disk key order.

use serde::ser::Error as _;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::ExportConfig;
use crate::reflection::{
    ReflectedClass, ReflectedEBus, ReflectedEBusEvent, ReflectedMethod, ReflectedParameter, ReflectedProperty,
    ReflectionSnapshot, Reflector,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportResult {
    pub success: bool,
    pub error_message: String,
    pub json_data: String,
    pub output_path: Option<PathBuf>,
    pub classes_exported: usize,
    pub ebuses_exported: usize,
    pub global_methods_exported: usize,
    pub global_properties_exported: usize,
}

impl ExportResult {
    fn error(message: impl Into<String>) -> Self {
        Self { success: false, error_message: message.into(), ..Self::default() }
    }
}

pub fn export(snapshot: &ReflectionSnapshot, config: &ExportConfig) -> ExportResult {
    log::info!("[export] starting export");
    let document = document(snapshot, config);
    let mut result = ExportResult {
        success: true,
        classes_exported: document.classes.len(),
        ebuses_exported: document.ebuses.len(),
        global_methods_exported: document.global_methods.len(),
        global_properties_exported: document.global_properties.len(),
        ..ExportResult::default()
    };
    result.json_data = match render(&document, config) {
        Ok(json) => json,
        Err(err) => {
            log::error!("[export] failed to serialize reflection data: {err}");
            return ExportResult::error(format!("Failed to serialize reflection data: {err}"));
        }
    };

    if !config.output_path.as_os_str().is_empty() {
        if let Err(message) = write_to_file(&result.json_data, &config.output_path) {
            result.success = false;
            result.error_message = message;
            return result;
        }
        result.output_path = Some(config.output_path.clone());
    }

    log::info!(
        "[export] exported {} classes, {} ebuses, {} global methods, {} global properties",
        result.classes_exported,
        result.ebuses_exported,
        result.global_methods_exported,
        result.global_properties_exported
    );
    result
}

pub fn export_from_context(reflector: Option<&Reflector>, config: &ExportConfig) -> ExportResult {
    match reflector {
        Some(reflector) => export(reflector.snapshot(), config),
        None => ExportResult::error("Reflector is null"),
    }
}

/// Renders the export without touching the filesystem, ignoring `output_path`.
pub fn export_to_string(snapshot: &ReflectionSnapshot, config: &ExportConfig) -> serde_json::Result<String> {
    render(&document(snapshot, config), config)
}

pub fn export_to_file(snapshot: &ReflectionSnapshot, path: impl AsRef<Path>, config: &ExportConfig) -> ExportResult {
    let config = ExportConfig { output_path: path.as_ref().to_path_buf(), ..config.clone() };
    export(snapshot, &config)
}

fn write_to_file(content: &str, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(err) = fs::create_dir_all(parent) {
                log::error!("[export] failed to create directory {}: {err}", parent.display());
                return Err(format!("Failed to create directory {}: {err}", parent.display()));
            }
        }
    }
    if let Err(err) = fs::write(path, content.as_bytes()) {
        log::error!("[export] failed to write {}: {err}", path.display());
        return Err(format!("Failed to write to file: {}", path.display()));
    }
    log::info!("[export] wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

fn category_matches(category: &str, rule: &str) -> bool {
    category == rule || category.strip_prefix(rule).is_some_and(|rest| rest.starts_with('/'))
}

fn passes_category_rules(category: &str, config: &ExportConfig) -> bool {
    if !category.is_empty() && config.exclude_categories.iter().any(|rule| category_matches(category, rule)) {
        return false;
    }
    config.include_categories.is_empty() || config.include_categories.iter().any(|rule| category_matches(category, rule))
}

fn should_include_class(class: &ReflectedClass, config: &ExportConfig) -> bool {
    if class.is_deprecated && !config.include_deprecated {
        return false;
    }
    if config.exclude_classes.iter().any(|name| *name == class.name) {
        return false;
    }
    passes_category_rules(&class.category, config)
}

fn should_include_ebus(bus: &ReflectedEBus, config: &ExportConfig) -> bool {
    passes_category_rules(&bus.category, config)
}

fn format_type_id(type_id: Uuid) -> String {
    format!("{{{}}}", type_id.hyphenated().to_string().to_uppercase())
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    classes: Vec<ClassEntry<'a>>,
    ebuses: Vec<EBusEntry<'a>>,
    global_methods: Vec<MethodEntry<'a>>,
    global_properties: Vec<PropertyEntry<'a>>,
}

#[derive(Serialize)]
struct ParameterEntry<'a> {
    name: &'a str,
    type_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_id: Option<String>,
    is_pointer: bool,
    is_reference: bool,
    is_const: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    marshal_type: Option<&'static str>,
}

#[derive(Serialize)]
struct MethodEntry<'a> {
    name: &'a str,
    class_name: &'a str,
    is_static: bool,
    is_const: bool,
    description: &'a str,
    category: &'a str,
    is_deprecated: bool,
    deprecation_message: &'a str,
    return_type: ParameterEntry<'a>,
    parameters: Vec<ParameterEntry<'a>>,
}

#[derive(Serialize)]
struct PropertyEntry<'a> {
    name: &'a str,
    class_name: &'a str,
    has_getter: bool,
    has_setter: bool,
    description: &'a str,
    is_deprecated: bool,
    value_type: ParameterEntry<'a>,
}

#[derive(Serialize)]
struct ClassEntry<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_id: Option<String>,
    description: &'a str,
    category: &'a str,
    is_deprecated: bool,
    source_gem_name: &'a str,
    base_classes: &'a [String],
    constructors: Vec<MethodEntry<'a>>,
    methods: Vec<MethodEntry<'a>>,
    properties: Vec<PropertyEntry<'a>>,
}

#[derive(Serialize)]
struct EventEntry<'a> {
    name: &'a str,
    bus_name: &'a str,
    is_broadcast: bool,
    return_type: ParameterEntry<'a>,
    parameters: Vec<ParameterEntry<'a>>,
}

#[derive(Serialize)]
struct EBusEntry<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_id: Option<String>,
    description: &'a str,
    category: &'a str,
    source_gem_name: &'a str,
    address_type: ParameterEntry<'a>,
    events: Vec<EventEntry<'a>>,
}

/// Builds entries with the optional fields the config asks for.
struct EntryBuilder<'c> {
    config: &'c ExportConfig,
}

impl EntryBuilder<'_> {
    fn type_id(&self, type_id: Uuid) -> Option<String> {
        (self.config.include_type_ids && !type_id.is_nil()).then(|| format_type_id(type_id))
    }

    fn parameter<'a>(&self, param: &'a ReflectedParameter) -> ParameterEntry<'a> {
        ParameterEntry {
            name: &param.name,
            type_name: &param.type_name,
            type_id: self.type_id(param.type_id),
            is_pointer: param.is_pointer,
            is_reference: param.is_reference,
            is_const: param.is_const,
            marshal_type: self.config.include_marshal_types.then(|| param.marshal_kind.label()),
        }
    }

    fn parameters<'a>(&self, params: &'a [ReflectedParameter]) -> Vec<ParameterEntry<'a>> {
        params.iter().map(|param| self.parameter(param)).collect()
    }

    fn method<'a>(&self, method: &'a ReflectedMethod) -> MethodEntry<'a> {
        MethodEntry {
            name: &method.name,
            class_name: &method.class_name,
            is_static: method.is_static,
            is_const: method.is_const,
            description: &method.description,
            category: &method.category,
            is_deprecated: method.is_deprecated,
            deprecation_message: &method.deprecation_message,
            return_type: self.parameter(&method.return_type),
            parameters: self.parameters(&method.parameters),
        }
    }

    fn property<'a>(&self, property: &'a ReflectedProperty) -> PropertyEntry<'a> {
        PropertyEntry {
            name: &property.name,
            class_name: &property.class_name,
            has_getter: property.has_getter,
            has_setter: property.has_setter,
            description: &property.description,
            is_deprecated: property.is_deprecated,
            value_type: self.parameter(&property.value_type),
        }
    }

    fn class<'a>(&self, class: &'a ReflectedClass) -> ClassEntry<'a> {
        ClassEntry {
            name: &class.name,
            type_id: self.type_id(class.type_id),
            description: &class.description,
            category: &class.category,
            is_deprecated: class.is_deprecated,
            source_gem_name: &class.source_module_name,
            base_classes: &class.base_classes,
            constructors: class.constructors.iter().map(|ctor| self.method(ctor)).collect(),
            methods: class.methods.iter().map(|method| self.method(method)).collect(),
            properties: class.properties.iter().map(|property| self.property(property)).collect(),
        }
    }

    fn event<'a>(&self, event: &'a ReflectedEBusEvent) -> EventEntry<'a> {
        EventEntry {
            name: &event.name,
            bus_name: &event.bus_name,
            is_broadcast: event.is_broadcast,
            return_type: self.parameter(&event.return_type),
            parameters: self.parameters(&event.parameters),
        }
    }

    fn ebus<'a>(&self, bus: &'a ReflectedEBus) -> EBusEntry<'a> {
        EBusEntry {
            name: &bus.name,
            type_id: self.type_id(bus.type_id),
            description: &bus.description,
            category: &bus.category,
            source_gem_name: &bus.source_module_name,
            address_type: self.parameter(&bus.address_type),
            events: bus.events.iter().map(|event| self.event(event)).collect(),
        }
    }
}

fn document<'a>(snapshot: &'a ReflectionSnapshot, config: &ExportConfig) -> ExportDocument<'a> {
    let entries = EntryBuilder { config };
    // Snapshot maps are name-ordered, which is the required alphabetical order.
    ExportDocument {
        classes: snapshot
            .classes()
            .filter(|class| should_include_class(class, config))
            .map(|class| entries.class(class))
            .collect(),
        ebuses: snapshot.ebuses().filter(|bus| should_include_ebus(bus, config)).map(|bus| entries.ebus(bus)).collect(),
        global_methods: snapshot.global_methods().iter().map(|method| entries.method(method)).collect(),
        global_properties: snapshot.global_properties().iter().map(|property| entries.property(property)).collect(),
    }
}

fn render(document: &ExportDocument<'_>, config: &ExportConfig) -> serde_json::Result<String> {
    if !config.pretty_print {
        return serde_json::to_string(document);
    }
    let indent = vec![b' '; config.indent_size];
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(&indent));
    document.serialize(&mut serializer)?;
    out.push(b'\n');
    String::from_utf8(out).map_err(serde_json::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Attribute, NativeRegistry, NativeType};
    use serde_json::Value;

    #[derive(Debug, Default)]
    struct Thing;

    impl NativeType for Thing {
        const TYPE_ID: Uuid = Uuid::from_u128(0x5B1D4F0E2C0B4A47B5C4DA1E0C3A9F11);
    }

    #[derive(Debug, Default)]
    struct OldThing;

    impl NativeType for OldThing {
        const TYPE_ID: Uuid = Uuid::from_u128(0x0B9E19A31C5E4E1C8E7F6E1F2D3C4B5A);
    }

    #[derive(Debug, Default)]
    struct Joint;

    impl NativeType for Joint {
        const TYPE_ID: Uuid = Uuid::from_u128(0x7D2A6C5B4E3F4A1B9C8D7E6F5A4B3C2D);
    }

    #[derive(Debug, Default)]
    struct Extra;

    impl NativeType for Extra {
        const TYPE_ID: Uuid = Uuid::from_u128(0x1A2B3C4D5E6F47809A1B2C3D4E5F6071);
    }

    fn snapshot() -> Reflector {
        let mut registry = NativeRegistry::new();
        registry
            .class_builder::<Thing>("New.Thing")
            .attribute(Attribute::category("Physics"))
            .attribute(Attribute::description("Says \"hi\"\n\tthen\u{1} stops"))
            .method("Spin", |_t: &mut Thing, speed: f32| speed * 2.0);
        registry.class_builder::<OldThing>("Old.Thing").attributes(Attribute::deprecated("gone"));
        registry.class_builder::<Joint>("Physics.Hinge").attribute(Attribute::category("Physics/Joints"));
        registry.class_builder::<Extra>("Extras.Thing").attribute(Attribute::category("PhysicsExtras"));
        registry.method("Tick", |dt: f32| dt);
        let mut reflector = Reflector::new();
        reflector.reflect_from_context(Some(&registry));
        reflector
    }

    fn class_names(json: &str) -> Vec<String> {
        let value: Value = serde_json::from_str(json).expect("export is valid JSON");
        value["classes"]
            .as_array()
            .expect("classes array")
            .iter()
            .map(|class| class["name"].as_str().expect("class name").to_string())
            .collect()
    }

    #[test]
    fn output_is_sorted_and_deterministic() {
        let reflector = snapshot();
        let config = ExportConfig::default();
        let first = export_to_string(reflector.snapshot(), &config).expect("render export");
        let second = export_to_string(reflector.snapshot(), &config).expect("render export");
        assert_eq!(first, second, "identical input must export identical bytes");
        assert_eq!(class_names(&first), vec!["Extras.Thing", "New.Thing", "Old.Thing", "Physics.Hinge"]);
        assert!(first.starts_with("{\n  \"classes\": [\n    {\n      \"name\": \"Extras.Thing\",\n"));
        assert!(first.ends_with("}\n"));
    }

    #[test]
    fn key_order_is_fixed() {
        let json = export_to_string(snapshot().snapshot(), &ExportConfig::default()).expect("render export");
        let order = ["\"classes\"", "\"ebuses\"", "\"global_methods\"", "\"global_properties\""];
        let positions: Vec<usize> = order.iter().map(|key| json.find(key).expect("top-level key")).collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "top-level keys out of order: {positions:?}");

        let class_start = json.find("\"name\": \"New.Thing\"").expect("class");
        let class_keys = ["\"type_id\"", "\"description\"", "\"category\"", "\"is_deprecated\"", "\"source_gem_name\"", "\"base_classes\"", "\"constructors\"", "\"methods\"", "\"properties\""];
        let mut last = class_start;
        for key in class_keys {
            let pos = json[last..].find(key).map(|offset| last + offset).expect("class key present");
            assert!(pos > last, "{key} should follow the previous class key");
            last = pos;
        }
        assert!(json.contains("\"marshal_type\": \"Float\""));
    }

    #[test]
    fn type_ids_are_braced_uppercase() {
        let json = export_to_string(snapshot().snapshot(), &ExportConfig::default()).expect("render export");
        assert!(json.contains("\"type_id\": \"{5B1D4F0E-2C0B-4A47-B5C4-DA1E0C3A9F11}\""));
        let config = ExportConfig { include_type_ids: false, include_marshal_types: false, ..ExportConfig::default() };
        let json = export_to_string(snapshot().snapshot(), &config).expect("render export");
        assert!(!json.contains("\"type_id\""));
        assert!(!json.contains("\"marshal_type\""));
    }

    #[test]
    fn strings_are_escaped() {
        let json = export_to_string(snapshot().snapshot(), &ExportConfig::default()).expect("render export");
        assert!(json.contains(r#"Says \"hi\"\n\tthen\u0001 stops"#), "escaped description missing");
        let value: Value = serde_json::from_str(&json).expect("valid JSON");
        let description = value["classes"][1]["description"].as_str().expect("description");
        assert_eq!(description, "Says \"hi\"\n\tthen\u{1} stops");
    }

    #[test]
    fn indent_size_sets_pretty_indentation() {
        let config = ExportConfig { indent_size: 4, ..ExportConfig::default() };
        let json = export_to_string(snapshot().snapshot(), &config).expect("render export");
        assert!(json.starts_with("{\n    \"classes\": [\n        {\n            \"name\": \"Extras.Thing\",\n"), "{json}");
        let value: Value = serde_json::from_str(&json).expect("valid JSON");
        assert_eq!(value["classes"][3]["base_classes"], serde_json::json!([]));
        assert_eq!(value["global_methods"][0]["parameters"][0]["marshal_type"], serde_json::json!("Float"));
    }

    #[test]
    fn compact_mode_has_no_whitespace_between_tokens() {
        let config = ExportConfig { pretty_print: false, ..ExportConfig::default() };
        let json = export_to_string(snapshot().snapshot(), &config).expect("render export");
        assert!(!json.contains('\n'));
        assert!(!json.contains(": "));
        assert!(json.starts_with("{\"classes\":[{\"name\":\"Extras.Thing\""));
        serde_json::from_str::<Value>(&json).expect("compact export is valid JSON");
    }

    #[test]
    fn filters_deprecated_and_category_prefixes() {
        let reflector = snapshot();
        let config = ExportConfig { include_deprecated: false, ..ExportConfig::default() };
        let result = export(reflector.snapshot(), &config);
        assert!(result.success);
        assert!(!class_names(&result.json_data).contains(&"Old.Thing".to_string()));

        let config = ExportConfig { include_categories: vec!["Physics".into()], ..ExportConfig::default() };
        let result = export(reflector.snapshot(), &config);
        assert_eq!(class_names(&result.json_data), vec!["New.Thing", "Physics.Hinge"]);
        assert_eq!(result.classes_exported, 2);
        assert_eq!(result.global_methods_exported, 1);

        let config = ExportConfig {
            exclude_categories: vec!["Physics".into()],
            exclude_classes: vec!["Old.Thing".into()],
            ..ExportConfig::default()
        };
        let result = export(reflector.snapshot(), &config);
        assert_eq!(class_names(&result.json_data), vec!["Extras.Thing"]);
    }

    #[test]
    fn writes_file_and_creates_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("api.json");
        let result = export_to_file(snapshot().snapshot(), &path, &ExportConfig::default());
        assert!(result.success, "export failed: {}", result.error_message);
        assert_eq!(result.output_path.as_deref(), Some(path.as_path()));
        let written = fs::read_to_string(&path).expect("read export");
        assert_eq!(written, result.json_data);
    }

    #[test]
    fn write_failures_are_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = export_to_file(snapshot().snapshot(), dir.path(), &ExportConfig::default());
        assert!(!result.success);
        assert_eq!(result.error_message, format!("Failed to write to file: {}", dir.path().display()));
        let result = export_from_context(None, &ExportConfig::default());
        assert_eq!(result.error_message, "Reflector is null");
    }
}
