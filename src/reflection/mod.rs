//! Normalized metadata for the native API surface exposed to scripts.

mod reflector;

pub use reflector::Reflector;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::marshal::MarshalKind;
use crate::registry::{type_ids, ClassBinding, EventSender, NativeMethod};

/// Owner name used when grouping items that were never attributed to one.
pub const UNKNOWN_OWNER: &str = "Unknown";

/// Shared pointer to native data, compared by identity.
pub struct NativeHandle<T: ?Sized>(Arc<T>);

impl<T: ?Sized> NativeHandle<T> {
    pub fn new(inner: Arc<T>) -> Self {
        Self(inner)
    }
}

impl<T: ?Sized> Clone for NativeHandle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for NativeHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Deref for NativeHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedParameter {
    pub name: String,
    pub type_id: Uuid,
    pub type_name: String,
    pub is_pointer: bool,
    pub is_reference: bool,
    pub is_const: bool,
    pub marshal_kind: MarshalKind,
}

impl ReflectedParameter {
    pub fn void() -> Self {
        Self {
            name: String::new(),
            type_id: type_ids::VOID,
            type_name: "void".to_string(),
            is_pointer: false,
            is_reference: false,
            is_const: false,
            marshal_kind: MarshalKind::Void,
        }
    }

    pub fn unknown() -> Self {
        Self {
            name: String::new(),
            type_id: Uuid::nil(),
            type_name: String::new(),
            is_pointer: false,
            is_reference: false,
            is_const: false,
            marshal_kind: MarshalKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedMethod {
    pub name: String,
    /// Empty for global methods.
    pub class_name: String,
    pub is_static: bool,
    pub is_const: bool,
    pub return_type: ReflectedParameter,
    /// Explicit parameters only; the receiver of instance methods is not listed.
    pub parameters: Vec<ReflectedParameter>,
    pub native: Option<NativeHandle<NativeMethod>>,
    pub description: String,
    pub category: String,
    pub is_deprecated: bool,
    pub deprecation_message: String,
}

impl ReflectedMethod {
    pub fn qualified_name(&self) -> String {
        if self.class_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.class_name, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedProperty {
    pub name: String,
    pub class_name: String,
    pub value_type: ReflectedParameter,
    pub has_getter: bool,
    pub has_setter: bool,
    pub native_getter: Option<NativeHandle<NativeMethod>>,
    pub native_setter: Option<NativeHandle<NativeMethod>>,
    pub description: String,
    pub is_deprecated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedClass {
    pub name: String,
    pub type_id: Uuid,
    pub base_classes: Vec<String>,
    pub methods: Vec<ReflectedMethod>,
    pub properties: Vec<ReflectedProperty>,
    pub constructors: Vec<ReflectedMethod>,
    pub native: Option<NativeHandle<ClassBinding>>,
    pub description: String,
    pub category: String,
    pub is_deprecated: bool,
    pub source_module_name: String,
    pub source_owner_name: String,
}

impl ReflectedClass {
    pub fn find_method(&self, name: &str) -> Option<&ReflectedMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&ReflectedProperty> {
        self.properties.iter().find(|property| property.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedEBusEvent {
    pub name: String,
    pub bus_name: String,
    pub is_broadcast: bool,
    pub return_type: ReflectedParameter,
    pub parameters: Vec<ReflectedParameter>,
    pub sender: Option<EventSender>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReflectedEBus {
    pub name: String,
    pub type_id: Uuid,
    pub address_type: ReflectedParameter,
    pub events: Vec<ReflectedEBusEvent>,
    pub description: String,
    pub category: String,
    pub source_module_name: String,
    pub source_owner_name: String,
}

impl ReflectedEBus {
    pub fn find_event(&self, name: &str) -> Option<&ReflectedEBusEvent> {
        self.events.iter().find(|event| event.name == name)
    }
}

/// Built-in identities recognized before any class scan, in lookup order.
const BUILTIN_TYPES: &[(Uuid, MarshalKind, &str)] = &[
    (type_ids::VOID, MarshalKind::Void, "void"),
    (type_ids::BOOL, MarshalKind::Bool, "bool"),
    (type_ids::INT8, MarshalKind::Int8, "int8"),
    (type_ids::INT16, MarshalKind::Int16, "int16"),
    (type_ids::INT32, MarshalKind::Int32, "int32"),
    (type_ids::INT64, MarshalKind::Int64, "int64"),
    (type_ids::UINT8, MarshalKind::UInt8, "uint8"),
    (type_ids::UINT16, MarshalKind::UInt16, "uint16"),
    (type_ids::UINT32, MarshalKind::UInt32, "uint32"),
    (type_ids::UINT64, MarshalKind::UInt64, "uint64"),
    (type_ids::FLOAT, MarshalKind::Float, "float"),
    (type_ids::DOUBLE, MarshalKind::Double, "double"),
    (type_ids::STRING, MarshalKind::String, "string"),
    (type_ids::VECTOR3, MarshalKind::Vector3, "Vector3"),
    (type_ids::QUATERNION, MarshalKind::Quaternion, "Quaternion"),
    (type_ids::TRANSFORM, MarshalKind::Transform, "Transform"),
    (type_ids::ENTITY_ID, MarshalKind::EntityId, "EntityId"),
];

pub fn builtin_marshal_kind(type_id: Uuid) -> Option<MarshalKind> {
    BUILTIN_TYPES.iter().find(|(id, _, _)| *id == type_id).map(|(_, kind, _)| *kind)
}

pub fn builtin_type_name(type_id: Uuid) -> Option<&'static str> {
    BUILTIN_TYPES.iter().find(|(id, _, _)| *id == type_id).map(|(_, _, name)| *name)
}

/// Everything one reflection pass extracted, plus the lookup state derived from it.
#[derive(Default)]
pub struct ReflectionSnapshot {
    pub(crate) classes: BTreeMap<String, ReflectedClass>,
    pub(crate) ebuses: BTreeMap<String, ReflectedEBus>,
    pub(crate) global_methods: Vec<ReflectedMethod>,
    pub(crate) global_properties: Vec<ReflectedProperty>,
    /// Every registry class seen during the pass, exposed or not.
    pub(crate) object_types: Vec<(Uuid, String)>,
    marshal_cache: RwLock<HashMap<Uuid, MarshalKind>>,
    marshal_scans: AtomicUsize,
    owner_names: RwLock<Option<Vec<String>>>,
}

impl Clone for ReflectionSnapshot {
    fn clone(&self) -> Self {
        Self {
            classes: self.classes.clone(),
            ebuses: self.ebuses.clone(),
            global_methods: self.global_methods.clone(),
            global_properties: self.global_properties.clone(),
            object_types: self.object_types.clone(),
            marshal_cache: RwLock::new(self.marshal_cache.read().clone()),
            marshal_scans: AtomicUsize::new(self.marshal_scans.load(Ordering::Relaxed)),
            owner_names: RwLock::new(self.owner_names.read().clone()),
        }
    }
}

impl fmt::Debug for ReflectionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReflectionSnapshot")
            .field("classes", &self.classes.len())
            .field("ebuses", &self.ebuses.len())
            .field("global_methods", &self.global_methods.len())
            .field("global_properties", &self.global_properties.len())
            .finish()
    }
}

/// Content equality; lookup caches are ignored.
impl PartialEq for ReflectionSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.classes == other.classes
            && self.ebuses == other.ebuses
            && self.global_methods == other.global_methods
            && self.global_properties == other.global_properties
    }
}

impl ReflectionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_object_types(object_types: Vec<(Uuid, String)>) -> Self {
        Self { object_types, ..Self::default() }
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    pub fn class(&self, name: &str) -> Option<&ReflectedClass> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ReflectedClass> {
        self.classes.values()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn ebus_names(&self) -> Vec<String> {
        self.ebuses.keys().cloned().collect()
    }

    pub fn ebus(&self, name: &str) -> Option<&ReflectedEBus> {
        self.ebuses.get(name)
    }

    pub fn ebuses(&self) -> impl Iterator<Item = &ReflectedEBus> {
        self.ebuses.values()
    }

    pub fn has_ebus(&self, name: &str) -> bool {
        self.ebuses.contains_key(name)
    }

    pub fn global_methods(&self) -> &[ReflectedMethod] {
        &self.global_methods
    }

    pub fn global_properties(&self) -> &[ReflectedProperty] {
        &self.global_properties
    }

    pub fn global_property(&self, name: &str) -> Option<&ReflectedProperty> {
        self.global_properties.iter().find(|property| property.name == name)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn ebus_count(&self) -> usize {
        self.ebuses.len()
    }

    pub fn global_method_count(&self) -> usize {
        self.global_methods.len()
    }

    pub fn global_property_count(&self) -> usize {
        self.global_properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
            && self.ebuses.is_empty()
            && self.global_methods.is_empty()
            && self.global_properties.is_empty()
    }

    /// Cached classification of `type_id`. Misses fall back to a scan of the pass's classes.
    /// A nil id means "no type" and classifies as void.
    pub fn determine_marshal_kind(&self, type_id: Uuid) -> MarshalKind {
        if type_id.is_nil() {
            return MarshalKind::Void;
        }
        if let Some(kind) = self.marshal_cache.read().get(&type_id) {
            return *kind;
        }
        let kind = builtin_marshal_kind(type_id).unwrap_or_else(|| {
            self.marshal_scans.fetch_add(1, Ordering::Relaxed);
            if self.object_types.iter().any(|(id, _)| *id == type_id) {
                MarshalKind::Object
            } else {
                MarshalKind::Unknown
            }
        });
        self.marshal_cache.write().insert(type_id, kind);
        kind
    }

    /// Number of class scans `determine_marshal_kind` has performed.
    pub fn marshal_scan_count(&self) -> usize {
        self.marshal_scans.load(Ordering::Relaxed)
    }

    pub fn type_name(&self, type_id: Uuid) -> String {
        if let Some(name) = builtin_type_name(type_id) {
            return name.to_string();
        }
        self.object_types
            .iter()
            .find(|(id, _)| *id == type_id)
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| type_id.hyphenated().to_string())
    }

    /// An empty category matches every class.
    pub fn classes_by_category(&self, category: &str, include_deprecated: bool) -> Vec<&ReflectedClass> {
        self.classes
            .values()
            .filter(|class| include_deprecated || !class.is_deprecated)
            .filter(|class| category.is_empty() || class.category == category)
            .collect()
    }

    pub fn derived_classes(&self, base_class: &str) -> Vec<&ReflectedClass> {
        self.classes.values().filter(|class| class.base_classes.iter().any(|base| base == base_class)).collect()
    }

    pub fn classes_by_owner(&self, owner: &str, include_deprecated: bool) -> Vec<&ReflectedClass> {
        self.classes
            .values()
            .filter(|class| class.source_owner_name == owner)
            .filter(|class| include_deprecated || !class.is_deprecated)
            .collect()
    }

    pub fn ebuses_by_owner(&self, owner: &str) -> Vec<&ReflectedEBus> {
        self.ebuses.values().filter(|bus| bus.source_owner_name == owner).collect()
    }

    /// Sorted, de-duplicated owner names; empty owners are not listed.
    pub fn source_owner_names(&self) -> Vec<String> {
        if let Some(cached) = self.owner_names.read().as_ref() {
            return cached.clone();
        }
        let mut names: Vec<String> = self
            .classes
            .values()
            .map(|class| class.source_owner_name.as_str())
            .chain(self.ebuses.values().map(|bus| bus.source_owner_name.as_str()))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        *self.owner_names.write() = Some(names.clone());
        names
    }

    pub fn classes_grouped_by_owner(&self) -> BTreeMap<String, Vec<&ReflectedClass>> {
        let mut groups: BTreeMap<String, Vec<&ReflectedClass>> = BTreeMap::new();
        for class in self.classes.values() {
            groups.entry(owner_key(&class.source_owner_name)).or_default().push(class);
        }
        groups
    }

    pub fn ebuses_grouped_by_owner(&self) -> BTreeMap<String, Vec<&ReflectedEBus>> {
        let mut groups: BTreeMap<String, Vec<&ReflectedEBus>> = BTreeMap::new();
        for bus in self.ebuses.values() {
            groups.entry(owner_key(&bus.source_owner_name)).or_default().push(bus);
        }
        groups
    }

    pub fn set_class_owner_source(&mut self, class_name: &str, owner: &str) -> bool {
        let Some(class) = self.classes.get_mut(class_name) else {
            return false;
        };
        class.source_owner_name = owner.to_string();
        *self.owner_names.get_mut() = None;
        true
    }

    pub fn set_ebus_owner_source(&mut self, bus_name: &str, owner: &str) -> bool {
        let Some(bus) = self.ebuses.get_mut(bus_name) else {
            return false;
        };
        bus.source_owner_name = owner.to_string();
        *self.owner_names.get_mut() = None;
        true
    }
}

fn owner_key(owner: &str) -> String {
    if owner.is_empty() {
        UNKNOWN_OWNER.to_string()
    } else {
        owner.to_string()
    }
}

pub type SharedSnapshot = Arc<ReflectionSnapshot>;
