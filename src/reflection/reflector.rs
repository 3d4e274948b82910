use std::sync::Arc;
use uuid::Uuid;

use super::{
    NativeHandle, ReflectedClass, ReflectedEBus, ReflectedEBusEvent, ReflectedMethod, ReflectedParameter,
    ReflectedProperty, ReflectionSnapshot,
};
use crate::marshal::MarshalKind;
use crate::registry::{
    Attribute, ExcludeFlags, NativeClass, NativeEBus, NativeMethod, NativeParameter, NativeProperty, NativeRegistry,
    ParamTraits, ScopeFlags,
};

#[derive(Debug, Default)]
struct ScriptAttributes {
    description: String,
    category: String,
    is_deprecated: bool,
    deprecation_message: String,
    module: String,
}

impl ScriptAttributes {
    fn extract(attributes: &[Attribute]) -> Self {
        let mut out = Self::default();
        for attribute in attributes {
            match attribute {
                Attribute::Category(category) => out.category = category.clone(),
                Attribute::Deprecated(flag) => out.is_deprecated = *flag,
                Attribute::Description(text) => out.description = text.clone(),
                Attribute::DeprecationMessage(text) => out.deprecation_message = text.clone(),
                Attribute::Module(module) => out.module = module.clone(),
                Attribute::ExcludeFrom(_) | Attribute::Scope(_) | Attribute::Other { .. } => {}
            }
        }
        out
    }
}

fn should_expose(attributes: &[Attribute]) -> bool {
    for attribute in attributes {
        match attribute {
            Attribute::ExcludeFrom(flags) if flags.intersects(ExcludeFlags::ALL) => return false,
            Attribute::Scope(scope) if !scope.intersects(ScopeFlags::COMMON | ScopeFlags::AUTOMATION) => return false,
            _ => {}
        }
    }
    true
}

/// Walks a [`NativeRegistry`] and keeps the resulting [`ReflectionSnapshot`].
#[derive(Debug, Default)]
pub struct Reflector {
    snapshot: Arc<ReflectionSnapshot>,
}

impl Reflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot with one built from `registry`. A missing registry leaves state untouched.
    pub fn reflect_from_context(&mut self, registry: Option<&NativeRegistry>) {
        let Some(registry) = registry else {
            log::error!("[reflect] cannot reflect from a null registry");
            return;
        };
        self.clear();

        let object_types = registry.classes().map(|class| (class.type_id, class.name.clone())).collect();
        let mut snapshot = ReflectionSnapshot::with_object_types(object_types);
        let pass = Pass { registry, snapshot: &snapshot };

        let mut classes = Vec::new();
        for class in registry.classes() {
            if !should_expose(&class.attributes) {
                continue;
            }
            if let Some(reflected) = pass.reflect_class(class) {
                classes.push(reflected);
            }
        }
        let mut ebuses = Vec::new();
        for bus in registry.ebuses() {
            if !should_expose(&bus.attributes) {
                continue;
            }
            if let Some(reflected) = pass.reflect_ebus(bus) {
                ebuses.push(reflected);
            }
        }
        let global_methods: Vec<_> = registry
            .methods()
            .iter()
            .filter(|method| should_expose(&method.attributes))
            .filter_map(|method| pass.reflect_method(&method.name, method, ""))
            .collect();
        let global_properties: Vec<_> = registry
            .properties()
            .iter()
            .filter(|property| should_expose(&property.attributes))
            .filter_map(|property| pass.reflect_property(property, ""))
            .collect();

        snapshot.classes = classes.into_iter().map(|class| (class.name.clone(), class)).collect();
        snapshot.ebuses = ebuses.into_iter().map(|bus| (bus.name.clone(), bus)).collect();
        snapshot.global_methods = global_methods;
        snapshot.global_properties = global_properties;

        log::info!(
            "[reflect] reflected {} classes, {} ebuses, {} global methods, {} global properties",
            snapshot.class_count(),
            snapshot.ebus_count(),
            snapshot.global_method_count(),
            snapshot.global_property_count()
        );
        self.snapshot = Arc::new(snapshot);
    }

    pub fn clear(&mut self) {
        self.snapshot = Arc::new(ReflectionSnapshot::new());
    }

    pub fn snapshot(&self) -> &ReflectionSnapshot {
        &self.snapshot
    }

    /// Shared handle for consumers that outlive a borrow of the reflector.
    pub fn shared_snapshot(&self) -> Arc<ReflectionSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn class_names(&self) -> Vec<String> {
        self.snapshot.class_names()
    }

    pub fn class(&self, name: &str) -> Option<&ReflectedClass> {
        self.snapshot.class(name)
    }

    pub fn ebus_names(&self) -> Vec<String> {
        self.snapshot.ebus_names()
    }

    pub fn ebus(&self, name: &str) -> Option<&ReflectedEBus> {
        self.snapshot.ebus(name)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.snapshot.has_class(name)
    }

    pub fn has_ebus(&self, name: &str) -> bool {
        self.snapshot.has_ebus(name)
    }

    pub fn global_methods(&self) -> &[ReflectedMethod] {
        self.snapshot.global_methods()
    }

    pub fn global_properties(&self) -> &[ReflectedProperty] {
        self.snapshot.global_properties()
    }

    pub fn classes_by_category(&self, category: &str, include_deprecated: bool) -> Vec<&ReflectedClass> {
        self.snapshot.classes_by_category(category, include_deprecated)
    }

    pub fn derived_classes(&self, base_class: &str) -> Vec<&ReflectedClass> {
        self.snapshot.derived_classes(base_class)
    }

    pub fn classes_by_owner(&self, owner: &str, include_deprecated: bool) -> Vec<&ReflectedClass> {
        self.snapshot.classes_by_owner(owner, include_deprecated)
    }

    pub fn ebuses_by_owner(&self, owner: &str) -> Vec<&ReflectedEBus> {
        self.snapshot.ebuses_by_owner(owner)
    }

    pub fn source_owner_names(&self) -> Vec<String> {
        self.snapshot.source_owner_names()
    }

    pub fn set_class_owner_source(&mut self, class_name: &str, owner: &str) -> bool {
        Arc::make_mut(&mut self.snapshot).set_class_owner_source(class_name, owner)
    }

    pub fn set_ebus_owner_source(&mut self, bus_name: &str, owner: &str) -> bool {
        Arc::make_mut(&mut self.snapshot).set_ebus_owner_source(bus_name, owner)
    }

    pub fn determine_marshal_kind(&self, type_id: Uuid) -> MarshalKind {
        self.snapshot.determine_marshal_kind(type_id)
    }

    pub fn marshal_scan_count(&self) -> usize {
        self.snapshot.marshal_scan_count()
    }
}

/// Borrowed state for a single reflection pass.
struct Pass<'a> {
    registry: &'a NativeRegistry,
    snapshot: &'a ReflectionSnapshot,
}

impl Pass<'_> {
    fn reflect_class(&self, class: &NativeClass) -> Option<ReflectedClass> {
        if class.name.is_empty() {
            log::warn!("[reflect] skipping class with an empty name ({})", class.type_id);
            return None;
        }
        let attributes = ScriptAttributes::extract(&class.attributes);

        let base_classes = class
            .bases
            .iter()
            .filter_map(|base| self.registry.class_by_type_id(*base).map(|base| base.name.clone()))
            .collect();

        let methods = class
            .methods
            .iter()
            .filter(|method| should_expose(&method.attributes))
            .filter_map(|method| {
                let mut reflected = self.reflect_method(&method.name, method, &class.name)?;
                if method.args.is_empty() || !method.is_member {
                    reflected.is_static = true;
                }
                Some(reflected)
            })
            .collect();

        let properties = class
            .properties
            .iter()
            .filter(|property| should_expose(&property.attributes))
            .filter_map(|property| self.reflect_property(property, &class.name))
            .collect();

        let constructors = class
            .constructors
            .iter()
            .enumerate()
            .filter_map(|(index, ctor)| {
                let mut reflected = self.reflect_method(&format!("Constructor_{index}"), ctor, &class.name)?;
                reflected.is_static = true;
                Some(reflected)
            })
            .collect();

        Some(ReflectedClass {
            name: class.name.clone(),
            type_id: class.type_id,
            base_classes,
            methods,
            properties,
            constructors,
            native: class.binding.clone().map(NativeHandle::new),
            description: attributes.description,
            category: attributes.category,
            is_deprecated: attributes.is_deprecated,
            source_module_name: attributes.module,
            source_owner_name: String::new(),
        })
    }

    fn reflect_ebus(&self, bus: &NativeEBus) -> Option<ReflectedEBus> {
        if bus.name.is_empty() {
            log::warn!("[reflect] skipping ebus with an empty name ({})", bus.type_id);
            return None;
        }
        let attributes = ScriptAttributes::extract(&bus.attributes);
        let address_type = match &bus.address {
            Some(address) if !address.type_id.is_nil() => self.reflect_parameter(address),
            _ => ReflectedParameter::unknown(),
        };

        let events = bus
            .events
            .iter()
            .map(|event| {
                let (sender, is_broadcast) = match (&event.broadcast, &event.event) {
                    (Some(broadcast), _) => (Some(broadcast), true),
                    (None, Some(addressed)) => (Some(addressed), false),
                    (None, None) => (None, true),
                };
                let mut reflected = ReflectedEBusEvent {
                    name: event.name.clone(),
                    bus_name: bus.name.clone(),
                    is_broadcast,
                    return_type: ReflectedParameter::unknown(),
                    parameters: Vec::new(),
                    sender: sender.cloned(),
                };
                if let Some(sender) = sender {
                    reflected.return_type = self.reflect_result(sender.result.as_ref());
                    let start = usize::from(!is_broadcast);
                    reflected.parameters = sender.args.iter().skip(start).map(|arg| self.reflect_parameter(arg)).collect();
                }
                reflected
            })
            .collect();

        Some(ReflectedEBus {
            name: bus.name.clone(),
            type_id: bus.type_id,
            address_type,
            events,
            description: attributes.description,
            category: attributes.category,
            source_module_name: attributes.module,
            source_owner_name: String::new(),
        })
    }

    fn reflect_method(&self, name: &str, method: &Arc<NativeMethod>, class_name: &str) -> Option<ReflectedMethod> {
        if name.is_empty() {
            log::warn!("[reflect] skipping unnamed method on '{class_name}'");
            return None;
        }
        let attributes = ScriptAttributes::extract(&method.attributes);
        let start = usize::from(method.is_member);
        let parameters = method
            .args
            .iter()
            .enumerate()
            .skip(start)
            .map(|(index, arg)| {
                let mut param = self.reflect_parameter(arg);
                param.name = match &arg.name {
                    Some(name) if !name.is_empty() => name.clone(),
                    _ => format!("arg{}", index - start),
                };
                param
            })
            .collect();

        Some(ReflectedMethod {
            name: name.to_string(),
            class_name: class_name.to_string(),
            is_static: !method.is_member,
            is_const: method.is_const,
            return_type: self.reflect_result(method.result.as_ref()),
            parameters,
            native: Some(NativeHandle::new(Arc::clone(method))),
            description: attributes.description,
            category: attributes.category,
            is_deprecated: attributes.is_deprecated,
            deprecation_message: attributes.deprecation_message,
        })
    }

    fn reflect_property(&self, property: &NativeProperty, class_name: &str) -> Option<ReflectedProperty> {
        if property.getter.is_none() && property.setter.is_none() {
            log::warn!("[reflect] property '{class_name}.{}' has neither getter nor setter", property.name);
            return None;
        }
        let attributes = ScriptAttributes::extract(&property.attributes);

        let mut value_type = match &property.getter {
            Some(getter) => self.reflect_result(getter.result.as_ref()),
            None => ReflectedParameter::unknown(),
        };
        if value_type.marshal_kind == MarshalKind::Unknown {
            if let Some(setter) = &property.setter {
                let index = usize::from(setter.is_member);
                if let Some(arg) = setter.args.get(index) {
                    value_type = self.reflect_parameter(arg);
                }
            }
        }

        Some(ReflectedProperty {
            name: property.name.clone(),
            class_name: class_name.to_string(),
            value_type,
            has_getter: property.getter.is_some(),
            has_setter: property.setter.is_some(),
            native_getter: property.getter.clone().map(NativeHandle::new),
            native_setter: property.setter.clone().map(NativeHandle::new),
            description: attributes.description,
            is_deprecated: attributes.is_deprecated,
        })
    }

    fn reflect_result(&self, result: Option<&NativeParameter>) -> ReflectedParameter {
        match result {
            Some(result) => self.reflect_parameter(result),
            None => ReflectedParameter::void(),
        }
    }

    fn reflect_parameter(&self, param: &NativeParameter) -> ReflectedParameter {
        ReflectedParameter {
            name: param.name.clone().unwrap_or_default(),
            type_id: param.type_id,
            type_name: self.snapshot.type_name(param.type_id),
            is_pointer: param.traits.contains(ParamTraits::POINTER),
            is_reference: param.traits.contains(ParamTraits::REFERENCE),
            is_const: param.traits.contains(ParamTraits::CONST),
            marshal_kind: self.snapshot.determine_marshal_kind(param.type_id),
        }
    }
}
