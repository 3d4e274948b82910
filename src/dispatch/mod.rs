//! Name-keyed calls from managed code into reflected native methods, properties and classes.
//!
//! Every operation resolves its target in the current [`ReflectionSnapshot`], copies arguments
//! into thread-local scratch slots, invokes the native binding and reads the result back. Failures
//! come back as [`DispatchResult`] errors naming what was being called; nothing panics across the
//! boundary.

mod internal_calls;
mod marshalling;
mod storage;

pub use internal_calls::{internal_calls, parse_args_json, INTERNAL_CALL_CLASS};
pub use marshalling::{allocate_result, marshal_from_result, marshal_to_argument, try_marshal_to_argument, MarshalError};
pub use storage::{scratch_len, MarshalStorage};

use parking_lot::RwLock;
use std::sync::Arc;

use crate::marshal::{DispatchResult, InstanceHandle, MarshalKind, MarshalledValue};
use crate::reflection::{
    NativeHandle, ReflectedClass, ReflectedMethod, ReflectedParameter, ReflectedProperty, ReflectionSnapshot,
};
use crate::registry::{BehaviorArgument, NativeMethod, ParamTraits};
use storage::{with_scratch, ScratchScope};

const NOT_INITIALIZED: &str = "Dispatcher not initialized";

#[derive(Debug, Default)]
pub struct GenericDispatcher {
    snapshot: RwLock<Option<Arc<ReflectionSnapshot>>>,
}

impl GenericDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts dispatching against `snapshot`, replacing any previous one.
    pub fn initialize(&self, snapshot: Arc<ReflectionSnapshot>) {
        let previous = self.snapshot.write().replace(snapshot);
        if previous.is_some() {
            log::info!("[dispatch] re-initialized with a new snapshot");
        } else {
            log::info!("[dispatch] initialized");
        }
    }

    pub fn shutdown(&self) {
        if self.snapshot.write().take().is_some() {
            log::info!("[dispatch] shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.read().is_some()
    }

    pub fn snapshot(&self) -> Option<Arc<ReflectionSnapshot>> {
        self.snapshot.read().clone()
    }

    pub fn invoke_static_method(&self, class_name: &str, method_name: &str, args: &[MarshalledValue]) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        let Some(method) = find_matching_method(class, method_name, args.len(), true) else {
            return DispatchResult::error(format!("Static method not found: {class_name}.{method_name}"));
        };
        into_result(call_method(method, None, args))
    }

    pub fn invoke_instance_method(
        &self,
        class_name: &str,
        method_name: &str,
        instance: InstanceHandle,
        args: &[MarshalledValue],
    ) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        if instance.is_null() {
            return DispatchResult::error("Instance handle is null");
        }
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        let Some(method) = find_matching_method(class, method_name, args.len(), false) else {
            return DispatchResult::error(format!("Instance method not found: {class_name}.{method_name}"));
        };
        into_result(call_method(method, Some(receiver(class, instance)), args))
    }

    pub fn invoke_global_method(&self, method_name: &str, args: &[MarshalledValue]) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(method) = snapshot.global_methods().iter().find(|method| method.name == method_name) else {
            return DispatchResult::error(format!("Global method not found: {method_name}"));
        };
        match call_method(method, None, args) {
            Err(Failure { error: CallError::Invoke, .. }) => {
                DispatchResult::error(format!("Global method invocation failed: {method_name}"))
            }
            other => into_result(other),
        }
    }

    pub fn get_property(&self, class_name: &str, property_name: &str, instance: InstanceHandle) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        let Some(property) = class.find_property(property_name) else {
            return DispatchResult::error(format!("Property not found: {class_name}.{property_name}"));
        };
        read_property(property, &format!("{class_name}.{property_name}"), Some(receiver(class, instance)))
    }

    pub fn set_property(
        &self,
        class_name: &str,
        property_name: &str,
        instance: InstanceHandle,
        value: &MarshalledValue,
    ) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        let Some(property) = class.find_property(property_name) else {
            return DispatchResult::error(format!("Property not found: {class_name}.{property_name}"));
        };
        write_property(property, &format!("{class_name}.{property_name}"), Some(receiver(class, instance)), value)
    }

    pub fn get_global_property(&self, property_name: &str) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(property) = snapshot.global_property(property_name) else {
            return DispatchResult::error(format!("Global property not found: {property_name}"));
        };
        read_property(property, property_name, None)
    }

    pub fn set_global_property(&self, property_name: &str, value: &MarshalledValue) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(property) = snapshot.global_property(property_name) else {
            return DispatchResult::error(format!("Global property not found: {property_name}"));
        };
        write_property(property, property_name, None, value)
    }

    /// Validates the bus and event; raising events is not supported.
    pub fn broadcast_ebus_event(&self, bus_name: &str, event_name: &str, _args: &[MarshalledValue]) -> DispatchResult {
        match self.validate_event(bus_name, event_name) {
            Some(err) => err,
            None => DispatchResult::error("EBus broadcast not yet implemented"),
        }
    }

    /// Validates the bus and event; raising events is not supported.
    pub fn send_ebus_event(
        &self,
        bus_name: &str,
        event_name: &str,
        _address: &MarshalledValue,
        _args: &[MarshalledValue],
    ) -> DispatchResult {
        match self.validate_event(bus_name, event_name) {
            Some(err) => err,
            None => DispatchResult::error("EBus send not yet implemented"),
        }
    }

    fn validate_event(&self, bus_name: &str, event_name: &str) -> Option<DispatchResult> {
        let Some(snapshot) = self.snapshot() else {
            return Some(DispatchResult::error(NOT_INITIALIZED));
        };
        let Some(bus) = snapshot.ebus(bus_name) else {
            return Some(DispatchResult::error(format!("EBus not found: {bus_name}")));
        };
        if bus.find_event(event_name).is_none() {
            return Some(DispatchResult::error(format!("EBus event not found: {bus_name}.{event_name}")));
        }
        None
    }

    /// Default-constructs when `args` is empty and the class has a default binding; otherwise
    /// runs the first constructor taking `args.len()` arguments.
    pub fn create_instance(&self, class_name: &str, args: &[MarshalledValue]) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        if class.native.is_none() && class.constructors.is_empty() {
            return DispatchResult::error(format!("Class has no behavior binding: {class_name}"));
        }

        if args.is_empty() {
            if let Some(binding) = &class.native {
                let object = binding.create_default();
                if !object.is_null() {
                    return DispatchResult::success(MarshalledValue::object(InstanceHandle::from_ptr(object), class_name));
                }
            }
        }

        if let Some(constructor) = find_matching_constructor(class, args.len()) {
            match call_method(constructor, None, args) {
                Ok(MarshalledValue::Object { handle, .. }) if !handle.is_null() => {
                    return DispatchResult::success(MarshalledValue::object(handle, class_name));
                }
                Ok(_) | Err(Failure { error: CallError::Invoke | CallError::Unbound, .. }) => {}
                Err(failure) => return into_result(Err(failure)),
            }
        }
        DispatchResult::error("Failed to create instance - no suitable constructor found")
    }

    pub fn destroy_instance(&self, class_name: &str, instance: InstanceHandle) -> DispatchResult {
        let Some(snapshot) = self.snapshot() else {
            return DispatchResult::error(NOT_INITIALIZED);
        };
        if instance.is_null() {
            return DispatchResult::error("Instance handle is null");
        }
        let Some(class) = snapshot.class(class_name) else {
            return DispatchResult::error(format!("Class not found: {class_name}"));
        };
        let Some(binding) = class.native.as_ref() else {
            return DispatchResult::error(format!("Class has no behavior binding: {class_name}"));
        };
        // SAFETY: managed code only holds handles this dispatcher created for `class_name`.
        unsafe { binding.destroy(instance.as_ptr()) };
        DispatchResult::void()
    }
}

/// First method named `name` with exactly `arg_count` parameters and the requested static-ness.
pub fn find_matching_method<'a>(
    class: &'a ReflectedClass,
    name: &str,
    arg_count: usize,
    is_static: bool,
) -> Option<&'a ReflectedMethod> {
    class
        .methods
        .iter()
        .find(|method| method.name == name && method.parameters.len() == arg_count && method.is_static == is_static)
}

pub fn find_matching_constructor(class: &ReflectedClass, arg_count: usize) -> Option<&ReflectedMethod> {
    class.constructors.iter().find(|ctor| ctor.parameters.len() == arg_count)
}

fn receiver(class: &ReflectedClass, instance: InstanceHandle) -> BehaviorArgument {
    BehaviorArgument::new(instance.as_ptr(), class.type_id, ParamTraits::POINTER)
}

#[derive(Debug)]
enum CallError {
    Unbound,
    TooManyArguments,
    Marshal(usize),
    Invoke,
}

struct Failure<'a> {
    error: CallError,
    method: &'a ReflectedMethod,
}

fn into_result(result: Result<MarshalledValue, Failure<'_>>) -> DispatchResult {
    match result {
        Ok(value) => DispatchResult::success(value),
        Err(Failure { error, method }) => {
            let name = method.qualified_name();
            let message = match error {
                CallError::Unbound => format!("Method has no behavior binding: {name}"),
                CallError::TooManyArguments => "Too many arguments provided".to_string(),
                CallError::Marshal(index) => format!("Failed to marshal argument {index}"),
                CallError::Invoke => format!("Method invocation failed: {name}"),
            };
            DispatchResult::error(message)
        }
    }
}

fn call_method<'a>(
    method: &'a ReflectedMethod,
    receiver: Option<BehaviorArgument>,
    args: &[MarshalledValue],
) -> Result<MarshalledValue, Failure<'a>> {
    let fail = |error: CallError| Failure { error, method };
    let Some(native) = &method.native else {
        return Err(fail(CallError::Unbound));
    };
    let _scope = ScratchScope::enter();
    let mut behavior_args = Vec::with_capacity(args.len() + 1);
    behavior_args.extend(receiver);
    for (index, value) in args.iter().enumerate() {
        let Some(param) = method.parameters.get(index) else {
            return Err(fail(CallError::TooManyArguments));
        };
        let Some(arg) = with_scratch(|scratch| marshal_to_argument(value, param, scratch)) else {
            return Err(fail(CallError::Marshal(index)));
        };
        behavior_args.push(arg);
    }
    invoke(native, &behavior_args, &method.return_type).ok_or_else(|| fail(CallError::Invoke))
}

/// Calls `native` with a default-filled result slot and reads the result back.
fn invoke(
    native: &NativeHandle<NativeMethod>,
    args: &[BehaviorArgument],
    return_type: &ReflectedParameter,
) -> Option<MarshalledValue> {
    let mut slot = match return_type.marshal_kind {
        MarshalKind::Void => None,
        _ => with_scratch(|scratch| allocate_result(return_type, scratch)),
    };
    // SAFETY: every argument points at scratch storage or an instance of the type it claims, and
    // the slot matches the reflected return type.
    if !unsafe { native.call(args, slot.as_mut()) } {
        return None;
    }
    let value = match (&slot, return_type.marshal_kind) {
        (_, MarshalKind::Void) => MarshalledValue::Void,
        (Some(slot), _) => unsafe { marshal_from_result(slot.value, return_type) },
        (None, _) => MarshalledValue::Unknown,
    };
    Some(value)
}

fn read_property(property: &ReflectedProperty, label: &str, receiver: Option<BehaviorArgument>) -> DispatchResult {
    if !property.has_getter {
        return DispatchResult::error(format!("Property is write-only: {label}"));
    }
    let Some(getter) = &property.native_getter else {
        return DispatchResult::error(format!("Property has no getter binding: {label}"));
    };
    if matches!(property.value_type.marshal_kind, MarshalKind::Void | MarshalKind::Unknown) {
        return DispatchResult::error("Unsupported property type for get");
    }
    let _scope = ScratchScope::enter();
    let args = match member_receiver(getter, receiver) {
        Ok(args) => args,
        Err(err) => return err,
    };
    match invoke(getter, &args, &property.value_type) {
        Some(value) => DispatchResult::success(value),
        None => DispatchResult::error(format!("Property getter invocation failed: {label}")),
    }
}

fn write_property(
    property: &ReflectedProperty,
    label: &str,
    receiver: Option<BehaviorArgument>,
    value: &MarshalledValue,
) -> DispatchResult {
    if !property.has_setter {
        return DispatchResult::error(format!("Property is read-only: {label}"));
    }
    let Some(setter) = &property.native_setter else {
        return DispatchResult::error(format!("Property has no setter binding: {label}"));
    };
    let _scope = ScratchScope::enter();
    let mut args = match member_receiver(setter, receiver) {
        Ok(args) => args,
        Err(err) => return err,
    };
    let Some(arg) = with_scratch(|scratch| marshal_to_argument(value, &property.value_type, scratch)) else {
        return DispatchResult::error("Failed to marshal property value");
    };
    args.push(arg);
    // SAFETY: the receiver addresses an instance of the owning class and the value slot is scratch
    // storage of the property's type.
    if unsafe { setter.call(&args, None) } {
        DispatchResult::void()
    } else {
        DispatchResult::error(format!("Property setter invocation failed: {label}"))
    }
}

/// Leading arguments for a property accessor: the instance when the accessor is a member.
fn member_receiver(
    accessor: &NativeMethod,
    receiver: Option<BehaviorArgument>,
) -> Result<Vec<BehaviorArgument>, DispatchResult> {
    if !accessor.is_member {
        return Ok(Vec::with_capacity(1));
    }
    match receiver {
        Some(receiver) if !receiver.is_null() => Ok(vec![receiver]),
        _ => Err(DispatchResult::error("Instance handle is null")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::Reflector;
    use crate::registry::{NativeRegistry, NativeType, ObjectPtr};
    use glam::Vec3;
    use uuid::Uuid;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Body {
        mass: f32,
        velocity: Vec3,
    }

    impl NativeType for Body {
        const TYPE_ID: Uuid = Uuid::from_u128(0x5FD1A2C09A43493B8A0D3C41E7B2D901);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Probe {
        label: String,
    }

    impl NativeType for Probe {
        const TYPE_ID: Uuid = Uuid::from_u128(0x0C6F2B3E1D9A4C47B6C2E8B9D7A15F33);
    }

    struct Units;

    impl NativeType for Units {
        const TYPE_ID: Uuid = Uuid::from_u128(0x7E21C94B0A5D4F3896B1C3D5E7F90A2B);
    }

    fn dispatcher() -> GenericDispatcher {
        let mut registry = NativeRegistry::new();
        registry
            .class_builder::<Body>("Physics.Body")
            .default_binding()
            .constructor(|mass: f32| Body { mass, velocity: Vec3::ZERO })
            .property("Mass", |b: &mut Body| b.mass, |b: &mut Body, mass: f32| b.mass = mass)
            .read_only_property("Speed", |b: &mut Body| b.velocity.length())
            .method("Push", |b: &mut Body, impulse: Vec3| {
                b.velocity += impulse / b.mass.max(1.0);
                b.velocity
            })
            .method("Merge", |b: &mut Body, other: ObjectPtr<Body>| {
                let Some(other) = (unsafe { other.as_mut() }) else {
                    return false;
                };
                b.mass += other.mass;
                true
            })
            .static_method("Scale", |v: Vec3, by: f64| v * by as f32)
            .static_method("Make", |mass: f32| ObjectPtr::from_box(Box::new(Body { mass, velocity: Vec3::ZERO })));
        registry.class_builder::<Probe>("Debug.Probe").constructor(|label: String| Probe { label });
        registry.class_builder::<Units>("Debug.Units").static_method("MetersPerUnit", || 1.0f32);
        registry.method("Twice", |v: i32| v * 2);
        registry.property("Gravity", || -9.8f32, |_g: f32| {});
        registry.read_only_property("Version", || String::from("1.2"));
        let mut reflector = Reflector::new();
        reflector.reflect_from_context(Some(&registry));
        let dispatcher = GenericDispatcher::new();
        dispatcher.initialize(reflector.shared_snapshot());
        dispatcher
    }

    fn create_body(dispatcher: &GenericDispatcher, args: &[MarshalledValue]) -> InstanceHandle {
        let created = dispatcher.create_instance("Physics.Body", args);
        assert!(created.success, "create failed: {}", created.error_message);
        created.return_value.as_handle().expect("object handle")
    }

    #[test]
    fn uninitialized_dispatcher_refuses_every_call() {
        let dispatcher = GenericDispatcher::new();
        let result = dispatcher.invoke_static_method("Physics.Body", "Scale", &[]);
        assert_eq!(result.error_message, NOT_INITIALIZED);
        assert_eq!(dispatcher.get_global_property("Gravity").error_message, NOT_INITIALIZED);
        assert_eq!(dispatcher.broadcast_ebus_event("Bus", "Event", &[]).error_message, NOT_INITIALIZED);
    }

    #[test]
    fn static_methods_coerce_numeric_arguments() {
        let dispatcher = dispatcher();
        let args = [MarshalledValue::Vector3(Vec3::new(1.0, 2.0, 3.0)), MarshalledValue::Int32(2)];
        let result = dispatcher.invoke_static_method("Physics.Body", "Scale", &args);
        assert!(result.success, "{}", result.error_message);
        assert_eq!(result.return_value, MarshalledValue::Vector3(Vec3::new(2.0, 4.0, 6.0)));
    }

    #[test]
    fn errors_name_what_was_called() {
        let dispatcher = dispatcher();
        let result = dispatcher.invoke_static_method("Foo", "Bar", &[]);
        assert_eq!(result.error_message, "Class not found: Foo");
        let result = dispatcher.invoke_static_method("Physics.Body", "Bar", &[]);
        assert_eq!(result.error_message, "Static method not found: Physics.Body.Bar");
        let result = dispatcher.invoke_static_method("Physics.Body", "Scale", &[MarshalledValue::Bool(true)]);
        assert_eq!(result.error_message, "Static method not found: Physics.Body.Scale", "arity must match");
        let args = [MarshalledValue::String("x".into()), MarshalledValue::Double(1.0)];
        let result = dispatcher.invoke_static_method("Physics.Body", "Scale", &args);
        assert_eq!(result.error_message, "Failed to marshal argument 0");
        let result = dispatcher.invoke_global_method("Missing", &[]);
        assert_eq!(result.error_message, "Global method not found: Missing");
        let result = dispatcher.invoke_global_method("Twice", &[MarshalledValue::Int32(1), MarshalledValue::Int32(2)]);
        assert_eq!(result.error_message, "Too many arguments provided");
    }

    #[test]
    fn instance_methods_and_properties_address_the_object() {
        let dispatcher = dispatcher();
        let body = create_body(&dispatcher, &[]);
        let set = dispatcher.set_property("Physics.Body", "Mass", body, &MarshalledValue::Int64(2));
        assert!(set.success, "{}", set.error_message);
        let push = [MarshalledValue::Vector3(Vec3::new(4.0, 0.0, 0.0))];
        let result = dispatcher.invoke_instance_method("Physics.Body", "Push", body, &push);
        assert_eq!(result.return_value, MarshalledValue::Vector3(Vec3::new(2.0, 0.0, 0.0)));
        let speed = dispatcher.get_property("Physics.Body", "Speed", body);
        assert_eq!(speed.return_value, MarshalledValue::Float(2.0));
        let read_only = dispatcher.set_property("Physics.Body", "Speed", body, &MarshalledValue::Float(1.0));
        assert_eq!(read_only.error_message, "Property is read-only: Physics.Body.Speed");
        let null = dispatcher.invoke_instance_method("Physics.Body", "Push", InstanceHandle::null(), &push);
        assert_eq!(null.error_message, "Instance handle is null");
        let null = dispatcher.get_property("Physics.Body", "Mass", InstanceHandle::null());
        assert_eq!(null.error_message, "Instance handle is null");
        assert!(dispatcher.destroy_instance("Physics.Body", body).success);
    }

    #[test]
    fn object_arguments_and_results_carry_handles() {
        let dispatcher = dispatcher();
        let a = create_body(&dispatcher, &[MarshalledValue::Double(1.5)]);
        let made = dispatcher.invoke_static_method("Physics.Body", "Make", &[MarshalledValue::Float(2.5)]);
        let b = made.return_value.as_handle().expect("made body");
        assert!(!b.is_null());
        let merged = dispatcher.invoke_instance_method(
            "Physics.Body",
            "Merge",
            a,
            &[MarshalledValue::object(b, "Physics.Body")],
        );
        assert_eq!(merged.return_value, MarshalledValue::Bool(true));
        assert_eq!(dispatcher.get_property("Physics.Body", "Mass", a).return_value, MarshalledValue::Float(4.0));
        dispatcher.destroy_instance("Physics.Body", a);
        dispatcher.destroy_instance("Physics.Body", b);
    }

    #[test]
    fn constructors_with_arguments_are_matched_by_arity() {
        let dispatcher = dispatcher();
        let probe = dispatcher.create_instance("Debug.Probe", &[MarshalledValue::String("ray".into())]);
        assert!(probe.success, "{}", probe.error_message);
        let handle = probe.return_value.as_handle().expect("probe handle");
        let probe_ref = unsafe { &*(handle.as_ptr() as *const Probe) };
        assert_eq!(probe_ref.label, "ray");
        let destroyed = dispatcher.destroy_instance("Debug.Probe", handle);
        assert!(destroyed.success, "constructor-built instances must be freeable: {}", destroyed.error_message);

        let none = dispatcher.create_instance("Debug.Probe", &[]);
        assert_eq!(none.error_message, "Failed to create instance - no suitable constructor found");
        let err = dispatcher.destroy_instance("Debug.Probe", InstanceHandle::null());
        assert_eq!(err.error_message, "Instance handle is null");
    }

    #[test]
    fn destroy_distinguishes_missing_class_from_missing_binding() {
        let dispatcher = dispatcher();
        let handle = InstanceHandle::from_raw(0x10);
        let err = dispatcher.destroy_instance("Debug.Units", handle);
        assert_eq!(err.error_message, "Class has no behavior binding: Debug.Units");
        let err = dispatcher.create_instance("Debug.Units", &[]);
        assert_eq!(err.error_message, "Class has no behavior binding: Debug.Units");
        let err = dispatcher.destroy_instance("Debug.Missing", handle);
        assert_eq!(err.error_message, "Class not found: Debug.Missing");
    }

    #[test]
    fn global_properties_resolve_against_globals() {
        let dispatcher = dispatcher();
        assert_eq!(dispatcher.get_global_property("Gravity").return_value, MarshalledValue::Float(-9.8));
        assert_eq!(
            dispatcher.get_global_property("Version").return_value,
            MarshalledValue::String("1.2".into())
        );
        assert!(dispatcher.set_global_property("Gravity", &MarshalledValue::Double(1.0)).success);
        let err = dispatcher.set_global_property("Version", &MarshalledValue::String("2".into()));
        assert_eq!(err.error_message, "Property is read-only: Version");
        let err = dispatcher.get_global_property("Nope");
        assert_eq!(err.error_message, "Global property not found: Nope");
        assert_eq!(dispatcher.invoke_global_method("Twice", &[MarshalledValue::Int8(21)]).return_value, MarshalledValue::Int32(42));
    }

    #[test]
    fn shutdown_drops_the_snapshot() {
        let dispatcher = dispatcher();
        assert!(dispatcher.is_initialized());
        dispatcher.shutdown();
        assert!(!dispatcher.is_initialized());
        assert_eq!(dispatcher.create_instance("Physics.Body", &[]).error_message, NOT_INITIALIZED);
    }
}
