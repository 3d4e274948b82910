//! Conversion between [`MarshalledValue`] and the raw [`BehaviorArgument`] slots native invokers
//! read and write.

use glam::{Quat, Vec3};
use thiserror::Error;

use super::storage::MarshalStorage;
use crate::marshal::{EntityId, InstanceHandle, MarshalKind, MarshalledValue, Transform};
use crate::reflection::ReflectedParameter;
use crate::registry::{BehaviorArgument, ParamTraits};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarshalError {
    #[error("values of kind {0} cannot cross the boundary")]
    Unsupported(MarshalKind),
    #[error("expected {expected}, got {actual}")]
    Mismatch { expected: MarshalKind, actual: MarshalKind },
    #[error("object handle is null")]
    NullObject,
}

pub(crate) fn parameter_traits(param: &ReflectedParameter) -> ParamTraits {
    let mut traits = ParamTraits::empty();
    traits.set(ParamTraits::POINTER, param.is_pointer);
    traits.set(ParamTraits::REFERENCE, param.is_reference);
    traits.set(ParamTraits::CONST, param.is_const);
    traits
}

/// Builds an argument slot for `param`, copying `value` into `storage`. Numeric values are
/// converted to the parameter's numeric kind when they fit.
pub fn try_marshal_to_argument(
    value: &MarshalledValue,
    param: &ReflectedParameter,
    storage: &mut MarshalStorage,
) -> Result<BehaviorArgument, MarshalError> {
    let expected = param.marshal_kind;
    if expected == MarshalKind::Object {
        let handle = value
            .as_handle()
            .ok_or(MarshalError::Mismatch { expected, actual: value.kind() })?;
        if handle.is_null() {
            return Err(MarshalError::NullObject);
        }
        return Ok(BehaviorArgument::new(handle.as_ptr(), param.type_id, parameter_traits(param) | ParamTraits::POINTER));
    }
    let converted = value.coerce_to(expected).ok_or(MarshalError::Mismatch { expected, actual: value.kind() })?;
    let ptr = match converted {
        MarshalledValue::Bool(v) => storage.store(v),
        MarshalledValue::Int8(v) => storage.store(v),
        MarshalledValue::Int16(v) => storage.store(v),
        MarshalledValue::Int32(v) => storage.store(v),
        MarshalledValue::Int64(v) => storage.store(v),
        MarshalledValue::UInt8(v) => storage.store(v),
        MarshalledValue::UInt16(v) => storage.store(v),
        MarshalledValue::UInt32(v) => storage.store(v),
        MarshalledValue::UInt64(v) => storage.store(v),
        MarshalledValue::Float(v) => storage.store(v),
        MarshalledValue::Double(v) => storage.store(v),
        MarshalledValue::String(v) => storage.store(v),
        MarshalledValue::Vector3(v) => storage.store(v),
        MarshalledValue::Quaternion(v) => storage.store(v),
        MarshalledValue::Transform(v) => storage.store(v),
        MarshalledValue::EntityId(v) => storage.store(v),
        other => return Err(MarshalError::Unsupported(other.kind())),
    };
    Ok(BehaviorArgument::new(ptr, param.type_id, parameter_traits(param)))
}

pub fn marshal_to_argument(
    value: &MarshalledValue,
    param: &ReflectedParameter,
    storage: &mut MarshalStorage,
) -> Option<BehaviorArgument> {
    try_marshal_to_argument(value, param, storage).ok()
}

/// Allocates a slot pre-filled with the default for `param` so an invoker can write the result.
/// Object results get a pointer cell that receives the instance address.
pub fn allocate_result(param: &ReflectedParameter, storage: &mut MarshalStorage) -> Option<BehaviorArgument> {
    let ptr = match param.marshal_kind {
        MarshalKind::Bool => storage.store(false),
        MarshalKind::Int8 => storage.store(0i8),
        MarshalKind::Int16 => storage.store(0i16),
        MarshalKind::Int32 => storage.store(0i32),
        MarshalKind::Int64 => storage.store(0i64),
        MarshalKind::UInt8 => storage.store(0u8),
        MarshalKind::UInt16 => storage.store(0u16),
        MarshalKind::UInt32 => storage.store(0u32),
        MarshalKind::UInt64 => storage.store(0u64),
        MarshalKind::Float => storage.store(0.0f32),
        MarshalKind::Double => storage.store(0.0f64),
        MarshalKind::String => storage.store(String::new()),
        MarshalKind::Vector3 => storage.store(Vec3::ZERO),
        MarshalKind::Quaternion => storage.store(Quat::IDENTITY),
        MarshalKind::Transform => storage.store(Transform::IDENTITY),
        MarshalKind::EntityId => storage.store(EntityId::INVALID),
        MarshalKind::Object => storage.store(std::ptr::null_mut::<()>()),
        MarshalKind::Void | MarshalKind::Unknown => return None,
    };
    Some(BehaviorArgument::new(ptr, param.type_id, parameter_traits(param)))
}

/// Reads the value `ptr` points at as `param` describes it. Null yields `Void`.
///
/// # Safety
/// A non-null `ptr` must point at a live value of the Rust type matching `param.marshal_kind`,
/// or at a `*mut ()` cell for object results.
pub unsafe fn marshal_from_result(ptr: *const (), param: &ReflectedParameter) -> MarshalledValue {
    if ptr.is_null() {
        return MarshalledValue::Void;
    }
    match param.marshal_kind {
        MarshalKind::Void => MarshalledValue::Void,
        MarshalKind::Bool => MarshalledValue::Bool(*(ptr as *const bool)),
        MarshalKind::Int8 => MarshalledValue::Int8(*(ptr as *const i8)),
        MarshalKind::Int16 => MarshalledValue::Int16(*(ptr as *const i16)),
        MarshalKind::Int32 => MarshalledValue::Int32(*(ptr as *const i32)),
        MarshalKind::Int64 => MarshalledValue::Int64(*(ptr as *const i64)),
        MarshalKind::UInt8 => MarshalledValue::UInt8(*(ptr as *const u8)),
        MarshalKind::UInt16 => MarshalledValue::UInt16(*(ptr as *const u16)),
        MarshalKind::UInt32 => MarshalledValue::UInt32(*(ptr as *const u32)),
        MarshalKind::UInt64 => MarshalledValue::UInt64(*(ptr as *const u64)),
        MarshalKind::Float => MarshalledValue::Float(*(ptr as *const f32)),
        MarshalKind::Double => MarshalledValue::Double(*(ptr as *const f64)),
        MarshalKind::String => MarshalledValue::String((*(ptr as *const String)).clone()),
        MarshalKind::Vector3 => MarshalledValue::Vector3(*(ptr as *const Vec3)),
        MarshalKind::Quaternion => MarshalledValue::Quaternion(*(ptr as *const Quat)),
        MarshalKind::Transform => MarshalledValue::Transform(*(ptr as *const Transform)),
        MarshalKind::EntityId => MarshalledValue::EntityId(*(ptr as *const EntityId)),
        MarshalKind::Object => {
            let object = *(ptr as *const *mut ());
            MarshalledValue::object(InstanceHandle::from_ptr(object), param.type_name.clone())
        }
        MarshalKind::Unknown => MarshalledValue::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::MarshalKind;
    use crate::registry::type_ids;
    use uuid::Uuid;

    fn param(kind: MarshalKind, type_id: Uuid) -> ReflectedParameter {
        ReflectedParameter { marshal_kind: kind, type_id, ..ReflectedParameter::unknown() }
    }

    fn round_trip(value: MarshalledValue) -> MarshalledValue {
        let mut storage = MarshalStorage::new();
        let p = param(value.kind(), Uuid::nil());
        let arg = marshal_to_argument(&value, &p, &mut storage).expect("marshal");
        unsafe { marshal_from_result(arg.value, &p) }
    }

    #[test]
    fn values_survive_the_boundary() {
        let values = [
            MarshalledValue::Bool(false),
            MarshalledValue::Int8(i8::MIN),
            MarshalledValue::Int16(-1),
            MarshalledValue::Int32(0),
            MarshalledValue::Int64(i64::MIN),
            MarshalledValue::Int64(i64::MAX),
            MarshalledValue::UInt8(u8::MAX),
            MarshalledValue::UInt16(0),
            MarshalledValue::UInt32(u32::MAX),
            MarshalledValue::UInt64(u64::MAX),
            MarshalledValue::Float(-0.5),
            MarshalledValue::Double(f64::MAX),
            MarshalledValue::String(String::new()),
            MarshalledValue::Vector3(Vec3::new(-1.0, 0.0, 3.25)),
            MarshalledValue::Quaternion(Quat::IDENTITY),
            MarshalledValue::Transform(Transform::from_translation(Vec3::X)),
            MarshalledValue::EntityId(EntityId(7)),
        ];
        for value in values {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn numbers_coerce_to_the_parameter_kind() {
        let mut storage = MarshalStorage::new();
        let p = param(MarshalKind::Float, type_ids::FLOAT);
        let arg = marshal_to_argument(&MarshalledValue::Int64(3), &p, &mut storage).expect("marshal");
        assert_eq!(arg.type_id, type_ids::FLOAT);
        assert_eq!(unsafe { marshal_from_result(arg.value, &p) }, MarshalledValue::Float(3.0));

        let narrow = param(MarshalKind::UInt8, type_ids::UINT8);
        let err = try_marshal_to_argument(&MarshalledValue::Int64(-4), &narrow, &mut storage).unwrap_err();
        assert_eq!(err, MarshalError::Mismatch { expected: MarshalKind::UInt8, actual: MarshalKind::Int64 });
    }

    #[test]
    fn unknown_and_mismatched_values_fail() {
        let mut storage = MarshalStorage::new();
        let string = param(MarshalKind::String, type_ids::STRING);
        assert!(marshal_to_argument(&MarshalledValue::Bool(true), &string, &mut storage).is_none());
        let unknown = param(MarshalKind::Unknown, Uuid::nil());
        assert!(marshal_to_argument(&MarshalledValue::Unknown, &unknown, &mut storage).is_none());
        assert!(storage.is_empty(), "failed conversions must not allocate");
    }

    #[test]
    fn objects_pass_their_address() {
        let mut storage = MarshalStorage::new();
        let mut target = 9u32;
        let handle = InstanceHandle::from_ptr(&mut target as *mut u32 as *mut ());
        let object_param = ReflectedParameter { is_pointer: true, ..param(MarshalKind::Object, Uuid::from_u128(5)) };
        let arg = marshal_to_argument(&MarshalledValue::object(handle, "Body"), &object_param, &mut storage)
            .expect("object argument");
        assert_eq!(arg.value, handle.as_ptr());
        assert!(arg.traits.contains(ParamTraits::POINTER));
        assert!(storage.is_empty());
        let null = MarshalledValue::object(InstanceHandle::null(), "Body");
        assert_eq!(try_marshal_to_argument(&null, &object_param, &mut storage).unwrap_err(), MarshalError::NullObject);
    }

    #[test]
    fn null_results_read_as_void_and_object_cells_become_handles() {
        let p = param(MarshalKind::Int32, type_ids::INT32);
        assert_eq!(unsafe { marshal_from_result(std::ptr::null(), &p) }, MarshalledValue::Void);

        let mut storage = MarshalStorage::new();
        let object_param = ReflectedParameter { type_name: "Body".into(), ..param(MarshalKind::Object, Uuid::nil()) };
        let slot = allocate_result(&object_param, &mut storage).expect("object slot");
        let mut target = 1u8;
        unsafe { *(slot.value as *mut *mut ()) = &mut target as *mut u8 as *mut () };
        let value = unsafe { marshal_from_result(slot.value, &object_param) };
        assert_eq!(value.as_handle().map(InstanceHandle::as_ptr), Some(&mut target as *mut u8 as *mut ()));
        assert_eq!(value, MarshalledValue::object(value.as_handle().expect("handle"), "Body"));
    }
}
