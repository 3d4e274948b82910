//! Engine math surface registered with every [`NativeRegistry`] the tools build.

use glam::{Quat, Vec3};

use crate::marshal::{EntityId, Transform};
use crate::registry::{Attribute, NativeMethod, NativeRegistry};

const CATEGORY: &str = "Math";
const MODULE: &str = "kestrel.math";

pub fn register(registry: &mut NativeRegistry) {
    register_vector3(registry);
    register_quaternion(registry);
    register_transform(registry);
    register_entity_id(registry);

    registry
        .add_method(
            NativeMethod::function("Math_Lerp", |a: f32, b: f32, t: f32| a + (b - a) * t)
                .arg_names(["a", "b", "t"])
                .with_attribute(Attribute::description("Linear interpolation between a and b"))
                .with_attribute(Attribute::category(CATEGORY)),
        )
        .add_method(
            NativeMethod::function("Math_Clamp", |value: f32, min: f32, max: f32| value.max(min).min(max))
                .arg_names(["value", "min", "max"])
                .with_attribute(Attribute::category(CATEGORY)),
        )
        .read_only_property("Math_Pi", || std::f32::consts::PI);
}

fn register_vector3(registry: &mut NativeRegistry) {
    registry
        .class_builder::<Vec3>("Vector3")
        .attribute(Attribute::category(CATEGORY))
        .attribute(Attribute::description("Three component vector"))
        .attribute(Attribute::Module(MODULE.into()))
        .default_binding()
        .constructor(|x: f32, y: f32, z: f32| Vec3::new(x, y, z))
        .property("X", |v: &mut Vec3| v.x, |v: &mut Vec3, x: f32| v.x = x)
        .property("Y", |v: &mut Vec3| v.y, |v: &mut Vec3, y: f32| v.y = y)
        .property("Z", |v: &mut Vec3| v.z, |v: &mut Vec3, z: f32| v.z = z)
        .add_method(NativeMethod::member("Length", |v: &mut Vec3| v.length()).constant())
        .add_method(NativeMethod::member("Dot", |v: &mut Vec3, other: Vec3| v.dot(other)).arg_names(["other"]).constant())
        .add_method(NativeMethod::member("Cross", |v: &mut Vec3, other: Vec3| v.cross(other)).arg_names(["other"]).constant())
        .method("Normalize", |v: &mut Vec3| {
            *v = v.normalize_or_zero();
            *v
        })
        .add_method(NativeMethod::function("Add", |a: Vec3, b: Vec3| a + b).arg_names(["a", "b"]))
        .add_method(
            NativeMethod::function("Distance", |a: Vec3, b: Vec3| a.distance(b)).arg_names(["a", "b"]),
        )
        .static_method("Zero", || Vec3::ZERO);
}

fn register_quaternion(registry: &mut NativeRegistry) {
    registry
        .class_builder::<Quat>("Quaternion")
        .attribute(Attribute::category(CATEGORY))
        .attribute(Attribute::Module(MODULE.into()))
        .default_binding()
        .constructor(|x: f32, y: f32, z: f32, w: f32| Quat::from_xyzw(x, y, z, w).normalize())
        .read_only_property("X", |q: &mut Quat| q.x)
        .read_only_property("Y", |q: &mut Quat| q.y)
        .read_only_property("Z", |q: &mut Quat| q.z)
        .read_only_property("W", |q: &mut Quat| q.w)
        .add_method(NativeMethod::member("Rotate", |q: &mut Quat, v: Vec3| *q * v).arg_names(["vector"]).constant())
        .add_method(NativeMethod::member("Inverse", |q: &mut Quat| q.inverse()).constant())
        .add_method(
            NativeMethod::function("FromAxisAngle", |axis: Vec3, angle: f32| {
                Quat::from_axis_angle(axis.normalize_or_zero(), angle)
            })
            .arg_names(["axis", "angle"]),
        )
        .static_method("Identity", || Quat::IDENTITY);
}

fn register_transform(registry: &mut NativeRegistry) {
    registry
        .class_builder::<Transform>("Transform")
        .attribute(Attribute::category(CATEGORY))
        .attribute(Attribute::Module(MODULE.into()))
        .default_binding()
        .constructor(|translation: Vec3, rotation: Quat, scale: f32| Transform::new(translation, rotation, scale))
        .property("Translation", |t: &mut Transform| t.translation, |t: &mut Transform, v: Vec3| t.translation = v)
        .property("Rotation", |t: &mut Transform| t.rotation, |t: &mut Transform, q: Quat| t.rotation = q)
        .property("Scale", |t: &mut Transform| t.scale, |t: &mut Transform, s: f32| t.scale = s)
        .add_method(
            NativeMethod::member("TransformPoint", |t: &mut Transform, point: Vec3| t.transform_point(point))
                .arg_names(["point"])
                .constant(),
        )
        .add_method(
            NativeMethod::member("Multiply", |t: &mut Transform, rhs: Transform| t.mul_transform(&rhs))
                .arg_names(["rhs"])
                .constant(),
        )
        .static_method("Identity", || Transform::IDENTITY);
}

fn register_entity_id(registry: &mut NativeRegistry) {
    registry
        .class_builder::<EntityId>("EntityId")
        .attribute(Attribute::category(CATEGORY))
        .attribute(Attribute::Module(MODULE.into()))
        .default_binding()
        .constructor(|raw: u64| EntityId(raw))
        .read_only_property("Value", |id: &mut EntityId| id.0)
        .add_method(NativeMethod::member("IsValid", |id: &mut EntityId| id.is_valid()).constant())
        .static_method("Invalid", || EntityId::INVALID);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::MarshalKind;
    use crate::reflection::Reflector;

    #[test]
    fn math_surface_reflects_as_builtin_kinds() {
        let mut registry = NativeRegistry::new();
        register(&mut registry);
        let mut reflector = Reflector::new();
        reflector.reflect_from_context(Some(&registry));

        assert_eq!(reflector.class_names(), vec!["EntityId", "Quaternion", "Transform", "Vector3"]);
        assert_eq!(reflector.classes_by_category("Math", true).len(), 4);
        let vector = reflector.class("Vector3").expect("Vector3 class");
        assert_eq!(vector.constructors.len(), 1);
        assert_eq!(vector.constructors[0].name, "Constructor_0");
        let add = vector.find_method("Add").expect("Add");
        assert!(add.is_static);
        assert_eq!(add.return_type.marshal_kind, MarshalKind::Vector3, "builtin kinds win over class scans");
        let transform = reflector.class("Transform").expect("Transform class");
        assert_eq!(
            transform.find_property("Rotation").map(|p| p.value_type.marshal_kind),
            Some(MarshalKind::Quaternion)
        );
        assert_eq!(reflector.global_methods().len(), 2);
        assert_eq!(reflector.snapshot().global_property("Math_Pi").map(|p| p.has_setter), Some(false));
    }
}
