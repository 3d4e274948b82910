use anyhow::{anyhow, bail, Context, Result};
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Wire classification of a value crossing the native/managed boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarshalKind {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    String,
    Vector3,
    Quaternion,
    Transform,
    EntityId,
    Object,
    Unknown,
}

impl MarshalKind {
    pub fn label(self) -> &'static str {
        match self {
            MarshalKind::Void => "Void",
            MarshalKind::Bool => "Bool",
            MarshalKind::Int8 => "Int8",
            MarshalKind::Int16 => "Int16",
            MarshalKind::Int32 => "Int32",
            MarshalKind::Int64 => "Int64",
            MarshalKind::UInt8 => "UInt8",
            MarshalKind::UInt16 => "UInt16",
            MarshalKind::UInt32 => "UInt32",
            MarshalKind::UInt64 => "UInt64",
            MarshalKind::Float => "Float",
            MarshalKind::Double => "Double",
            MarshalKind::String => "String",
            MarshalKind::Vector3 => "Vector3",
            MarshalKind::Quaternion => "Quaternion",
            MarshalKind::Transform => "Transform",
            MarshalKind::EntityId => "EntityId",
            MarshalKind::Object => "Object",
            MarshalKind::Unknown => "Unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let kind = match label {
            "Void" => MarshalKind::Void,
            "Bool" => MarshalKind::Bool,
            "Int8" => MarshalKind::Int8,
            "Int16" => MarshalKind::Int16,
            "Int32" => MarshalKind::Int32,
            "Int64" => MarshalKind::Int64,
            "UInt8" => MarshalKind::UInt8,
            "UInt16" => MarshalKind::UInt16,
            "UInt32" => MarshalKind::UInt32,
            "UInt64" => MarshalKind::UInt64,
            "Float" => MarshalKind::Float,
            "Double" => MarshalKind::Double,
            "String" => MarshalKind::String,
            "Vector3" => MarshalKind::Vector3,
            "Quaternion" => MarshalKind::Quaternion,
            "Transform" => MarshalKind::Transform,
            "EntityId" => MarshalKind::EntityId,
            "Object" => MarshalKind::Object,
            "Unknown" => MarshalKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            MarshalKind::Int8
                | MarshalKind::Int16
                | MarshalKind::Int32
                | MarshalKind::Int64
                | MarshalKind::UInt8
                | MarshalKind::UInt16
                | MarshalKind::UInt32
                | MarshalKind::UInt64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, MarshalKind::Float | MarshalKind::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }
}

impl fmt::Display for MarshalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Translation, rotation and uniform scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: 1.0 };

    pub fn new(translation: Vec3, rotation: Quat, scale: f32) -> Self {
        Self { translation, rotation, scale }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * (point * self.scale) + self.translation
    }

    pub fn mul_transform(&self, rhs: &Transform) -> Transform {
        Transform {
            translation: self.transform_point(rhs.translation),
            rotation: self.rotation * rhs.rotation,
            scale: self.scale * rhs.scale,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const INVALID: Self = Self(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Native object address smuggled across the boundary as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InstanceHandle(u64);

impl InstanceHandle {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn from_ptr(ptr: *mut ()) -> Self {
        Self(ptr as usize as u64)
    }

    pub fn as_ptr(self) -> *mut () {
        self.0 as usize as *mut ()
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum MarshalledValue {
    #[default]
    Void,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Vector3(Vec3),
    Quaternion(Quat),
    Transform(Transform),
    EntityId(EntityId),
    Object { handle: InstanceHandle, type_name: String },
    Unknown,
}

impl MarshalledValue {
    pub fn kind(&self) -> MarshalKind {
        match self {
            MarshalledValue::Void => MarshalKind::Void,
            MarshalledValue::Bool(_) => MarshalKind::Bool,
            MarshalledValue::Int8(_) => MarshalKind::Int8,
            MarshalledValue::Int16(_) => MarshalKind::Int16,
            MarshalledValue::Int32(_) => MarshalKind::Int32,
            MarshalledValue::Int64(_) => MarshalKind::Int64,
            MarshalledValue::UInt8(_) => MarshalKind::UInt8,
            MarshalledValue::UInt16(_) => MarshalKind::UInt16,
            MarshalledValue::UInt32(_) => MarshalKind::UInt32,
            MarshalledValue::UInt64(_) => MarshalKind::UInt64,
            MarshalledValue::Float(_) => MarshalKind::Float,
            MarshalledValue::Double(_) => MarshalKind::Double,
            MarshalledValue::String(_) => MarshalKind::String,
            MarshalledValue::Vector3(_) => MarshalKind::Vector3,
            MarshalledValue::Quaternion(_) => MarshalKind::Quaternion,
            MarshalledValue::Transform(_) => MarshalKind::Transform,
            MarshalledValue::EntityId(_) => MarshalKind::EntityId,
            MarshalledValue::Object { .. } => MarshalKind::Object,
            MarshalledValue::Unknown => MarshalKind::Unknown,
        }
    }

    pub fn object(handle: InstanceHandle, type_name: impl Into<String>) -> Self {
        MarshalledValue::Object { handle, type_name: type_name.into() }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, MarshalledValue::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MarshalledValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MarshalledValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            MarshalledValue::Vector3(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<InstanceHandle> {
        match self {
            MarshalledValue::Object { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Integer payload widened to i128 so both i64 and u64 extremes fit.
    fn as_wide_int(&self) -> Option<i128> {
        let value = match self {
            MarshalledValue::Int8(v) => *v as i128,
            MarshalledValue::Int16(v) => *v as i128,
            MarshalledValue::Int32(v) => *v as i128,
            MarshalledValue::Int64(v) => *v as i128,
            MarshalledValue::UInt8(v) => *v as i128,
            MarshalledValue::UInt16(v) => *v as i128,
            MarshalledValue::UInt32(v) => *v as i128,
            MarshalledValue::UInt64(v) => *v as i128,
            _ => return None,
        };
        Some(value)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MarshalledValue::Float(v) => Some(*v as f64),
            MarshalledValue::Double(v) => Some(*v),
            other => other.as_wide_int().map(|v| v as f64),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_wide_int().and_then(|v| i64::try_from(v).ok())
    }

    /// Converts between numeric kinds when the value fits; identical kinds pass through.
    /// Returns `None` for lossy or non-numeric conversions.
    pub fn coerce_to(&self, kind: MarshalKind) -> Option<MarshalledValue> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        if let Some(wide) = self.as_wide_int() {
            return int_to_kind(wide, kind);
        }
        let float = match self {
            MarshalledValue::Float(v) => *v as f64,
            MarshalledValue::Double(v) => *v,
            _ => return None,
        };
        match kind {
            MarshalKind::Float => Some(MarshalledValue::Float(float as f32)),
            MarshalKind::Double => Some(MarshalledValue::Double(float)),
            _ => None,
        }
    }

    /// Tagged JSON form: `{"type": "<Kind>", "value": ...}`.
    pub fn to_json(&self) -> Value {
        let value = match self {
            MarshalledValue::Void | MarshalledValue::Unknown => Value::Null,
            MarshalledValue::Bool(v) => json!(v),
            MarshalledValue::Int8(v) => json!(v),
            MarshalledValue::Int16(v) => json!(v),
            MarshalledValue::Int32(v) => json!(v),
            MarshalledValue::Int64(v) => json!(v),
            MarshalledValue::UInt8(v) => json!(v),
            MarshalledValue::UInt16(v) => json!(v),
            MarshalledValue::UInt32(v) => json!(v),
            MarshalledValue::UInt64(v) => json!(v),
            MarshalledValue::Float(v) => json!(v),
            MarshalledValue::Double(v) => json!(v),
            MarshalledValue::String(v) => json!(v),
            MarshalledValue::Vector3(v) => json!([v.x, v.y, v.z]),
            MarshalledValue::Quaternion(q) => json!([q.x, q.y, q.z, q.w]),
            MarshalledValue::Transform(t) => json!({
                "translation": [t.translation.x, t.translation.y, t.translation.z],
                "rotation": [t.rotation.x, t.rotation.y, t.rotation.z, t.rotation.w],
                "scale": t.scale,
            }),
            MarshalledValue::EntityId(id) => json!(id.0),
            MarshalledValue::Object { handle, type_name } => {
                json!({ "handle": handle.raw(), "type_name": type_name })
            }
        };
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.kind().label().to_string()));
        map.insert("value".to_string(), value);
        Value::Object(map)
    }

    /// Parses either a tagged value or, when `expected` is known, a bare JSON scalar/array.
    pub fn from_json(value: &Value, expected: Option<MarshalKind>) -> Result<MarshalledValue> {
        if let Value::Object(map) = value {
            if let Some(tag) = map.get("type").and_then(Value::as_str) {
                let kind = MarshalKind::from_label(tag).ok_or_else(|| anyhow!("unknown value type '{tag}'"))?;
                let payload = map.get("value").cloned().unwrap_or(Value::Null);
                let parsed = parse_payload(&payload, kind).with_context(|| format!("parsing {tag} value"))?;
                return Ok(match expected {
                    Some(expected) if expected != kind => parsed.coerce_to(expected).unwrap_or(parsed),
                    _ => parsed,
                });
            }
        }
        match expected {
            Some(kind) => parse_payload(value, kind),
            None => infer_payload(value),
        }
    }
}

fn int_to_kind(wide: i128, kind: MarshalKind) -> Option<MarshalledValue> {
    let value = match kind {
        MarshalKind::Int8 => MarshalledValue::Int8(i8::try_from(wide).ok()?),
        MarshalKind::Int16 => MarshalledValue::Int16(i16::try_from(wide).ok()?),
        MarshalKind::Int32 => MarshalledValue::Int32(i32::try_from(wide).ok()?),
        MarshalKind::Int64 => MarshalledValue::Int64(i64::try_from(wide).ok()?),
        MarshalKind::UInt8 => MarshalledValue::UInt8(u8::try_from(wide).ok()?),
        MarshalKind::UInt16 => MarshalledValue::UInt16(u16::try_from(wide).ok()?),
        MarshalKind::UInt32 => MarshalledValue::UInt32(u32::try_from(wide).ok()?),
        MarshalKind::UInt64 => MarshalledValue::UInt64(u64::try_from(wide).ok()?),
        MarshalKind::Float => MarshalledValue::Float(wide as f32),
        MarshalKind::Double => MarshalledValue::Double(wide as f64),
        MarshalKind::EntityId => MarshalledValue::EntityId(EntityId(u64::try_from(wide).ok()?)),
        _ => return None,
    };
    Some(value)
}

fn parse_payload(value: &Value, kind: MarshalKind) -> Result<MarshalledValue> {
    let parsed = match kind {
        MarshalKind::Void => MarshalledValue::Void,
        MarshalKind::Unknown => MarshalledValue::Unknown,
        MarshalKind::Bool => MarshalledValue::Bool(value.as_bool().ok_or_else(|| anyhow!("expected a bool"))?),
        MarshalKind::Float => MarshalledValue::Float(number(value)? as f32),
        MarshalKind::Double => MarshalledValue::Double(number(value)?),
        MarshalKind::String => {
            MarshalledValue::String(value.as_str().ok_or_else(|| anyhow!("expected a string"))?.to_string())
        }
        MarshalKind::Vector3 => {
            let [x, y, z] = floats::<3>(value)?;
            MarshalledValue::Vector3(Vec3::new(x, y, z))
        }
        MarshalKind::Quaternion => {
            let [x, y, z, w] = floats::<4>(value)?;
            MarshalledValue::Quaternion(Quat::from_xyzw(x, y, z, w))
        }
        MarshalKind::Transform => {
            let map = value.as_object().ok_or_else(|| anyhow!("expected a transform object"))?;
            let [tx, ty, tz] = match map.get("translation") {
                Some(v) => floats::<3>(v)?,
                None => [0.0; 3],
            };
            let [rx, ry, rz, rw] = match map.get("rotation") {
                Some(v) => floats::<4>(v)?,
                None => [0.0, 0.0, 0.0, 1.0],
            };
            let scale = match map.get("scale") {
                Some(v) => number(v)? as f32,
                None => 1.0,
            };
            MarshalledValue::Transform(Transform::new(Vec3::new(tx, ty, tz), Quat::from_xyzw(rx, ry, rz, rw), scale))
        }
        MarshalKind::Object => match value {
            Value::Object(map) => {
                let handle = map.get("handle").and_then(Value::as_u64).ok_or_else(|| anyhow!("object is missing 'handle'"))?;
                let type_name = map.get("type_name").and_then(Value::as_str).unwrap_or_default();
                MarshalledValue::object(InstanceHandle::from_raw(handle), type_name)
            }
            other => {
                let handle = other.as_u64().ok_or_else(|| anyhow!("expected an object handle"))?;
                MarshalledValue::object(InstanceHandle::from_raw(handle), "")
            }
        },
        int_kind => {
            let wide = if let Some(v) = value.as_i64() {
                v as i128
            } else if let Some(v) = value.as_u64() {
                v as i128
            } else {
                bail!("expected an integer for {int_kind}");
            };
            int_to_kind(wide, int_kind).ok_or_else(|| anyhow!("{wide} is out of range for {int_kind}"))?
        }
    };
    Ok(parsed)
}

fn infer_payload(value: &Value) -> Result<MarshalledValue> {
    let inferred = match value {
        Value::Null => MarshalledValue::Void,
        Value::Bool(v) => MarshalledValue::Bool(*v),
        Value::String(v) => MarshalledValue::String(v.clone()),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                MarshalledValue::Int64(v)
            } else if let Some(v) = n.as_u64() {
                MarshalledValue::UInt64(v)
            } else {
                MarshalledValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::Array(items) if items.len() == 3 => parse_payload(value, MarshalKind::Vector3)?,
        Value::Array(items) if items.len() == 4 => parse_payload(value, MarshalKind::Quaternion)?,
        other => bail!("cannot infer a value type for {other}"),
    };
    Ok(inferred)
}

fn number(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| anyhow!("expected a number"))
}

fn floats<const N: usize>(value: &Value) -> Result<[f32; N]> {
    let items = value.as_array().ok_or_else(|| anyhow!("expected an array of {N} numbers"))?;
    if items.len() != N {
        bail!("expected {N} components, found {}", items.len());
    }
    let mut out = [0.0f32; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = number(item)? as f32;
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub success: bool,
    pub error_message: String,
    pub return_value: MarshalledValue,
}

impl DispatchResult {
    pub fn success(value: MarshalledValue) -> Self {
        Self { success: true, error_message: String::new(), return_value: value }
    }

    pub fn void() -> Self {
        Self::success(MarshalledValue::Void)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, error_message: message.into(), return_value: MarshalledValue::Void }
    }

    pub fn to_json(&self) -> Value {
        if self.success {
            json!({ "success": true, "value": self.return_value.to_json() })
        } else {
            json!({ "success": false, "error": self.error_message })
        }
    }
}
