//! The reflection internal calls managed code binds under [`INTERNAL_CALL_CLASS`].
//!
//! Names, arguments and results cross as strings, `i64` handles and booleans. Argument lists are
//! JSON arrays; results are [`DispatchResult::to_json`] documents.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::sync::Arc;

use super::GenericDispatcher;
use crate::host::{InternalCall, InternalType};
use crate::marshal::{DispatchResult, InstanceHandle, MarshalKind, MarshalledValue};
use crate::reflection::ReflectedParameter;

pub const INTERNAL_CALL_CLASS: &str = "Kestrel.Reflection.ReflectionInternalCalls";

/// Parses an argument list. An empty string is no arguments; bare scalars are read as the kind
/// at the same position in `kinds`, or inferred past its end.
pub fn parse_args_json(text: &str, kinds: &[MarshalKind]) -> Result<Vec<MarshalledValue>> {
    let items = args_array(text)?;
    values_from(&items, |_| kinds.to_vec())
}

fn args_array(text: &str) -> Result<Vec<Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(trimmed).context("parse argument JSON")? {
        Value::Array(items) => Ok(items),
        other => bail!("argument JSON must be an array, got {other}"),
    }
}

/// `kinds_for` sees the argument count and returns the kinds of the overload it selects.
fn values_from(items: &[Value], kinds_for: impl FnOnce(usize) -> Vec<MarshalKind>) -> Result<Vec<MarshalledValue>> {
    let kinds = kinds_for(items.len());
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            MarshalledValue::from_json(item, kinds.get(index).copied()).with_context(|| format!("argument {index}"))
        })
        .collect()
}

fn kinds_of(params: &[ReflectedParameter]) -> Vec<MarshalKind> {
    params.iter().map(|param| param.marshal_kind).collect()
}

fn method_kinds(d: &GenericDispatcher, class: &str, method: &str, count: usize, is_static: bool) -> Vec<MarshalKind> {
    let Some(snapshot) = d.snapshot() else {
        return Vec::new();
    };
    snapshot
        .class(class)
        .and_then(|class| super::find_matching_method(class, method, count, is_static))
        .map(|method| kinds_of(&method.parameters))
        .unwrap_or_default()
}

fn text(args: &[MarshalledValue], index: usize) -> &str {
    args.get(index).and_then(MarshalledValue::as_str).unwrap_or_default()
}

fn handle(args: &[MarshalledValue], index: usize) -> InstanceHandle {
    let raw = args.get(index).and_then(MarshalledValue::as_i64).unwrap_or(0);
    InstanceHandle::from_raw(raw as u64)
}

fn names_json<'a>(names: impl IntoIterator<Item = &'a str>) -> MarshalledValue {
    let names: Vec<&str> = names.into_iter().collect();
    MarshalledValue::String(Value::from(names).to_string())
}

fn result_json(result: DispatchResult) -> MarshalledValue {
    MarshalledValue::String(result.to_json().to_string())
}

fn bad_args(err: anyhow::Error) -> DispatchResult {
    DispatchResult::error(format!("Invalid arguments: {err:#}"))
}

type Accessor = Box<dyn Fn(&GenericDispatcher, &[MarshalledValue]) -> MarshalledValue + Send + Sync>;

fn accessor(f: impl Fn(&GenericDispatcher, &[MarshalledValue]) -> MarshalledValue + Send + Sync + 'static) -> Accessor {
    Box::new(f)
}

/// Builds the reflection internal-call table; every entry calls through `dispatcher`.
pub fn internal_calls(dispatcher: Arc<GenericDispatcher>) -> Vec<InternalCall> {
    use InternalType::{Bool, Int64, String as Str, Void};

    let mut calls = Vec::with_capacity(18);
    let mut add = |name: &str,
                   params: Vec<InternalType>,
                   returns: InternalType,
                   f: Accessor| {
        let dispatcher = Arc::clone(&dispatcher);
        calls.push(InternalCall::new(INTERNAL_CALL_CLASS, name, params, returns, move |args: &[MarshalledValue]| {
            f(&dispatcher, args)
        }));
    };

    add(
        "Reflection_GetClassNames",
        vec![],
        Str,
        accessor(|d, _| match d.snapshot() {
            Some(snapshot) => names_json(snapshot.classes().map(|class| class.name.as_str())),
            None => names_json([]),
        }),
    );
    add(
        "Reflection_GetMethodNames",
        vec![Str],
        Str,
        accessor(|d, args| {
            let snapshot = d.snapshot();
            let class = snapshot.as_deref().and_then(|s| s.class(text(args, 0)));
            names_json(class.into_iter().flat_map(|class| class.methods.iter().map(|m| m.name.as_str())))
        }),
    );
    add(
        "Reflection_GetPropertyNames",
        vec![Str],
        Str,
        accessor(|d, args| {
            let snapshot = d.snapshot();
            let class = snapshot.as_deref().and_then(|s| s.class(text(args, 0)));
            names_json(class.into_iter().flat_map(|class| class.properties.iter().map(|p| p.name.as_str())))
        }),
    );
    add(
        "Reflection_GetEBusNames",
        vec![],
        Str,
        accessor(|d, _| match d.snapshot() {
            Some(snapshot) => names_json(snapshot.ebuses().map(|bus| bus.name.as_str())),
            None => names_json([]),
        }),
    );
    add(
        "Reflection_GetEBusEventNames",
        vec![Str],
        Str,
        accessor(|d, args| {
            let snapshot = d.snapshot();
            let bus = snapshot.as_deref().and_then(|s| s.ebus(text(args, 0)));
            names_json(bus.into_iter().flat_map(|bus| bus.events.iter().map(|e| e.name.as_str())))
        }),
    );
    add(
        "Reflection_ClassExists",
        vec![Str],
        Bool,
        accessor(|d, args| {
            MarshalledValue::Bool(d.snapshot().is_some_and(|snapshot| snapshot.has_class(text(args, 0))))
        }),
    );
    add(
        "Reflection_MethodExists",
        vec![Str, Str],
        Bool,
        accessor(|d, args| {
            let exists = d.snapshot().is_some_and(|snapshot| {
                snapshot.class(text(args, 0)).is_some_and(|class| class.find_method(text(args, 1)).is_some())
            });
            MarshalledValue::Bool(exists)
        }),
    );
    add(
        "Reflection_InvokeStaticMethod",
        vec![Str, Str, Str],
        Str,
        accessor(|d, args| {
            let (class, method) = (text(args, 0), text(args, 1));
            let parsed = args_array(text(args, 2)).and_then(|items| {
                values_from(&items, |count| method_kinds(d, class, method, count, true))
            });
            result_json(match parsed {
                Ok(values) => d.invoke_static_method(class, method, &values),
                Err(err) => bad_args(err),
            })
        }),
    );
    add(
        "Reflection_InvokeInstanceMethod",
        vec![Str, Str, Int64, Str],
        Str,
        accessor(|d, args| {
            let (class, method) = (text(args, 0), text(args, 1));
            let parsed = args_array(text(args, 3)).and_then(|items| {
                values_from(&items, |count| method_kinds(d, class, method, count, false))
            });
            result_json(match parsed {
                Ok(values) => d.invoke_instance_method(class, method, handle(args, 2), &values),
                Err(err) => bad_args(err),
            })
        }),
    );
    add(
        "Reflection_InvokeGlobalMethod",
        vec![Str, Str],
        Str,
        accessor(|d, args| {
            let method = text(args, 0);
            let parsed = args_array(text(args, 1)).and_then(|items| {
                values_from(&items, |_| {
                    let Some(snapshot) = d.snapshot() else {
                        return Vec::new();
                    };
                    let found = snapshot.global_methods().iter().find(|m| m.name == method);
                    found.map(|m| kinds_of(&m.parameters)).unwrap_or_default()
                })
            });
            result_json(match parsed {
                Ok(values) => d.invoke_global_method(method, &values),
                Err(err) => bad_args(err),
            })
        }),
    );
    add(
        "Reflection_GetProperty",
        vec![Str, Str, Int64],
        Str,
        accessor(|d, args| result_json(d.get_property(text(args, 0), text(args, 1), handle(args, 2)))),
    );
    add(
        "Reflection_SetProperty",
        vec![Str, Str, Int64, Str],
        Bool,
        accessor(|d, args| {
            let (class, property) = (text(args, 0), text(args, 1));
            let kind = d
                .snapshot()
                .and_then(|s| s.class(class).and_then(|c| c.find_property(property)).map(|p| p.value_type.marshal_kind));
            let result = match parse_value(text(args, 3), kind) {
                Ok(value) => d.set_property(class, property, handle(args, 2), &value),
                Err(err) => bad_args(err),
            };
            report_set(&result, property)
        }),
    );
    add(
        "Reflection_GetGlobalProperty",
        vec![Str],
        Str,
        accessor(|d, args| result_json(d.get_global_property(text(args, 0)))),
    );
    add(
        "Reflection_SetGlobalProperty",
        vec![Str, Str],
        Bool,
        accessor(|d, args| {
            let property = text(args, 0);
            let kind = d.snapshot().and_then(|s| s.global_property(property).map(|p| p.value_type.marshal_kind));
            let result = match parse_value(text(args, 1), kind) {
                Ok(value) => d.set_global_property(property, &value),
                Err(err) => bad_args(err),
            };
            report_set(&result, property)
        }),
    );
    add(
        "Reflection_BroadcastEBusEvent",
        vec![Str, Str, Str],
        Str,
        accessor(|d, args| {
            result_json(match parse_args_json(text(args, 2), &[]) {
                Ok(values) => d.broadcast_ebus_event(text(args, 0), text(args, 1), &values),
                Err(err) => bad_args(err),
            })
        }),
    );
    add(
        "Reflection_SendEBusEvent",
        vec![Str, Str, Int64, Str],
        Str,
        accessor(|d, args| {
            let address = MarshalledValue::Int64(args.get(2).and_then(MarshalledValue::as_i64).unwrap_or(0));
            result_json(match parse_args_json(text(args, 3), &[]) {
                Ok(values) => d.send_ebus_event(text(args, 0), text(args, 1), &address, &values),
                Err(err) => bad_args(err),
            })
        }),
    );
    add(
        "Reflection_CreateInstance",
        vec![Str, Str],
        Int64,
        accessor(|d, args| {
            let class = text(args, 0);
            let parsed = args_array(text(args, 1)).and_then(|items| {
                values_from(&items, |count| {
                    let Some(snapshot) = d.snapshot() else {
                        return Vec::new();
                    };
                    snapshot
                        .class(class)
                        .and_then(|class| super::find_matching_constructor(class, count))
                        .map(|ctor| kinds_of(&ctor.parameters))
                        .unwrap_or_default()
                })
            });
            let result = match parsed {
                Ok(values) => d.create_instance(class, &values),
                Err(err) => bad_args(err),
            };
            match result.return_value.as_handle() {
                Some(handle) if result.success => MarshalledValue::Int64(handle.raw() as i64),
                _ => {
                    log::warn!("[dispatch] create {class} failed: {}", result.error_message);
                    MarshalledValue::Int64(0)
                }
            }
        }),
    );
    add(
        "Reflection_DestroyInstance",
        vec![Str, Int64],
        Void,
        accessor(|d, args| {
            let result = d.destroy_instance(text(args, 0), handle(args, 1));
            if !result.success {
                log::warn!("[dispatch] destroy {} failed: {}", text(args, 0), result.error_message);
            }
            MarshalledValue::Void
        }),
    );
    calls
}

fn parse_value(text: &str, kind: Option<MarshalKind>) -> Result<MarshalledValue> {
    let value: Value = serde_json::from_str(text.trim()).context("parse value JSON")?;
    MarshalledValue::from_json(&value, kind)
}

fn report_set(result: &DispatchResult, property: &str) -> MarshalledValue {
    if !result.success {
        log::warn!("[dispatch] set {property} failed: {}", result.error_message);
    }
    MarshalledValue::Bool(result.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection::Reflector;
    use crate::registry::{NativeRegistry, NativeType};
    use glam::Vec3;
    use serde_json::json;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct Lamp {
        intensity: f32,
    }

    impl NativeType for Lamp {
        const TYPE_ID: Uuid = Uuid::from_u128(0x7A3E51C2D0B94F08A1E6C3D2B5F40917);
    }

    fn table() -> (Arc<GenericDispatcher>, Vec<InternalCall>) {
        let mut registry = NativeRegistry::new();
        registry
            .class_builder::<Lamp>("Render.Lamp")
            .default_binding()
            .constructor(|intensity: f32| Lamp { intensity })
            .property("Intensity", |l: &mut Lamp| l.intensity, |l: &mut Lamp, v: f32| l.intensity = v)
            .static_method("Add", |a: Vec3, b: Vec3| a + b)
            .method("Dim", |l: &mut Lamp, by: f32| {
                l.intensity -= by;
                l.intensity
            });
        registry.method("Clamp01", |v: f64| v.clamp(0.0, 1.0));
        registry.ebus("LampBus", Uuid::from_u128(0x99)).broadcast_event("OnToggle", vec![], None);
        let mut reflector = Reflector::new();
        reflector.reflect_from_context(Some(&registry));
        let dispatcher = Arc::new(GenericDispatcher::new());
        dispatcher.initialize(reflector.shared_snapshot());
        let calls = internal_calls(Arc::clone(&dispatcher));
        (dispatcher, calls)
    }

    fn call(calls: &[InternalCall], name: &str, args: Vec<MarshalledValue>) -> MarshalledValue {
        let entry = calls.iter().find(|call| call.name == name).expect("internal call registered");
        assert_eq!(entry.params.len(), args.len(), "{name} arity");
        entry.invoke(&args)
    }

    fn json_of(value: MarshalledValue) -> Value {
        serde_json::from_str(value.as_str().expect("string result")).expect("valid json")
    }

    fn s(text: &str) -> MarshalledValue {
        MarshalledValue::String(text.to_string())
    }

    #[test]
    fn table_is_closed_and_namespaced() {
        let (_, calls) = table();
        assert_eq!(calls.len(), 18);
        assert!(calls.iter().all(|call| call.class_name == INTERNAL_CALL_CLASS));
        assert!(calls.iter().all(|call| call.name.starts_with("Reflection_")));
    }

    #[test]
    fn name_queries_return_json_arrays() {
        let (_, calls) = table();
        assert_eq!(json_of(call(&calls, "Reflection_GetClassNames", vec![])), json!(["Render.Lamp"]));
        assert_eq!(json_of(call(&calls, "Reflection_GetMethodNames", vec![s("Render.Lamp")])), json!(["Add", "Dim"]));
        assert_eq!(json_of(call(&calls, "Reflection_GetMethodNames", vec![s("Nope")])), json!([]));
        assert_eq!(json_of(call(&calls, "Reflection_GetPropertyNames", vec![s("Render.Lamp")])), json!(["Intensity"]));
        assert_eq!(json_of(call(&calls, "Reflection_GetEBusNames", vec![])), json!(["LampBus"]));
        assert_eq!(json_of(call(&calls, "Reflection_GetEBusEventNames", vec![s("LampBus")])), json!(["OnToggle"]));
        assert_eq!(call(&calls, "Reflection_ClassExists", vec![s("Render.Lamp")]), MarshalledValue::Bool(true));
        assert_eq!(
            call(&calls, "Reflection_MethodExists", vec![s("Render.Lamp"), s("Missing")]),
            MarshalledValue::Bool(false)
        );
    }

    #[test]
    fn invocations_parse_tagged_and_bare_arguments() {
        let (_, calls) = table();
        let args = r#"[{"type":"Vector3","value":[1,2,3]},{"type":"Vector3","value":[4,5,6]}]"#;
        let result = json_of(call(&calls, "Reflection_InvokeStaticMethod", vec![s("Render.Lamp"), s("Add"), s(args)]));
        assert_eq!(result["success"], json!(true), "{result}");
        assert_eq!(result["value"], MarshalledValue::Vector3(Vec3::new(5.0, 7.0, 9.0)).to_json());

        let result = json_of(call(&calls, "Reflection_InvokeGlobalMethod", vec![s("Clamp01"), s("[3]")]));
        assert_eq!(result["value"], MarshalledValue::Double(1.0).to_json());

        let result = json_of(call(&calls, "Reflection_InvokeGlobalMethod", vec![s("Clamp01"), s("{")]));
        assert_eq!(result["success"], json!(false));
    }

    #[test]
    fn instances_round_trip_through_raw_handles() {
        let (_, calls) = table();
        let created = call(&calls, "Reflection_CreateInstance", vec![s("Render.Lamp"), s("[0.75]")]);
        let raw = created.as_i64().expect("i64 handle");
        assert_ne!(raw, 0);
        let handle = MarshalledValue::Int64(raw);

        let ok = call(&calls, "Reflection_SetProperty", vec![s("Render.Lamp"), s("Intensity"), handle.clone(), s("2")]);
        assert_eq!(ok, MarshalledValue::Bool(true));
        let dimmed =
            json_of(call(&calls, "Reflection_InvokeInstanceMethod", vec![s("Render.Lamp"), s("Dim"), handle.clone(), s("[0.5]")]));
        assert_eq!(dimmed["value"], MarshalledValue::Float(1.5).to_json());
        let read = json_of(call(&calls, "Reflection_GetProperty", vec![s("Render.Lamp"), s("Intensity"), handle.clone()]));
        assert_eq!(read["value"], MarshalledValue::Float(1.5).to_json());

        assert_eq!(call(&calls, "Reflection_DestroyInstance", vec![s("Render.Lamp"), handle]), MarshalledValue::Void);
        let missing = call(&calls, "Reflection_CreateInstance", vec![s("Missing"), s("")]);
        assert_eq!(missing, MarshalledValue::Int64(0));
    }

    #[test]
    fn ebus_calls_report_not_implemented() {
        let (_, calls) = table();
        let result = json_of(call(&calls, "Reflection_BroadcastEBusEvent", vec![s("LampBus"), s("OnToggle"), s("")]));
        assert_eq!(result, json!({"success": false, "error": "EBus broadcast not yet implemented"}));
        let result =
            json_of(call(&calls, "Reflection_SendEBusEvent", vec![s("LampBus"), s("Nope"), MarshalledValue::Int64(1), s("")]));
        assert_eq!(result["error"], json!("EBus event not found: LampBus.Nope"));
    }

    #[test]
    fn calls_after_shutdown_fail_cleanly() {
        let (dispatcher, calls) = table();
        dispatcher.shutdown();
        assert_eq!(json_of(call(&calls, "Reflection_GetClassNames", vec![])), json!([]));
        let result = json_of(call(&calls, "Reflection_GetGlobalProperty", vec![s("Anything")]));
        assert_eq!(result["error"], json!("Dispatcher not initialized"));
    }

    #[test]
    fn bare_arguments_follow_the_given_kinds() {
        let values = parse_args_json("[1, 2.5, \"x\"]", &[MarshalKind::UInt8, MarshalKind::Float]).expect("parse");
        assert_eq!(values[0], MarshalledValue::UInt8(1));
        assert_eq!(values[1], MarshalledValue::Float(2.5));
        assert_eq!(values[2], MarshalledValue::String("x".into()));
        assert!(parse_args_json("   ", &[]).expect("empty").is_empty());
        assert!(parse_args_json("{\"a\":1}", &[]).is_err());
    }
}
