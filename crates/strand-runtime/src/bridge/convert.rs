use std::sync::Arc;

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use strand_core::HostType;

use super::matching::is_boxed;
use super::proxy::{HostObjectRef, ScriptProxy};
use crate::callable::Callable;
use crate::error::HostFault;
use crate::instance::ScriptInstance;
use crate::value::{ScriptArray, ScriptMap, Value, ValueKind};

fn mismatch(value: &Value, ty: &HostType) -> HostFault {
    HostFault::new(format!("cannot convert {} to {}", value.describe(), ty))
}

fn narrow<T: TryFrom<i64>>(value: &Value, ty: &HostType) -> Result<T, HostFault> {
    T::try_from(value.to_integer()).map_err(|_| mismatch(value, ty))
}

/// Converts a script value into the host representation of `ty`.
pub fn build_argument(
    value: &Value,
    ty: &HostType,
    instance: &Arc<ScriptInstance>,
) -> Result<Dynamic, HostFault> {
    if let ValueKind::HostRef(host) = value.kind() {
        if !ty.is_primitive() || is_boxed(host, ty) {
            return Ok(host.clone());
        }
        return Err(mismatch(value, ty));
    }
    match ty {
        HostType::Void => Ok(Dynamic::UNIT),
        HostType::Boolean => Ok(Dynamic::from_bool(value.is_true())),
        HostType::Byte => narrow::<i8>(value, ty).map(Dynamic::from),
        HostType::Short => narrow::<i16>(value, ty).map(Dynamic::from),
        HostType::Int => narrow::<i32>(value, ty).map(Dynamic::from),
        HostType::Long => Ok(Dynamic::from_int(value.to_integer() as INT)),
        HostType::Float => Ok(Dynamic::from(value.to_float() as f32)),
        HostType::Double => Ok(Dynamic::from_float(value.to_float() as FLOAT)),
        HostType::Char => to_char(value).map(Dynamic::from_char),
        HostType::String if value.is_empty() => Ok(Dynamic::UNIT),
        HostType::String => Ok(Dynamic::from(ImmutableString::from(value.to_string()))),
        HostType::Array { element } => build_array(value, element, ty, instance),
        HostType::Collection => match value.as_array() {
            Some(array) => generic_array(array, instance),
            None if value.is_empty() => Ok(Dynamic::UNIT),
            None => Err(mismatch(value, ty)),
        },
        HostType::Map => match value.as_map() {
            Some(map) => generic_map(map, instance),
            None if value.is_empty() => Ok(Dynamic::UNIT),
            None => Err(mismatch(value, ty)),
        },
        HostType::Interface { name } => match value.as_callable() {
            Some(callable) => Ok(proxy_for(callable, name, instance)),
            None if value.is_empty() => Ok(Dynamic::UNIT),
            None => Err(mismatch(value, ty)),
        },
        HostType::Class { .. } if value.is_empty() => Ok(Dynamic::UNIT),
        HostType::Class { .. } => Err(mismatch(value, ty)),
        HostType::Any => generic(value, instance),
    }
}

fn to_char(value: &Value) -> Result<char, HostFault> {
    match value.kind() {
        ValueKind::Empty => Ok('\0'),
        ValueKind::String(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok(ch),
                _ => Err(mismatch(value, &HostType::Char)),
            }
        }
        ValueKind::Integer(code) => u32::try_from(*code)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| mismatch(value, &HostType::Char)),
        _ => Err(mismatch(value, &HostType::Char)),
    }
}

fn build_array(
    value: &Value,
    element: &HostType,
    ty: &HostType,
    instance: &Arc<ScriptInstance>,
) -> Result<Dynamic, HostFault> {
    let Some(array) = value.as_array() else {
        if value.is_empty() {
            return Ok(Dynamic::UNIT);
        }
        return Err(mismatch(value, ty));
    };
    let mut out = Array::new();
    for (index, item) in array.snapshot().iter().enumerate() {
        if element.is_array() && item.as_array().is_none() && !item.is_empty() {
            return Err(HostFault::new(format!(
                "array dimension mismatch at index {}: expected {}, found {}",
                index,
                element,
                item.describe()
            )));
        }
        let converted = build_argument(item, element, instance).map_err(|fault| {
            HostFault::new(format!("array element {} of {}: {}", index, ty, fault.message))
        })?;
        out.push(converted);
    }
    Ok(Dynamic::from_array(out))
}

fn generic_array(array: &ScriptArray, instance: &Arc<ScriptInstance>) -> Result<Dynamic, HostFault> {
    let mut out = Array::new();
    for item in array.snapshot() {
        out.push(generic(&item, instance)?);
    }
    Ok(Dynamic::from_array(out))
}

fn generic_map(map: &ScriptMap, instance: &Arc<ScriptInstance>) -> Result<Dynamic, HostFault> {
    let mut out = Map::new();
    for (key, value) in map.entries() {
        out.insert(key.into(), generic(&value, instance)?);
    }
    Ok(Dynamic::from_map(out))
}

/// Natural host form of a value passed to a generic parameter.
fn generic(value: &Value, instance: &Arc<ScriptInstance>) -> Result<Dynamic, HostFault> {
    match value.kind() {
        ValueKind::Empty => Ok(Dynamic::UNIT),
        ValueKind::Integer(number) => Ok(Dynamic::from_int(*number as INT)),
        ValueKind::Float(number) => Ok(Dynamic::from_float(*number as FLOAT)),
        ValueKind::String(text) => Ok(Dynamic::from(ImmutableString::from(text.as_ref()))),
        ValueKind::Array(array) => generic_array(array, instance),
        ValueKind::Map(map) => generic_map(map, instance),
        ValueKind::Callable(callable) => Ok(Dynamic::from(callable.clone())),
        ValueKind::HostRef(host) => Ok(host.clone()),
    }
}

fn proxy_for(callable: &Callable, interface: &str, instance: &Arc<ScriptInstance>) -> Dynamic {
    let interfaces = instance.registry().interface_closure(interface);
    let proxy = ScriptProxy::new(instance, callable.clone(), interface, interfaces);
    Dynamic::from(HostObjectRef::new(proxy))
}

/// Converts a host result back into a script value.
pub fn value_from_host(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::empty();
    }
    if value.is::<bool>() {
        return Value::boolean(value.cast::<bool>());
    }
    if value.is::<INT>() {
        return Value::integer(value.cast::<INT>());
    }
    if value.is::<i32>() {
        return Value::integer(i64::from(value.cast::<i32>()));
    }
    if value.is::<i16>() {
        return Value::integer(i64::from(value.cast::<i16>()));
    }
    if value.is::<i8>() {
        return Value::integer(i64::from(value.cast::<i8>()));
    }
    if value.is::<FLOAT>() {
        return Value::float(value.cast::<FLOAT>());
    }
    if value.is::<f32>() {
        return Value::float(f64::from(value.cast::<f32>()));
    }
    if value.is::<char>() {
        return Value::from(value.cast::<char>().to_string());
    }
    if value.is::<ImmutableString>() {
        return Value::from(value.cast::<ImmutableString>().to_string());
    }
    if value.is::<Array>() {
        let items = value
            .cast::<Array>()
            .into_iter()
            .map(value_from_host)
            .collect::<Vec<_>>();
        return Value::from(items);
    }
    if value.is::<Map>() {
        let map = ScriptMap::new();
        for (key, item) in value.cast::<Map>() {
            map.insert(&Value::from(key.to_string()), value_from_host(item));
        }
        return Value::map(map);
    }
    if value.is::<Callable>() {
        return Value::callable(value.cast::<Callable>());
    }
    if let Some(callable) = value
        .clone()
        .try_cast::<HostObjectRef>()
        .and_then(|object| object.script_callable())
    {
        return Value::callable(callable);
    }
    Value::host(value)
}
