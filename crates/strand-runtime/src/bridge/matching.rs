//! Overload grading.
//!
//! Each argument is graded against its parameter type; a candidate's grade is
//! the weakest of its argument grades. Resolution takes the first `Yes`
//! candidate in declaration order, falling back to the first `Maybe`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::OnceLock;

use rhai::Dynamic;
use strand_core::{HostType, TypeHierarchy};

use super::registry::{HostMethod, HostRegistry};
use crate::value::{ScriptArray, Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    No,
    Maybe,
    Yes,
}

impl Grade {
    pub fn and(self, other: Grade) -> Grade {
        self.min(other)
    }
}

/// Rust types standing in for each boxed primitive.
fn boxed_types() -> &'static HashMap<HostType, TypeId> {
    static TABLE: OnceLock<HashMap<HostType, TypeId>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            (HostType::Boolean, TypeId::of::<bool>()),
            (HostType::Char, TypeId::of::<char>()),
            (HostType::Byte, TypeId::of::<i8>()),
            (HostType::Short, TypeId::of::<i16>()),
            (HostType::Int, TypeId::of::<i32>()),
            (HostType::Long, TypeId::of::<i64>()),
            (HostType::Float, TypeId::of::<f32>()),
            (HostType::Double, TypeId::of::<f64>()),
        ])
    })
}

pub(crate) fn is_boxed(value: &Dynamic, param: &HostType) -> bool {
    boxed_types().get(param) == Some(&value.type_id())
}

pub fn grade(value: &Value, param: &HostType, registry: &HostRegistry) -> Grade {
    match value.kind() {
        ValueKind::Empty => Grade::Yes,
        ValueKind::Array(array) => grade_array(array, param, registry),
        ValueKind::Map(_) if param.is_map() => Grade::Yes,
        ValueKind::Map(_) => generic_or_no(param),
        _ if param.is_primitive() => grade_primitive(value, param),
        ValueKind::Callable(_) if param.is_interface() => Grade::Yes,
        ValueKind::HostRef(host) if param.is_interface() => match param {
            HostType::Interface { name } if registry.implements(host, name) => Grade::Yes,
            _ => Grade::No,
        },
        _ if param.is_interface() => Grade::No,
        ValueKind::String(_) if param.is_string() => Grade::Yes,
        _ if param.is_string() => Grade::Maybe,
        ValueKind::HostRef(host) => match param {
            HostType::Class { name } => match registry.class_of(host) {
                Some(class) if &class.name == name => Grade::Yes,
                Some(class) if registry.is_subtype(&class.name, name) => Grade::Maybe,
                _ => Grade::No,
            },
            _ => generic_or_no(param),
        },
        _ => generic_or_no(param),
    }
}

fn generic_or_no(param: &HostType) -> Grade {
    if param.is_generic() {
        Grade::Maybe
    } else {
        Grade::No
    }
}

fn grade_array(array: &ScriptArray, param: &HostType, registry: &HostRegistry) -> Grade {
    match param.element_type() {
        Some(element) => {
            let values = array.snapshot();
            if values.is_empty() {
                return Grade::Yes;
            }
            let inferred = infer_element_type(&values, registry);
            if element.is_assignable_from(&inferred, registry) {
                Grade::Yes
            } else {
                Grade::No
            }
        }
        None if param.is_collection() => Grade::Yes,
        None => generic_or_no(param),
    }
}

fn grade_primitive(value: &Value, param: &HostType) -> Grade {
    match (value.kind(), param) {
        (ValueKind::Integer(_), HostType::Int | HostType::Long)
        | (ValueKind::Float(_), HostType::Double) => Grade::Yes,
        (ValueKind::Integer(_) | ValueKind::Float(_), HostType::Char) => Grade::No,
        (ValueKind::Integer(_) | ValueKind::Float(_), _) => Grade::Maybe,
        (ValueKind::String(text), HostType::Char) if text.chars().count() == 1 => Grade::Yes,
        (ValueKind::HostRef(host), param) if is_boxed(host, param) => Grade::Yes,
        _ => Grade::No,
    }
}

/// The narrowest descriptor covering every element, or `Any` when they disagree.
pub fn infer_element_type(values: &[Value], registry: &HostRegistry) -> HostType {
    let mut inferred: Option<HostType> = None;
    for value in values {
        let current = value_type(value, registry);
        match &inferred {
            None => inferred = Some(current),
            Some(previous) if *previous == current => {}
            Some(_) => return HostType::Any,
        }
    }
    inferred.unwrap_or(HostType::Any)
}

fn value_type(value: &Value, registry: &HostRegistry) -> HostType {
    match value.kind() {
        ValueKind::Empty => HostType::Any,
        ValueKind::Integer(_) => HostType::Int,
        ValueKind::Float(_) => HostType::Double,
        ValueKind::String(_) => HostType::String,
        ValueKind::Array(array) => {
            HostType::array_of(infer_element_type(&array.snapshot(), registry))
        }
        ValueKind::Map(_) => HostType::Map,
        ValueKind::Callable(_) => HostType::Any,
        ValueKind::HostRef(host) => registry
            .class_of(host)
            .map(|class| HostType::class(class.name.clone()))
            .unwrap_or(HostType::Any),
    }
}

pub fn grade_call(method: &HostMethod, args: &[Value], registry: &HostRegistry) -> Grade {
    if method.arity() != args.len() {
        return Grade::No;
    }
    method
        .params
        .iter()
        .zip(args)
        .fold(Grade::Yes, |grade, (param, arg)| {
            grade.and(self::grade(arg, param, registry))
        })
}

pub fn resolve_overload<'a>(
    candidates: &'a [HostMethod],
    args: &[Value],
    registry: &HostRegistry,
) -> Option<&'a HostMethod> {
    let mut fallback = None;
    for method in candidates {
        match grade_call(method, args, registry) {
            Grade::Yes => return Some(method),
            Grade::Maybe if fallback.is_none() => fallback = Some(method),
            _ => {}
        }
    }
    fallback
}
