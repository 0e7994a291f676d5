use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use rhai::Dynamic;

use crate::callable::Callable;
use crate::error::HostFault;

const DESCRIBE_DEPTH: usize = 8;

/// Largest gap an index write may pad with empty values.
pub const MAX_ARRAY_PAD: usize = 1 << 16;

/// Dynamic script value.
///
/// The taint marker lives on the handle, so two clones of one array may
/// disagree about taint while sharing the same store.
#[derive(Clone)]
pub struct Value {
    kind: ValueKind,
    tainted: bool,
}

#[derive(Clone)]
pub enum ValueKind {
    Empty,
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Array(ScriptArray),
    Map(ScriptMap),
    Callable(Callable),
    HostRef(Dynamic),
}

#[derive(Clone, Default)]
pub struct ScriptArray(Arc<RwLock<Vec<Value>>>);

#[derive(Clone, Default)]
pub struct ScriptMap(Arc<RwLock<IndexMap<String, Value>>>);

impl ScriptArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(values: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(values)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Negative indexes count from the end.
    pub fn get(&self, index: i64) -> Option<Value> {
        let values = self.read();
        resolve_index(index, values.len()).and_then(|index| values.get(index).cloned())
    }

    /// Writes past the end pad the array with empty values, at most
    /// [`MAX_ARRAY_PAD`] of them; a larger gap is refused.
    pub fn set(&self, index: i64, value: Value) -> bool {
        let mut values = self.write();
        let position = if index < 0 {
            match resolve_index(index, values.len()) {
                Some(position) => position,
                None => return false,
            }
        } else {
            index as usize
        };
        if position >= values.len() {
            if position - values.len() > MAX_ARRAY_PAD {
                return false;
            }
            values.resize(position + 1, Value::empty());
        }
        values[position] = value;
        true
    }

    pub fn push(&self, value: Value) {
        self.write().push(value);
    }

    pub fn pop(&self) -> Option<Value> {
        self.write().pop()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub fn ptr_eq(&self, other: &ScriptArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl ScriptMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.read().get(key.to_string().as_str()).cloned()
    }

    pub fn insert(&self, key: &Value, value: Value) {
        self.write().insert(key.to_string(), value);
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.write().shift_remove(key.to_string().as_str())
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &ScriptMap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

pub(crate) fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index < 0 {
        let back = index.unsigned_abs() as usize;
        len.checked_sub(back)
    } else {
        Some(index as usize)
    }
}

impl Value {
    pub const fn empty() -> Self {
        Self {
            kind: ValueKind::Empty,
            tainted: false,
        }
    }

    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            tainted: false,
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::new(ValueKind::Integer(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::integer(i64::from(value))
    }

    pub fn array(array: ScriptArray) -> Self {
        Self::new(ValueKind::Array(array))
    }

    pub fn map(map: ScriptMap) -> Self {
        Self::new(ValueKind::Map(map))
    }

    pub fn callable(callable: Callable) -> Self {
        Self::new(ValueKind::Callable(callable))
    }

    pub fn host(value: Dynamic) -> Self {
        Self::new(ValueKind::HostRef(value))
    }

    pub fn host_fault(fault: HostFault) -> Self {
        Self::host(Dynamic::from(fault))
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub fn tainted(mut self) -> Self {
        self.tainted = true;
        self
    }

    pub fn untainted(mut self) -> Self {
        self.tainted = false;
        self
    }

    /// Marks the value when it was read through a tainted handle.
    pub fn inherit_taint(mut self, tainted: bool) -> Self {
        self.tainted |= tainted;
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, ValueKind::Empty)
    }

    /// Empty, integer and float values take part in arithmetic; everything else concatenates.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Empty | ValueKind::Integer(_) | ValueKind::Float(_)
        )
    }

    pub fn is_true(&self) -> bool {
        match &self.kind {
            ValueKind::Empty => false,
            ValueKind::Integer(value) => *value != 0,
            ValueKind::Float(value) => *value != 0.0,
            ValueKind::String(value) => !value.is_empty(),
            _ => true,
        }
    }

    pub fn to_integer(&self) -> i64 {
        match &self.kind {
            ValueKind::Integer(value) => *value,
            ValueKind::Float(value) => *value as i64,
            ValueKind::String(value) => {
                let text = value.trim();
                text.parse::<i64>()
                    .ok()
                    .or_else(|| text.parse::<f64>().ok().map(|value| value as i64))
                    .unwrap_or(0)
            }
            ValueKind::Array(array) => array.len() as i64,
            ValueKind::Map(map) => map.len() as i64,
            _ => 0,
        }
    }

    pub fn to_float(&self) -> f64 {
        match &self.kind {
            ValueKind::Integer(value) => *value as f64,
            ValueKind::Float(value) => *value,
            ValueKind::String(value) => value.trim().parse::<f64>().unwrap_or(0.0),
            _ => self.to_integer() as f64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ScriptArray> {
        match &self.kind {
            ValueKind::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ScriptMap> {
        match &self.kind {
            ValueKind::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match &self.kind {
            ValueKind::Callable(callable) => Some(callable),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&Dynamic> {
        match &self.kind {
            ValueKind::HostRef(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_host_fault(&self) -> Option<HostFault> {
        self.as_host()
            .and_then(|value| value.clone().try_cast::<HostFault>())
    }

    /// Array element read; tainted handles hand out tainted elements.
    pub fn element(&self, index: i64) -> Option<Value> {
        self.as_array()
            .and_then(|array| array.get(index))
            .map(|value| value.inherit_taint(self.tainted))
    }

    pub fn pop_element(&self) -> Option<Value> {
        self.as_array()
            .and_then(ScriptArray::pop)
            .map(|value| value.inherit_taint(self.tainted))
    }

    pub fn entry(&self, key: &Value) -> Option<Value> {
        self.as_map()
            .and_then(|map| map.get(key))
            .map(|value| value.inherit_taint(self.tainted))
    }

    /// Snapshot of `(key, value)` pairs for iteration.
    pub fn items(&self) -> Vec<(Value, Value)> {
        let tainted = self.tainted;
        match &self.kind {
            ValueKind::Array(array) => array
                .snapshot()
                .into_iter()
                .enumerate()
                .map(|(index, value)| {
                    (
                        Value::integer(index as i64),
                        value.inherit_taint(tainted),
                    )
                })
                .collect(),
            ValueKind::Map(map) => map
                .entries()
                .into_iter()
                .map(|(key, value)| {
                    (
                        Value::string(key).inherit_taint(tainted),
                        value.inherit_taint(tainted),
                    )
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Shallow copy into a fresh store; scalars are returned as-is.
    pub fn copy(&self) -> Value {
        let copied = match &self.kind {
            ValueKind::Array(array) => Value::array(ScriptArray::from_vec(array.snapshot())),
            ValueKind::Map(map) => {
                let copy = ScriptMap::new();
                for (key, value) in map.entries() {
                    copy.insert(&Value::string(key), value);
                }
                Value::map(copy)
            }
            _ => self.clone(),
        };
        copied.inherit_taint(self.tainted)
    }

    /// Rendering used by call traces and error messages.
    pub fn describe(&self) -> String {
        self.describe_at(0)
    }

    fn describe_at(&self, depth: usize) -> String {
        if depth > DESCRIBE_DEPTH {
            return "...".to_string();
        }
        match &self.kind {
            ValueKind::Empty => "$null".to_string(),
            ValueKind::String(value) => format!("'{}'", value),
            ValueKind::Array(array) => format!(
                "@({})",
                array
                    .snapshot()
                    .iter()
                    .map(|value| value.describe_at(depth + 1))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            ValueKind::Map(map) => format!(
                "%({})",
                map.entries()
                    .iter()
                    .map(|(key, value)| format!("{} => {}", key, value.describe_at(depth + 1)))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => self.to_string(),
        }
    }

    pub fn same_handle(&self, other: &Value) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Array(left), ValueKind::Array(right)) => left.ptr_eq(right),
            (ValueKind::Map(left), ValueKind::Map(right)) => left.ptr_eq(right),
            (ValueKind::Callable(left), ValueKind::Callable(right)) => left.same(right),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::empty()
    }
}

/// Equality ignores the taint marker; containers compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Empty, ValueKind::Empty) => true,
            (ValueKind::Integer(left), ValueKind::Integer(right)) => left == right,
            (ValueKind::Integer(_), ValueKind::Float(_))
            | (ValueKind::Float(_), ValueKind::Integer(_))
            | (ValueKind::Float(_), ValueKind::Float(_)) => self.to_float() == other.to_float(),
            (ValueKind::String(left), ValueKind::String(right)) => left == right,
            _ => self.same_handle(other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Empty => Ok(()),
            ValueKind::Integer(value) => write!(f, "{}", value),
            ValueKind::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
            ValueKind::String(value) => write!(f, "{}", value),
            ValueKind::Array(_) | ValueKind::Map(_) => write!(f, "{}", self.describe()),
            ValueKind::Callable(callable) => write!(f, "{}", callable),
            ValueKind::HostRef(value) => match value.clone().try_cast::<HostFault>() {
                Some(fault) => write!(f, "{}", fault.message),
                None => write!(f, "{}", value),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tainted {
            write!(f, "Tainted({})", self.describe())
        } else {
            write!(f, "{}", self.describe())
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::array(ScriptArray::from_vec(values))
    }
}

impl From<strand_core::Literal> for Value {
    fn from(literal: strand_core::Literal) -> Self {
        match literal {
            strand_core::Literal::Empty => Self::empty(),
            strand_core::Literal::Integer(value) => Self::integer(value),
            strand_core::Literal::Float(value) => Self::float(value),
            strand_core::Literal::String(value) => Self::string(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_array_store() {
        let original = Value::from(vec![Value::from(1), Value::from(2)]);
        let alias = original.clone();
        alias.as_array().expect("array").push(Value::from(3));
        assert_eq!(original.as_array().expect("array").len(), 3);
        assert!(original.same_handle(&alias));

        let copy = original.copy();
        copy.as_array().expect("array").push(Value::from(4));
        assert_eq!(original.as_array().expect("array").len(), 3);
        assert!(!original.same_handle(&copy));
    }

    #[test]
    fn tainted_handle_shares_store_and_taints_reads() {
        let array = Value::from(vec![Value::from("a")]);
        let tainted = array.clone().tainted();
        tainted.as_array().expect("array").push(Value::from("b"));

        assert_eq!(array.as_array().expect("array").len(), 2);
        assert!(array.same_handle(&tainted));
        assert!(!array.element(1).expect("element").is_tainted());
        assert!(tainted.element(1).expect("element").is_tainted());
        assert!(tainted.pop_element().expect("pop").is_tainted());
        assert!(tainted.items().iter().all(|(_, value)| value.is_tainted()));
    }

    #[test]
    fn map_keys_use_string_identity() {
        let map = ScriptMap::new();
        map.insert(&Value::from(1), Value::from("one"));
        assert_eq!(map.get(&Value::from("1")), Some(Value::from("one")));
        map.insert(&Value::from("b"), Value::from(2));
        map.insert(&Value::from("a"), Value::from(3));
        let keys = map
            .entries()
            .into_iter()
            .map(|(key, _)| key)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["1", "b", "a"]);
    }

    #[test]
    fn equality_ignores_taint_and_stringification_is_stable() {
        assert_eq!(Value::from("x").tainted(), Value::from("x"));
        assert_eq!(Value::from(2), Value::from(2.0));
        assert_eq!(Value::from(2.0).to_string(), "2.0");
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::empty().to_string(), "");
        assert_eq!(
            Value::from(vec![Value::from(1), Value::from("a"), Value::empty()]).describe(),
            "@(1, 'a', $null)"
        );
    }

    #[test]
    fn negative_indexes_count_from_end_and_writes_pad() {
        let array = ScriptArray::from_vec(vec![Value::from(1), Value::from(2)]);
        assert_eq!(array.get(-1), Some(Value::from(2)));
        assert_eq!(array.get(-3), None);
        assert!(array.set(4, Value::from(9)));
        assert_eq!(array.len(), 5);
        assert!(array.get(3).expect("padded").is_empty());
    }

    #[test]
    fn writes_far_past_the_end_are_refused() {
        let array = ScriptArray::from_vec(vec![Value::from(1)]);
        assert!(!array.set(i64::MAX, Value::from(9)));
        assert!(!array.set(1 + MAX_ARRAY_PAD as i64 + 1, Value::from(9)));
        assert_eq!(array.len(), 1);
        assert!(array.set(1 + MAX_ARRAY_PAD as i64, Value::from(9)));
        assert_eq!(array.len(), MAX_ARRAY_PAD + 2);
    }

    #[test]
    fn truthiness_and_numeric_coercion() {
        assert!(!Value::empty().is_true());
        assert!(!Value::from(0).is_true());
        assert!(!Value::from("").is_true());
        assert!(Value::from("0.0").is_true());
        assert_eq!(Value::from(" 12 ").to_integer(), 12);
        assert_eq!(Value::from("3.9").to_integer(), 3);
        assert_eq!(Value::from("abc").to_float(), 0.0);
    }
}
