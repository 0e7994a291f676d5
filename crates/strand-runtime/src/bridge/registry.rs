use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rhai::Dynamic;
use strand_core::{HostType, TypeHierarchy};

use super::proxy::HostObjectRef;
use crate::error::HostFault;

pub type HostInvoker =
    Arc<dyn Fn(Option<Dynamic>, Vec<Dynamic>) -> Result<Dynamic, HostFault> + Send + Sync>;

/// One host constructor or method overload.
#[derive(Clone)]
pub struct HostMethod {
    pub name: String,
    pub params: Vec<HostType>,
    pub returns: HostType,
    pub is_static: bool,
    pub sensitive: bool,
    invoker: HostInvoker,
}

impl HostMethod {
    pub fn new<F>(name: impl Into<String>, params: Vec<HostType>, returns: HostType, invoker: F) -> Self
    where
        F: Fn(Option<Dynamic>, Vec<Dynamic>) -> Result<Dynamic, HostFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            returns,
            is_static: false,
            sensitive: false,
            invoker: Arc::new(invoker),
        }
    }

    pub fn into_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn into_sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn call(&self, receiver: Option<Dynamic>, args: Vec<Dynamic>) -> Result<Dynamic, HostFault> {
        (self.invoker)(receiver, args)
    }
}

impl fmt::Display for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({})", self.name, params)
    }
}

impl fmt::Debug for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostMethod({})", self)
    }
}

#[derive(Debug, Clone)]
pub struct HostClass {
    pub name: String,
    /// Runtime type name of the values this class describes.
    pub type_name: String,
    pub supertypes: Vec<String>,
    pub interfaces: Vec<String>,
    pub constructors: Vec<HostMethod>,
    pub methods: Vec<HostMethod>,
    pub sensitive: bool,
}

impl HostClass {
    /// Class whose values are `T` stored directly in a host reference.
    pub fn of<T: 'static>(name: impl Into<String>) -> Self {
        Self::named(name, std::any::type_name::<T>())
    }

    /// Class whose values are [`HostObjectRef`]s reporting `name` as their type.
    pub fn object(name: impl Into<String>) -> Self {
        let name = name.into();
        let type_name = name.clone();
        Self::named(name, type_name)
    }

    fn named(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            supertypes: Vec::new(),
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            sensitive: false,
        }
    }

    pub fn extends(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn constructor(mut self, constructor: HostMethod) -> Self {
        self.constructors.push(constructor);
        self
    }

    pub fn method(mut self, method: HostMethod) -> Self {
        self.methods.push(method);
        self
    }

    /// Every constructor and method refuses tainted arguments in taint mode.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Overloads named `name`, in declaration order.
    pub fn overloads(&self, name: &str, is_static: bool) -> Vec<HostMethod> {
        self.methods
            .iter()
            .filter(|method| method.name == name && method.is_static == is_static)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceMethod {
    pub name: String,
    pub params: Vec<HostType>,
    pub returns: HostType,
}

impl InterfaceMethod {
    pub fn new(name: impl Into<String>, params: Vec<HostType>, returns: HostType) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostInterface {
    pub name: String,
    pub extends: Vec<String>,
    pub methods: Vec<InterfaceMethod>,
}

impl HostInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, interface: impl Into<String>) -> Self {
        self.extends.push(interface.into());
        self
    }

    pub fn method(mut self, method: InterfaceMethod) -> Self {
        self.methods.push(method);
        self
    }
}

/// Host classes and interfaces visible to scripts.
#[derive(Debug, Default)]
pub struct HostRegistry {
    classes: IndexMap<String, HostClass>,
    interfaces: IndexMap<String, HostInterface>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&mut self, mut class: HostClass) -> &mut Self {
        if class.sensitive {
            for method in class.constructors.iter_mut().chain(class.methods.iter_mut()) {
                method.sensitive = true;
            }
        }
        self.classes.insert(class.name.clone(), class);
        self
    }

    pub fn register_interface(&mut self, interface: HostInterface) -> &mut Self {
        self.interfaces.insert(interface.name.clone(), interface);
        self
    }

    pub fn class(&self, name: &str) -> Option<&HostClass> {
        self.classes.get(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &HostClass> {
        self.classes.values()
    }

    pub fn interface(&self, name: &str) -> Option<&HostInterface> {
        self.interfaces.get(name)
    }

    /// Registered class describing a host value, by runtime type.
    pub fn class_of(&self, value: &Dynamic) -> Option<&HostClass> {
        let type_name = runtime_type_name(value);
        self.classes
            .values()
            .find(|class| class.type_name == type_name)
    }

    /// The interface plus everything it extends, nearest first.
    pub fn interface_closure(&self, name: &str) -> Vec<HostInterface> {
        let mut seen = Vec::<String>::new();
        let mut pending = VecDeque::from([name.to_string()]);
        let mut out = Vec::new();
        while let Some(next) = pending.pop_front() {
            if seen.contains(&next) {
                continue;
            }
            seen.push(next.clone());
            if let Some(interface) = self.interfaces.get(&next) {
                pending.extend(interface.extends.iter().cloned());
                out.push(interface.clone());
            }
        }
        out
    }

    pub fn implements(&self, value: &Dynamic, interface: &str) -> bool {
        if let Some(object) = value.clone().try_cast::<HostObjectRef>() {
            if object.implements(interface) {
                return true;
            }
        }
        self.class_of(value)
            .is_some_and(|class| self.is_subtype(&class.name, interface))
    }

    fn parents(&self, name: &str) -> Vec<String> {
        if let Some(class) = self.classes.get(name) {
            return class
                .supertypes
                .iter()
                .chain(class.interfaces.iter())
                .cloned()
                .collect();
        }
        self.interfaces
            .get(name)
            .map(|interface| interface.extends.clone())
            .unwrap_or_default()
    }
}

impl TypeHierarchy for HostRegistry {
    fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut seen = Vec::<String>::new();
        let mut pending = VecDeque::from([sub.to_string()]);
        while let Some(next) = pending.pop_front() {
            if next == sup {
                return true;
            }
            if seen.contains(&next) {
                continue;
            }
            pending.extend(self.parents(&next));
            seen.push(next);
        }
        false
    }
}

/// Object references report their own type; anything else reports its Rust type.
pub(crate) fn runtime_type_name(value: &Dynamic) -> String {
    match value.clone().try_cast::<HostObjectRef>() {
        Some(object) => object.type_name().to_string(),
        None => value.type_name().to_string(),
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Point;

    fn registry() -> HostRegistry {
        let mut registry = HostRegistry::new();
        registry
            .register_interface(HostInterface::new("Shape"))
            .register_interface(HostInterface::new("Solid").extends("Shape"))
            .register_class(HostClass::of::<Point>("Point").implements("Solid"))
            .register_class(HostClass::object("Origin").extends("Point"));
        registry
    }

    #[test]
    fn subtypes_follow_classes_and_interfaces_transitively() {
        let registry = registry();
        assert!(registry.is_subtype("Origin", "Point"));
        assert!(registry.is_subtype("Origin", "Shape"));
        assert!(registry.is_subtype("Solid", "Shape"));
        assert!(!registry.is_subtype("Shape", "Solid"));
        assert!(!registry.is_subtype("Point", "Origin"));
    }

    #[test]
    fn classes_are_found_by_runtime_type() {
        let registry = registry();
        let point = Dynamic::from(Point);
        assert_eq!(registry.class_of(&point).map(|class| class.name.as_str()), Some("Point"));
        assert!(registry.implements(&point, "Shape"));
        assert!(registry.class_of(&Dynamic::from(1_i64)).is_none());
    }

    #[test]
    fn interface_closure_lists_extended_interfaces() {
        let names = registry()
            .interface_closure("Solid")
            .into_iter()
            .map(|interface| interface.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Solid".to_string(), "Shape".to_string()]);
    }

    #[test]
    fn sensitive_classes_mark_every_method() {
        let mut registry = HostRegistry::new();
        registry.register_class(
            HostClass::object("Shell")
                .method(HostMethod::new("run", vec![HostType::String], HostType::Void, |_, _| {
                    Ok(Dynamic::UNIT)
                }))
                .sensitive(),
        );
        let shell = registry.class("Shell").expect("class");
        assert!(shell.methods[0].sensitive);
        assert_eq!(shell.methods[0].to_string(), "run(string)");
    }
}
