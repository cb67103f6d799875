//! The binding store: named values, nested namespaces and sweep domains.
//!
//! Names may be dotted (`ms.DDID`), in which case every component but the last
//! names a sub-namespace and the last one is the leaf variable inside it. A
//! name's sweep domain lives next to it in the same namespace, under the name
//! with [`LIST_SUFFIX`] appended (`ms.DDID` sweeps over `ms.DDID_List`).

pub mod error;
pub use error::BindingError;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Suffix of the variable holding a name's sweep domain.
pub const LIST_SUFFIX: &str = "_List";

lazy_static! {
    static ref DEFINITION_REGEX: Regex = Regex::new(
        r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)=(?P<value>.*)$"
    )
    .unwrap();
}

/// A value held by the binding store.
///
/// Scalars are integers or strings. Lists only appear as sweep domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// An integer scalar
    Int(i64),
    /// A string scalar
    Str(String),
    /// An ordered sequence of values
    List(Vec<Value>),
}

impl Value {
    /// Parse a string as an integer if it looks like one, otherwise keep it
    /// as a string. Surrounding whitespace is ignored when looking for an
    /// integer but kept in a string.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pyxis::Value;
    ///
    /// assert_eq!(Value::parse("12"), Value::Int(12));
    /// assert_eq!(Value::parse(" 3"), Value::Int(3));
    /// assert_eq!(Value::parse("foo.ms"), Value::Str("foo.ms".into()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Str(s.to_string()),
        }
    }

    /// Whether this is an integer or a string.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_))
    }

    /// A short name for the kind of value, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(values) => write!(f, "{}", values.iter().join(",")),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// A namespace of variables, possibly containing sub-namespaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Namespace {
    vars: BTreeMap<String, Value>,
    children: BTreeMap<String, Namespace>,
}

impl Namespace {
    /// The value bound to `leaf` in this namespace, if any.
    pub fn get(&self, leaf: &str) -> Option<&Value> {
        self.vars.get(leaf)
    }

    /// Bind `leaf` to `value`, returning the previous value.
    pub fn set(&mut self, leaf: &str, value: Value) -> Option<Value> {
        self.vars.insert(leaf.to_string(), value)
    }

    /// Remove the binding of `leaf`, returning the previous value.
    pub fn unset(&mut self, leaf: &str) -> Option<Value> {
        self.vars.remove(leaf)
    }

    /// Iterate over the variables bound directly in this namespace.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn fmt_prefixed(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        for (name, value) in &self.vars {
            writeln!(f, "  {prefix}{name}={value}")?;
        }
        for (name, child) in &self.children {
            child.fmt_prefixed(f, &format!("{prefix}{name}."))?;
        }
        Ok(())
    }
}

/// Split a dotted name into its namespace path and leaf.
fn split_name(name: &str) -> Result<(Vec<&str>, &str), BindingError> {
    let components: Vec<&str> = name.split('.').collect();
    if components.iter().any(|component| component.is_empty()) {
        return Err(BindingError::InvalidName { name: name.into() });
    }
    match components.split_last() {
        Some((leaf, path)) => Ok((path.to_vec(), leaf)),
        None => Err(BindingError::InvalidName { name: name.into() }),
    }
}

/// The binding store.
///
/// Each sweep worker owns an independent clone, so mutations are never
/// visible across workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    root: Namespace,
}

impl Bindings {
    /// An empty binding store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The top-level namespace.
    pub fn root(&self) -> &Namespace {
        &self.root
    }

    /// Resolve a possibly-dotted name into the namespace that holds it and
    /// the leaf name inside that namespace.
    ///
    /// # Errors
    ///
    /// - [`BindingError::NameResolution`] if an intermediate namespace does not exist.
    /// - [`BindingError::InvalidName`] if a component of the name is empty.
    pub fn resolve<'n>(&self, name: &'n str) -> Result<(&Namespace, &'n str), BindingError> {
        let (path, leaf) = split_name(name)?;
        let mut namespace = &self.root;
        for component in path {
            namespace =
                namespace
                    .children
                    .get(component)
                    .ok_or_else(|| BindingError::NameResolution {
                        name: name.into(),
                        component: component.into(),
                    })?;
        }
        Ok((namespace, leaf))
    }

    /// Mutable version of [`Bindings::resolve`].
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn resolve_mut<'n>(
        &mut self,
        name: &'n str,
    ) -> Result<(&mut Namespace, &'n str), BindingError> {
        let (path, leaf) = split_name(name)?;
        let mut namespace = &mut self.root;
        for component in path {
            namespace = namespace.children.get_mut(component).ok_or_else(|| {
                BindingError::NameResolution {
                    name: name.into(),
                    component: component.into(),
                }
            })?;
        }
        Ok((namespace, leaf))
    }

    /// Create a (possibly nested) namespace, along with any missing parents.
    /// Existing namespaces are left untouched.
    ///
    /// # Errors
    ///
    /// [`BindingError::InvalidName`] if a component of the name is empty.
    pub fn add_namespace(&mut self, name: &str) -> Result<&mut Namespace, BindingError> {
        let (path, leaf) = split_name(name)?;
        let mut namespace = &mut self.root;
        for component in path.into_iter().chain(std::iter::once(leaf)) {
            namespace = namespace
                .children
                .entry(component.to_string())
                .or_default();
        }
        Ok(namespace)
    }

    /// The current value of `name`, if bound.
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn get(&self, name: &str) -> Result<Option<&Value>, BindingError> {
        let (namespace, leaf) = self.resolve(name)?;
        Ok(namespace.get(leaf))
    }

    /// The current value of `name_List`, if bound.
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn get_list(&self, name: &str) -> Result<Option<&Value>, BindingError> {
        let (namespace, leaf) = self.resolve(name)?;
        Ok(namespace.get(&format!("{leaf}{LIST_SUFFIX}")))
    }

    /// Bind `name` to `value` as-is. No interpolation is performed on the value.
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn assign(&mut self, name: &str, value: impl Into<Value>) -> Result<(), BindingError> {
        let (namespace, leaf) = self.resolve_mut(name)?;
        namespace.set(leaf, value.into());
        Ok(())
    }

    /// Bind the sweep domain of `name`.
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn assign_list(&mut self, name: &str, values: impl Into<Value>) -> Result<(), BindingError> {
        self.assign(&format!("{name}{LIST_SUFFIX}"), values)
    }

    /// Put back a previously saved binding. `None` means `name` was unbound,
    /// so any current binding is removed.
    ///
    /// # Errors
    ///
    /// see [`Bindings::resolve`]
    pub fn restore(&mut self, name: &str, saved: Option<Value>) -> Result<(), BindingError> {
        let (namespace, leaf) = self.resolve_mut(name)?;
        match saved {
            Some(value) => namespace.set(leaf, value),
            None => namespace.unset(leaf),
        };
        Ok(())
    }

    /// Apply a definition of the form `NAME=VALUE`, creating any namespaces
    /// named by a dotted `NAME`. The value is parsed with [`Value::parse`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pyxis::{Bindings, Value};
    ///
    /// let mut bindings = Bindings::new();
    /// bindings.define("ms.DDID_List=0,1").unwrap();
    /// assert_eq!(
    ///     bindings.get_list("ms.DDID").unwrap(),
    ///     Some(&Value::Str("0,1".into()))
    /// );
    /// ```
    ///
    /// # Errors
    ///
    /// [`BindingError::InvalidDefinition`] if the definition isn't `NAME=VALUE`.
    pub fn define(&mut self, definition: &str) -> Result<(), BindingError> {
        let captures = DEFINITION_REGEX.captures(definition).ok_or_else(|| {
            BindingError::InvalidDefinition {
                definition: definition.into(),
            }
        })?;
        let name = &captures["name"];
        if let Some((parent, _)) = name.rsplit_once('.') {
            self.add_namespace(parent)?;
        }
        self.assign(name, Value::parse(&captures["value"]))
    }

    /// Top-level bindings as environment variables for external commands.
    /// Lists are comma-joined. Sub-namespaces are not exported.
    pub fn exports(&self) -> Vec<(String, String)> {
        self.root
            .vars()
            .filter(|(_, value)| match value {
                Value::List(values) => values.iter().all(Value::is_scalar),
                _ => true,
            })
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

impl Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bindings:")?;
        self.root.fmt_prefixed(f, "")
    }
}
