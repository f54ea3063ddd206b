use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
};

use serde::{Deserialize, Serialize};

/// A value stored in a [`Context`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Whether a conditional treats this value as true.
    ///
    /// `Null`, `false`, zero, the empty string and the empty list are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
        }
    }

    /// The natural text form of this value, borrowed when it already is text.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::String(s) => Cow::Borrowed(s.as_str()),
            Self::Null => Cow::Borrowed(""),
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::List(_) => {
                Cow::Owned(self.to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// An ordered chain of scopes. Lookups search the most recently pushed scope
/// first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    scopes: Vec<BTreeMap<String, Value>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            scopes: vec![BTreeMap::new()],
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a chain from scopes given oldest first.
    pub fn from_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<BTreeMap<String, Value>>,
    {
        let scopes: Vec<_> = scopes.into_iter().map(Into::into).collect();
        if scopes.is_empty() {
            return Self::default();
        }
        Self { scopes }
    }

    /// Inserts into the newest scope.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, name: K, value: V) -> &mut Self {
        if self.scopes.is_empty() {
            self.scopes.push(BTreeMap::new());
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value.into());
        }
        self
    }

    /// Opens a new, empty scope that shadows everything before it.
    pub fn push(&mut self) -> &mut Self {
        self.scopes.push(BTreeMap::new());
        self
    }

    /// Removes the newest scope. The last remaining scope is never removed.
    pub fn pop(&mut self) -> Option<BTreeMap<String, Value>> {
        if self.scopes.len() <= 1 {
            return None;
        }
        self.scopes.pop()
    }

    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<&Value> {
        let name = name.as_ref();
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn contains<T: AsRef<str>>(&self, name: T) -> bool {
        self.get(name).is_some()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Flattens the chain into a single mapping.
    ///
    /// Scopes are applied oldest to newest so that later scopes shadow earlier
    /// ones.
    pub fn resolve(&self) -> ResolvedContext<'_> {
        let mut vars = HashMap::new();
        for scope in &self.scopes {
            for (key, value) in scope {
                vars.insert(key.as_str(), Cow::Borrowed(value));
            }
        }
        ResolvedContext { vars }
    }
}

/// A flattened [`Context`], built once per render call.
#[derive(Debug, Clone, Default)]
pub struct ResolvedContext<'a> {
    vars: HashMap<&'a str, Cow<'a, Value>>,
}

impl<'a> ResolvedContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key).map(|value| &**value)
    }

    /// Renders `key` as text.
    ///
    /// Missing keys render as the empty string. String values are returned
    /// without copying.
    pub fn lookup(&self, key: &str) -> Cow<'_, str> {
        match self.get(key) {
            Some(value) => value.to_text(),
            None => Cow::Borrowed(""),
        }
    }

    /// Truthiness of `key`; missing keys are false.
    pub fn truthy(&self, key: &str) -> bool {
        self.get(key).is_some_and(Value::is_truthy)
    }

    /// A child scope with `name` bound to `value`.
    pub fn with(&self, name: &'a str, value: Cow<'a, Value>) -> Self {
        let mut scope = self.clone();
        scope.bind(name, value);
        scope
    }

    pub fn bind(&mut self, name: &'a str, value: Cow<'a, Value>) {
        self.vars.insert(name, value);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// `CompilateInterface` is the engine-level API: a registry of named,
/// compiled templates that can be rendered by name.
pub trait CompilateInterface {
    /// `add_template` compiles `content` and makes it available as `name`.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the template fails to parse or compile.
    fn add_template<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> crate::CompilateResult<()>;

    /// `render` renders a template with the given context.
    ///
    /// # Errors
    /// - If the template name is not found.
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
    ) -> crate::CompilateResult<String>;

    /// `contains` reports whether a template is registered under `name`.
    fn contains<N: AsRef<str>>(&self, template_name: N) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_newest_scope_shadows() {
        let mut context = Context::new();
        context.insert("x", "A");
        context.push().insert("x", "B");

        assert_eq!(context.get("x"), Some(&Value::from("B")));
        assert_eq!(context.resolve().lookup("x"), "B");

        context.pop();
        assert_eq!(context.resolve().lookup("x"), "A");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_from_scopes_is_oldest_first() {
        let oldest = BTreeMap::from([("x".to_string(), Value::from("A"))]);
        let newest = BTreeMap::from([
            ("x".to_string(), Value::from("B")),
            ("y".to_string(), Value::from(1)),
        ]);
        let context = Context::from_scopes([oldest, newest]);

        let resolved = context.resolve();
        assert_eq!(resolved.lookup("x"), "B");
        assert_eq!(resolved.lookup("y"), "1");
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_last_scope_is_never_popped() {
        let mut context = Context::new();
        assert!(context.pop().is_none());
        assert_eq!(context.depth(), 1);

        let mut empty = Context::from_scopes(Vec::<BTreeMap<String, Value>>::new());
        empty.insert("a", true);
        assert!(empty.contains("a"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookup_missing_is_empty() {
        let context = Context::new();
        assert_eq!(context.resolve().lookup("missing"), "");
        assert!(!context.resolve().truthy("missing"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookup_borrows_strings() {
        let mut context = Context::new();
        context.insert("name", "rebon").insert("count", 3);
        let resolved = context.resolve();

        assert!(matches!(resolved.lookup("name"), Cow::Borrowed("rebon")));
        assert!(matches!(resolved.lookup("count"), Cow::Owned(ref s) if s == "3"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_natural_text_forms() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(
            Value::from(vec!["Fluffy", "Whiskers", "Mittens"]).to_string(),
            "Fluffy, Whiskers, Mittens"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::from(vec![1]).is_truthy());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_with_binds_child_scope() {
        let mut context = Context::new();
        context.insert("x", "outer");
        let resolved = context.resolve();
        let item = Value::from("inner");
        let child = resolved.with("x", Cow::Borrowed(&item));

        assert_eq!(child.lookup("x"), "inner");
        assert_eq!(resolved.lookup("x"), "outer");
    }
}
