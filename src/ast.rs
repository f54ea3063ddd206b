use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::interface::{ResolvedContext, Value};

/// Anything that can render itself against a flattened context.
///
/// Every node implements this, which is what lets the compiler defer a node it
/// has no translation for: the node is serialized into the generated module and
/// rendered through this trait at run time.
pub trait Renderable {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String);

    fn render<'a>(&'a self, context: &ResolvedContext<'a>) -> String {
        let mut output = String::new();
        self.render_into(context, &mut output);
        output
    }
}

/// Position of a node in the template source (1-indexed).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Text(TextNode),
    Variable(VariableNode),
    DebugVariable(DebugVariableNode),
    If(IfNode),
    Comment(CommentNode),
    List(NodeList),
    DebugList(DebugNodeList),
    For(ForNode),
    With(WithNode),
    TemplateTag(TemplateTagNode),
}

impl Node {
    /// The node's type name, as used in diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "TextNode",
            Self::Variable(_) => "VariableNode",
            Self::DebugVariable(_) => "DebugVariableNode",
            Self::If(_) => "IfNode",
            Self::Comment(_) => "CommentNode",
            Self::List(_) => "NodeList",
            Self::DebugList(_) => "DebugNodeList",
            Self::For(_) => "ForNode",
            Self::With(_) => "WithNode",
            Self::TemplateTag(_) => "TemplateTagNode",
        }
    }

    pub fn list(nodes: Vec<Node>) -> Self {
        Self::List(NodeList { nodes })
    }
}

impl Renderable for Node {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        match self {
            Self::Text(node) => node.render_into(context, output),
            Self::Variable(node) => node.render_into(context, output),
            Self::DebugVariable(node) => node.node.render_into(context, output),
            Self::If(node) => node.render_into(context, output),
            Self::Comment(_) => {}
            Self::List(node) => node.render_into(context, output),
            Self::DebugList(node) => node.nodes.render_into(context, output),
            Self::For(node) => node.render_into(context, output),
            Self::With(node) => node.render_into(context, output),
            Self::TemplateTag(node) => output.push_str(node.tag.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
}

impl Renderable for TextNode {
    fn render_into<'a>(&'a self, _context: &ResolvedContext<'a>, output: &mut String) {
        output.push_str(&self.text);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableNode {
    pub filter_expression: FilterExpression,
}

impl Renderable for VariableNode {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        if let Some(value) = self.filter_expression.resolve(context) {
            output.push_str(&value.to_text());
        }
    }
}

/// A [`VariableNode`] produced in debug mode, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugVariableNode {
    pub node: VariableNode,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeList {
    pub nodes: Vec<Node>,
}

impl NodeList {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }
}

impl Renderable for NodeList {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        for node in &self.nodes {
            node.render_into(context, output);
        }
    }
}

/// A [`NodeList`] produced in debug mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugNodeList {
    pub nodes: NodeList,
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentNode {
    pub text: String,
}

/// The subject of a [`FilterExpression`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A key looked up in the context, e.g. `user.name`.
    Lookup(String),
    /// A literal written in the template, e.g. `"text"` or `42`.
    Literal(Value),
}

impl Operand {
    pub fn resolve<'c>(&'c self, context: &'c ResolvedContext<'c>) -> Option<Cow<'c, Value>> {
        match self {
            Self::Lookup(key) => context.get(key).map(Cow::Borrowed),
            Self::Literal(value) => Some(Cow::Borrowed(value)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterKind {
    Upper,
    Lower,
    Length,
    Default,
}

impl FilterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "upper" => Some(Self::Upper),
            "lower" => Some(Self::Lower),
            "length" => Some(Self::Length),
            "default" => Some(Self::Default),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Length => "length",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub kind: FilterKind,
    pub arg: Option<Operand>,
}

impl Filter {
    fn apply<'c>(
        &'c self,
        value: Option<Cow<'c, Value>>,
        context: &'c ResolvedContext<'c>,
    ) -> Option<Cow<'c, Value>> {
        let text = |value: &Option<Cow<'c, Value>>| {
            value
                .as_ref()
                .map_or_else(String::new, |v| v.to_text().into_owned())
        };

        match self.kind {
            FilterKind::Upper => Some(Cow::Owned(Value::String(text(&value).to_uppercase()))),
            FilterKind::Lower => Some(Cow::Owned(Value::String(text(&value).to_lowercase()))),
            FilterKind::Length => {
                let len = match value.as_deref() {
                    Some(Value::List(items)) => items.len(),
                    Some(other) => other.to_text().chars().count(),
                    None => 0,
                };
                Some(Cow::Owned(Value::Int(
                    i64::try_from(len).unwrap_or(i64::MAX),
                )))
            }
            FilterKind::Default => {
                if value.as_deref().is_some_and(Value::is_truthy) {
                    value
                } else {
                    self.arg.as_ref().and_then(|arg| arg.resolve(context))
                }
            }
        }
    }
}

/// A value to interpolate or test, optionally piped through filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpression {
    /// The expression as written in the template.
    pub token: String,
    pub var: Operand,
    pub filters: Vec<Filter>,
}

impl FilterExpression {
    pub fn lookup<T: Into<String>>(key: T) -> Self {
        let key = key.into();
        Self {
            token: key.clone(),
            var: Operand::Lookup(key),
            filters: Vec::new(),
        }
    }

    pub fn resolve<'c>(&'c self, context: &'c ResolvedContext<'c>) -> Option<Cow<'c, Value>> {
        self.filters
            .iter()
            .fold(self.var.resolve(context), |value, filter| {
                filter.apply(value, context)
            })
    }

    pub fn is_truthy(&self, context: &ResolvedContext<'_>) -> bool {
        self.resolve(context).is_some_and(|value| value.is_truthy())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolExpr {
    pub negated: bool,
    pub expr: FilterExpression,
}

impl BoolExpr {
    pub fn evaluate(&self, context: &ResolvedContext<'_>) -> bool {
        self.expr.is_truthy(context) != self.negated
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub bool_exprs: Vec<BoolExpr>,
    pub link: Link,
    pub nodelist_true: Box<Node>,
    pub nodelist_false: Box<Node>,
}

impl IfNode {
    pub fn test(&self, context: &ResolvedContext<'_>) -> bool {
        let mut results = self.bool_exprs.iter().map(|expr| expr.evaluate(context));
        match self.link {
            Link::And => results.all(|result| result),
            Link::Or => results.any(|result| result),
        }
    }
}

impl Renderable for IfNode {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        if self.test(context) {
            self.nodelist_true.render_into(context, output);
        } else {
            self.nodelist_false.render_into(context, output);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForNode {
    pub loopvar: String,
    pub sequence: FilterExpression,
    pub is_reversed: bool,
    pub nodelist_loop: Box<Node>,
    pub nodelist_empty: Box<Node>,
}

impl Renderable for ForNode {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        let mut items: Vec<Cow<'_, Value>> = match self.sequence.resolve(context) {
            Some(Cow::Borrowed(Value::List(items))) => items.iter().map(Cow::Borrowed).collect(),
            Some(Cow::Owned(Value::List(items))) => items.into_iter().map(Cow::Owned).collect(),
            Some(Cow::Borrowed(Value::Null) | Cow::Owned(Value::Null)) | None => Vec::new(),
            Some(item) => vec![item],
        };

        if items.is_empty() {
            self.nodelist_empty.render_into(context, output);
            return;
        }

        if self.is_reversed {
            items.reverse();
        }

        for item in items {
            let scope = context.with(&self.loopvar, item);
            self.nodelist_loop.render_into(&scope, output);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithNode {
    pub extra_context: Vec<(String, FilterExpression)>,
    pub nodelist: Box<Node>,
}

impl Renderable for WithNode {
    fn render_into<'a>(&'a self, context: &ResolvedContext<'a>, output: &mut String) {
        let mut scope: ResolvedContext<'_> = context.clone();
        for (name, expr) in &self.extra_context {
            let value = expr
                .resolve(context)
                .unwrap_or(Cow::Owned(Value::Null));
            scope.bind(name, value);
        }
        self.nodelist.render_into(&scope, output);
    }
}

/// Delimiters that cannot otherwise be written literally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateTag {
    OpenBlock,
    CloseBlock,
    OpenVariable,
    CloseVariable,
    OpenBrace,
    CloseBrace,
    OpenComment,
    CloseComment,
}

impl TemplateTag {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openblock" => Some(Self::OpenBlock),
            "closeblock" => Some(Self::CloseBlock),
            "openvariable" => Some(Self::OpenVariable),
            "closevariable" => Some(Self::CloseVariable),
            "openbrace" => Some(Self::OpenBrace),
            "closebrace" => Some(Self::CloseBrace),
            "opencomment" => Some(Self::OpenComment),
            "closecomment" => Some(Self::CloseComment),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenBlock => "{%",
            Self::CloseBlock => "%}",
            Self::OpenVariable => "{{",
            Self::CloseVariable => "}}",
            Self::OpenBrace => "{",
            Self::CloseBrace => "}",
            Self::OpenComment => "{#",
            Self::CloseComment => "#}",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateTagNode {
    pub tag: TemplateTag,
}
