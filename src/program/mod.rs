//! In-process loader for generated renderer source.
//!
//! The source is parsed once and lowered into a tree of closures. Rendering
//! never consults the source again: each closure appends its part of the
//! output directly to the buffer.

mod lexer;

use std::{fmt, sync::Arc};

use lexer::{Lexer, Token, TokenKind};

use crate::{
    ast::{Node, Renderable},
    codegen::FORMAT_VERSION,
    error::{ToolchainError, ToolchainErrorKind},
    interface::{Context, ResolvedContext, Value},
    registry,
    toolchain::Module,
};

/// Appends rendered text for one expression.
type Emit = Box<dyn Fn(&ResolvedContext<'_>, &mut String) + Send + Sync>;
type Test = Box<dyn Fn(&ResolvedContext<'_>) -> bool + Send + Sync>;

/// Helper functions a module may declare and call.
const HELPERS: &[&str] = &["lookup", "truthy"];

/// A module produced by [`load`].
pub struct LoadedModule {
    nodes: Option<Arc<[Node]>>,
    body: Emit,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("fallback_nodes", &self.fallback_nodes())
            .finish_non_exhaustive()
    }
}

impl LoadedModule {
    pub fn fallback_nodes(&self) -> usize {
        self.nodes.as_ref().map_or(0, |nodes| nodes.len())
    }
}

impl Module for LoadedModule {
    fn render(&self, chain: &Context) -> String {
        let context = chain.resolve();
        let mut output = String::new();
        (self.body)(&context, &mut output);
        output
    }
}

/// Parses and lowers `source`.
///
/// # Errors
/// Malformed source, an unsupported format version, references to names the
/// module never declared, and fallback node blobs that fail to load.
pub fn load(source: &str) -> Result<LoadedModule, ToolchainError> {
    let (tokens, end) = Lexer::new(source).tokenize()?;
    ProgramParser {
        tokens,
        pos: 0,
        end,
        scope: Scope::default(),
    }
    .parse_module()
}

/// Names declared so far, checked by every reference in the body.
#[derive(Default)]
struct Scope {
    helpers: Vec<String>,
    nodes: Option<(String, Arc<[Node]>)>,
    context: String,
}

struct ProgramParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Position reported for errors at end of input.
    end: (usize, usize),
    scope: Scope,
}

impl ProgramParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn position(&self) -> (usize, usize) {
        self.peek()
            .map_or(self.end, |token| (token.line, token.column))
    }

    fn error_at(&self, kind: ToolchainErrorKind) -> ToolchainError {
        let (line, column) = self.position();
        ToolchainError { line, column, kind }
    }

    fn unexpected(&self, expected: &str) -> ToolchainError {
        let found = self
            .peek()
            .map_or_else(|| "end of input".to_string(), |token| token.kind.to_string());
        self.error_at(ToolchainErrorKind::Syntax {
            expected: expected.to_string(),
            found,
        })
    }

    fn next_kind(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token.kind.clone())
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Punct(p), .. }) if *p == c)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(name), .. }) if name == keyword)
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ToolchainError> {
        if self.is_punct(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", c)))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ToolchainError> {
        if self.is_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", keyword)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ToolchainError> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Ident(_),
                ..
            }) => match self.next_kind() {
                Some(TokenKind::Ident(name)) => Ok(name),
                _ => Err(self.unexpected("identifier")),
            },
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn expect_str(&mut self) -> Result<String, ToolchainError> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Str(_),
                ..
            }) => match self.next_kind() {
                Some(TokenKind::Str(value)) => Ok(value),
                _ => Err(self.unexpected("string literal")),
            },
            _ => Err(self.unexpected("string literal")),
        }
    }

    fn expect_int(&mut self) -> Result<i64, ToolchainError> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Int(value),
                ..
            }) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected("integer")),
        }
    }

    /// `#![format = N]`, then the optional node static, the helper
    /// declarations and the `render` function, in that order.
    fn parse_module(mut self) -> Result<LoadedModule, ToolchainError> {
        self.parse_format()?;
        if self.is_keyword("static") {
            self.parse_static()?;
        }
        while self.is_keyword("extern") {
            self.parse_extern()?;
        }
        let body = self.parse_render()?;
        if self.peek().is_some() {
            return Err(self.unexpected("end of input"));
        }
        Ok(LoadedModule {
            nodes: self.scope.nodes.map(|(_, nodes)| nodes),
            body,
        })
    }

    fn parse_format(&mut self) -> Result<(), ToolchainError> {
        self.expect_punct('#')?;
        self.expect_punct('!')?;
        self.expect_punct('[')?;
        self.expect_keyword("format")?;
        self.expect_punct('=')?;
        let version_at = self.pos;
        let version = self.expect_int()?;
        if version != i64::from(FORMAT_VERSION) {
            self.pos = version_at;
            return Err(self.error_at(ToolchainErrorKind::FormatVersion {
                expected: FORMAT_VERSION,
                found: version,
            }));
        }
        self.expect_punct(']')
    }

    /// `static NAME = load("<blob>");`
    fn parse_static(&mut self) -> Result<(), ToolchainError> {
        self.expect_keyword("static")?;
        let name = self.expect_ident()?;
        self.expect_punct('=')?;
        self.expect_keyword("load")?;
        self.expect_punct('(')?;
        let (line, column) = self.position();
        let blob = self.expect_str()?;
        let nodes = registry::load_blob(&blob).map_err(|e| ToolchainError {
            line,
            column,
            kind: e.kind,
        })?;
        self.expect_punct(')')?;
        self.expect_punct(';')?;
        self.scope.nodes = Some((name, nodes.into()));
        Ok(())
    }

    /// `extern fn NAME(PARAMS);`
    fn parse_extern(&mut self) -> Result<(), ToolchainError> {
        self.expect_keyword("extern")?;
        self.expect_keyword("fn")?;
        let name_at = self.pos;
        let name = self.expect_ident()?;
        if !HELPERS.contains(&name.as_str()) {
            self.pos = name_at;
            return Err(self.error_at(ToolchainErrorKind::UnresolvedExternal { name }));
        }
        self.expect_punct('(')?;
        while !self.is_punct(')') {
            self.expect_ident()?;
            if !self.is_punct(')') {
                self.expect_punct(',')?;
            }
        }
        self.expect_punct(')')?;
        self.expect_punct(';')?;
        self.scope.helpers.push(name);
        Ok(())
    }

    /// `fn render(CHAIN) { let C = flatten(CHAIN); return TEXT; }`
    fn parse_render(&mut self) -> Result<Emit, ToolchainError> {
        self.expect_keyword("fn")?;
        self.expect_keyword("render")?;
        self.expect_punct('(')?;
        let chain = self.expect_ident()?;
        self.expect_punct(')')?;
        self.expect_punct('{')?;

        self.expect_keyword("let")?;
        self.scope.context = self.expect_ident()?;
        self.expect_punct('=')?;
        self.expect_keyword("flatten")?;
        self.expect_punct('(')?;
        self.expect_binding(&chain)?;
        self.expect_punct(')')?;
        self.expect_punct(';')?;

        self.expect_keyword("return")?;
        let body = self.parse_text()?;
        self.expect_punct(';')?;
        self.expect_punct('}')?;
        Ok(body)
    }

    /// An identifier that must name `expected`.
    fn expect_binding(&mut self, expected: &str) -> Result<(), ToolchainError> {
        let at = self.pos;
        let name = self.expect_ident()?;
        if name == expected {
            Ok(())
        } else {
            self.pos = at;
            Err(self.error_at(ToolchainErrorKind::UnknownBinding { name }))
        }
    }

    /// `HELPER(C, "key")`, returning the key.
    fn parse_helper_call(&mut self, helper: &str) -> Result<String, ToolchainError> {
        if !self.scope.helpers.iter().any(|declared| declared == helper) {
            return Err(self.error_at(ToolchainErrorKind::UndeclaredFunction {
                name: helper.to_string(),
            }));
        }
        self.expect_keyword(helper)?;
        self.expect_punct('(')?;
        let context = self.scope.context.clone();
        self.expect_binding(&context)?;
        self.expect_punct(',')?;
        let key = self.expect_str()?;
        self.expect_punct(')')?;
        Ok(key)
    }

    fn parse_text(&mut self) -> Result<Emit, ToolchainError> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected("expression"));
        };
        match &token.kind {
            TokenKind::Str(_) => {
                let text = self.expect_str()?;
                Ok(constant(text))
            }
            TokenKind::Int(i) => {
                let text = Value::Int(*i).to_string();
                self.pos += 1;
                Ok(constant(text))
            }
            TokenKind::Float(x) => {
                let text = Value::Float(*x).to_string();
                self.pos += 1;
                Ok(constant(text))
            }
            TokenKind::Punct('[') => self.parse_concat(),
            TokenKind::Punct('(') => self.parse_conditional(),
            TokenKind::Ident(name) if name == "lookup" => {
                let key = self.parse_helper_call("lookup")?;
                Ok(Box::new(
                    move |context: &ResolvedContext<'_>, output: &mut String| {
                        output.push_str(&context.lookup(&key));
                    },
                ))
            }
            TokenKind::Ident(name) if HELPERS.contains(&name.as_str()) => {
                Err(self.unexpected("text expression"))
            }
            TokenKind::Ident(_) => self.parse_fallback(),
            TokenKind::Punct(_) => Err(self.unexpected("expression")),
        }
    }

    /// `[TEXT, ...].concat()`
    fn parse_concat(&mut self) -> Result<Emit, ToolchainError> {
        self.expect_punct('[')?;
        let mut parts = Vec::new();
        while !self.is_punct(']') {
            parts.push(self.parse_text()?);
            if !self.is_punct(']') {
                self.expect_punct(',')?;
            }
        }
        self.expect_punct(']')?;
        self.expect_punct('.')?;
        self.expect_keyword("concat")?;
        self.expect_punct('(')?;
        self.expect_punct(')')?;
        Ok(Box::new(
            move |context: &ResolvedContext<'_>, output: &mut String| {
                for part in &parts {
                    part(context, output);
                }
            },
        ))
    }

    /// `(if TEST { TEXT } else { TEXT })`
    fn parse_conditional(&mut self) -> Result<Emit, ToolchainError> {
        self.expect_punct('(')?;
        self.expect_keyword("if")?;
        let test = self.parse_test()?;
        self.expect_punct('{')?;
        let if_true = self.parse_text()?;
        self.expect_punct('}')?;
        self.expect_keyword("else")?;
        self.expect_punct('{')?;
        let if_false = self.parse_text()?;
        self.expect_punct('}')?;
        self.expect_punct(')')?;
        Ok(Box::new(
            move |context: &ResolvedContext<'_>, output: &mut String| {
                if test(context) {
                    if_true(context, output);
                } else {
                    if_false(context, output);
                }
            },
        ))
    }

    fn parse_test(&mut self) -> Result<Test, ToolchainError> {
        if self.is_keyword("true") || self.is_keyword("false") {
            let value = self.is_keyword("true");
            self.pos += 1;
            return Ok(Box::new(move |_: &ResolvedContext<'_>| value));
        }
        if self.is_keyword("truthy") {
            let key = self.parse_helper_call("truthy")?;
            return Ok(Box::new(move |context: &ResolvedContext<'_>| {
                context.truthy(&key)
            }));
        }
        Err(self.unexpected("condition"))
    }

    /// `NODES[i].render(C)`
    fn parse_fallback(&mut self) -> Result<Emit, ToolchainError> {
        let at = self.pos;
        let name = self.expect_ident()?;
        let nodes = match &self.scope.nodes {
            Some((declared, nodes)) if *declared == name => Arc::clone(nodes),
            Some(_) => {
                self.pos = at;
                return Err(self.error_at(ToolchainErrorKind::UnknownBinding { name }));
            }
            None => {
                self.pos = at;
                return Err(self.error_at(ToolchainErrorKind::MissingNodes));
            }
        };

        self.expect_punct('[')?;
        let index_at = self.pos;
        let index = self.expect_int()?;
        let Some(index) = usize::try_from(index).ok().filter(|i| *i < nodes.len()) else {
            self.pos = index_at;
            return Err(self.error_at(ToolchainErrorKind::NodeIndexOutOfRange {
                index,
                len: nodes.len(),
            }));
        };
        self.expect_punct(']')?;
        self.expect_punct('.')?;
        self.expect_keyword("render")?;
        self.expect_punct('(')?;
        let context = self.scope.context.clone();
        self.expect_binding(&context)?;
        self.expect_punct(')')?;

        Ok(Box::new(
            move |context: &ResolvedContext<'_>, output: &mut String| {
                if let Some(node) = nodes.get(index) {
                    node.render_into(context, output);
                }
            },
        ))
    }
}

fn constant(text: String) -> Emit {
    Box::new(move |_: &ResolvedContext<'_>, output: &mut String| {
        output.push_str(&text);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{TemplateTag, TemplateTagNode},
        codegen,
        registry::FallbackRegistry,
    };

    fn render(source: &str, context: &Context) -> String {
        load(source).unwrap().render(context)
    }

    fn node_blob(nodes: &[Node]) -> String {
        let mut registry = FallbackRegistry::new();
        for node in nodes {
            registry.register(node);
        }
        registry.to_blob().unwrap().unwrap()
    }

    fn brace() -> Node {
        Node::TemplateTag(TemplateTagNode {
            tag: TemplateTag::OpenBrace,
        })
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_text_and_lookup() {
        let mut context = Context::new();
        context.insert("name", "World").insert("n", 3);

        let source = codegen::render_entry(
            &codegen::concat(&[
                codegen::quote_str("Hello "),
                codegen::lookup("name"),
                codegen::quote_str(" #"),
                codegen::lookup("n"),
                codegen::lookup("missing"),
            ]),
            None,
        );
        assert_eq!(render(&source, &context), "Hello World #3");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_numeric_literals_render_naturally() {
        let source = codegen::render_entry(
            &codegen::concat(&[
                codegen::literal(&Value::Int(-4)),
                codegen::quote_str(" "),
                codegen::literal(&Value::Float(2.0)),
                codegen::quote_str(" "),
                codegen::literal(&Value::Float(0.25)),
            ]),
            None,
        );
        assert_eq!(render(&source, &Context::new()), "-4 2 0.25");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_conditionals() {
        let expr = codegen::concat(&[
            codegen::conditional(&codegen::truthy("flag"), "\"T\"", "\"F\""),
            codegen::conditional(&codegen::constant_test(false), "\"t\"", "\"f\""),
        ]);
        let module = load(&codegen::render_entry(&expr, None)).unwrap();

        let mut context = Context::new();
        assert_eq!(module.render(&context), "Ff");
        context.insert("flag", "yes");
        assert_eq!(module.render(&context), "Tf");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_fallback_nodes() {
        let nodes = [brace()];
        let source = codegen::render_entry(
            &codegen::concat(&[codegen::fallback(0), codegen::fallback(0)]),
            Some(&node_blob(&nodes)),
        );
        let module = load(&source).unwrap();
        assert_eq!(module.fallback_nodes(), 1);
        assert_eq!(module.render(&Context::new()), "{{");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_format_version_checked() {
        let source = codegen::render_entry("\"x\"", None).replace("format = 1", "format = 2");
        let err = load(&source).unwrap_err();
        assert_eq!(
            err.kind,
            ToolchainErrorKind::FormatVersion {
                expected: 1,
                found: 2
            }
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_unresolved_external() {
        let source = codegen::render_entry("\"x\"", None).replace("fn truthy", "fn system");
        let err = load(&source).unwrap_err();
        assert_eq!(
            err.kind,
            ToolchainErrorKind::UnresolvedExternal {
                name: "system".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_undeclared_helper() {
        let source = codegen::render_entry(&codegen::truthy("x"), None)
            .replace("extern fn lookup(c, key);\n", "");
        let err = load(&source).unwrap_err();
        assert!(matches!(err.kind, ToolchainErrorKind::Syntax { .. }));

        let source = codegen::render_entry(&codegen::lookup("x"), None)
            .replace("extern fn lookup(c, key);\n", "");
        let err = load(&source).unwrap_err();
        assert_eq!(
            err.kind,
            ToolchainErrorKind::UndeclaredFunction {
                name: "lookup".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_unknown_binding() {
        let err = load(&codegen::render_entry("lookup(ctx, \"x\")", None)).unwrap_err();
        assert_eq!(
            err.kind,
            ToolchainErrorKind::UnknownBinding {
                name: "ctx".to_string()
            }
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_missing_nodes() {
        let err = load(&codegen::render_entry(&codegen::fallback(0), None)).unwrap_err();
        assert_eq!(err.kind, ToolchainErrorKind::MissingNodes);
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_node_index_out_of_range() {
        let nodes = [brace()];
        let source = codegen::render_entry(&codegen::fallback(1), Some(&node_blob(&nodes)));
        let err = load(&source).unwrap_err();
        assert_eq!(
            err.kind,
            ToolchainErrorKind::NodeIndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_invalid_blob() {
        let source = codegen::render_entry(&codegen::fallback(0), Some("{}"));
        let err = load(&source).unwrap_err();
        assert!(matches!(err.kind, ToolchainErrorKind::InvalidNodes(_)));
        assert_eq!(err.line, 4);
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_syntax_error_position() {
        let source = codegen::render_entry("[\"a\" \"b\"].concat()", None);
        let err = load(&source).unwrap_err();
        assert!(matches!(
            err.kind,
            ToolchainErrorKind::Syntax { ref expected, ref found }
                if expected == "','" && found == "string literal"
        ));
        assert_eq!(err.line, 9);

        let err = load("#![format = 1]").unwrap_err();
        assert!(matches!(
            err.kind,
            ToolchainErrorKind::Syntax { ref found, .. } if found == "end of input"
        ));
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_module_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoadedModule>();
    }
}
