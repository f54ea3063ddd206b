use crate::{
    ast::{Node, Renderable},
    compiler::{Compiler, GeneratedSource},
    config::CompileOptions,
    error::CompilateResult,
    interface::Context,
    parser,
    toolchain::{self, Module},
};

/// A parsed template.
///
/// A `Template` can be rendered directly by walking its node tree, or turned
/// into a [`CompiledTemplate`] that renders through generated code.
///
/// # Example
///
/// ```rust
/// use compilate::{Context, Template};
///
/// let template = Template::parse("Hello, {{ name }}!").unwrap();
///
/// let mut context = Context::new();
/// context.insert("name", "World");
///
/// assert_eq!(template.render(&context), "Hello, World!");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodelist: Node,
}

impl Template {
    /// Parses `source` with default options.
    ///
    /// # Errors
    ///
    /// Returns a `CompilateError::Parse` error if the template syntax is invalid.
    pub fn parse(source: &str) -> CompilateResult<Self> {
        Self::parse_with(source, &CompileOptions::default())
    }

    /// Parses `source`, recording node origins when `options` enables debug
    /// mode.
    ///
    /// # Errors
    ///
    /// Returns a `CompilateError::Parse` error if the template syntax is invalid.
    pub fn parse_with(source: &str, options: &CompileOptions) -> CompilateResult<Self> {
        let nodelist = parser::parse(source, options.is_debug())?;
        Ok(Self { nodelist })
    }

    /// The root of the node tree.
    pub const fn nodelist(&self) -> &Node {
        &self.nodelist
    }

    /// Renders by walking the node tree.
    pub fn render(&self, context: &Context) -> String {
        let context = context.resolve();
        self.nodelist.render(&context)
    }

    /// Generates renderer source for this template without loading it.
    ///
    /// # Errors
    ///
    /// Returns `CompilateError::UnsupportedFeature` for constructs the compiler
    /// can neither translate nor defer.
    pub fn generate(&self) -> CompilateResult<GeneratedSource> {
        Compiler::new().compile(self)
    }
}

/// A template compiled to generated code and loaded through a
/// [`Toolchain`](crate::Toolchain).
///
/// Compiled templates are immutable after construction and may be rendered
/// concurrently from any number of threads.
///
/// # Example
///
/// ```rust
/// use compilate::{CompiledTemplate, Context};
///
/// let template = CompiledTemplate::new("{% if admin %}Admin{% else %}User{% endif %}").unwrap();
///
/// let mut context = Context::new();
/// context.insert("admin", true);
///
/// assert_eq!(template.render(&context), "Admin");
/// ```
#[derive(Debug)]
pub struct CompiledTemplate {
    module: Box<dyn Module>,
    source: String,
    fallback_count: usize,
}

impl CompiledTemplate {
    /// Parses and compiles `source` with default options.
    ///
    /// # Errors
    ///
    /// Parse errors, unsupported constructs, and toolchain failures.
    pub fn new(source: &str) -> CompilateResult<Self> {
        Self::with_options(source, &CompileOptions::default())
    }

    /// Parses and compiles `source` with `options`.
    ///
    /// # Errors
    ///
    /// Parse errors, unsupported constructs, and toolchain failures.
    pub fn with_options(source: &str, options: &CompileOptions) -> CompilateResult<Self> {
        let template = Template::parse_with(source, options)?;
        Self::from_template(&template, options)
    }

    /// Compiles an already parsed template.
    ///
    /// # Errors
    ///
    /// Unsupported constructs and toolchain failures.
    pub fn from_template(template: &Template, options: &CompileOptions) -> CompilateResult<Self> {
        let GeneratedSource {
            source,
            fallback_nodes,
        } = template.generate()?;
        let module = toolchain::stage_and_load(&source, options)?;
        tracing::debug!(fallback_nodes, "compiled template");
        Ok(Self {
            module,
            source,
            fallback_count: fallback_nodes,
        })
    }

    /// Renders against `context`. A missing variable renders as the empty
    /// string.
    pub fn render(&self, context: &Context) -> String {
        self.module.render(context)
    }

    /// The generated source this template was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// How many nodes render through the interpreter at run time.
    pub const fn fallback_count(&self) -> usize {
        self.fallback_count
    }
}

/// Compiles `source` with default options.
///
/// # Errors
///
/// Parse errors, unsupported constructs, and toolchain failures.
pub fn compile(source: &str) -> CompilateResult<CompiledTemplate> {
    CompiledTemplate::new(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::CompilateError, interface::Value};

    fn context(pairs: &[(&str, Value)]) -> Context {
        let mut context = Context::new();
        for (key, value) in pairs {
            context.insert(*key, value.clone());
        }
        context
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_render_simple() {
        let template = compile("Hello, {{ name }}!").unwrap();
        let ctx = context(&[("name", Value::from("World"))]);
        assert_eq!(template.render(&ctx), "Hello, World!");
        assert_eq!(template.fallback_count(), 0);
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_render_missing_variable() {
        let template = compile("[{{ missing }}]").unwrap();
        assert_eq!(template.render(&Context::new()), "[]");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_render_conditional() {
        let template = compile("{% if show %}shown{% else %}hidden{% endif %}").unwrap();
        assert_eq!(
            template.render(&context(&[("show", Value::from(true))])),
            "shown"
        );
        assert_eq!(
            template.render(&context(&[("show", Value::from(0))])),
            "hidden"
        );
        assert_eq!(template.render(&Context::new()), "hidden");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_render_for_loop_through_fallback() {
        let source = "Items:{% for item in items %} {{ item }}{% empty %} none{% endfor %}";
        let template = compile(source).unwrap();
        assert_eq!(template.fallback_count(), 1);

        let ctx = context(&[("items", Value::from(vec!["a", "b", "c"]))]);
        assert_eq!(template.render(&ctx), "Items: a b c");
        assert_eq!(template.render(&Context::new()), "Items: none");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_compiled_matches_interpreted() {
        let source = "{% with greeting=\"Hi\" %}{{ greeting }}{% endwith %}, {{ name }}{% if admin %} (admin){% endif %}{% templatetag openvariable %}";
        let ctx = context(&[("name", Value::from("Ann")), ("admin", Value::from(1))]);

        let template = Template::parse(source).unwrap();
        let compiled = CompiledTemplate::from_template(&template, &CompileOptions::new()).unwrap();
        assert_eq!(compiled.render(&ctx), template.render(&ctx));
        assert_eq!(compiled.render(&ctx), "Hi, Ann (admin){{");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_interpreted_filters_still_work() {
        let template = Template::parse("{{ name|upper }}").unwrap();
        let ctx = context(&[("name", Value::from("ann"))]);
        assert_eq!(template.render(&ctx), "ANN");

        let err = compile("{{ name|upper }}").unwrap_err();
        assert!(matches!(err, CompilateError::UnsupportedFeature(_)));
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_parse_error() {
        let err = compile("{% if x %}unterminated").unwrap_err();
        assert!(matches!(err, CompilateError::Parse(_)));
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_source_is_exposed() {
        let template = compile("Hello").unwrap();
        assert!(template.source().contains("return \"Hello\";"));
        assert!(template.source().starts_with(crate::codegen::HEADER));
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_debug_mode_renders_identically() {
        let source = "a{{ b }}{% if c %}d{% endif %}";
        let ctx = context(&[("b", Value::from("B")), ("c", Value::from("yes"))]);

        let options = CompileOptions::new().debug(true);
        let debug = CompiledTemplate::with_options(source, &options).unwrap();
        let plain = compile(source).unwrap();
        assert_eq!(debug.render(&ctx), plain.render(&ctx));
        assert_eq!(debug.render(&ctx), "aBd");
    }

    #[test]
    #[ntest::timeout(1000)]
    fn test_compiled_template_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledTemplate>();
    }
}
