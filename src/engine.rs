use std::collections::HashMap;

use crate::{
    config::CompileOptions,
    error::{CompilateError, CompilateResult},
    interface::{CompilateInterface, Context},
    template::CompiledTemplate,
};

/// `CompilateEngine` is the primary implementation of the `CompilateInterface`
/// trait: a set of named templates, each compiled once when it is added.
///
/// # Examples
///
/// ```
/// use compilate::{CompilateEngine, CompilateInterface, Context};
///
/// // Create a new engine
/// let mut engine = CompilateEngine::new();
///
/// // Add a template
/// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
///
/// // Setup context
/// let mut context = Context::new();
/// context.insert("name", "World");
///
/// // Render template
/// let output = engine.render("greeting", Some(&context)).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
#[derive(Debug)]
pub struct CompilateEngine {
    templates: HashMap<String, CompiledTemplate>,
    options: CompileOptions,
}

impl CompilateEngine {
    /// Creates a new, empty `CompilateEngine` using default compile options.
    pub fn new() -> Self {
        Self::with_options(CompileOptions::default())
    }

    /// Creates an engine that compiles every template with `options`.
    pub fn with_options(options: CompileOptions) -> Self {
        Self {
            templates: HashMap::new(),
            options,
        }
    }

    pub const fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// The compiled template registered under `name`, if any.
    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&CompiledTemplate> {
        self.templates.get(name.as_ref())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for CompilateEngine {
    /// Creates a default `CompilateEngine` instance by calling `new()`.
    fn default() -> Self {
        Self::new()
    }
}

impl CompilateInterface for CompilateEngine {
    /// Compiles `content` and registers it under `name`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the template was successfully added
    /// * `Err(CompilateError::TemplateExists)` if a template with the given name already exists
    /// * `Err(CompilateError::Parse)` if the template content contains syntax errors
    /// * `Err(CompilateError::UnsupportedFeature)` if the template uses a construct the
    ///   compiler rejects
    ///
    /// # Examples
    ///
    /// ```
    /// use compilate::{CompilateEngine, CompilateInterface};
    ///
    /// let mut engine = CompilateEngine::new();
    /// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
    /// assert!(engine.add_template("greeting", "Hi").is_err());
    /// ```
    fn add_template<N: AsRef<str>, C: AsRef<str>>(
        &mut self,
        name: N,
        content: C,
    ) -> CompilateResult<()> {
        let name = name.as_ref();

        if self.templates.contains_key(name) {
            return Err(CompilateError::TemplateExists {
                template_name: name.to_string(),
            });
        }

        let template = CompiledTemplate::with_options(content.as_ref(), &self.options)?;
        tracing::debug!(
            template = name,
            fallback_nodes = template.fallback_count(),
            "added template"
        );
        self.templates.insert(name.to_string(), template);

        Ok(())
    }

    /// Renders the template registered under `template_name`.
    ///
    /// A missing context renders as if it were empty.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` containing the rendered template content
    /// * `Err(CompilateError::MissingTemplate)` if no template with the given name exists
    ///
    /// # Examples
    ///
    /// ```
    /// use compilate::{CompilateEngine, CompilateInterface, Context};
    ///
    /// let mut engine = CompilateEngine::new();
    /// engine.add_template("greeting", "Hello, {{ name }}!").unwrap();
    ///
    /// let mut context = Context::new();
    /// context.insert("name", "World");
    ///
    /// let output = engine.render("greeting", Some(&context)).unwrap();
    /// assert_eq!(output, "Hello, World!");
    /// assert_eq!(engine.render("greeting", None).unwrap(), "Hello, !");
    /// ```
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: Option<&Context>,
    ) -> CompilateResult<String> {
        let name = template_name.as_ref();
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| CompilateError::MissingTemplate {
                template_name: name.to_string(),
            })?;

        let default_context = Context::default();
        let context = context.unwrap_or(&default_context);

        Ok(template.render(context))
    }

    fn contains<N: AsRef<str>>(&self, template_name: N) -> bool {
        self.templates.contains_key(template_name.as_ref())
    }
}
