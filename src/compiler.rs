use crate::{
    ast::{FilterExpression, IfNode, Node, NodeList, Operand, TextNode, VariableNode},
    codegen,
    error::{CompilateResult, UnsupportedFeature},
    registry::FallbackRegistry,
    template::Template,
};

/// Output of compiling one template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    /// The complete module source.
    pub source: String,
    /// Number of nodes deferred to run time.
    pub fallback_nodes: usize,
}

/// Translates a template AST into renderer source.
///
/// Nodes with a translation become expressions directly. Any other node is
/// added to the [`FallbackRegistry`] and re-entered at render time through
/// its [`Renderable`](crate::Renderable) implementation.
///
/// A compiler is single-use: it owns the registry for exactly one template.
#[derive(Debug, Default)]
pub struct Compiler<'n> {
    registry: FallbackRegistry<'n>,
}

impl<'n> Compiler<'n> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &FallbackRegistry<'n> {
        &self.registry
    }

    /// Compiles `template` into a complete module.
    ///
    /// # Errors
    /// Returns [`CompilateError::UnsupportedFeature`](crate::CompilateError::UnsupportedFeature)
    /// if a filter or a multi-condition/negated `if` is used anywhere.
    pub fn compile(mut self, template: &'n Template) -> CompilateResult<GeneratedSource> {
        let source = self.visit_template(template)?;
        let fallback_nodes = self.registry.len();
        tracing::debug!(
            fallback_nodes,
            source_len = source.len(),
            "generated renderer source"
        );
        Ok(GeneratedSource {
            source,
            fallback_nodes,
        })
    }

    fn visit_template(&mut self, template: &'n Template) -> CompilateResult<String> {
        let value = self.visit(template.nodelist())?;
        let nodes = self.registry.to_blob()?;
        Ok(codegen::render_entry(&value, nodes.as_deref()))
    }

    /// Returns an expression computing `node`'s rendered text.
    pub fn visit(&mut self, node: &'n Node) -> CompilateResult<String> {
        match node {
            Node::List(list) => self.visit_node_list(list),
            Node::DebugList(list) => self.visit_node_list(&list.nodes),
            Node::Text(text) => Ok(Self::visit_text(text)),
            Node::Variable(variable) => Self::visit_variable(variable),
            Node::DebugVariable(variable) => Self::visit_variable(&variable.node),
            Node::If(if_node) => self.visit_if(if_node),
            Node::Comment(_) => Ok(codegen::empty()),
            Node::For(_) | Node::With(_) | Node::TemplateTag(_) => Ok(self.visit_fallback(node)),
        }
    }

    fn visit_fallback(&mut self, node: &'n Node) -> String {
        let index = self.registry.register(node);
        codegen::fallback(index)
    }

    fn visit_node_list(&mut self, list: &'n NodeList) -> CompilateResult<String> {
        match list.nodes.as_slice() {
            [] => Ok(codegen::empty()),
            [only] => self.visit(only),
            nodes => {
                let parts = nodes
                    .iter()
                    .map(|node| self.visit(node))
                    .collect::<CompilateResult<Vec<_>>>()?;
                Ok(codegen::concat(&parts))
            }
        }
    }

    fn visit_text(text: &TextNode) -> String {
        codegen::quote_str(&text.text)
    }

    fn visit_variable(variable: &VariableNode) -> CompilateResult<String> {
        Self::visit_filter_expression(&variable.filter_expression)
    }

    fn visit_filter_expression(expr: &FilterExpression) -> CompilateResult<String> {
        Self::ensure_no_filters(expr)?;
        Ok(match &expr.var {
            Operand::Literal(value) => codegen::literal(value),
            Operand::Lookup(key) => codegen::lookup(key),
        })
    }

    /// Like [`Self::visit_filter_expression`], but producing a truth test.
    fn visit_test(expr: &FilterExpression) -> CompilateResult<String> {
        Self::ensure_no_filters(expr)?;
        Ok(match &expr.var {
            Operand::Literal(value) => codegen::constant_test(value.is_truthy()),
            Operand::Lookup(key) => codegen::truthy(key),
        })
    }

    fn ensure_no_filters(expr: &FilterExpression) -> CompilateResult<()> {
        if expr.filters.is_empty() {
            Ok(())
        } else {
            Err(UnsupportedFeature::Filters {
                token: expr.token.clone(),
                count: expr.filters.len(),
            }
            .into())
        }
    }

    fn visit_if(&mut self, node: &'n IfNode) -> CompilateResult<String> {
        let [bool_expr] = node.bool_exprs.as_slice() else {
            return Err(UnsupportedFeature::MultipleConditions {
                count: node.bool_exprs.len(),
            }
            .into());
        };
        if bool_expr.negated {
            return Err(UnsupportedFeature::NegatedCondition {
                token: bool_expr.expr.token.clone(),
            }
            .into());
        }

        let test = Self::visit_test(&bool_expr.expr)?;
        let if_true = self.visit(&node.nodelist_true)?;
        let if_false = self.visit(&node.nodelist_false)?;
        Ok(codegen::conditional(&test, &if_true, &if_false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompilateError;

    fn compile_expr(source: &str) -> CompilateResult<(String, usize)> {
        let template = Template::parse(source)?;
        let mut compiler = Compiler::new();
        let expr = compiler.visit(template.nodelist())?;
        Ok((expr, compiler.registry().len()))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text() {
        assert_eq!(compile_expr("Hello").unwrap(), ("\"Hello\"".to_string(), 0));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_list() {
        assert_eq!(compile_expr("").unwrap().0, "\"\"");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_variable_and_join() {
        assert_eq!(
            compile_expr("Hello {{ name }}").unwrap().0,
            r#"["Hello ", lookup(c, "name")].concat()"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literal_variable() {
        assert_eq!(compile_expr("{{ 42 }}").unwrap().0, "42");
        assert_eq!(compile_expr("{{ \"hi\" }}").unwrap().0, "\"hi\"");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment_is_empty() {
        assert_eq!(
            compile_expr("a{% comment %}foo{% endcomment %}").unwrap().0,
            r#"["a", ""].concat()"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if() {
        assert_eq!(
            compile_expr("{% if cond %}T{% else %}F{% endif %}").unwrap().0,
            r#"(if truthy(c, "cond") { "T" } else { "F" })"#
        );
        assert_eq!(
            compile_expr("{% if 0 %}T{% endif %}").unwrap().0,
            r#"(if false { "T" } else { "" })"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_debug_variants_alias() {
        let template = Template::parse_with(
            "a{{ b }}",
            &crate::CompileOptions::new().debug(true),
        )
        .unwrap();
        assert!(matches!(template.nodelist(), Node::DebugList(_)));

        let mut compiler = Compiler::new();
        assert_eq!(
            compiler.visit(template.nodelist()).unwrap(),
            r#"["a", lookup(c, "b")].concat()"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_fallback_indices_in_visit_order() {
        let (expr, count) = compile_expr(
            "{% templatetag openbrace %}{% if x %}{% for i in xs %}{{ i }}{% endfor %}{% endif %}{% with a=b %}{% endwith %}",
        )
        .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            expr,
            r#"[NODES[0].render(c), (if truthy(c, "x") { NODES[1].render(c) } else { "" }), NODES[2].render(c)].concat()"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_filters_rejected() {
        let err = compile_expr("{{ name|upper }}").unwrap_err();
        assert!(matches!(
            err,
            CompilateError::UnsupportedFeature(UnsupportedFeature::Filters { count: 1, .. })
        ));

        let err = compile_expr("{% if name|length %}x{% endif %}").unwrap_err();
        assert!(matches!(
            err,
            CompilateError::UnsupportedFeature(UnsupportedFeature::Filters { .. })
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_conditions_rejected() {
        let err = compile_expr("{% if a and b %}x{% endif %}").unwrap_err();
        assert!(matches!(
            err,
            CompilateError::UnsupportedFeature(UnsupportedFeature::MultipleConditions { count: 2 })
        ));

        let err = compile_expr("{% if not a %}x{% endif %}").unwrap_err();
        assert!(matches!(
            err,
            CompilateError::UnsupportedFeature(UnsupportedFeature::NegatedCondition { ref token })
                if token == "a"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unsupported_inside_fallback_is_deferred() {
        // The for loop is never translated, so its body is never inspected.
        let (expr, count) = compile_expr("{% for i in xs %}{{ i|upper }}{% endfor %}").unwrap();
        assert_eq!((expr.as_str(), count), ("NODES[0].render(c)", 1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_compile_wraps_entry() {
        let template = Template::parse("Hello").unwrap();
        let generated = Compiler::new().compile(&template).unwrap();
        assert_eq!(generated.fallback_nodes, 0);
        assert!(generated.source.contains("return \"Hello\";"));
        assert!(!generated.source.contains("static NODES"));

        let template = Template::parse("{% templatetag openblock %}").unwrap();
        let generated = Compiler::new().compile(&template).unwrap();
        assert_eq!(generated.fallback_nodes, 1);
        assert!(generated.source.contains("static NODES = load("));
    }
}
