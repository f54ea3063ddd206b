//! Source text emitted for a compiled template.
//!
//! The compiler builds one expression per node with the helpers below and
//! [`render_entry`] wraps the top-level expression into a complete module.
//! Every expression is evaluated against the flattened context bound to `c`.

use crate::interface::Value;

pub const HEADER: &str = "// Automatically generated by compilate, do not edit.";
/// Version of the generated source format, checked when a module loads.
pub const FORMAT_VERSION: u32 = 1;

/// Name the flattened context is bound to inside `render`.
pub const CONTEXT_BINDING: &str = "c";
/// Name of the static holding deserialized fallback nodes.
pub const NODES_STATIC: &str = "NODES";

/// Quotes `s` as a string literal.
///
/// Only `\\`, `\"` and control characters are escaped; the loader reverses
/// exactly this set.
pub fn quote_str(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '\0' => quoted.push_str("\\0"),
            c if c.is_control() => {
                quoted.push_str(&format!("\\u{{{:x}}}", u32::from(c)));
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

pub fn empty() -> String {
    quote_str("")
}

/// An expression producing a literal value's natural text.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{:?}", f),
        Value::String(s) => quote_str(s),
        Value::Null | Value::Bool(_) | Value::Float(_) | Value::List(_) => {
            quote_str(&value.to_string())
        }
    }
}

pub fn lookup(key: &str) -> String {
    format!("lookup({}, {})", CONTEXT_BINDING, quote_str(key))
}

pub fn truthy(key: &str) -> String {
    format!("truthy({}, {})", CONTEXT_BINDING, quote_str(key))
}

pub fn constant_test(value: bool) -> String {
    value.to_string()
}

/// Joins the rendered text of `parts` with no separator.
pub fn concat(parts: &[String]) -> String {
    format!("[{}].concat()", parts.join(", "))
}

pub fn conditional(test: &str, if_true: &str, if_false: &str) -> String {
    format!("(if {} {{ {} }} else {{ {} }})", test, if_true, if_false)
}

/// Re-enters the fallback node at `index`.
pub fn fallback(index: usize) -> String {
    format!("{}[{}].render({})", NODES_STATIC, index, CONTEXT_BINDING)
}

/// Builds the complete module source.
///
/// `nodes` is the serialized fallback registry; when it is `None` the
/// deserialization prologue is left out entirely.
pub fn render_entry(expression: &str, nodes: Option<&str>) -> String {
    let prologue = nodes.map_or_else(String::new, |blob| {
        format!("static {NODES_STATIC} = load({blob});\n\n", blob = quote_str(blob))
    });

    format!(
        "{HEADER}
#![format = {FORMAT_VERSION}]

{prologue}extern fn lookup(c, key);
extern fn truthy(c, key);

fn render(chain) {{
    let {CONTEXT_BINDING} = flatten(chain);
    return {expression};
}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_quote_str() {
        assert_eq!(quote_str("Hello"), "\"Hello\"");
        assert_eq!(quote_str("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(quote_str("line\nnext\t"), "\"line\\nnext\\t\"");
        assert_eq!(quote_str("\u{7}"), "\"\\u{7}\"");
        assert_eq!(quote_str("héllo ✓"), "\"héllo ✓\"");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals() {
        assert_eq!(literal(&Value::Int(-3)), "-3");
        assert_eq!(literal(&Value::Float(1.0)), "1.0");
        assert_eq!(literal(&Value::from("x")), "\"x\"");
        assert_eq!(literal(&Value::Bool(true)), "\"true\"");
        assert_eq!(literal(&Value::Null), "\"\"");
        assert_eq!(literal(&Value::Float(f64::NAN)), "\"NaN\"");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_composition() {
        let expr = conditional(
            &truthy("cond"),
            &concat(&[quote_str("a"), lookup("b")]),
            &fallback(0),
        );
        assert_eq!(
            expr,
            r#"(if truthy(c, "cond") { ["a", lookup(c, "b")].concat() } else { NODES[0].render(c) })"#
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_entry_without_nodes_has_no_prologue() {
        let source = render_entry("\"Hello\"", None);
        assert!(source.starts_with(HEADER));
        assert!(!source.contains("NODES"));
        assert!(!source.contains("load("));
        assert!(source.contains("    return \"Hello\";\n"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_entry_with_nodes() {
        let source = render_entry("NODES[0].render(c)", Some("{\"nodes\":[]}"));
        assert!(source.contains("static NODES = load(\"{\\\"nodes\\\":[]}\");\n"));
        assert!(source.contains("let c = flatten(chain);"));
    }
}
