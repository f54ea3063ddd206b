use crate::{
    ast::{
        BoolExpr, CommentNode, DebugNodeList, DebugVariableNode, Filter, FilterExpression,
        FilterKind, ForNode, IfNode, Link, Node, NodeList, Operand, Origin, TemplateTag,
        TemplateTagNode, TextNode, VariableNode, WithNode,
    },
    error::{ParseError, ParseErrorKind},
    interface::Value,
};

type ParseResult<T> = Result<T, ParseError>;

/// Deepest nesting of `if`/`for`/`with` blocks a template may use.
///
/// Deferred nodes are serialized into the generated module and read back
/// with `serde_json`, which stops at 128 levels. A block costs at most six
/// levels in debug mode, so sixteen blocks plus the envelope and the deepest
/// filter expression stay well inside that.
pub const MAX_BLOCK_DEPTH: usize = 16;

#[derive(Clone, Copy)]
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// The starting location of the current line
    line_start_pos: usize,
    /// Emit debug node variants carrying their origin.
    debug: bool,
    /// Number of enclosing block tags.
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, debug: bool) -> Self {
        Parser {
            input,
            pos: 0,
            line: 1,
            line_start_pos: 0,
            debug,
            depth: 0,
        }
    }

    #[inline]
    fn current_column(&self) -> usize {
        self.pos - self.line_start_pos + 1
    }

    #[inline]
    fn origin(&self) -> Origin {
        Origin {
            line: self.line,
            column: self.current_column(),
        }
    }

    #[inline]
    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError {
            line: self.line,
            column: self.current_column(),
            kind,
        }
    }

    #[inline]
    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    #[inline]
    fn current_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Advances the parser position past `current_char`, updating line and
    /// column numbers if it is a newline.
    #[inline]
    fn advance_by_char(&mut self, current_char: char) {
        let char_len = current_char.len_utf8();
        if current_char == '\n' {
            self.line += 1;
            self.line_start_pos = self.pos + char_len;
        }
        self.pos += char_len;
    }

    /// Advances the parser position by `len` bytes.
    /// This method assumes that the consumed string does NOT contain newlines.
    /// Used for fixed delimiters.
    #[inline]
    fn advance_bytes_no_newline(&mut self, len: usize) {
        self.pos += len;
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peek if the remaining input starts with `s`
    fn peek(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Multi-token peek which checks if the remaining input starts with all of
    /// the provided tokens in order, ignoring whitespace between.
    fn peek_n<const N: usize>(&self, tokens: [&str; N]) -> bool {
        let mut parser = *self;
        for (i, token) in tokens.iter().enumerate() {
            if i > 0 {
                parser.consume_whitespace();
            }
            if !parser.peek(token) {
                return false;
            }
            parser.advance_bytes_no_newline(token.len());
        }
        true
    }

    /// Consume `s` if the remaining input starts with it.
    /// Assumes `s` does not contain newlines.
    fn consume(&mut self, s: &str) -> bool {
        if self.peek(s) {
            self.advance_bytes_no_newline(s.len());
            true
        } else {
            false
        }
    }

    fn consume_whitespace(&mut self) {
        while let Some(current_char) = self.current_char() {
            if !current_char.is_whitespace() {
                break;
            }
            self.advance_by_char(current_char);
        }
    }

    /// Expect `s` to be the start of the remaining input, consume it or return Err.
    /// Assumes `s` does not contain newlines.
    fn expect(&mut self, s: &str) -> ParseResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            let found: String = self.rest().chars().take(s.len() + 10).collect();
            Err(self.make_error(ParseErrorKind::Expected {
                description: format!("'{}', found '{}'", s, found),
            }))
        }
    }

    /// Consumes optional whitespace and the closing `%}` of a block tag.
    fn expect_tag_end(&mut self) -> ParseResult<()> {
        self.consume_whitespace();
        self.expect("%}")
    }

    /// Consume and return an identifier (alphanumeric + '_' + '.')
    fn consume_identifier(&mut self) -> ParseResult<&'a str> {
        self.consume_whitespace();
        let start = self.pos;
        while let Some(current_char) = self.current_char() {
            if current_char.is_ascii_alphanumeric() || current_char == '_' || current_char == '.' {
                self.advance_by_char(current_char);
            } else {
                break;
            }
        }
        if start == self.pos {
            match self.current_char() {
                Some(at_char) if !at_char.is_whitespace() && !self.peek("%}") && !self.peek("}}") => {
                    Err(self.make_error(ParseErrorKind::InvalidIdentifier {
                        at_char: at_char.to_string(),
                    }))
                }
                Some(_) | None => Err(self.make_error(ParseErrorKind::Expected {
                    description: "identifier".to_string(),
                })),
            }
        } else {
            Ok(self.input.get(start..self.pos).unwrap_or_default())
        }
    }

    /// Consumes `keyword` only when it is a whole word.
    fn consume_keyword(&mut self, keyword: &str) -> bool {
        let mut parser = *self;
        match parser.consume_identifier() {
            Ok(word) if word == keyword => {
                *self = parser;
                true
            }
            Ok(_) | Err(_) => false,
        }
    }

    fn make_list(&self, nodes: Vec<Node>, origin: Origin) -> Node {
        let nodes = NodeList { nodes };
        if self.debug {
            Node::DebugList(DebugNodeList { nodes, origin })
        } else {
            Node::List(nodes)
        }
    }

    /// Parses a block of text until the next tag opener.
    fn parse_text(&mut self) -> Node {
        let start_pos = self.pos;
        while let Some(current_char) = self.current_char() {
            if self.peek("{{") || self.peek("{%") || self.peek("{#") {
                break;
            }
            self.advance_by_char(current_char);
        }
        Node::Text(TextNode {
            text: self.input.get(start_pos..self.pos).unwrap_or_default().to_string(),
        })
    }

    fn parse_variable(&mut self) -> ParseResult<Node> {
        let origin = self.origin();
        self.expect("{{")?;
        self.consume_whitespace();
        let filter_expression = self.parse_filter_expression()?;
        self.consume_whitespace();
        self.expect("}}")?;

        let node = VariableNode { filter_expression };
        Ok(if self.debug {
            Node::DebugVariable(DebugVariableNode { node, origin })
        } else {
            Node::Variable(node)
        })
    }

    /// Skips a `{# ... #}` comment. These produce no node.
    fn skip_comment(&mut self) -> ParseResult<()> {
        self.expect("{#")?;
        while let Some(current_char) = self.current_char() {
            if self.consume("#}") {
                return Ok(());
            }
            self.advance_by_char(current_char);
        }
        Err(self.make_error(ParseErrorKind::unexpected_eof(Some("#}".to_string()))))
    }

    fn parse_node(&mut self) -> ParseResult<Option<Node>> {
        if self.peek("{%") {
            self.parse_tag().map(Some)
        } else if self.peek("{{") {
            self.parse_variable().map(Some)
        } else if self.peek("{#") {
            self.skip_comment().map(|()| None)
        } else {
            Ok(Some(self.parse_text()))
        }
    }

    /// Returns the keyword of the block tag at the cursor without consuming it.
    fn peek_tag_keyword(&self) -> Option<&'a str> {
        let mut parser = *self;
        if !parser.consume("{%") {
            return None;
        }
        parser.consume_identifier().ok()
    }

    /// Parses nodes until one of the `ends` block tags, consuming `{% end`
    /// but not the rest of the tag. Returns the matched keyword, or `None` at
    /// end of input when `ends` is empty.
    fn parse_nodes_until(&mut self, ends: &[&str]) -> ParseResult<(Node, Option<&'a str>)> {
        let origin = self.origin();
        let mut nodes = Vec::new();
        loop {
            if self.eof() {
                if ends.is_empty() {
                    return Ok((self.make_list(nodes, origin), None));
                }
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(format!(
                    "{{% {} %}}",
                    ends.join(" %}' or '{% ")
                )))));
            }

            if let Some(keyword) = self.peek_tag_keyword() {
                if ends.contains(&keyword) {
                    self.expect("{%")?;
                    self.consume_identifier()?;
                    return Ok((self.make_list(nodes, origin), Some(keyword)));
                }
            }

            if let Some(node) = self.parse_node()? {
                nodes.push(node);
            }
        }
    }

    // --- Expressions ---

    fn parse_string_literal(&mut self, quote: char) -> ParseResult<String> {
        self.advance_by_char(quote);
        let mut value = String::new();
        while let Some(current_char) = self.current_char() {
            self.advance_by_char(current_char);
            if current_char == quote {
                return Ok(value);
            }
            if current_char == '\\' {
                if let Some(escaped) = self.current_char() {
                    self.advance_by_char(escaped);
                    value.push(escaped);
                    continue;
                }
            }
            value.push(current_char);
        }
        Err(self.make_error(ParseErrorKind::unexpected_eof(Some(quote.to_string()))))
    }

    fn parse_number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        self.consume("-");
        let mut is_float = false;
        while let Some(current_char) = self.current_char() {
            if current_char.is_ascii_digit() {
                self.advance_by_char(current_char);
            } else if current_char == '.' && !is_float {
                is_float = true;
                self.advance_by_char(current_char);
            } else {
                break;
            }
        }
        let digits = self.input.get(start..self.pos).unwrap_or_default();
        let parsed = if is_float {
            digits
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(Value::Float)
        } else {
            digits.parse::<i64>().ok().map(Value::Int)
        };
        parsed.ok_or_else(|| {
            self.make_error(ParseErrorKind::Expected {
                description: format!("number, found '{}'", digits),
            })
        })
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        self.consume_whitespace();
        match self.current_char() {
            Some(quote @ ('"' | '\'')) => {
                Ok(Operand::Literal(Value::String(self.parse_string_literal(quote)?)))
            }
            Some(c) if c.is_ascii_digit() || (c == '-' && self.peek_digit_after_sign()) => {
                Ok(Operand::Literal(self.parse_number()?))
            }
            Some(_) | None => {
                let name = self.consume_identifier()?;
                Ok(match name {
                    "True" => Operand::Literal(Value::Bool(true)),
                    "False" => Operand::Literal(Value::Bool(false)),
                    "None" => Operand::Literal(Value::Null),
                    _ => Operand::Lookup(name.to_string()),
                })
            }
        }
    }

    fn peek_digit_after_sign(&self) -> bool {
        self.rest()
            .chars()
            .nth(1)
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn parse_filter_expression(&mut self) -> ParseResult<FilterExpression> {
        self.consume_whitespace();
        let start = self.pos;
        let var = self.parse_operand()?;
        let mut filters = Vec::new();

        while self.consume("|") {
            let name = self.consume_identifier()?;
            let kind = FilterKind::from_name(name).ok_or_else(|| {
                self.make_error(ParseErrorKind::UnknownFilter {
                    filter: name.to_string(),
                })
            })?;
            let arg = if self.consume(":") {
                Some(self.parse_operand()?)
            } else {
                None
            };
            filters.push(Filter { kind, arg });
        }

        Ok(FilterExpression {
            token: self
                .input
                .get(start..self.pos)
                .unwrap_or_default()
                .to_string(),
            var,
            filters,
        })
    }

    // --- Block tags ---

    fn parse_tag(&mut self) -> ParseResult<Node> {
        self.expect("{%")?;
        self.consume_whitespace();
        let keyword = self.consume_identifier()?;
        match keyword {
            "if" => self.parse_block(Self::parse_if),
            "for" => self.parse_block(Self::parse_for),
            "with" => self.parse_block(Self::parse_with),
            "comment" => self.parse_comment(),
            "templatetag" => self.parse_templatetag(),
            _ => Err(self.make_error(ParseErrorKind::UnknownTag {
                tag: keyword.to_string(),
            })),
        }
    }

    /// Runs `parse` one block level deeper.
    fn parse_block(&mut self, parse: fn(&mut Self) -> ParseResult<Node>) -> ParseResult<Node> {
        if self.depth >= MAX_BLOCK_DEPTH {
            return Err(self.make_error(ParseErrorKind::NestingTooDeep {
                limit: MAX_BLOCK_DEPTH,
            }));
        }
        self.depth += 1;
        let node = parse(self);
        self.depth -= 1;
        node
    }

    fn parse_if(&mut self) -> ParseResult<Node> {
        let mut bool_exprs = Vec::new();
        let mut link: Option<Link> = None;

        loop {
            self.consume_whitespace();
            let negated = self.consume_keyword("not");
            let expr = self.parse_filter_expression()?;
            bool_exprs.push(BoolExpr { negated, expr });

            self.consume_whitespace();
            if self.peek("%}") {
                break;
            }

            let next = if self.consume_keyword("and") {
                Link::And
            } else if self.consume_keyword("or") {
                Link::Or
            } else {
                return Err(self.make_error(ParseErrorKind::Expected {
                    description: "'and', 'or' or '%}'".to_string(),
                }));
            };
            match link {
                Some(current) if current != next => {
                    return Err(self.make_error(ParseErrorKind::Message(
                        "'if' tags can't mix 'and' and 'or'".to_string(),
                    )));
                }
                Some(_) | None => link = Some(next),
            }
        }
        self.expect_tag_end()?;

        let (nodelist_true, keyword) = self.parse_nodes_until(&["else", "endif"])?;
        self.expect_tag_end()?;
        let nodelist_false = if keyword == Some("else") {
            let (nodelist_false, _) = self.parse_nodes_until(&["endif"])?;
            self.expect_tag_end()?;
            nodelist_false
        } else {
            self.make_list(Vec::new(), self.origin())
        };

        Ok(Node::If(IfNode {
            bool_exprs,
            link: link.unwrap_or(Link::And),
            nodelist_true: Box::new(nodelist_true),
            nodelist_false: Box::new(nodelist_false),
        }))
    }

    fn parse_for(&mut self) -> ParseResult<Node> {
        let loopvar = self.consume_identifier()?.to_string();
        if !self.consume_keyword("in") {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "'in'".to_string(),
            }));
        }
        let sequence = self.parse_filter_expression()?;
        let is_reversed = self.consume_keyword("reversed");
        self.expect_tag_end()?;

        let (nodelist_loop, keyword) = self.parse_nodes_until(&["empty", "endfor"])?;
        self.expect_tag_end()?;
        let nodelist_empty = if keyword == Some("empty") {
            let (nodelist_empty, _) = self.parse_nodes_until(&["endfor"])?;
            self.expect_tag_end()?;
            nodelist_empty
        } else {
            self.make_list(Vec::new(), self.origin())
        };

        Ok(Node::For(ForNode {
            loopvar,
            sequence,
            is_reversed,
            nodelist_loop: Box::new(nodelist_loop),
            nodelist_empty: Box::new(nodelist_empty),
        }))
    }

    fn parse_with(&mut self) -> ParseResult<Node> {
        let mut extra_context = Vec::new();
        loop {
            self.consume_whitespace();
            if self.peek("%}") {
                break;
            }
            let name = self.consume_identifier()?.to_string();
            self.expect("=")?;
            let expr = self.parse_filter_expression()?;
            extra_context.push((name, expr));
        }
        if extra_context.is_empty() {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: "at least one 'name=value' binding".to_string(),
            }));
        }
        self.expect_tag_end()?;

        let (nodelist, _) = self.parse_nodes_until(&["endwith"])?;
        self.expect_tag_end()?;

        Ok(Node::With(WithNode {
            extra_context,
            nodelist: Box::new(nodelist),
        }))
    }

    /// `{% comment %}` blocks keep their raw text; nothing inside is parsed.
    fn parse_comment(&mut self) -> ParseResult<Node> {
        self.expect_tag_end()?;
        let start = self.pos;
        loop {
            if self.peek_n(["{%", "endcomment", "%}"]) {
                let text = self.input.get(start..self.pos).unwrap_or_default().to_string();
                self.expect("{%")?;
                self.consume_identifier()?;
                self.expect_tag_end()?;
                return Ok(Node::Comment(CommentNode { text }));
            }
            match self.current_char() {
                Some(current_char) => self.advance_by_char(current_char),
                None => {
                    return Err(self.make_error(ParseErrorKind::unexpected_eof(Some(
                        "{% endcomment %}".to_string(),
                    ))));
                }
            }
        }
    }

    fn parse_templatetag(&mut self) -> ParseResult<Node> {
        let name = self.consume_identifier()?;
        let tag = TemplateTag::from_name(name).ok_or_else(|| {
            self.make_error(ParseErrorKind::UnexpectedToken {
                expected: "a templatetag name such as 'openblock'".to_string(),
                found: name.to_string(),
            })
        })?;
        self.expect_tag_end()?;
        Ok(Node::TemplateTag(TemplateTagNode { tag }))
    }
}

/// Parses a whole template into its root node list.
pub(crate) fn parse(input: &str, debug: bool) -> ParseResult<Node> {
    let mut parser = Parser::new(input, debug);
    let (root, _) = parser.parse_nodes_until(&[])?;

    if !parser.eof() {
        return Err(parser.make_error(ParseErrorKind::Message(format!(
            "Parser did not consume entire input. Remaining: '{}'",
            parser.rest()
        ))));
    }

    Ok(root)
}
