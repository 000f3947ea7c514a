//! S-expression trees for KiCad file formats.
//!
//! Parsing keeps byte spans for every node so callers can point diagnostics at
//! the offending input. Writing goes through [`formatter::format_tree`], which
//! reproduces KiCad's own indentation rules.

pub mod formatter;

use std::fmt;

/// Find a direct child list `(name ...)` within a list of [`Sexpr`] nodes.
pub fn find_child_list<'a>(items: &'a [Sexpr], name: &str) -> Option<&'a [Sexpr]> {
    items
        .iter()
        .filter_map(Sexpr::as_list)
        .find(|list| list.first().and_then(Sexpr::as_sym) == Some(name))
}

/// Find all direct child lists `(name ...)` within a list of [`Sexpr`] nodes.
pub fn find_all_child_lists<'a>(items: &'a [Sexpr], name: &str) -> Vec<&'a [Sexpr]> {
    items
        .iter()
        .filter_map(Sexpr::as_list)
        .filter(|list| list.first().and_then(Sexpr::as_sym) == Some(name))
        .collect()
}

/// Coerce a number atom into f64.
///
/// KiCad writes whole numbers without a decimal point, so the parser yields
/// `Int` for them.
pub fn number_as_f64(node: &Sexpr) -> Option<f64> {
    node.as_float().or_else(|| node.as_int().map(|v| v as f64))
}

/// Byte span in source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Span for nodes built in code rather than parsed
    pub fn synthetic() -> Self {
        Self::default()
    }

    pub fn is_synthetic(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

/// The kind of S-expression value
#[derive(Debug, Clone, PartialEq)]
pub enum SexprKind {
    /// Unquoted identifier
    Symbol(String),
    /// Quoted text
    String(String),
    Int(i64),
    F64(f64),
    List(Vec<Sexpr>),
}

/// An S-expression value with source span
#[derive(Debug, Clone)]
pub struct Sexpr {
    pub kind: SexprKind,
    pub span: Span,
}

impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        // Spans are positional metadata only
        self.kind == other.kind
    }
}

impl Sexpr {
    pub fn with_span(kind: SexprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn symbol(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::Symbol(s.into()), Span::synthetic())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::with_span(SexprKind::String(s.into()), Span::synthetic())
    }

    pub fn int(n: i64) -> Self {
        Self::with_span(SexprKind::Int(n), Span::synthetic())
    }

    pub fn float(f: f64) -> Self {
        Self::with_span(SexprKind::F64(f), Span::synthetic())
    }

    pub fn list(items: Vec<Sexpr>) -> Self {
        Self::with_span(SexprKind::List(items), Span::synthetic())
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, SexprKind::List(_))
    }

    /// Symbol or string content
    pub fn as_atom(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::Symbol(s) | SexprKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            SexprKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.kind {
            SexprKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.kind {
            SexprKind::F64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Sexpr]> {
        match &self.kind {
            SexprKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head symbol of a list, e.g. `symbol` for `(symbol "R" ...)`
    pub fn tag(&self) -> Option<&str> {
        self.as_list()?.first()?.as_sym()
    }

    /// Find a child list with the given name (first element)
    pub fn find_list(&self, name: &str) -> Option<&[Sexpr]> {
        find_child_list(self.as_list()?, name)
    }

    /// Find all child lists with the given name
    pub fn find_all_lists(&self, name: &str) -> Vec<&[Sexpr]> {
        self.as_list()
            .map(|items| find_all_child_lists(items, name))
            .unwrap_or_default()
    }
}

/// Create a key-value pair list
pub fn kv<K: Into<String>, V: Into<Sexpr>>(k: K, v: V) -> Sexpr {
    Sexpr::list(vec![Sexpr::symbol(k), v.into()])
}

/// A builder for constructing lists incrementally
#[derive(Debug, Default)]
pub struct ListBuilder {
    items: Vec<Sexpr>,
}

impl ListBuilder {
    /// Start a list whose head is `name`
    pub fn node<N: Into<Sexpr>>(name: N) -> Self {
        Self {
            items: vec![name.into()],
        }
    }

    pub fn push<V: Into<Sexpr>>(&mut self, v: V) -> &mut Self {
        self.items.push(v.into());
        self
    }

    pub fn push_if<V: Into<Sexpr>>(&mut self, cond: bool, v: V) -> &mut Self {
        if cond {
            self.items.push(v.into());
        }
        self
    }

    pub fn extend<I, V>(&mut self, iter: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Sexpr>,
    {
        self.items.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Sexpr {
        Sexpr::list(self.items)
    }
}

impl From<&str> for Sexpr {
    fn from(s: &str) -> Self {
        Self::symbol(s)
    }
}

impl From<String> for Sexpr {
    fn from(s: String) -> Self {
        Self::symbol(s)
    }
}

impl From<i64> for Sexpr {
    fn from(n: i64) -> Self {
        Sexpr::int(n)
    }
}

impl From<u32> for Sexpr {
    fn from(n: u32) -> Self {
        Sexpr::int(n as i64)
    }
}

impl From<f64> for Sexpr {
    fn from(n: f64) -> Self {
        Sexpr::float(n)
    }
}

impl From<bool> for Sexpr {
    fn from(b: bool) -> Self {
        Self::symbol(if b { "yes" } else { "no" })
    }
}

/// What went wrong while parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedEof,
    UnexpectedClose,
    UnclosedList,
    UnterminatedString,
    TrailingInput,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseErrorKind::UnexpectedEof => "unexpected end of input",
            ParseErrorKind::UnexpectedClose => "unexpected ')'",
            ParseErrorKind::UnclosedList => "unclosed list",
            ParseErrorKind::UnterminatedString => "unterminated string",
            ParseErrorKind::TrailingInput => "trailing input after expression",
        };
        f.write_str(msg)
    }
}

/// Parse failure with a 1-based source location
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at line {line}, column {column}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    fn at(input: &str, offset: usize, kind: ParseErrorKind) -> Self {
        let before = &input[..offset.min(input.len())];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map(|nl| before.len() - nl)
            .unwrap_or(before.len() + 1);
        Self { kind, line, column }
    }
}

/// Byte-oriented S-expression reader
pub struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    /// Parse one expression
    pub fn parse(&mut self) -> Result<Sexpr, ParseError> {
        self.skip_trivia();
        match self.bytes.get(self.pos) {
            None => Err(self.error(ParseErrorKind::UnexpectedEof)),
            Some(b'(') => self.parse_list(),
            Some(b')') => Err(self.error(ParseErrorKind::UnexpectedClose)),
            Some(b'"') => self.parse_string(),
            Some(_) => Ok(self.parse_atom()),
        }
    }

    /// Parse expressions until the input is exhausted
    pub fn parse_all(&mut self) -> Result<Vec<Sexpr>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            if self.pos >= self.bytes.len() {
                return Ok(out);
            }
            out.push(self.parse()?);
        }
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::at(self.input, self.pos, kind)
    }

    fn parse_list(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.bytes.get(self.pos) {
                None => return Err(ParseError::at(self.input, start, ParseErrorKind::UnclosedList)),
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                Some(_) => items.push(self.parse()?),
            }
        }
        if items.len() > 1000 {
            log::trace!("parsed list of {} items at byte {start}", items.len());
        }
        Ok(Sexpr::with_span(
            SexprKind::List(items),
            Span::new(start, self.pos),
        ))
    }

    fn parse_string(&mut self) -> Result<Sexpr, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        let mut chunk_start = self.pos;
        loop {
            match self.bytes.get(self.pos) {
                None => {
                    return Err(ParseError::at(
                        self.input,
                        start,
                        ParseErrorKind::UnterminatedString,
                    ))
                }
                Some(b'"') => {
                    text.push_str(&self.input[chunk_start..self.pos]);
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    text.push_str(&self.input[chunk_start..self.pos]);
                    self.pos += 1;
                    let Some(&escaped) = self.bytes.get(self.pos) else {
                        return Err(ParseError::at(
                            self.input,
                            start,
                            ParseErrorKind::UnterminatedString,
                        ));
                    };
                    match escaped {
                        b'n' => text.push('\n'),
                        b'r' => text.push('\r'),
                        b't' => text.push('\t'),
                        b'\\' => text.push('\\'),
                        b'"' => text.push('"'),
                        _ => {
                            // Unknown escape: keep the character as written
                            let ch = self.input[self.pos..].chars().next().unwrap_or('\\');
                            text.push(ch);
                            self.pos += ch.len_utf8();
                            chunk_start = self.pos;
                            continue;
                        }
                    }
                    self.pos += 1;
                    chunk_start = self.pos;
                }
                Some(_) => self.pos += 1,
            }
        }
        Ok(Sexpr::with_span(
            SexprKind::String(text),
            Span::new(start, self.pos),
        ))
    }

    fn parse_atom(&mut self) -> Sexpr {
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'(' || b == b')' || b == b'"' {
                break;
            }
            self.pos += 1;
        }
        let text = &self.input[start..self.pos];
        let span = Span::new(start, self.pos);
        let kind = if let Ok(n) = text.parse::<i64>() {
            SexprKind::Int(n)
        } else if let Some(f) = parse_float(text) {
            SexprKind::F64(f)
        } else {
            SexprKind::Symbol(text.to_string())
        };
        Sexpr::with_span(kind, span)
    }

    fn skip_trivia(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b';' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }
}

/// Only plain decimal notation counts as a number; `inf`, `nan` and friends
/// stay symbols.
fn parse_float(text: &str) -> Option<f64> {
    let digits = text.strip_prefix(|c| c == '-' || c == '+').unwrap_or(text);
    if !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    text.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse exactly one expression; trailing non-whitespace is an error.
pub fn parse(input: &str) -> Result<Sexpr, ParseError> {
    log::trace!("parsing S-expression from {} bytes", input.len());
    let mut parser = Parser::new(input);
    let expr = parser.parse()?;
    parser.skip_trivia();
    if parser.pos < parser.bytes.len() {
        return Err(parser.error(ParseErrorKind::TrailingInput));
    }
    Ok(expr)
}

/// Parse every top-level expression in the input
pub fn parse_all(input: &str) -> Result<Vec<Sexpr>, ParseError> {
    Parser::new(input).parse_all()
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = formatter::format_tree(self, formatter::FormatMode::Normal);
        f.write_str(text.trim_end_matches('\n'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_atoms() {
        assert_eq!(parse("foo").unwrap().as_sym(), Some("foo"));
        assert_eq!(parse("42").unwrap().as_int(), Some(42));
        assert_eq!(parse("-2.54").unwrap().as_float(), Some(-2.54));
        assert_eq!(parse("\"a b\"").unwrap().as_str(), Some("a b"));
        // Not numbers
        assert_eq!(parse("inf").unwrap().as_sym(), Some("inf"));
        assert_eq!(parse("1.2.3").unwrap().as_sym(), Some("1.2.3"));
    }

    #[test]
    fn test_parse_string_escapes() {
        let s = parse(r#""say \"hi\"\n\\""#).unwrap();
        assert_eq!(s.as_str(), Some("say \"hi\"\n\\"));
    }

    #[test]
    fn test_parse_nested_pin() {
        let s = parse(
            r#"(pin passive line (at 0 3.81 270) (length 1.27)
                (name "~" (effects (font (size 1.27 1.27))))
                (number "1" (effects (font (size 1.27 1.27)))))"#,
        )
        .unwrap();
        assert_eq!(s.tag(), Some("pin"));
        let at = s.find_list("at").unwrap();
        assert_eq!(number_as_f64(&at[1]), Some(0.0));
        assert_eq!(number_as_f64(&at[2]), Some(3.81));
        let number = s.find_list("number").unwrap();
        assert_eq!(number[1].as_str(), Some("1"));
    }

    #[test]
    fn test_comments_are_skipped() {
        let s = parse("; header\n(a ; trailing\n b)").unwrap();
        assert_eq!(s.as_list().unwrap().len(), 2);
    }

    #[test]
    fn test_error_location() {
        let err = parse("(a\n  (b \"oops)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedString);
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 6);

        let err = parse("(a)\n)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::TrailingInput);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_unclosed_list_points_at_open_paren() {
        let err = parse("(kicad_symbol_lib\n  (symbol \"R\"").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedList);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn test_spans() {
        let input = "(net 1 \"GND\")";
        let s = parse(input).unwrap();
        assert_eq!(s.span, Span::new(0, input.len()));
        let items = s.as_list().unwrap();
        assert_eq!(&input[items[2].span.start..items[2].span.end], "\"GND\"");
    }

    #[test]
    fn test_list_builder() {
        let mut b = ListBuilder::node("pin");
        b.push("passive")
            .push("line")
            .push_if(false, "never")
            .push(kv("length", 2.54));
        let built = b.build();
        assert_eq!(built, parse("(pin passive line (length 2.54))").unwrap());
    }

    #[test]
    fn test_parse_all() {
        let all = parse_all("(a) (b) c").unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].as_sym(), Some("c"));
    }
}
