//! KiCad-style text layout for S-expression trees.
//!
//! [`prettify`] follows the character-stream rules KiCad applies when it saves
//! a file: tab indentation, one child list per line, `(xy ..)` runs kept on one
//! line and library-table rows collapsed. [`format_tree`] serializes a tree
//! compactly and then runs it through the same pass.

use crate::{Sexpr, SexprKind};

/// Layout variants KiCad uses for different file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatMode {
    /// Schematics and symbol libraries
    #[default]
    Normal,
    /// `sym-lib-table` / `fp-lib-table`: each `(lib ...)` row on one line
    LibraryTable,
}

const INDENT: u8 = b'\t';
const XY_COLUMN_LIMIT: usize = 99;
const WRAP_COLUMN: usize = 72;

/// Re-indent S-expression text the way KiCad writes it.
pub fn prettify(source: &str, mode: FormatMode) -> String {
    let bytes = source.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len() + bytes.len() / 4);

    let mut depth = 0usize;
    let mut column = 0usize;
    let mut last = 0u8;
    let mut in_quote = false;
    let mut escaped = false;
    let mut spaced = false;
    let mut wrapped = false;
    let mut in_xy = false;
    let mut row_depth: Option<usize> = None;

    for (i, &ch) in bytes.iter().enumerate() {
        if in_quote {
            out.push(ch);
            column += 1;
            if escaped {
                escaped = false;
            } else if ch == b'\\' {
                escaped = true;
            } else if ch == b'"' {
                in_quote = false;
            }
            last = ch;
            continue;
        }

        match ch {
            b' ' | b'\t' | b'\n' | b'\r' => {
                let next = next_significant(bytes, i + 1);
                if spaced || depth == 0 || last == b'(' || next == b')' || next == b'(' {
                    continue;
                }
                if in_xy || row_depth.is_some() || column < WRAP_COLUMN {
                    out.push(b' ');
                    column += 1;
                } else {
                    newline(&mut out, depth);
                    column = depth;
                    wrapped = true;
                }
                spaced = true;
            }
            b'(' => {
                spaced = false;
                let is_xy = bytes[i..].starts_with(b"(xy ");
                if out.is_empty() {
                    out.push(b'(');
                    column = 1;
                } else if (in_xy && is_xy && column < XY_COLUMN_LIMIT) || row_depth.is_some() {
                    out.extend_from_slice(b" (");
                    column += 2;
                } else {
                    newline(&mut out, depth);
                    out.push(b'(');
                    column = depth + 1;
                }
                in_xy = is_xy;
                if mode == FormatMode::LibraryTable
                    && row_depth.is_none()
                    && head_token(bytes, i) == b"lib"
                {
                    row_depth = Some(depth);
                }
                depth += 1;
                last = ch;
            }
            b')' => {
                spaced = false;
                depth = depth.saturating_sub(1);
                if row_depth == Some(depth) {
                    out.push(b')');
                    column += 1;
                    row_depth = None;
                } else if row_depth.is_some() {
                    out.push(b')');
                    column += 1;
                } else if last == b')' || wrapped {
                    newline(&mut out, depth);
                    out.push(b')');
                    column = depth + 1;
                    wrapped = false;
                } else {
                    out.push(b')');
                    column += 1;
                }
                last = ch;
            }
            _ => {
                spaced = false;
                if ch == b'"' {
                    in_quote = true;
                }
                out.push(ch);
                column += 1;
                last = ch;
            }
        }
    }

    out.push(b'\n');
    // Only ASCII bytes were inserted between complete UTF-8 sequences.
    String::from_utf8_lossy(&out).into_owned()
}

/// Serialize a tree and lay it out through [`prettify`].
///
/// The result ends with a newline.
pub fn format_tree(sexpr: &Sexpr, mode: FormatMode) -> String {
    let mut raw = String::new();
    write_compact(sexpr, &mut raw);
    prettify(&raw, mode)
}

fn write_compact(sexpr: &Sexpr, out: &mut String) {
    match &sexpr.kind {
        SexprKind::Symbol(s) => out.push_str(s),
        SexprKind::String(s) => {
            out.push('"');
            out.push_str(&escape_string(s));
            out.push('"');
        }
        SexprKind::Int(n) => out.push_str(&n.to_string()),
        SexprKind::F64(f) => out.push_str(&format_number(*f)),
        SexprKind::List(items) => {
            out.push('(');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(' ');
                }
                write_compact(item, out);
            }
            out.push(')');
        }
    }
}

/// Shortest decimal text for a float, without exponent or trailing zeros.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // Also folds -0.0
        return "0".to_string();
    }
    // f64's Display never switches to exponent notation.
    value.to_string()
}

/// Escape quotes, backslashes and control characters for a quoted atom.
pub fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }
    result
}

fn next_significant(bytes: &[u8], from: usize) -> u8 {
    bytes[from.min(bytes.len())..]
        .iter()
        .copied()
        .find(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .unwrap_or(0)
}

fn head_token(bytes: &[u8], open: usize) -> &[u8] {
    let start = open + 1;
    let len = bytes[start..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    &bytes[start..start + len]
}

fn newline(out: &mut Vec<u8>, depth: usize) {
    out.push(b'\n');
    out.extend(std::iter::repeat(INDENT).take(depth));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kv, parse, ListBuilder};

    #[test]
    fn prettify_nested_lists() {
        let input = "(kicad_symbol_lib (version 20231120) (generator \"x\") (symbol \"R\" (in_bom yes)))";
        let expected = "(kicad_symbol_lib\n\t(version 20231120)\n\t(generator \"x\")\n\t(symbol \"R\"\n\t\t(in_bom yes)\n\t)\n)\n";
        assert_eq!(prettify(input, FormatMode::Normal), expected);
    }

    #[test]
    fn prettify_keeps_xy_runs_together() {
        let input = "(pts (xy 1 2) (xy 3 4) (xy 5 6))";
        let expected = "(pts\n\t(xy 1 2) (xy 3 4) (xy 5 6)\n)\n";
        assert_eq!(prettify(input, FormatMode::Normal), expected);
    }

    #[test]
    fn prettify_library_table_rows() {
        let input = "(sym_lib_table (version 7) (lib (name \"A\") (type \"KiCad\") (uri \"a.kicad_sym\")))";
        let expected = "(sym_lib_table\n\t(version 7)\n\t(lib (name \"A\") (type \"KiCad\") (uri \"a.kicad_sym\"))\n)\n";
        assert_eq!(prettify(input, FormatMode::LibraryTable), expected);
    }

    #[test]
    fn prettify_ignores_parens_in_strings() {
        let input = "(root (field \"a (b) \\\"c\\\"\") (x 1))";
        let expected = "(root\n\t(field \"a (b) \\\"c\\\"\")\n\t(x 1)\n)\n";
        assert_eq!(prettify(input, FormatMode::Normal), expected);
    }

    #[test]
    fn format_tree_numbers() {
        let mut b = ListBuilder::node("at");
        b.push(25.4).push(-0.0).push(2.0).push(0.1234);
        assert_eq!(format_tree(&b.build(), FormatMode::Normal), "(at 25.4 0 2 0.1234)\n");
    }

    #[test]
    fn format_tree_reparses_to_same_tree() {
        let mut b = ListBuilder::node("symbol");
        b.push(crate::Sexpr::string("A \"quoted\" name"))
            .push(kv("length", 2.54));
        let tree = b.build();
        let text = format_tree(&tree, FormatMode::Normal);
        assert_eq!(parse(&text).unwrap(), tree);
    }
}
