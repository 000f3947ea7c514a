//! Reader for the OpenOrCadParser text log
//!
//! The decoder traces every structure it reads. The parts we care about look
//! like this:
//!
//! ```text
//! normalName = RES.Normal
//! [debug] Starting OOCP::StructSymbolPin::read
//!   name = 1
//!   startX = 0
//!   hotptX = -10
//!   isLeftPointing = true
//! [debug] Ending OOCP::StructSymbolPin::read
//! [debug] Starting OOCP::PrimRect::read
//!   x1 = 0
//!   ...
//! [debug] Ending OOCP::PrimRect::read
//! ```
//!
//! Blocks nest (`OOCP::Point` inside `OOCP::PrimPolyline`); `key = value`
//! lines belong to the innermost open block. A symbol name seen twice
//! continues the earlier symbol, matching how the decoder re-reads views.

use crate::parser::records::{FieldValue, SourceLibrary, SourcePin, SourcePrimitive, SourceSymbol};
use regex::Regex;
use std::sync::LazyLock;

static NORMAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnormalName\s*=\s*([A-Za-z0-9_.+\-]+)").unwrap());

static BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Ending\s+)?OOCP::(\w+)").unwrap());

static KEY_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\w+)\s*=\s*(.*?)\s*$").unwrap());

static PROPERTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(partValue|pcbFootprint)\s*=\s*(.+?)\s*$").unwrap());

/// What the innermost open block feeds
#[derive(Debug)]
enum Block {
    Pin(usize),
    Primitive(usize),
    Point {
        primitive: Option<usize>,
        x: Option<f64>,
        y: Option<f64>,
    },
    /// Any structure whose fields we do not need
    Other,
}

#[derive(Debug)]
struct Frame {
    name: String,
    block: Block,
}

/// Parse a decoder log into a library named `name`.
///
/// Record indices are 1-based line numbers. Lines before the first
/// `normalName` are ignored.
pub fn parse_log(name: &str, text: &str) -> SourceLibrary {
    let mut library = SourceLibrary::new(name);
    let mut current: Option<usize> = None;
    let mut stack: Vec<Frame> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;

        if let Some(caps) = NORMAL_NAME.captures(line) {
            let symbol_name = &caps[1];
            let position = match library.symbols.iter().position(|s| s.name == symbol_name) {
                Some(position) => position,
                None => {
                    let mut symbol = SourceSymbol::new(symbol_name);
                    symbol.record = line_no;
                    library.symbols.push(symbol);
                    library.symbols.len() - 1
                }
            };
            log::trace!("line {line_no}: symbol {symbol_name}");
            current = Some(position);
            stack.clear();
            continue;
        }

        let Some(symbol_index) = current else {
            continue;
        };
        let symbol = &mut library.symbols[symbol_index];

        if let Some(caps) = BLOCK.captures(line) {
            let block_name = caps[2].to_string();
            if caps.get(1).is_some() {
                close_block(symbol, &mut stack, &block_name);
            } else {
                open_block(symbol, &mut stack, block_name, line_no);
            }
            continue;
        }

        if let Some(caps) = PROPERTY.captures(line) {
            let key = match &caps[1] {
                "partValue" => "Value",
                _ => "Footprint",
            };
            symbol
                .properties
                .insert(key.to_string(), caps[2].to_string());
            continue;
        }

        if let Some(caps) = KEY_VALUE.captures(line) {
            if let Some(frame) = stack.last_mut() {
                assign(symbol, &mut frame.block, &caps[1], &caps[2]);
            }
        }
    }

    library
}

fn open_block(symbol: &mut SourceSymbol, stack: &mut Vec<Frame>, name: String, line_no: usize) {
    let block = if name == "StructSymbolPin" {
        symbol.pins.push(SourcePin {
            record: line_no,
            ..Default::default()
        });
        Block::Pin(symbol.pins.len() - 1)
    } else if name == "Point" {
        let primitive = stack.iter().rev().find_map(|f| match f.block {
            Block::Primitive(i) => Some(i),
            _ => None,
        });
        Block::Point {
            primitive,
            x: None,
            y: None,
        }
    } else if name.starts_with("Prim") {
        let mut primitive = SourcePrimitive::new(name.clone());
        primitive.record = line_no;
        symbol.primitives.push(primitive);
        Block::Primitive(symbol.primitives.len() - 1)
    } else {
        Block::Other
    };
    stack.push(Frame { name, block });
}

/// Pop up to and including the innermost frame called `name`. An `Ending`
/// with no matching frame is ignored.
fn close_block(symbol: &mut SourceSymbol, stack: &mut Vec<Frame>, name: &str) {
    let Some(depth) = stack.iter().rposition(|f| f.name == name) else {
        return;
    };
    for frame in stack.drain(depth..).rev() {
        if let Block::Point {
            primitive: Some(i),
            x: Some(x),
            y: Some(y),
        } = frame.block
        {
            symbol.primitives[i].points.push([x, y]);
        }
    }
}

fn assign(symbol: &mut SourceSymbol, block: &mut Block, key: &str, value: &str) {
    match block {
        Block::Pin(i) => {
            let pin = &mut symbol.pins[*i];
            let number = || value.trim().parse::<f64>().ok();
            match key {
                "name" => pin.name = value.to_string(),
                "number" | "pinNumber" => pin.number = Some(value.to_string()),
                "startX" => pin.start_x = number(),
                "startY" => pin.start_y = number(),
                "hotptX" => pin.hot_x = number(),
                "hotptY" => pin.hot_y = number(),
                "portType" | "pinType" | "type" => pin.pin_type = Some(value.to_string()),
                flag if flag.starts_with("is") => {
                    if FieldValue::from_log(value).is_true() {
                        pin.flags.insert(flag.to_string());
                    }
                }
                _ => {}
            }
        }
        Block::Primitive(i) => {
            symbol.primitives[*i]
                .fields
                .insert(key.to_string(), FieldValue::from_log(value));
        }
        Block::Point { x, y, .. } => {
            let parsed = value.trim().parse::<f64>().ok();
            match key {
                "x" => *x = parsed,
                "y" => *y = parsed,
                _ => {}
            }
        }
        Block::Other => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
[info] Opening library
normalName = RES.Normal
[debug] 0x0010: Starting OOCP::StructSymbolPin::read
  name = 1
  startX = 0
  startY = 10
  hotptX = 0
  hotptY = 0
  isLeftPointing = false
  isClock = true
  portType = 4
[debug] 0x0020: Ending OOCP::StructSymbolPin::read
[debug] 0x0030: Starting OOCP::PrimRect::read
  x1 = 0
  y1 = 10
  x2 = 10
  y2 = 40
[debug] 0x0040: Ending OOCP::PrimRect::read
[debug] Starting OOCP::PrimPolyline::read
  lineStyle = 0
[debug] Starting OOCP::Point::read
  x = 1
  y = 2
[debug] Ending OOCP::Point::read
[debug] Starting OOCP::Point::read
  x = 3
  y = 4
[debug] Ending OOCP::Point::read
[debug] Ending OOCP::PrimPolyline::read
  partValue = 10k
  pcbFootprint = R0805
normalName = CAP.Normal
[debug] Starting OOCP::PrimBitmap::read
  x1 = 0
[debug] Ending OOCP::PrimBitmap::read
normalName = RES.Normal
[debug] Starting OOCP::StructSymbolPin::read
  name = 2
  startX = 0
[debug] Ending OOCP::StructSymbolPin::read
";

    #[test]
    fn test_parse_log() {
        let lib = parse_log("DISCRETE", LOG);
        assert_eq!(lib.name, "DISCRETE");
        assert_eq!(lib.symbols.len(), 2);

        let res = lib.symbol("RES.Normal").unwrap();
        assert_eq!(res.record, 2);
        assert_eq!(res.pins.len(), 2);

        let pin = &res.pins[0];
        assert_eq!(pin.name, "1");
        assert_eq!(pin.start_y, Some(10.0));
        assert_eq!(pin.hot_x, Some(0.0));
        assert!(pin.has_flag("isClock"));
        assert!(!pin.has_flag("isLeftPointing"));
        assert_eq!(pin.pin_type.as_deref(), Some("4"));
        assert_eq!(pin.record, 3);

        assert_eq!(res.primitives.len(), 2);
        assert_eq!(res.primitives[0].kind, "PrimRect");
        assert_eq!(res.primitives[0].number("y2"), Some(40.0));
        assert_eq!(res.primitives[1].points, vec![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(res.properties.get("Value").map(String::as_str), Some("10k"));
        assert_eq!(
            res.properties.get("Footprint").map(String::as_str),
            Some("R0805")
        );

        // Second occurrence of RES continues the first symbol
        assert_eq!(res.pins[1].name, "2");
        assert_eq!(res.pins[1].start_y, None);

        let cap = lib.symbol("CAP.Normal").unwrap();
        assert_eq!(cap.primitives[0].kind, "PrimBitmap");
    }

    #[test]
    fn test_unbalanced_ending_is_ignored() {
        let lib = parse_log(
            "L",
            "normalName = X\n[debug] Ending OOCP::PrimLine::read\n  x1 = 3\n",
        );
        assert!(lib.symbols[0].primitives.is_empty());
    }

    #[test]
    fn test_lines_before_first_symbol_are_ignored() {
        let lib = parse_log("L", "[debug] Starting OOCP::PrimLine::read\n  x1 = 3\n");
        assert!(lib.symbols.is_empty());
    }
}
