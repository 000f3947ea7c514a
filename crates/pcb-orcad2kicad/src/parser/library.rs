//! Reader for `.kicad_sym` symbol libraries
//!
//! Only what the converter needs is interpreted: properties, pins and the
//! basic graphic shapes. Anything else inside a unit block is carried as an
//! opaque node so that it survives a rewrite.

use crate::error::{ConvertError, Result};
use crate::geometry::{Point, Rotation};
use crate::model::{Fill, Graphic, Pin, PinElectricalType, Shape, SymbolDefinition};
use pcb_sexpr::{find_all_child_lists, find_child_list, number_as_f64, Sexpr};
use std::collections::BTreeMap;

/// A library file as read from disk
#[derive(Debug, Clone)]
pub struct ParsedLibrary {
    /// Root tag and every non-symbol root item, in file order
    pub header: Vec<Sexpr>,
    /// Top-level `(symbol ..)` nodes, aliases included, in file order
    pub nodes: Vec<Sexpr>,
    /// Definitions with `extends` entries folded into their parent's aliases
    pub symbols: Vec<SymbolDefinition>,
}

impl ParsedLibrary {
    pub fn symbol(&self, name: &str) -> Option<&SymbolDefinition> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

/// Parse library text; `label` names the file in diagnostics.
pub fn read_library(label: &str, text: &str) -> Result<ParsedLibrary> {
    let root = pcb_sexpr::parse(text).map_err(|source| ConvertError::Sexpr {
        path: label.to_string(),
        source,
    })?;
    let invalid = |reason: String| ConvertError::InvalidLibrary {
        path: label.to_string(),
        reason,
    };

    let items = root
        .as_list()
        .filter(|items| items.first().and_then(Sexpr::as_sym) == Some("kicad_symbol_lib"))
        .ok_or_else(|| invalid("root is not (kicad_symbol_lib ...)".to_string()))?;

    let mut header = Vec::new();
    let mut nodes = Vec::new();
    let mut symbols: Vec<SymbolDefinition> = Vec::new();
    for item in items {
        let Some(list) = item.as_list().filter(|l| l.first().and_then(Sexpr::as_sym) == Some("symbol"))
        else {
            header.push(item.clone());
            continue;
        };
        nodes.push(item.clone());

        let name = symbol_name(list).ok_or_else(|| invalid("symbol without a name".to_string()))?;
        if let Some(parent) = find_child_list(list, "extends").and_then(|e| e.get(1)?.as_atom()) {
            let parent_symbol = symbols
                .iter_mut()
                .find(|s| s.name == parent)
                .ok_or_else(|| invalid(format!("'{name}' extends unknown symbol '{parent}'")))?;
            if parent_symbol.has_alias(&name) {
                log::warn!("{label}: '{parent}' lists alias '{name}' twice");
            } else {
                parent_symbol.aliases.push(name);
            }
            continue;
        }

        let symbol = read_symbol(list, &name, label).map_err(|reason| invalid(format!("symbol '{name}': {reason}")))?;
        symbols.push(symbol);
    }

    Ok(ParsedLibrary {
        header,
        nodes,
        symbols,
    })
}

/// Name of a `(symbol "NAME" ...)` list
pub fn symbol_name(symbol: &[Sexpr]) -> Option<String> {
    if symbol.first().and_then(Sexpr::as_sym) != Some("symbol") {
        return None;
    }
    symbol.get(1)?.as_atom().map(str::to_string)
}

/// Direct `(property "NAME" "VALUE" ...)` pairs
pub fn symbol_properties(symbol: &[Sexpr]) -> BTreeMap<String, String> {
    find_all_child_lists(symbol, "property")
        .into_iter()
        .filter_map(|p| {
            let key = p.get(1)?.as_atom()?;
            let value = p.get(2)?.as_atom()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn read_symbol(items: &[Sexpr], name: &str, label: &str) -> std::result::Result<SymbolDefinition, String> {
    let mut symbol = SymbolDefinition::new(name, label);
    symbol.power = find_child_list(items, "power").is_some();
    symbol.properties = symbol_properties(items);

    for unit_block in find_all_child_lists(items, "symbol") {
        let block_name = unit_block
            .get(1)
            .and_then(Sexpr::as_atom)
            .ok_or("unit block without a name")?;
        let (unit, style) = unit_and_style(name, block_name)
            .ok_or_else(|| format!("unit block '{block_name}' is not NAME_unit_style"))?;

        for child in unit_block.iter().skip(2) {
            let Some(list) = child.as_list() else {
                continue;
            };
            match list.first().and_then(Sexpr::as_sym) {
                Some("pin") => {
                    let mut pin = read_pin(list)?;
                    pin.unit = unit;
                    pin.style = style;
                    symbol.pins.push(pin);
                }
                Some(_) => symbol.graphics.push(read_graphic(child, list, unit, style)),
                None => {}
            }
        }
    }
    Ok(symbol)
}

/// `R_1_2` -> `(1, 2)`
fn unit_and_style(symbol: &str, block: &str) -> Option<(u32, u32)> {
    let suffix = block.strip_prefix(symbol)?.strip_prefix('_')?;
    let (unit, style) = suffix.split_once('_')?;
    Some((unit.parse().ok()?, style.parse().ok()?))
}

fn point(list: &[Sexpr]) -> Option<Point> {
    Some(Point::new(
        number_as_f64(list.get(1)?)?,
        number_as_f64(list.get(2)?)?,
    ))
}

fn child_point(list: &[Sexpr], tag: &str) -> Option<Point> {
    point(find_child_list(list, tag)?)
}

fn child_number(list: &[Sexpr], tag: &str) -> Option<f64> {
    number_as_f64(find_child_list(list, tag)?.get(1)?)
}

fn is_hidden(list: &[Sexpr]) -> bool {
    list.iter().any(|item| item.as_sym() == Some("hide"))
        || find_child_list(list, "hide")
            .and_then(|h| h.get(1)?.as_sym())
            .is_some_and(|v| v == "yes")
}

fn read_pin(list: &[Sexpr]) -> std::result::Result<Pin, String> {
    let electrical_type = list
        .get(1)
        .and_then(Sexpr::as_sym)
        .and_then(PinElectricalType::from_kicad_name)
        .unwrap_or(PinElectricalType::Unspecified);
    let at = find_child_list(list, "at").ok_or("pin without (at ..)")?;
    let position = point(at).ok_or("pin (at ..) is not numeric")?;
    let degrees = at.get(3).and_then(number_as_f64).unwrap_or(0.0);
    let orientation = Rotation::from_degrees(degrees).map_err(|e| e.to_string())?;
    let label = |tag: &str| {
        find_child_list(list, tag)
            .and_then(|l| l.get(1)?.as_atom())
            .map(str::to_string)
    };

    Ok(Pin {
        number: label("number").ok_or("pin without a number")?,
        name: label("name").unwrap_or_else(|| "~".to_string()),
        electrical_type,
        position,
        orientation,
        length: child_number(list, "length").unwrap_or(0.0),
        unit: 1,
        style: 1,
        hidden: is_hidden(list),
    })
}

fn read_graphic(node: &Sexpr, list: &[Sexpr], unit: u32, style: u32) -> Graphic {
    let stroke_width = find_child_list(list, "stroke")
        .and_then(|s| child_number(s, "width"))
        .unwrap_or(0.0);
    let fill = find_child_list(list, "fill")
        .and_then(|f| find_child_list(f, "type"))
        .and_then(|t| t.get(1)?.as_sym())
        .map(Fill::from_kicad_name)
        .unwrap_or_default();
    let shape = read_shape(list).unwrap_or_else(|| Shape::Foreign(node.clone()));
    Graphic {
        shape,
        stroke_width,
        fill,
        unit,
        style,
    }
}

fn read_shape(list: &[Sexpr]) -> Option<Shape> {
    match list.first()?.as_sym()? {
        "polyline" => {
            let pts = find_child_list(list, "pts")?;
            let points = find_all_child_lists(pts, "xy")
                .into_iter()
                .map(point)
                .collect::<Option<Vec<_>>>()?;
            Some(Shape::Polyline { points })
        }
        "rectangle" => Some(Shape::Rectangle {
            start: child_point(list, "start")?,
            end: child_point(list, "end")?,
        }),
        "circle" => Some(Shape::Circle {
            center: child_point(list, "center")?,
            radius: child_number(list, "radius")?,
        }),
        "arc" => Some(Shape::Arc {
            start: child_point(list, "start")?,
            mid: child_point(list, "mid")?,
            end: child_point(list, "end")?,
        }),
        "text" => {
            let at = find_child_list(list, "at")?;
            let tenths = at.get(3).and_then(number_as_f64).unwrap_or(0.0);
            let size = find_child_list(list, "effects")
                .and_then(|e| find_child_list(e, "font"))
                .and_then(|f| child_number(f, "size"))
                .unwrap_or(1.27);
            Some(Shape::Text {
                text: list.get(1)?.as_atom()?.to_string(),
                position: point(at)?,
                angle: Rotation::from_degrees(tenths / 10.0).ok()?,
                size,
            })
        }
        _ => None,
    }
}
