//! `.kicad_sym` documents and the symbol nodes shared with `lib_symbols`

use crate::geometry::Point;
use crate::model::{Graphic, Pin, Shape, SymbolDefinition};
use pcb_sexpr::{kv, ListBuilder, Sexpr};
use std::collections::BTreeSet;

/// Library file format version written in the header (KiCad 8)
pub const LIBRARY_VERSION: i64 = 20231120;
pub const GENERATOR: &str = "pcb-orcad2kicad";

const FONT_SIZE: f64 = 1.27;
const PIN_NAME_OFFSET: f64 = 0.508;

/// Properties written in this order; everything else follows alphabetically
const FIXED_PROPERTIES: [&str; 3] = ["Reference", "Value", "Footprint"];

/// Leading items of a document: root tag, version and generator
pub fn header_items(root: &str) -> Vec<Sexpr> {
    vec![
        Sexpr::symbol(root),
        kv("version", LIBRARY_VERSION),
        kv("generator", Sexpr::string(GENERATOR)),
        kv("generator_version", Sexpr::string(env!("CARGO_PKG_VERSION"))),
    ]
}

/// A complete library document
pub fn library_document<'a>(symbols: impl IntoIterator<Item = &'a SymbolDefinition>) -> Sexpr {
    let mut items = header_items("kicad_symbol_lib");
    for symbol in symbols {
        items.extend(library_nodes(symbol));
    }
    Sexpr::list(items)
}

/// The symbol followed by its alias entries, as written in a library file
pub fn library_nodes(symbol: &SymbolDefinition) -> Vec<Sexpr> {
    let mut nodes = vec![symbol_node(symbol, &symbol.name)];
    nodes.extend(symbol.aliases.iter().map(|alias| alias_node(symbol, alias)));
    nodes
}

/// `(symbol "NAME" ...)`. `qualified` is the outer name: the bare symbol name
/// in a library, `Nick:NAME` inside a schematic's `lib_symbols`.
pub fn symbol_node(symbol: &SymbolDefinition, qualified: &str) -> Sexpr {
    let mut node = ListBuilder::node("symbol");
    node.push(Sexpr::string(qualified));
    node.push_if(symbol.power, Sexpr::list(vec![Sexpr::symbol("power")]));
    node.push(kv("pin_names", kv("offset", PIN_NAME_OFFSET)))
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", !symbol.power))
        .push(kv("on_board", !symbol.power));

    let (top, bottom) = label_anchors(symbol);
    for (key, value) in ordered_properties(symbol) {
        let (at, hidden) = match key {
            "Reference" => (top, false),
            "Value" => (bottom, false),
            _ => (Point::ORIGIN, true),
        };
        node.push(property(key, value, at, 0, hidden));
    }

    let mut groups: BTreeSet<(u32, u32)> = BTreeSet::new();
    groups.extend(symbol.graphics.iter().map(|g| (g.unit, g.style)));
    groups.extend(symbol.pins.iter().map(|p| (p.unit, p.style)));
    for (unit, style) in groups {
        let mut group = ListBuilder::node("symbol");
        group.push(Sexpr::string(format!("{}_{unit}_{style}", symbol.name)));
        group.extend(
            symbol
                .graphics
                .iter()
                .filter(|g| (g.unit, g.style) == (unit, style))
                .map(graphic),
        );
        group.extend(
            symbol
                .pins
                .iter()
                .filter(|p| (p.unit, p.style) == (unit, style))
                .map(pin),
        );
        node.push(group.build());
    }
    node.build()
}

/// `(symbol "ALIAS" (extends "NAME") ...)`
pub fn alias_node(symbol: &SymbolDefinition, alias: &str) -> Sexpr {
    let (top, bottom) = label_anchors(symbol);
    let mut node = ListBuilder::node("symbol");
    node.push(Sexpr::string(alias))
        .push(kv("extends", Sexpr::string(&symbol.name)));
    node.push(property("Reference", symbol.reference_prefix(), top, 0, false))
        .push(property("Value", alias, bottom, 0, false))
        .push(property(
            "Footprint",
            symbol.property("Footprint").unwrap_or_default(),
            Point::ORIGIN,
            0,
            true,
        ));
    node.build()
}

pub(crate) fn ordered_properties(symbol: &SymbolDefinition) -> Vec<(&str, &str)> {
    let mut ordered: Vec<(&str, &str)> = FIXED_PROPERTIES
        .iter()
        .filter_map(|key| symbol.properties.get_key_value(*key))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    ordered.extend(
        symbol
            .properties
            .iter()
            .filter(|(k, _)| !FIXED_PROPERTIES.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    ordered
}

/// `(property "KEY" "VALUE" (at x y angle) (effects (font (size ..)) [(hide yes)]))`
pub(crate) fn property(key: &str, value: &str, at: Point, angle: i64, hidden: bool) -> Sexpr {
    let mut node = ListBuilder::node("property");
    node.push(Sexpr::string(key))
        .push(Sexpr::string(value))
        .push(at_node(at, Some(angle)))
        .push(effects(FONT_SIZE, hidden));
    node.build()
}

pub(crate) fn effects(size: f64, hidden: bool) -> Sexpr {
    let mut node = ListBuilder::node("effects");
    node.push(kv(
        "font",
        Sexpr::list(vec![
            Sexpr::symbol("size"),
            Sexpr::float(size),
            Sexpr::float(size),
        ]),
    ));
    node.push_if(hidden, kv("hide", true));
    node.build()
}

pub(crate) fn at_node(p: Point, angle: Option<i64>) -> Sexpr {
    let mut node = ListBuilder::node("at");
    node.push(p.x).push(p.y);
    if let Some(angle) = angle {
        node.push(angle);
    }
    node.build()
}

fn xy(tag: &str, p: Point) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::symbol(tag),
        Sexpr::float(p.x),
        Sexpr::float(p.y),
    ])
}

pub(crate) fn stroke(width: f64) -> Sexpr {
    Sexpr::list(vec![
        Sexpr::symbol("stroke"),
        kv("width", width),
        kv("type", "default"),
    ])
}

fn graphic(g: &Graphic) -> Sexpr {
    let fill = kv("fill", kv("type", g.fill.kicad_name()));
    match &g.shape {
        Shape::Polyline { points } => {
            let mut pts = ListBuilder::node("pts");
            pts.extend(points.iter().map(|p| xy("xy", *p)));
            let mut node = ListBuilder::node("polyline");
            node.push(pts.build()).push(stroke(g.stroke_width)).push(fill);
            node.build()
        }
        Shape::Rectangle { start, end } => {
            let mut node = ListBuilder::node("rectangle");
            node.push(xy("start", *start))
                .push(xy("end", *end))
                .push(stroke(g.stroke_width))
                .push(fill);
            node.build()
        }
        Shape::Circle { center, radius } => {
            let mut node = ListBuilder::node("circle");
            node.push(xy("center", *center))
                .push(kv("radius", *radius))
                .push(stroke(g.stroke_width))
                .push(fill);
            node.build()
        }
        Shape::Arc { start, mid, end } => {
            let mut node = ListBuilder::node("arc");
            node.push(xy("start", *start))
                .push(xy("mid", *mid))
                .push(xy("end", *end))
                .push(stroke(g.stroke_width))
                .push(fill);
            node.build()
        }
        Shape::Text {
            text,
            position,
            angle,
            size,
        } => {
            // Library text angles are in tenths of a degree
            let mut node = ListBuilder::node("text");
            node.push(Sexpr::string(text))
                .push(at_node(*position, Some(i64::from(angle.degrees()) * 10)))
                .push(effects(*size, false));
            node.build()
        }
        Shape::Foreign(node) => node.clone(),
    }
}

fn pin(p: &Pin) -> Sexpr {
    let mut node = ListBuilder::node("pin");
    node.push(p.electrical_type.kicad_name())
        .push("line")
        .push(at_node(p.position, Some(i64::from(p.orientation.degrees()))))
        .push(kv("length", p.length));
    node.push_if(p.hidden, Sexpr::symbol("hide"));
    node.push(Sexpr::list(vec![
        Sexpr::symbol("name"),
        Sexpr::string(&p.name),
        effects(FONT_SIZE, false),
    ]));
    node.push(Sexpr::list(vec![
        Sexpr::symbol("number"),
        Sexpr::string(&p.number),
        effects(FONT_SIZE, false),
    ]));
    node.build()
}

/// Reference above the body, value below it
fn label_anchors(symbol: &SymbolDefinition) -> (Point, Point) {
    match bounds(symbol) {
        Some((min, max)) => (
            Point::new(min.x, max.y + FONT_SIZE).rounded(),
            Point::new(min.x, min.y - FONT_SIZE).rounded(),
        ),
        None => (Point::new(0.0, 2.54), Point::new(0.0, -2.54)),
    }
}

/// Bounding box of pins and graphics, library axes
pub(crate) fn bounds(symbol: &SymbolDefinition) -> Option<(Point, Point)> {
    let mut points: Vec<Point> = symbol.pins.iter().map(|p| p.position).collect();
    for g in &symbol.graphics {
        match &g.shape {
            Shape::Polyline { points: pts } => points.extend(pts),
            Shape::Rectangle { start, end } => points.extend([*start, *end]),
            Shape::Circle { center, radius } => points.extend([
                *center - Point::new(*radius, *radius),
                *center + Point::new(*radius, *radius),
            ]),
            Shape::Arc { start, mid, end } => points.extend([*start, *mid, *end]),
            Shape::Text { position, .. } => points.push(*position),
            Shape::Foreign(_) => {}
        }
    }
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(min, max), p| {
        (
            Point::new(min.x.min(p.x), min.y.min(p.y)),
            Point::new(max.x.max(p.x), max.y.max(p.y)),
        )
    }))
}
