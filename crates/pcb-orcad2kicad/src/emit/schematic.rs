//! `.kicad_sch` serialization of a placed page
//!
//! Every UUID is a v5 UUID of a stable key (project, page, designator, net
//! and element index), so unchanged input gives byte-identical output.

use super::symbols::{at_node, bounds, effects, header_items, property, stroke, symbol_node};
use crate::geometry::{Orientation, Point};
use crate::mapping::names::{net_role, NetRole};
use crate::placement::{
    pin_location, power_lib_id, LabelStyle, PlacedLabel, PlacedNet, PlacedPage, PlacedSymbol,
};
use pcb_sexpr::formatter::{format_tree, FormatMode};
use pcb_sexpr::{kv, ListBuilder, Sexpr};
use uuid::Uuid;

const UUID_NAMESPACE_URL: Uuid = Uuid::from_u128(0x6ba7b811_9dad_11d1_80b4_00c04fd430c8); // uuid.NAMESPACE_URL

const FONT_SIZE: f64 = 1.27;
const FIELD_GAP: f64 = 1.27;
/// Distance from a power symbol's pin to its value text
const POWER_VALUE_OFFSET: f64 = 3.81;

/// Title block contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    /// Project name in `instances` blocks and the UUID namespace
    pub project: String,
    pub title: String,
    pub paper: String,
    /// Source file, recorded as the first title block comment
    pub source: Option<String>,
}

impl SheetInfo {
    pub fn new(project: impl Into<String>) -> Self {
        let project = project.into();
        Self {
            title: project.clone(),
            project,
            paper: "A4".to_string(),
            source: None,
        }
    }
}

fn stable_uuid(key: &str) -> String {
    Uuid::new_v5(&UUID_NAMESPACE_URL, key.as_bytes()).to_string()
}

fn uuid_node(key: &str) -> Sexpr {
    kv("uuid", Sexpr::string(stable_uuid(key)))
}

fn xy(p: Point) -> Sexpr {
    Sexpr::list(vec![Sexpr::symbol("xy"), Sexpr::float(p.x), Sexpr::float(p.y)])
}

/// The complete document
pub fn schematic_document(page: &PlacedPage, info: &SheetInfo) -> Sexpr {
    let root_key = format!("{}/{}", info.project, page.name);
    let root_uuid = stable_uuid(&root_key);

    let mut items = header_items("kicad_sch");
    items.push(kv("uuid", Sexpr::string(&root_uuid)));
    items.push(kv("paper", Sexpr::string(&info.paper)));

    let mut title = ListBuilder::node("title_block");
    title.push(kv("title", Sexpr::string(&info.title)));
    if let Some(source) = &info.source {
        title.push(Sexpr::list(vec![
            Sexpr::symbol("comment"),
            Sexpr::int(1),
            Sexpr::string(format!("Converted from {source}")),
        ]));
    }
    items.push(title.build());

    let mut lib_symbols = ListBuilder::node("lib_symbols");
    lib_symbols.extend(
        page.lib_symbols
            .iter()
            .map(|(lib_id, symbol)| symbol_node(symbol, lib_id)),
    );
    items.push(lib_symbols.build());

    for symbol in &page.symbols {
        items.push(symbol_instance(page, symbol, info, &root_key, &root_uuid));
    }
    for net in &page.nets {
        items.extend(net_items(net, info, &root_key, &root_uuid));
    }

    items.push(kv(
        "sheet_instances",
        Sexpr::list(vec![
            Sexpr::symbol("path"),
            Sexpr::string("/"),
            kv("page", Sexpr::string("1")),
        ]),
    ));
    Sexpr::list(items)
}

/// Formatted document text
pub fn write_schematic(page: &PlacedPage, info: &SheetInfo) -> String {
    format_tree(&schematic_document(page, info), FormatMode::Normal)
}

/// Reference above the placed body, value below it, in sheet coordinates
fn field_anchors(page: &PlacedPage, symbol: &PlacedSymbol) -> (Point, Point) {
    let orientation = Orientation::from_placement(symbol.rotation, false).then(if symbol.mirror {
        Orientation::MIRROR_VERTICAL
    } else {
        Orientation::IDENTITY
    });
    let corners = page
        .lib_symbols
        .get(&symbol.lib_id)
        .and_then(bounds)
        .map(|(min, max)| {
            [
                Point::new(min.x, min.y),
                Point::new(min.x, max.y),
                Point::new(max.x, min.y),
                Point::new(max.x, max.y),
            ]
            .map(|p| pin_location(symbol.position, orientation, p))
        });
    match corners {
        Some(corners) => {
            let top = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
            let bottom = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
            (
                Point::new(symbol.position.x, top - FIELD_GAP).rounded(),
                Point::new(symbol.position.x, bottom + FIELD_GAP).rounded(),
            )
        }
        None => (
            Point::new(symbol.position.x, symbol.position.y - 2.54).rounded(),
            Point::new(symbol.position.x, symbol.position.y + 2.54).rounded(),
        ),
    }
}

fn symbol_instance(
    page: &PlacedPage,
    symbol: &PlacedSymbol,
    info: &SheetInfo,
    root_key: &str,
    root_uuid: &str,
) -> Sexpr {
    let key = format!("{root_key}/symbol/{}", symbol.designator);
    let mut node = ListBuilder::node("symbol");
    node.push(kv("lib_id", Sexpr::string(&symbol.lib_id)))
        .push(at_node(
            symbol.position,
            Some(i64::from(symbol.rotation.degrees())),
        ));
    node.push_if(symbol.mirror, kv("mirror", Sexpr::symbol("x")));
    node.push(kv("unit", i64::from(symbol.unit)))
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", !symbol.unresolved))
        .push(kv("on_board", !symbol.unresolved))
        .push(kv("dnp", symbol.unresolved))
        .push(uuid_node(&key));

    let (top, bottom) = field_anchors(page, symbol);
    for (name, value) in &symbol.properties {
        let (at, hidden) = match name.as_str() {
            "Reference" => (top, false),
            "Value" => (bottom, false),
            _ => (symbol.position, true),
        };
        node.push(property(name, value, at, 0, hidden));
    }

    for pin in &symbol.pins {
        node.push(Sexpr::list(vec![
            Sexpr::symbol("pin"),
            Sexpr::string(pin),
            uuid_node(&format!("{key}/pin/{pin}")),
        ]));
    }

    node.push(instances_node(info, root_uuid, &symbol.designator, symbol.unit));
    node.build()
}

/// `(instances (project "P" (path "/ROOT" (reference "R1") (unit 1))))`
fn instances_node(info: &SheetInfo, root_uuid: &str, reference: &str, unit: u32) -> Sexpr {
    let path = Sexpr::list(vec![
        Sexpr::symbol("path"),
        Sexpr::string(format!("/{root_uuid}")),
        kv("reference", Sexpr::string(reference)),
        kv("unit", i64::from(unit)),
    ]);
    kv(
        "instances",
        Sexpr::list(vec![
            Sexpr::symbol("project"),
            Sexpr::string(&info.project),
            path,
        ]),
    )
}

fn net_items(net: &PlacedNet, info: &SheetInfo, root_key: &str, root_uuid: &str) -> Vec<Sexpr> {
    let key = format!("{root_key}/net/{}", net.name);
    let mut items = Vec::new();

    for (i, junction) in net.junctions.iter().enumerate() {
        let mut node = ListBuilder::node("junction");
        node.push(at_node(*junction, None))
            .push(kv("diameter", 0_i64))
            .push(Sexpr::list(vec![
                Sexpr::symbol("color"),
                Sexpr::int(0),
                Sexpr::int(0),
                Sexpr::int(0),
                Sexpr::int(0),
            ]))
            .push(uuid_node(&format!("{key}/junction/{i}")));
        items.push(node.build());
    }

    for (i, (start, end)) in net.wires.iter().enumerate() {
        let mut node = ListBuilder::node("wire");
        node.push(Sexpr::list(vec![Sexpr::symbol("pts"), xy(*start), xy(*end)]))
            .push(stroke(0.0))
            .push(uuid_node(&format!("{key}/wire/{i}")));
        items.push(node.build());
    }

    for (i, label) in net.labels.iter().enumerate() {
        let label_key = format!("{key}/label/{i}");
        items.push(match &label.style {
            LabelStyle::Power { reference } => {
                power_instance(label, reference, info, &label_key, root_uuid)
            }
            _ => label_node(label, &label_key),
        });
    }
    items
}

fn power_instance(
    label: &PlacedLabel,
    reference: &str,
    info: &SheetInfo,
    key: &str,
    root_uuid: &str,
) -> Sexpr {
    let offset = match net_role(&label.name) {
        NetRole::Power => -POWER_VALUE_OFFSET,
        NetRole::Ground | NetRole::Signal => POWER_VALUE_OFFSET,
    };
    let value_at = Point::new(label.position.x, label.position.y + offset).rounded();

    let mut node = ListBuilder::node("symbol");
    node.push(kv("lib_id", Sexpr::string(power_lib_id(&label.name))))
        .push(at_node(label.position, Some(0)))
        .push(kv("unit", 1_i64))
        .push(kv("exclude_from_sim", false))
        .push(kv("in_bom", false))
        .push(kv("on_board", false))
        .push(kv("dnp", false))
        .push(uuid_node(key))
        .push(property("Reference", reference, label.position, 0, true))
        .push(property("Value", &label.name, value_at, 0, false))
        .push(property("Footprint", "", label.position, 0, true))
        .push(Sexpr::list(vec![
            Sexpr::symbol("pin"),
            Sexpr::string("1"),
            uuid_node(&format!("{key}/pin/1")),
        ]))
        .push(instances_node(info, root_uuid, reference, 1));
    node.build()
}

fn label_node(label: &PlacedLabel, key: &str) -> Sexpr {
    let justify = |parts: &[&str]| {
        let mut node = ListBuilder::node("justify");
        node.extend(parts.iter().map(|p| Sexpr::symbol(*p)));
        node.build()
    };
    let label_effects = |parts: &[&str]| {
        let mut node = ListBuilder::node("effects");
        node.push(kv(
            "font",
            Sexpr::list(vec![
                Sexpr::symbol("size"),
                Sexpr::float(FONT_SIZE),
                Sexpr::float(FONT_SIZE),
            ]),
        ))
        .push(justify(parts));
        node.build()
    };

    if label.is_global() {
        let shape = match net_role(&label.name) {
            NetRole::Power | NetRole::Ground => "passive",
            NetRole::Signal => "bidirectional",
        };
        let mut node = ListBuilder::node("global_label");
        node.push(Sexpr::string(&label.name))
            .push(kv("shape", Sexpr::symbol(shape)))
            .push(at_node(label.position, Some(0)))
            .push(kv("fields_autoplaced", true))
            .push(label_effects(&["left"]))
            .push(uuid_node(key));
        let mut refs = ListBuilder::node("property");
        refs.push(Sexpr::string("Intersheetrefs"))
            .push(Sexpr::string("${INTERSHEET_REFS}"))
            .push(at_node(label.position, Some(0)))
            .push(effects(FONT_SIZE, true));
        node.push(refs.build());
        node.build()
    } else {
        let mut node = ListBuilder::node("label");
        node.push(Sexpr::string(&label.name))
            .push(at_node(label.position, Some(0)))
            .push(kv("fields_autoplaced", true))
            .push(label_effects(&["left", "bottom"]))
            .push(uuid_node(key));
        node.build()
    }
}
