//! Destination placement of resolved pages
//!
//! Positions go through the schematic transform; orientations compose the
//! part map's intrinsic orientation with the OrCAD placement. Where a
//! symbol's pin lands somewhere other than the OrCAD hot point, a stub wire
//! joins the two so that nets survive symbols drawn with a different origin.

use crate::error::{ConvertError, Result};
use crate::geometry::{Orientation, Point, Rotation, Scale, Transform};
use crate::mapping::names::{is_power_graphic, net_role, safe_symbol_name, NetRole};
use crate::mapping::nets::{on_segment, point_order, ConnectivityGraph, DESTINATION_RESOLUTION};
use crate::model::{
    ComponentInstance, Endpoint, Fill, Graphic, LabelKind, NetNaming, Pin, PinElectricalType,
    SchematicPage, Shape, SymbolDefinition,
};
use crate::resolve::ReferenceResolver;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Marker drawn for parts without a symbol
const PLACEHOLDER_HALF_SIZE: f64 = 5.08;

#[derive(Debug, Clone)]
pub struct PlacementOptions {
    pub scale: Scale,
    /// Nickname used for placeholder `lib_id`s
    pub library_nickname: String,
    /// Draw globals that use an OrCAD power graphic as power symbols
    pub power_symbols: bool,
}

impl PlacementOptions {
    pub fn new(scale: Scale, library_nickname: impl Into<String>) -> Self {
        Self {
            scale,
            library_nickname: library_nickname.into(),
            power_symbols: true,
        }
    }

    pub fn with_power_symbols(mut self, power_symbols: bool) -> Self {
        self.power_symbols = power_symbols;
        self
    }
}

/// A symbol on the destination sheet
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSymbol {
    pub designator: String,
    pub lib_id: String,
    pub position: Point,
    pub rotation: Rotation,
    /// KiCad `(mirror x)`
    pub mirror: bool,
    /// Reference, Value, Footprint, then user fields
    pub properties: Vec<(String, String)>,
    /// Symbol unit drawn for this instance, 1-based
    pub unit: u32,
    /// Pin numbers drawn for the placed unit
    pub pins: Vec<String>,
    pub unresolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelStyle {
    Local,
    Global,
    /// Power symbol instance; the reference is numbered per page
    Power { reference: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLabel {
    pub name: String,
    pub position: Point,
    pub style: LabelStyle,
}

impl PlacedLabel {
    /// Global labels and power symbols connect by name
    pub fn is_global(&self) -> bool {
        self.style != LabelStyle::Local
    }
}

/// Drawn primitives of one net
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedNet {
    pub name: String,
    pub naming: NetNaming,
    pub wires: Vec<(Point, Point)>,
    pub labels: Vec<PlacedLabel>,
    pub junctions: Vec<Point>,
    /// `(designator, pin, location)` of every connected symbol pin
    pub pins: Vec<(String, String, Point)>,
}

/// A net endpoint left out of the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedEndpoint {
    pub net: String,
    pub designator: String,
    pub pin: String,
    pub reason: String,
}

/// A fully placed page, ready to serialize
#[derive(Debug, Default)]
pub struct PlacedPage {
    pub name: String,
    /// Ordered by designator
    pub symbols: Vec<PlacedSymbol>,
    /// Symbol definitions by `lib_id`
    pub lib_symbols: BTreeMap<String, SymbolDefinition>,
    /// Ordered by name
    pub nets: Vec<PlacedNet>,
    pub excluded: Vec<ExcludedEndpoint>,
    /// Instance-scoped problems: geometry and unmapped pins
    pub diagnostics: Vec<ConvertError>,
}

/// Per-instance placement result
struct InstancePlacement {
    /// Destination location of each usable source pin
    pins: HashMap<String, Point>,
    /// Why the other pins are unusable
    excluded: HashMap<String, String>,
    /// When set, every pin is excluded for this reason
    blanket: Option<String>,
}

impl InstancePlacement {
    fn exclusion(&self, pin: &str) -> Option<String> {
        self.blanket
            .clone()
            .or_else(|| self.excluded.get(pin).cloned())
    }
}

/// `lib_id` of the placeholder standing in for an unresolved part
pub fn placeholder_lib_id(nickname: &str, part_reference: &str) -> String {
    format!("{nickname}:{}", placeholder_name(part_reference))
}

fn placeholder_name(part_reference: &str) -> String {
    let safe = safe_symbol_name(part_reference);
    if safe.is_empty() {
        "UNRESOLVED".to_string()
    } else {
        format!("UNRESOLVED_{safe}")
    }
}

/// Flagged stand-in symbol: a crossed box and no pins
pub fn placeholder_symbol(part_reference: &str) -> SymbolDefinition {
    let h = PLACEHOLDER_HALF_SIZE;
    let mut symbol = SymbolDefinition::new(placeholder_name(part_reference), "placeholder");
    symbol.properties.insert("Reference".into(), "U".into());
    symbol
        .properties
        .insert("Value".into(), format!("UNRESOLVED: {part_reference}"));
    symbol.properties.insert("Footprint".into(), String::new());
    let outline = |shape| Graphic {
        shape,
        stroke_width: 0.254,
        fill: Fill::None,
        unit: 0,
        style: 1,
    };
    symbol.graphics.push(outline(Shape::Rectangle {
        start: Point::new(-h, h),
        end: Point::new(h, -h),
    }));
    symbol.graphics.push(outline(Shape::Polyline {
        points: vec![Point::new(-h, h), Point::new(h, -h)],
    }));
    symbol.graphics.push(outline(Shape::Polyline {
        points: vec![Point::new(-h, -h), Point::new(h, h)],
    }));
    symbol
}

/// `lib_id` of the power symbol driving `net`
pub fn power_lib_id(net: &str) -> String {
    format!("power:{}", power_symbol_name(net))
}

fn power_symbol_name(net: &str) -> String {
    let safe = safe_symbol_name(net);
    if safe.is_empty() {
        "PWR".to_string()
    } else {
        safe
    }
}

/// Power symbol for `net`: a single hidden `power_in` pin at the origin,
/// an arrow for supplies and a ground mark for everything else
pub fn power_symbol(net: &str) -> SymbolDefinition {
    let mut symbol = SymbolDefinition::new(power_symbol_name(net), "power");
    symbol.power = true;
    symbol.properties.insert("Reference".into(), "#PWR".into());
    symbol.properties.insert("Value".into(), net.to_string());
    symbol.properties.insert("Footprint".into(), String::new());

    let supply = net_role(net) == NetRole::Power;
    let line = |points: &[(f64, f64)]| Graphic {
        shape: Shape::Polyline {
            points: points.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        },
        stroke_width: 0.0,
        fill: Fill::None,
        unit: 0,
        style: 1,
    };
    if supply {
        symbol.graphics.push(line(&[(0.0, 0.0), (0.0, 1.27)]));
        symbol
            .graphics
            .push(line(&[(-0.762, 1.27), (0.0, 2.54), (0.762, 1.27), (-0.762, 1.27)]));
    } else {
        symbol.graphics.push(line(&[
            (0.0, 0.0),
            (0.0, -1.27),
            (1.27, -1.27),
            (0.0, -2.54),
            (-1.27, -1.27),
            (0.0, -1.27),
        ]));
    }
    symbol.pins.push(Pin {
        number: "1".into(),
        name: net.to_string(),
        electrical_type: PinElectricalType::PowerIn,
        position: Point::ORIGIN,
        orientation: if supply { Rotation::Deg90 } else { Rotation::Deg270 },
        length: 0.0,
        unit: 1,
        style: 1,
        hidden: true,
    });
    symbol
}

/// Where a library pin lands on the sheet
pub fn pin_location(position: Point, orientation: Orientation, pin: Point) -> Point {
    // Library axes are Y up, the sheet is Y down.
    (position + orientation.apply(Point::new(pin.x, -pin.y))).rounded()
}

fn instance_properties(
    instance: &ComponentInstance,
    symbol: &SymbolDefinition,
    unresolved: bool,
) -> Vec<(String, String)> {
    let value = if unresolved {
        symbol.property("Value").unwrap_or_default().to_string()
    } else {
        instance
            .value
            .clone()
            .or_else(|| symbol.property("Value").map(str::to_string))
            .unwrap_or_else(|| instance.part_reference.clone())
    };
    let footprint = instance
        .properties
        .get("PCB Footprint")
        .map(String::as_str)
        .or_else(|| symbol.property("Footprint"))
        .unwrap_or_default()
        .to_string();

    let mut properties = vec![
        ("Reference".to_string(), instance.designator.clone()),
        ("Value".to_string(), value),
        ("Footprint".to_string(), footprint),
    ];
    properties.extend(
        instance
            .properties
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "Reference" | "Value" | "Footprint" | "PCB Footprint"))
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    properties
}

/// Place every instance and draw every net of a resolved page
pub fn place_page(
    page: &SchematicPage,
    resolver: &ReferenceResolver<'_>,
    options: &PlacementOptions,
) -> PlacedPage {
    let transform = Transform::new(options.scale);
    let mut placed = PlacedPage {
        name: page.name.clone(),
        ..Default::default()
    };

    let mut instances: Vec<&ComponentInstance> = page.instances.iter().collect();
    instances.sort_by(|a, b| natord::compare(&a.designator, &b.designator));

    let mut placements: HashMap<&str, InstancePlacement> = HashMap::new();
    for instance in instances {
        let (symbol, placement) = place_instance(instance, resolver, options, &transform, &mut placed);
        placements.insert(instance.designator.as_str(), placement);
        log::debug!("Placed {} as {}", instance.designator, symbol.lib_id);
        placed.symbols.push(symbol);
    }

    for net in &page.nets {
        let mut drawn = PlacedNet {
            name: net.name.clone(),
            naming: net.naming,
            wires: net
                .wires
                .iter()
                .map(|&w| {
                    let wire = page.wires[w];
                    (transform.apply(wire.start), transform.apply(wire.end))
                })
                .collect(),
            labels: net
                .labels
                .iter()
                .map(|&l| {
                    let label = &page.labels[l];
                    let style = match &label.kind {
                        LabelKind::Local => LabelStyle::Local,
                        LabelKind::Global { symbol: Some(symbol) }
                            if options.power_symbols && is_power_graphic(symbol) =>
                        {
                            LabelStyle::Power {
                                reference: String::new(),
                            }
                        }
                        LabelKind::Global { .. } => LabelStyle::Global,
                    };
                    PlacedLabel {
                        name: label.name.clone(),
                        position: transform.apply(label.position),
                        style,
                    }
                })
                .collect(),
            junctions: Vec::new(),
            pins: Vec::new(),
        };

        for endpoint in &net.endpoints {
            let Endpoint::Pin { designator, pin } = endpoint else {
                continue;
            };
            let Some(placement) = placements.get(designator.as_str()) else {
                continue;
            };
            if let Some(reason) = placement.exclusion(pin) {
                placed.excluded.push(ExcludedEndpoint {
                    net: net.name.clone(),
                    designator: designator.clone(),
                    pin: pin.clone(),
                    reason,
                });
                continue;
            }
            let (Some(&location), Some(source)) = (
                placement.pins.get(pin.as_str()),
                page.instance(designator).and_then(|i| i.pin(pin)),
            ) else {
                continue;
            };
            let hot = transform.apply(source.hot);
            if !hot.coincides(location) {
                drawn.wires.push((hot, location));
            }
            drawn.pins.push((designator.clone(), pin.clone(), location));
        }

        let source_junctions: Vec<Point> = page
            .junctions
            .iter()
            .filter(|j| net.points.iter().any(|p| p.coincides(**j)))
            .map(|j| transform.apply(*j))
            .collect();
        drawn.junctions = junctions(&drawn, &source_junctions);

        if drawn.wires.is_empty() && drawn.labels.is_empty() && drawn.pins.len() < 2 {
            log::debug!("Net '{}' has nothing left to draw", net.name);
            continue;
        }
        placed.nets.push(drawn);
    }

    let mut power_count = 0;
    for net in &mut placed.nets {
        for label in &mut net.labels {
            if let LabelStyle::Power { reference } = &mut label.style {
                power_count += 1;
                *reference = format!("#PWR{power_count:02}");
                placed
                    .lib_symbols
                    .entry(power_lib_id(&label.name))
                    .or_insert_with(|| power_symbol(&label.name));
            }
        }
    }

    for excluded in &placed.excluded {
        log::warn!(
            "{}: pin {} left off net '{}' ({})",
            excluded.designator,
            excluded.pin,
            excluded.net,
            excluded.reason
        );
    }
    placed
}

fn place_instance(
    instance: &ComponentInstance,
    resolver: &ReferenceResolver<'_>,
    options: &PlacementOptions,
    transform: &Transform,
    placed: &mut PlacedPage,
) -> (PlacedSymbol, InstancePlacement) {
    let position = transform.apply(instance.placement.position);
    let mut placement = InstancePlacement {
        pins: HashMap::new(),
        excluded: HashMap::new(),
        blanket: None,
    };

    let rotation = match Rotation::from_quarter_turns(instance.placement.rotation) {
        Ok(rotation) => rotation,
        Err(e) => {
            placed.diagnostics.push(ConvertError::geometry(
                format!("instance {}", instance.designator),
                e,
            ));
            placement.blanket = Some(format!("unsupported rotation {}", instance.placement.rotation));
            Rotation::Deg0
        }
    };

    let resolved = instance
        .resolved
        .as_ref()
        .and_then(|r| resolver.symbol(r).map(|symbol| (r, symbol)));

    let (lib_id, symbol, intrinsic, unresolved) = match resolved {
        Some((r, symbol)) => (r.lib_id.clone(), symbol.clone(), r.intrinsic, false),
        None => {
            placement.blanket = Some("unresolved part".to_string());
            (
                placeholder_lib_id(&options.library_nickname, &instance.part_reference),
                placeholder_symbol(&instance.part_reference),
                Orientation::IDENTITY,
                true,
            )
        }
    };

    let orientation =
        intrinsic.then(Orientation::from_placement(rotation, instance.placement.mirror));
    let (angle, mirror) = orientation.kicad_form();

    let unit = placed_unit(&symbol, instance);
    if placement.blanket.is_none() {
        for source in &instance.pins {
            let drawn = symbol.unit_pins(unit).find(|p| p.number == source.number);
            match (drawn, symbol.pin(&source.number)) {
                (Some(pin), _) => {
                    placement.pins.insert(
                        source.number.clone(),
                        pin_location(position, orientation, pin.position),
                    );
                }
                (None, Some(elsewhere)) => {
                    placed.diagnostics.push(ConvertError::PinOnOtherUnit {
                        designator: instance.designator.clone(),
                        pin: source.number.clone(),
                        lib_id: lib_id.clone(),
                        pin_unit: elsewhere.unit,
                        placed_unit: unit,
                    });
                    placement.excluded.insert(
                        source.number.clone(),
                        format!("on unit {} of {lib_id}", elsewhere.unit),
                    );
                }
                (None, None) => {
                    placed.diagnostics.push(ConvertError::UnmappedPin {
                        designator: instance.designator.clone(),
                        pin: source.number.clone(),
                        lib_id: lib_id.clone(),
                    });
                    placement
                        .excluded
                        .insert(source.number.clone(), format!("no pin in {lib_id}"));
                }
            }
        }
    }

    let mut pins: Vec<String> = symbol.unit_pins(unit).map(|p| p.number.clone()).collect();
    pins.dedup();

    let placed_symbol = PlacedSymbol {
        designator: instance.designator.clone(),
        lib_id: lib_id.clone(),
        position,
        rotation: angle,
        mirror,
        properties: instance_properties(instance, &symbol, unresolved),
        unit,
        pins,
        unresolved,
    };
    placed.lib_symbols.entry(lib_id).or_insert(symbol);
    (placed_symbol, placement)
}

/// The unit whose pins, with the common ones, cover the most source pins.
/// Ties go to the lowest unit.
fn placed_unit(symbol: &SymbolDefinition, instance: &ComponentInstance) -> u32 {
    symbol
        .units()
        .into_iter()
        .map(|unit| {
            let covered = instance
                .pins
                .iter()
                .filter(|source| symbol.unit_pins(unit).any(|p| p.number == source.number))
                .count();
            (unit, covered)
        })
        .fold(None, |best: Option<(u32, usize)>, (unit, covered)| match best {
            Some((_, most)) if most >= covered => best,
            _ => Some((unit, covered)),
        })
        .map_or(1, |(unit, _)| unit)
}

/// Source junctions plus every tee and every point where three or more wire
/// ends meet
fn junctions(net: &PlacedNet, source: &[Point]) -> Vec<Point> {
    let tolerance = 0.5 / DESTINATION_RESOLUTION;
    let mut ends: HashMap<(i64, i64), (Point, usize)> = HashMap::new();
    let key = |p: Point| {
        (
            (p.x * DESTINATION_RESOLUTION).round() as i64,
            (p.y * DESTINATION_RESOLUTION).round() as i64,
        )
    };
    for &(a, b) in &net.wires {
        for p in [a, b] {
            ends.entry(key(p)).or_insert((p, 0)).1 += 1;
        }
    }

    let mut found: Vec<Point> = source.to_vec();
    found.extend(ends.values().filter(|(_, n)| *n >= 3).map(|(p, _)| *p));

    let candidates = ends
        .values()
        .map(|(p, _)| *p)
        .chain(net.pins.iter().map(|(_, _, p)| *p));
    for p in candidates {
        if net.wires.iter().any(|&(a, b)| on_segment(p, a, b, tolerance)) {
            found.push(p);
        }
    }

    found.sort_by(|a, b| point_order(*a, *b));
    found.dedup_by(|a, b| a.coincides(*b));
    found
}

impl PlacedPage {
    pub fn symbol(&self, designator: &str) -> Option<&PlacedSymbol> {
        self.symbols.iter().find(|s| s.designator == designator)
    }

    pub fn net(&self, name: &str) -> Option<&PlacedNet> {
        self.nets.iter().find(|n| n.name == name)
    }

    /// Re-derive connectivity from the drawn primitives and compare it with
    /// the source nets. A source net spread over two components is split;
    /// one component holding two source nets is a merge.
    pub fn check_connectivity(&self) -> Result<()> {
        let mut graph = ConnectivityGraph::new(DESTINATION_RESOLUTION);
        let mut wire_owner = Vec::new();
        let mut label_owner = Vec::new();
        let mut pin_owner: HashMap<(String, String), usize> = HashMap::new();

        for (index, net) in self.nets.iter().enumerate() {
            for &(a, b) in &net.wires {
                graph.add_wire(a, b);
                wire_owner.push(index);
            }
            for label in &net.labels {
                graph.add_label(&label.name, label.position);
                label_owner.push(index);
            }
            for junction in &net.junctions {
                graph.add_point(*junction);
            }
            for (designator, pin, at) in &net.pins {
                graph.add_pin(designator, pin, *at);
                pin_owner.insert((designator.clone(), pin.clone()), index);
            }
        }

        let mut seen: HashMap<usize, usize> = HashMap::new();
        for (component_index, component) in graph.components().iter().enumerate() {
            let mut owners: Vec<usize> = component
                .wires
                .iter()
                .map(|&w| wire_owner[w])
                .chain(component.labels.iter().map(|&l| label_owner[l]))
                .chain(component.pins.iter().filter_map(|p| pin_owner.get(p).copied()))
                .collect();
            owners.sort_unstable();
            owners.dedup();

            if let [first, second, ..] = owners[..] {
                return Err(ConvertError::NetMerged {
                    first: self.nets[first].name.clone(),
                    second: self.nets[second].name.clone(),
                });
            }
            if let Some(&owner) = owners.first() {
                if let Some(&other) = seen.get(&owner) {
                    if other != component_index {
                        return Err(ConvertError::NetSplit {
                            net: self.nets[owner].name.clone(),
                        });
                    }
                }
                seen.insert(owner, component_index);
            }
        }
        Ok(())
    }

    /// Designators placed as placeholders
    pub fn unresolved(&self) -> HashSet<&str> {
        self.symbols
            .iter()
            .filter(|s| s.unresolved)
            .map(|s| s.designator.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::SymbolLibrary;
    use crate::mapping::nets::reconstruct_nets;
    use crate::model::{InstancePin, NetLabel, Pin, PinElectricalType, SourcePlacement, Wire};

    fn two_pin(name: &str) -> SymbolDefinition {
        let mut s = SymbolDefinition::new(name, "test");
        s.properties.insert("Reference".into(), "R".into());
        s.properties.insert("Value".into(), name.into());
        for (number, y, rotation) in [("1", 3.81, Rotation::Deg270), ("2", -3.81, Rotation::Deg90)] {
            s.pins.push(Pin {
                number: number.into(),
                name: "~".into(),
                electrical_type: PinElectricalType::Passive,
                position: Point::new(0.0, y),
                orientation: rotation,
                length: 1.27,
                unit: 1,
                style: 1,
                hidden: false,
            });
        }
        s
    }

    fn part(designator: &str, part: &str, at: (f64, f64), rotation: i64) -> ComponentInstance {
        // Source pins 15 units above and below the origin, before rotation
        let (x, y) = at;
        let offsets = match rotation {
            1 => [(-15.0, 0.0), (15.0, 0.0)],
            _ => [(0.0, -15.0), (0.0, 15.0)],
        };
        ComponentInstance {
            designator: designator.into(),
            part_reference: part.into(),
            value: None,
            properties: Default::default(),
            placement: SourcePlacement {
                position: Point::new(x, y),
                rotation,
                mirror: false,
            },
            pins: ["1", "2"]
                .iter()
                .zip(offsets)
                .map(|(n, (dx, dy))| InstancePin {
                    number: n.to_string(),
                    name: n.to_string(),
                    hot: Point::new(x + dx, y + dy),
                })
                .collect(),
            element: 1,
            resolved: None,
        }
    }

    fn vcc_page(unknown_c1: bool) -> SchematicPage {
        let mut page = SchematicPage {
            name: "MAIN".into(),
            instances: vec![
                part("R1", "RES", (100.0, 100.0), 0),
                part("C1", if unknown_c1 { "MYSTERY" } else { "CAP" }, (200.0, 100.0), 0),
            ],
            wires: vec![Wire {
                start: Point::new(100.0, 85.0),
                end: Point::new(200.0, 85.0),
            }],
            labels: vec![NetLabel {
                name: "VCC".into(),
                position: Point::new(150.0, 85.0),
                kind: LabelKind::Local,
            }],
            ..Default::default()
        };
        page.nets = reconstruct_nets(&page);
        page
    }

    fn options() -> PlacementOptions {
        PlacementOptions::new("0.254".parse().unwrap(), "orcad")
    }

    #[test]
    fn test_vcc_net_is_drawn() {
        let lib = {
            let mut lib = SymbolLibrary::new("orcad");
            lib.merge([two_pin("RES"), two_pin("CAP")]).unwrap();
            lib
        };
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = vcc_page(false);
        assert!(resolver.resolve_page(&mut page).is_empty());

        let placed = place_page(&page, &resolver, &options());
        assert!(placed.diagnostics.is_empty(), "{:?}", placed.diagnostics);
        let r1 = placed.symbol("R1").unwrap();
        assert_eq!(r1.position, Point::new(25.4, 25.4));
        assert_eq!(r1.lib_id, "orcad:RES");

        let vcc = placed.net("VCC").unwrap();
        let pins: Vec<_> = vcc.pins.iter().map(|(d, p, _)| (d.as_str(), p.as_str())).collect();
        assert_eq!(pins, vec![("C1", "1"), ("R1", "1")]);
        // Library pin 1 sits 3.81 mm above the origin; OrCAD's hot point too
        assert_eq!(vcc.pins[1].2, Point::new(25.4, 21.59));
        assert_eq!(vcc.wires, vec![(Point::new(25.4, 21.59), Point::new(50.8, 21.59))]);
        placed.check_connectivity().unwrap();
    }

    #[test]
    fn test_stub_wire_for_offset_pins() {
        let mut lib = SymbolLibrary::new("orcad");
        let mut res = two_pin("RES");
        // Pins drawn further out than the OrCAD graphic
        res.pins[0].position = Point::new(0.0, 7.62);
        res.pins[1].position = Point::new(0.0, -7.62);
        lib.merge([res, two_pin("CAP")]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = vcc_page(false);
        resolver.resolve_page(&mut page);

        let placed = place_page(&page, &resolver, &options());
        let vcc = placed.net("VCC").unwrap();
        assert!(vcc
            .wires
            .contains(&(Point::new(25.4, 21.59), Point::new(25.4, 17.78))));
        placed.check_connectivity().unwrap();
    }

    #[test]
    fn test_rotated_part() {
        let mut lib = SymbolLibrary::new("orcad");
        lib.merge([two_pin("RES")]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = SchematicPage {
            instances: vec![part("R5", "RES", (0.0, 0.0), 1)],
            ..Default::default()
        };
        resolver.resolve_page(&mut page);
        let placed = place_page(&page, &resolver, &options());
        let r5 = placed.symbol("R5").unwrap();
        assert_eq!((r5.rotation, r5.mirror), (Rotation::Deg90, false));
        // Pin 1 (up) turns to the left on a counter-clockwise quarter turn
        let o = Orientation::rotation(Rotation::Deg90);
        assert_eq!(
            pin_location(r5.position, o, Point::new(0.0, 3.81)),
            Point::new(-3.81, 0.0)
        );
    }

    #[test]
    fn test_unresolved_part_is_placed_without_pins() {
        let mut lib = SymbolLibrary::new("orcad");
        lib.merge([two_pin("RES")]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = vcc_page(true);
        let unresolved = resolver.resolve_page(&mut page);
        assert!(unresolved.contains("C1"));

        let placed = place_page(&page, &resolver, &options());
        let c1 = placed.symbol("C1").unwrap();
        assert!(c1.unresolved);
        assert_eq!(c1.lib_id, "orcad:UNRESOLVED_MYSTERY");
        assert!(c1.pins.is_empty());
        assert_eq!(c1.properties[1].1, "UNRESOLVED: MYSTERY");
        assert!(placed.lib_symbols.contains_key("orcad:UNRESOLVED_MYSTERY"));

        let vcc = placed.net("VCC").unwrap();
        assert!(vcc.pins.iter().all(|(d, _, _)| d != "C1"));
        assert!(placed
            .excluded
            .iter()
            .any(|e| e.designator == "C1" && e.net == "VCC"));
        placed.check_connectivity().unwrap();
    }

    #[test]
    fn test_unmapped_pin() {
        let mut lib = SymbolLibrary::new("orcad");
        let mut res = two_pin("RES");
        res.pins.pop();
        lib.merge([res]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = SchematicPage {
            instances: vec![part("R1", "RES", (0.0, 0.0), 0)],
            ..Default::default()
        };
        resolver.resolve_page(&mut page);
        let placed = place_page(&page, &resolver, &options());
        assert!(matches!(
            &placed.diagnostics[..],
            [ConvertError::UnmappedPin { pin, .. }] if pin == "2"
        ));
    }

    #[test]
    fn test_pin_named_like_a_missing_number_is_not_used() {
        let mut lib = SymbolLibrary::new("orcad");
        let mut res = two_pin("RES");
        res.pins[1].number = "A".into();
        res.pins[1].name = "2".into();
        lib.merge([res]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = SchematicPage {
            instances: vec![part("R1", "RES", (0.0, 0.0), 0)],
            ..Default::default()
        };
        resolver.resolve_page(&mut page);
        let placed = place_page(&page, &resolver, &options());
        assert!(matches!(
            &placed.diagnostics[..],
            [ConvertError::UnmappedPin { pin, .. }] if pin == "2"
        ));
    }

    /// Pins 1 and 2 on unit 1, pins 3 and 4 on unit 2 at the same spots
    fn dual(name: &str) -> SymbolDefinition {
        let mut s = two_pin(name);
        let mut second = s.pins.clone();
        for (pin, number) in second.iter_mut().zip(["3", "4"]) {
            pin.number = number.into();
            pin.unit = 2;
        }
        s.pins.extend(second);
        s
    }

    #[test]
    fn test_second_unit_is_placed_for_its_pins() {
        let mut lib = SymbolLibrary::new("orcad");
        lib.merge([dual("DUAL")]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut instance = part("U1", "DUAL", (0.0, 0.0), 0);
        instance.pins[0].number = "3".into();
        instance.pins[1].number = "4".into();
        let mut page = SchematicPage {
            instances: vec![instance],
            ..Default::default()
        };
        resolver.resolve_page(&mut page);

        let placed = place_page(&page, &resolver, &options());
        assert!(placed.diagnostics.is_empty(), "{:?}", placed.diagnostics);
        let u1 = placed.symbol("U1").unwrap();
        assert_eq!(u1.unit, 2);
        assert_eq!(u1.pins, ["3", "4"]);
    }

    #[test]
    fn test_pins_spanning_units_are_reported() {
        let mut lib = SymbolLibrary::new("orcad");
        lib.merge([dual("DUAL")]).unwrap();
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut instance = part("U1", "DUAL", (0.0, 0.0), 0);
        instance.pins[1].number = "4".into();
        let mut page = SchematicPage {
            instances: vec![instance],
            ..Default::default()
        };
        resolver.resolve_page(&mut page);

        let placed = place_page(&page, &resolver, &options());
        assert_eq!(placed.symbol("U1").unwrap().unit, 1);
        assert!(matches!(
            &placed.diagnostics[..],
            [ConvertError::PinOnOtherUnit { pin, pin_unit: 2, placed_unit: 1, .. }] if pin == "4"
        ));
    }

    #[test]
    fn test_bad_rotation_is_reported() {
        let lib = SymbolLibrary::new("orcad");
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut instance = part("U1", "X", (0.0, 0.0), 0);
        instance.placement.rotation = 7;
        let page = SchematicPage {
            instances: vec![instance],
            ..Default::default()
        };
        let placed = place_page(&page, &resolver, &options());
        assert!(matches!(
            placed.diagnostics[0],
            ConvertError::UnsupportedGeometry { .. }
        ));
    }

    #[test]
    fn test_connectivity_detects_split_and_merge() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        let c = Point::new(20.0, 0.0);
        let d = Point::new(30.0, 0.0);
        let net = |name: &str, wires: Vec<(Point, Point)>| PlacedNet {
            name: name.into(),
            naming: NetNaming::Synthesized,
            wires,
            labels: Vec::new(),
            junctions: Vec::new(),
            pins: Vec::new(),
        };

        let split = PlacedPage {
            nets: vec![net("N1", vec![(a, b), (c, d)])],
            ..Default::default()
        };
        assert!(matches!(
            split.check_connectivity(),
            Err(ConvertError::NetSplit { net }) if net == "N1"
        ));

        let merged = PlacedPage {
            nets: vec![net("N1", vec![(a, b)]), net("N2", vec![(b, c)])],
            ..Default::default()
        };
        assert!(matches!(
            merged.check_connectivity(),
            Err(ConvertError::NetMerged { .. })
        ));
    }

    #[test]
    fn test_tee_gets_a_junction() {
        let net = PlacedNet {
            name: "N".into(),
            naming: NetNaming::Synthesized,
            wires: vec![
                (Point::new(0.0, 0.0), Point::new(10.0, 0.0)),
                (Point::new(5.0, 0.0), Point::new(5.0, 5.0)),
            ],
            labels: Vec::new(),
            junctions: Vec::new(),
            pins: Vec::new(),
        };
        assert_eq!(junctions(&net, &[]), vec![Point::new(5.0, 0.0)]);
    }
}
