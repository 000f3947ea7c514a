//! Source schematic graph, in OrCAD units

use crate::geometry::Point;
use crate::resolve::ResolvedSymbol;
use std::collections::BTreeMap;

/// Every page of one OrCAD XML export
#[derive(Debug, Clone, Default)]
pub struct SchematicDesign {
    pub name: String,
    pub pages: Vec<SchematicPage>,
}

/// One schematic sheet
#[derive(Debug, Clone, Default)]
pub struct SchematicPage {
    pub name: String,
    pub instances: Vec<ComponentInstance>,
    pub wires: Vec<Wire>,
    pub labels: Vec<NetLabel>,
    pub junctions: Vec<Point>,
    /// Connected components, ordered by name
    pub nets: Vec<Net>,
}

impl SchematicPage {
    pub fn instance(&self, designator: &str) -> Option<&ComponentInstance> {
        self.instances.iter().find(|i| i.designator == designator)
    }

    pub fn net(&self, name: &str) -> Option<&Net> {
        self.nets.iter().find(|n| n.name == name)
    }
}

/// Position and orientation as stored by OrCAD
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourcePlacement {
    pub position: Point,
    /// Quarter-turn index as written in the export
    pub rotation: i64,
    /// Horizontal flip in symbol space
    pub mirror: bool,
}

/// A pin of a placed part with its absolute connection point
#[derive(Debug, Clone, PartialEq)]
pub struct InstancePin {
    pub number: String,
    pub name: String,
    pub hot: Point,
}

/// One placed part
#[derive(Debug, Clone)]
pub struct ComponentInstance {
    /// Reference designator, e.g. "U3"
    pub designator: String,
    /// Library part name the instance was placed from
    pub part_reference: String,
    pub value: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub placement: SourcePlacement,
    pub pins: Vec<InstancePin>,
    /// 1-based index of the `PartInst` element in the export
    pub element: usize,
    /// Filled in by the reference resolver
    pub resolved: Option<ResolvedSymbol>,
}

impl ComponentInstance {
    pub fn pin(&self, number: &str) -> Option<&InstancePin> {
        self.pins.iter().find(|p| p.number == number)
    }

    /// Leading letters of the designator ("R" for "R12")
    pub fn designator_prefix(&self) -> &str {
        let end = self
            .designator
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(self.designator.len());
        &self.designator[..end]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wire {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelKind {
    /// Net alias, visible on this page only
    Local,
    /// Global or power symbol; `symbol` is the OrCAD graphic name
    Global { symbol: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetLabel {
    pub name: String,
    pub position: Point,
    pub kind: LabelKind,
}

/// A connection endpoint of a net
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Pin { designator: String, pin: String },
    /// Wire end that touches no pin
    Point(Point),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetNaming {
    Label,
    Synthesized,
}

/// A connected component of the page graph
#[derive(Debug, Clone, PartialEq)]
pub struct Net {
    pub name: String,
    pub naming: NetNaming,
    pub endpoints: Vec<Endpoint>,
    /// Indices into `SchematicPage::wires`
    pub wires: Vec<usize>,
    /// Indices into `SchematicPage::labels`
    pub labels: Vec<usize>,
    /// Every distinct point of the component
    pub points: Vec<Point>,
}

impl Net {
    /// `(designator, pin)` pairs of this net
    pub fn pins(&self) -> impl Iterator<Item = (&str, &str)> {
        self.endpoints.iter().filter_map(|e| match e {
            Endpoint::Pin { designator, pin } => Some((designator.as_str(), pin.as_str())),
            Endpoint::Point(_) => None,
        })
    }

    pub fn has_pin(&self, designator: &str, pin: &str) -> bool {
        self.pins().any(|(d, p)| d == designator && p == pin)
    }
}
