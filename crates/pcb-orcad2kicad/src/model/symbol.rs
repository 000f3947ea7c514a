//! Destination symbol definitions

use crate::geometry::{Point, Rotation};
use pcb_sexpr::Sexpr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// KiCad pin electrical types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinElectricalType {
    Input,
    Output,
    Bidirectional,
    TriState,
    Passive,
    Free,
    Unspecified,
    PowerIn,
    PowerOut,
    OpenCollector,
    OpenEmitter,
    NoConnect,
}

impl PinElectricalType {
    pub const ALL: [PinElectricalType; 12] = [
        Self::Input,
        Self::Output,
        Self::Bidirectional,
        Self::TriState,
        Self::Passive,
        Self::Free,
        Self::Unspecified,
        Self::PowerIn,
        Self::PowerOut,
        Self::OpenCollector,
        Self::OpenEmitter,
        Self::NoConnect,
    ];

    /// Token used in `.kicad_sym` files
    pub fn kicad_name(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Bidirectional => "bidirectional",
            Self::TriState => "tri_state",
            Self::Passive => "passive",
            Self::Free => "free",
            Self::Unspecified => "unspecified",
            Self::PowerIn => "power_in",
            Self::PowerOut => "power_out",
            Self::OpenCollector => "open_collector",
            Self::OpenEmitter => "open_emitter",
            Self::NoConnect => "no_connect",
        }
    }

    pub fn from_kicad_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.kicad_name() == name)
    }
}

/// A symbol pin in millimetres, KiCad library axes (Y up)
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    /// Pin designator, unique within a unit (e.g. "1", "A3")
    pub number: String,
    /// Display name, `~` when the pin is unnamed
    pub name: String,
    pub electrical_type: PinElectricalType,
    /// Connection point (OrCAD hot point)
    pub position: Point,
    /// Direction from the connection point into the body
    pub orientation: Rotation,
    pub length: f64,
    /// Unit number, 0 for pins common to all units
    pub unit: u32,
    /// Body style (1 normal, 2 De Morgan)
    pub style: u32,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fill {
    #[default]
    None,
    Outline,
    Background,
}

impl Fill {
    pub fn kicad_name(self) -> &'static str {
        match self {
            Fill::None => "none",
            Fill::Outline => "outline",
            Fill::Background => "background",
        }
    }

    pub fn from_kicad_name(name: &str) -> Self {
        match name {
            "outline" => Fill::Outline,
            "background" => Fill::Background,
            _ => Fill::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Polyline { points: Vec<Point> },
    Rectangle { start: Point, end: Point },
    Circle { center: Point, radius: f64 },
    Arc { start: Point, mid: Point, end: Point },
    Text {
        text: String,
        position: Point,
        angle: Rotation,
        size: f64,
    },
    /// Graphic read from a pre-existing library that is carried through
    /// untouched (bezier curves and the like)
    Foreign(Sexpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graphic {
    pub shape: Shape,
    pub stroke_width: f64,
    pub fill: Fill,
    pub unit: u32,
    pub style: u32,
}

/// A named KiCad symbol
#[derive(Debug, Clone)]
pub struct SymbolDefinition {
    pub name: String,
    /// Other names the symbol is known by, each written as an `extends` entry
    pub aliases: Vec<String>,
    /// Reference, Value, Footprint and user fields
    pub properties: BTreeMap<String, String>,
    pub pins: Vec<Pin>,
    pub graphics: Vec<Graphic>,
    pub origin: Point,
    /// Power-flag symbol (`(power)` in KiCad)
    pub power: bool,
    /// Where the definition came from; diagnostics only
    pub source: String,
}

impl PartialEq for SymbolDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.aliases == other.aliases
            && self.properties == other.properties
            && self.origin == other.origin
            && self.power == other.power
            && self.same_geometry(other)
    }
}

impl SymbolDefinition {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            properties: BTreeMap::new(),
            pins: Vec::new(),
            graphics: Vec::new(),
            origin: Point::ORIGIN,
            power: false,
            source: source.into(),
        }
    }

    /// Pins and graphics match; the merge key for library conflicts
    pub fn same_geometry(&self, other: &SymbolDefinition) -> bool {
        self.pins == other.pins && self.graphics == other.graphics
    }

    /// Look a pin up by number
    pub fn pin(&self, number: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.number == number)
    }

    /// Pins drawn when `unit` is placed in the normal body style
    pub fn unit_pins(&self, unit: u32) -> impl Iterator<Item = &Pin> {
        self.pins
            .iter()
            .filter(move |p| (p.unit == 0 || p.unit == unit) && p.style <= 1)
    }

    /// Units with pins of their own, ascending
    pub fn units(&self) -> Vec<u32> {
        let mut units: Vec<u32> = self.pins.iter().map(|p| p.unit).filter(|&u| u != 0).collect();
        units.sort_unstable();
        units.dedup();
        units
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Reference designator prefix, `U` when unset
    pub fn reference_prefix(&self) -> &str {
        self.property("Reference").unwrap_or("U")
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.iter().any(|a| a == name)
    }

    /// Whether `name` names this symbol or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.has_alias(name)
    }
}
