//! Conversion settings, loadable from a TOML file
//!
//! ```toml
//! scale = "0.254"
//!
//! [symbols]
//! mirror_y = true
//! stitch = true
//! ellipse_segments = 36
//!
//! [symbols.primitive_kinds]
//! PrimSymbolVector = "polyline"
//!
//! [schematic]
//! library_nickname = "legacy"
//!
//! [parts]
//! "RES_0805" = { symbol = "Device:R", rotation = 90 }
//!
//! [prefixes]
//! C = "Device:C"
//! ```

use crate::error::{ConvertError, Result};
use crate::geometry::{GeometryError, Orientation, Rotation, Scale};
use crate::mapping::rules::{PrimitiveRule, RuleTable};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Everything a conversion run can be told
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Source unit to millimetre ratio; required before any conversion
    pub scale: Option<Scale>,
    pub symbols: SymbolOptions,
    pub schematic: SchematicOptions,
    #[serde(flatten)]
    pub part_map: PartMap,
}

impl ConvertConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Self::from_toml(&text).map_err(|reason| ConvertError::InvalidConfig {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Builder settings for one run, failing when no scale is known
    pub fn symbol_config(&self) -> Result<SymbolConfig> {
        let scale = self.scale.ok_or_else(|| ConvertError::InvalidConfig {
            path: "<config>".to_string(),
            reason: "a scale factor is required".to_string(),
        })?;
        Ok(SymbolConfig::new(scale).with_options(self.symbols.clone()))
    }
}

/// `[symbols]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SymbolOptions {
    /// Mirror left/right (`x -> -x`)
    pub mirror_x: bool,
    /// Mirror up/down (`y -> -y`)
    pub mirror_y: bool,
    /// Outline stroke width in millimetres
    pub stroke_width: f64,
    /// Join line segments that share endpoints into polylines
    pub stitch: bool,
    /// Endpoint distance, in source units, under which segments are joined
    pub join_tolerance: f64,
    /// Polygon approximation for non-circular ellipses; off when unset
    pub ellipse_segments: Option<u32>,
    /// Text size in millimetres when a record carries none
    pub text_height: f64,
    /// Extra primitive kinds and the rule each one follows
    pub primitive_kinds: BTreeMap<String, PrimitiveRule>,
}

impl Default for SymbolOptions {
    fn default() -> Self {
        Self {
            mirror_x: false,
            mirror_y: false,
            stroke_width: 0.254,
            stitch: false,
            join_tolerance: 1.0,
            ellipse_segments: None,
            text_height: 1.27,
            primitive_kinds: BTreeMap::new(),
        }
    }
}

/// Resolved settings handed to the symbol builder
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub scale: Scale,
    pub options: SymbolOptions,
    pub rules: RuleTable,
}

impl SymbolConfig {
    pub fn new(scale: Scale) -> Self {
        Self {
            scale,
            options: SymbolOptions::default(),
            rules: RuleTable::builtin(),
        }
    }

    pub fn with_options(mut self, options: SymbolOptions) -> Self {
        self.rules = options
            .primitive_kinds
            .iter()
            .fold(RuleTable::builtin(), |table, (kind, rule)| {
                table.with_rule(kind.clone(), *rule)
            });
        self.options = options;
        self
    }
}

/// `[schematic]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchematicOptions {
    pub paper: String,
    /// Nickname of the converted library in `lib_id`s and the library table
    pub library_nickname: String,
    /// Title block project name; the input file stem when unset
    pub project: Option<String>,
    /// Draw OrCAD power globals as power symbols rather than global labels
    pub power_symbols: bool,
}

impl Default for SchematicOptions {
    fn default() -> Self {
        Self {
            paper: "A4".to_string(),
            library_nickname: "orcad".to_string(),
            project: None,
            power_symbols: true,
        }
    }
}

/// Symbol a part maps to, with the orientation the symbol is drawn in
/// relative to the OrCAD graphic
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PartTargetSpec")]
pub struct PartTarget {
    /// Symbol name or `Lib:Name`
    pub symbol: String,
    pub rotation: Rotation,
    pub mirror: bool,
}

impl PartTarget {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            rotation: Rotation::Deg0,
            mirror: false,
        }
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::from_placement(self.rotation, self.mirror)
    }
}

/// A bare symbol name or a table with rotation (degrees) and mirror
#[derive(Deserialize)]
#[serde(untagged)]
enum PartTargetSpec {
    Name(String),
    Full {
        symbol: String,
        #[serde(default)]
        rotation: f64,
        #[serde(default)]
        mirror: bool,
    },
}

impl TryFrom<PartTargetSpec> for PartTarget {
    type Error = GeometryError;

    fn try_from(spec: PartTargetSpec) -> std::result::Result<Self, Self::Error> {
        match spec {
            PartTargetSpec::Name(symbol) => Ok(PartTarget::new(symbol)),
            PartTargetSpec::Full {
                symbol,
                rotation,
                mirror,
            } => Ok(PartTarget {
                symbol,
                rotation: Rotation::from_degrees(rotation)?,
                mirror,
            }),
        }
    }
}

/// `[parts]` and `[prefixes]`: part reference or designator prefix to target
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PartMap {
    pub parts: BTreeMap<String, PartTarget>,
    pub prefixes: BTreeMap<String, PartTarget>,
}

impl PartMap {
    /// Part reference entries win over designator prefix entries
    pub fn target(&self, part_reference: &str, designator_prefix: &str) -> Option<&PartTarget> {
        self.parts
            .get(part_reference)
            .or_else(|| self.prefixes.get(designator_prefix))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && self.prefixes.is_empty()
    }
}
