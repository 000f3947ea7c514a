//! Intermediate symbol records produced by the OrCAD library decoder
//!
//! Coordinates are raw OrCAD units with the decoder's axes. The JSON form
//! mirrors these structs field for field.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One decoded OrCAD library (`.OLB`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceLibrary {
    pub name: String,
    #[serde(default)]
    pub symbols: Vec<SourceSymbol>,
}

impl SourceLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: Vec::new(),
        }
    }

    /// Parse the JSON form. Records without an explicit index are numbered
    /// by position, starting at 1.
    pub fn from_json(name: &str, text: &str) -> Result<Self> {
        let mut library: SourceLibrary = serde_json::from_str(text)?;
        if library.name.is_empty() {
            library.name = name.to_string();
        }
        for (i, symbol) in library.symbols.iter_mut().enumerate() {
            if symbol.record == 0 {
                symbol.record = i + 1;
            }
            for (j, pin) in symbol.pins.iter_mut().enumerate() {
                if pin.record == 0 {
                    pin.record = j + 1;
                }
            }
            for (j, primitive) in symbol.primitives.iter_mut().enumerate() {
                if primitive.record == 0 {
                    primitive.record = j + 1;
                }
            }
        }
        Ok(library)
    }

    pub fn symbol(&self, name: &str) -> Option<&SourceSymbol> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

/// A symbol as the decoder saw it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSymbol {
    /// OrCAD part name, possibly with a `.Normal`/`.Convert` view suffix
    pub name: String,
    /// Reference designator prefix ("R", "U")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_prefix: Option<String>,
    /// Second part name sharing this graphic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub pins: Vec<SourcePin>,
    #[serde(default)]
    pub primitives: Vec<SourcePrimitive>,
    /// `partValue`, `pcbFootprint` and anything else worth carrying over
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Record index for diagnostics
    #[serde(default)]
    pub record: usize,
}

impl SourceSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A pin: a short line from the body (`start`) to the connection point (`hot`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePin {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    pub start_x: Option<f64>,
    pub start_y: Option<f64>,
    /// Hot point; falls back to the start point when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hot_y: Option<f64>,
    /// OrCAD pin type, numeric code or name
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub pin_type: Option<String>,
    /// Boolean attributes that were set (`isLeftPointing`, `isClock`, ...)
    #[serde(default)]
    pub flags: BTreeSet<String>,
    #[serde(default)]
    pub record: usize,
}

impl SourcePin {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Identity used to drop pins the decoder emitted twice
    pub(crate) fn dedup_key(&self) -> String {
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
            self.name, self.number, self.start_x, self.start_y, self.hot_x, self.hot_y
        )
    }
}

/// A scalar attribute of a primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    /// Numbers, plus text that parses as one
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            FieldValue::Flag(b) => *b,
            FieldValue::Number(n) => *n != 0.0,
            FieldValue::Text(s) => s.eq_ignore_ascii_case("true") || s == "1",
        }
    }

    /// Interpret decoder text: numbers become `Number`, `true`/`false` `Flag`
    pub fn from_log(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<f64>() {
            FieldValue::Number(n)
        } else if raw.eq_ignore_ascii_case("true") {
            FieldValue::Flag(true)
        } else if raw.eq_ignore_ascii_case("false") {
            FieldValue::Flag(false)
        } else {
            FieldValue::Text(raw.to_string())
        }
    }
}

/// One graphic primitive (`PrimLine`, `PrimRect`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePrimitive {
    pub kind: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Vertices of polylines and polygons
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
    #[serde(default)]
    pub record: usize,
}

impl SourcePrimitive {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, key: &str, value: f64) -> Self {
        self.fields.insert(key.to_string(), FieldValue::Number(value));
        self
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_number)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_text)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.fields.get(key).is_some_and(FieldValue::is_true)
    }

    /// Identity used to drop primitives the decoder emitted twice
    pub(crate) fn dedup_key(&self) -> String {
        format!("{}|{:?}|{:?}", self.kind, self.fields, self.points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_numbers_records() {
        let json = r#"{
            "name": "",
            "symbols": [
                {
                    "name": "RES.Normal",
                    "reference_prefix": "R",
                    "pins": [
                        { "name": "1", "start_x": 0, "start_y": 10, "hot_x": 0, "hot_y": 0, "type": "4" },
                        { "name": "2", "start_x": 0, "start_y": 20, "hot_x": 0, "hot_y": 30, "flags": ["isClock"] }
                    ],
                    "primitives": [
                        { "kind": "PrimRect", "fields": { "x1": 0, "y1": 0, "x2": 100, "y2": "100" } },
                        { "kind": "PrimPolyline", "points": [[0, 0], [5, 5]] }
                    ],
                    "properties": { "partValue": "10k" }
                }
            ]
        }"#;
        let lib = SourceLibrary::from_json("DISCRETE", json).unwrap();
        assert_eq!(lib.name, "DISCRETE");
        let sym = lib.symbol("RES.Normal").unwrap();
        assert_eq!(sym.record, 1);
        assert_eq!(sym.pins[1].record, 2);
        assert!(sym.pins[1].has_flag("isClock"));
        assert_eq!(sym.pins[0].pin_type.as_deref(), Some("4"));
        assert_eq!(sym.primitives[0].number("y2"), Some(100.0));
        assert_eq!(sym.primitives[1].points, vec![[0.0, 0.0], [5.0, 5.0]]);
        assert_eq!(sym.primitives[1].record, 2);
    }

    #[test]
    fn test_field_values_from_log() {
        assert_eq!(FieldValue::from_log(" -30 "), FieldValue::Number(-30.0));
        assert_eq!(FieldValue::from_log("true"), FieldValue::Flag(true));
        assert_eq!(
            FieldValue::from_log("Arial"),
            FieldValue::Text("Arial".to_string())
        );
        assert!(FieldValue::Text("1".into()).is_true());
    }

    #[test]
    fn test_bad_json() {
        assert!(SourceLibrary::from_json("x", "{ \"symbols\": 3 }").is_err());
    }
}
