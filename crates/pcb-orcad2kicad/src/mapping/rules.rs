//! Lookup tables: primitive kind -> conversion rule, pin type -> KiCad type

use crate::model::PinElectricalType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// How a source primitive is expressed in a KiCad symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveRule {
    /// Two-point polyline
    Line,
    Rectangle,
    /// Circle, or an opt-in polygon approximation for true ellipses
    Ellipse,
    /// Three-point arc on a circular bounding box
    Arc,
    Polyline,
    /// Polyline closed back to its first vertex
    Polygon,
    Text,
}

/// Built-in primitive kinds, as emitted by the OrCAD decoder and by JSON records
static PRIMITIVE_RULES: LazyLock<Vec<(&'static str, PrimitiveRule)>> = LazyLock::new(|| {
    vec![
        ("PrimLine", PrimitiveRule::Line),
        ("Line", PrimitiveRule::Line),
        ("PrimRect", PrimitiveRule::Rectangle),
        ("Rect", PrimitiveRule::Rectangle),
        ("Rectangle", PrimitiveRule::Rectangle),
        ("PrimEllipse", PrimitiveRule::Ellipse),
        ("Ellipse", PrimitiveRule::Ellipse),
        ("Circle", PrimitiveRule::Ellipse),
        ("PrimArc", PrimitiveRule::Arc),
        ("Arc", PrimitiveRule::Arc),
        ("PrimPolyline", PrimitiveRule::Polyline),
        ("Polyline", PrimitiveRule::Polyline),
        ("PrimPolygon", PrimitiveRule::Polygon),
        ("Polygon", PrimitiveRule::Polygon),
        ("PrimCommentText", PrimitiveRule::Text),
        ("PrimText", PrimitiveRule::Text),
        ("Text", PrimitiveRule::Text),
    ]
});

/// Primitive rules in effect for one run: the built-in table plus
/// configured additions, which take precedence.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    extra: BTreeMap<String, PrimitiveRule>,
}

impl RuleTable {
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, kind: impl Into<String>, rule: PrimitiveRule) -> Self {
        self.extra.insert(kind.into(), rule);
        self
    }

    /// Rule for a primitive kind; a leading `OOCP::` namespace is ignored
    pub fn rule(&self, kind: &str) -> Option<PrimitiveRule> {
        let kind = kind.strip_prefix("OOCP::").unwrap_or(kind);
        self.extra.get(kind).copied().or_else(|| {
            PRIMITIVE_RULES
                .iter()
                .find(|(name, _)| *name == kind)
                .map(|(_, rule)| *rule)
        })
    }
}

/// OrCAD pin types, by numeric code and by name (lower case)
static PIN_TYPES: LazyLock<HashMap<&'static str, PinElectricalType>> = LazyLock::new(|| {
    use PinElectricalType::*;
    HashMap::from([
        ("0", Passive),
        ("1", Input),
        ("2", Output),
        ("3", Bidirectional),
        ("4", Passive),
        ("5", PowerIn),
        ("6", PowerOut),
        ("input", Input),
        ("output", Output),
        ("bidirectional", Bidirectional),
        ("bidir", Bidirectional),
        ("io", Bidirectional),
        ("tristate", TriState),
        ("3state", TriState),
        ("tri_state", TriState),
        ("passive", Passive),
        ("power", PowerIn),
        ("power_in", PowerIn),
        ("power_out", PowerOut),
        ("opencollector", OpenCollector),
        ("open_collector", OpenCollector),
        ("openemitter", OpenEmitter),
        ("open_emitter", OpenEmitter),
        ("unspecified", Unspecified),
        ("no_connect", NoConnect),
        ("free", Free),
    ])
});

/// Map an OrCAD pin type; `None` when the value is not in the table.
pub fn pin_electrical_type(raw: &str) -> Option<PinElectricalType> {
    PIN_TYPES.get(raw.trim().to_ascii_lowercase().as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules() {
        let rules = RuleTable::builtin();
        assert_eq!(rules.rule("PrimLine"), Some(PrimitiveRule::Line));
        assert_eq!(rules.rule("OOCP::PrimArc"), Some(PrimitiveRule::Arc));
        assert_eq!(rules.rule("PrimCommentText"), Some(PrimitiveRule::Text));
        assert_eq!(rules.rule("PrimBezier"), None);
        assert_eq!(rules.rule("PrimBitmap"), None);
    }

    #[test]
    fn test_configured_rules_take_precedence() {
        let rules = RuleTable::builtin()
            .with_rule("PrimSymbolVector", PrimitiveRule::Polyline)
            .with_rule("Circle", PrimitiveRule::Polygon);
        assert_eq!(rules.rule("PrimSymbolVector"), Some(PrimitiveRule::Polyline));
        assert_eq!(rules.rule("Circle"), Some(PrimitiveRule::Polygon));
        assert_eq!(rules.rule("PrimLine"), Some(PrimitiveRule::Line));
    }

    #[test]
    fn test_pin_types() {
        assert_eq!(pin_electrical_type("1"), Some(PinElectricalType::Input));
        assert_eq!(pin_electrical_type("5"), Some(PinElectricalType::PowerIn));
        assert_eq!(pin_electrical_type("Passive"), Some(PinElectricalType::Passive));
        assert_eq!(
            pin_electrical_type(" OpenCollector "),
            Some(PinElectricalType::OpenCollector)
        );
        assert_eq!(pin_electrical_type("9"), None);
        assert_eq!(pin_electrical_type("weird"), None);
    }
}
