//! Source symbol record -> KiCad symbol definition

use crate::config::SymbolConfig;
use crate::error::{ConvertError, Result};
use crate::geometry::{GeometryError, Orientation, Point, Rotation, Transform};
use crate::mapping::names::safe_symbol_name;
use crate::mapping::rules::{pin_electrical_type, PrimitiveRule};
use crate::model::{Fill, Graphic, Pin, PinElectricalType, Shape, SymbolDefinition};
use crate::parser::records::{SourceLibrary, SourcePin, SourcePrimitive, SourceSymbol};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::f64::consts::TAU;

/// Below this, in source units, a pin vector counts as zero
const PIN_EPSILON: f64 = 1e-6;

/// Soft findings for one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub symbol: String,
    /// `(pin number, raw type)` for pin types missing from the lookup table
    pub unknown_pin_types: Vec<(String, String)>,
    /// Pins and primitives the decoder emitted twice
    pub duplicates_dropped: usize,
    /// Line segments merged into longer polylines
    pub segments_stitched: usize,
}

/// Everything built from one source library
#[derive(Debug, Default)]
pub struct SymbolBatch {
    pub definitions: Vec<SymbolDefinition>,
    pub reports: Vec<BuildReport>,
    /// Symbols that could not be converted; the rest of the batch is unaffected
    pub failures: Vec<ConvertError>,
}

/// Convert every symbol of a library, collecting per-symbol failures.
pub fn build_library(source: &SourceLibrary, config: &SymbolConfig) -> SymbolBatch {
    let mut batch = SymbolBatch::default();
    let primary: HashSet<String> = source
        .symbols
        .iter()
        .filter(|s| !is_convert_view(&s.name))
        .map(|s| safe_symbol_name(&s.name))
        .collect();
    for symbol in &source.symbols {
        // De Morgan views share the primary view's name and pins.
        if is_convert_view(&symbol.name) && primary.contains(&safe_symbol_name(&symbol.name)) {
            log::debug!("{}: skipping alternate view {}", source.name, symbol.name);
            continue;
        }
        match build_symbol(symbol, config) {
            Ok((mut definition, report)) => {
                definition.source = format!("{}:{}", source.name, symbol.name);
                batch.definitions.push(definition);
                batch.reports.push(report);
            }
            Err(e) => {
                log::warn!("{}: {e}", source.name);
                batch.failures.push(e);
            }
        }
    }
    batch
}

/// Convert one decoded symbol.
pub fn build_symbol(
    source: &SourceSymbol,
    config: &SymbolConfig,
) -> Result<(SymbolDefinition, BuildReport)> {
    let name = safe_symbol_name(&source.name);
    if name.is_empty() {
        return Err(ConvertError::MalformedSymbolRecord {
            symbol: source.name.clone(),
            record: source.record,
            reason: "symbol name is empty after sanitizing".to_string(),
        });
    }

    let mut builder = Builder {
        source,
        config,
        name: name.clone(),
        local: Transform::new(config.scale).with_orientation(mirror(config)),
        report: BuildReport {
            symbol: name.clone(),
            ..Default::default()
        },
    };

    let mut definition = SymbolDefinition::new(&name, source.name.clone());
    definition.aliases = source
        .alias
        .as_deref()
        .map(safe_symbol_name)
        .filter(|alias| !alias.is_empty() && *alias != name)
        .into_iter()
        .collect();
    definition.properties = builder.properties();
    definition.pins = builder.pins()?;
    definition.graphics = builder.graphics()?;

    log::debug!(
        "Built symbol {name}: {} pin(s), {} graphic(s)",
        definition.pins.len(),
        definition.graphics.len()
    );
    Ok((definition, builder.report))
}

fn mirror(config: &SymbolConfig) -> Orientation {
    let mut orientation = Orientation::IDENTITY;
    if config.options.mirror_x {
        orientation = orientation.then(Orientation::MIRROR_HORIZONTAL);
    }
    if config.options.mirror_y {
        orientation = orientation.then(Orientation::MIRROR_VERTICAL);
    }
    orientation
}

struct Builder<'a> {
    source: &'a SourceSymbol,
    config: &'a SymbolConfig,
    name: String,
    local: Transform,
    report: BuildReport,
}

impl Builder<'_> {
    fn point(&self, x: f64, y: f64) -> Point {
        self.local.apply(Point::new(x, y))
    }

    fn malformed(&self, record: usize, reason: impl Into<String>) -> ConvertError {
        ConvertError::MalformedSymbolRecord {
            symbol: self.name.clone(),
            record,
            reason: reason.into(),
        }
    }

    // ====================================================================
    // Properties
    // ====================================================================

    fn properties(&self) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        let mut extra = self.source.properties.clone();

        let reference = self
            .source
            .reference_prefix
            .as_deref()
            .map(|p| p.trim_end_matches('?'))
            .filter(|p| !p.is_empty())
            .unwrap_or("U");
        let value = extra
            .remove("Value")
            .or_else(|| extra.remove("partValue"))
            .unwrap_or_else(|| self.name.clone());
        let footprint = extra
            .remove("Footprint")
            .or_else(|| extra.remove("pcbFootprint"))
            .unwrap_or_default();

        properties.insert("Reference".to_string(), reference.to_string());
        properties.insert("Value".to_string(), value);
        properties.insert("Footprint".to_string(), footprint);
        properties.extend(extra);
        properties
    }

    // ====================================================================
    // Pins
    // ====================================================================

    fn pins(&mut self) -> Result<Vec<Pin>> {
        let source = self.source;
        let mut seen = HashSet::new();
        let unique: Vec<&SourcePin> = source
            .pins
            .iter()
            .filter(|p| seen.insert(p.dedup_key()))
            .collect();
        self.report.duplicates_dropped += source.pins.len() - unique.len();

        let numbers = self.number_pins(&unique)?;
        unique
            .into_iter()
            .zip(numbers)
            .map(|(pin, (number, name))| self.pin(pin, number, name))
            .collect()
    }

    /// Assign `(number, display name)` to every pin.
    fn number_pins(&self, pins: &[&SourcePin]) -> Result<Vec<(String, String)>> {
        let display = |name: &str| {
            let name = name.trim();
            if name.is_empty() {
                "~".to_string()
            } else {
                name.to_string()
            }
        };

        let mut fixed: Vec<Option<(String, String)>> = Vec::with_capacity(pins.len());
        let mut used = BTreeSet::new();
        for pin in pins {
            let assigned = match pin.number.as_deref().map(str::trim) {
                Some(number) if !number.is_empty() => {
                    Some((number.to_string(), display(&pin.name)))
                }
                _ if is_pin_number(&pin.name) => {
                    Some((pin.name.trim().to_string(), "~".to_string()))
                }
                _ => None,
            };
            if let Some((number, _)) = &assigned {
                if !used.insert(number.clone()) {
                    return Err(self.malformed(pin.record, format!("duplicate pin number '{number}'")));
                }
            }
            fixed.push(assigned);
        }

        let mut next = 1u32;
        let numbered = fixed
            .into_iter()
            .zip(pins)
            .map(|(assigned, pin)| {
                assigned.unwrap_or_else(|| {
                    while used.contains(&next.to_string()) {
                        next += 1;
                    }
                    let number = next.to_string();
                    used.insert(number.clone());
                    (number, display(&pin.name))
                })
            })
            .collect();
        Ok(numbered)
    }

    fn pin(&mut self, source: &SourcePin, number: String, name: String) -> Result<Pin> {
        let (Some(start_x), Some(start_y)) = (source.start_x, source.start_y) else {
            return Err(self.malformed(
                source.record,
                format!("pin '{}' has no start point", source.name),
            ));
        };
        let hot_x = source.hot_x.unwrap_or(start_x);
        let hot_y = source.hot_y.unwrap_or(start_y);

        let into_body = pin_direction(source, start_x - hot_x, start_y - hot_y).map_err(|e| {
            ConvertError::geometry(format!("symbol '{}' pin {number}", self.name), e)
        })?;

        let electrical_type = match source.pin_type.as_deref() {
            None => PinElectricalType::Passive,
            Some(raw) => pin_electrical_type(raw).unwrap_or_else(|| {
                self.report
                    .unknown_pin_types
                    .push((number.clone(), raw.to_string()));
                PinElectricalType::Unspecified
            }),
        };

        Ok(Pin {
            number,
            name,
            electrical_type,
            position: self.point(hot_x, hot_y),
            orientation: self.mirror_angle(into_body),
            length: self
                .config
                .scale
                .apply((start_x - hot_x).hypot(start_y - hot_y)),
            unit: 1,
            style: 1,
            hidden: source.has_flag("isHidden") || source.has_flag("isInvisible"),
        })
    }

    fn mirror_angle(&self, angle: Rotation) -> Rotation {
        let mut turns = angle.quarter_turns() as i64;
        if self.config.options.mirror_x {
            turns = 2 - turns;
        }
        if self.config.options.mirror_y {
            turns = -turns;
        }
        Rotation::ALL[turns.rem_euclid(4) as usize]
    }

    // ====================================================================
    // Graphics
    // ====================================================================

    fn graphics(&mut self) -> Result<Vec<Graphic>> {
        let source = self.source;
        let mut seen = HashSet::new();
        let unique: Vec<&SourcePrimitive> = source
            .primitives
            .iter()
            .filter(|p| seen.insert(p.dedup_key()))
            .collect();
        self.report.duplicates_dropped += source.primitives.len() - unique.len();

        let stitch = self.config.options.stitch;
        let mut graphics = Vec::new();
        let mut segments: Vec<[[f64; 2]; 2]> = Vec::new();
        let mut stitch_slot = None;

        for primitive in unique {
            let rule = self.config.rules.rule(&primitive.kind).ok_or_else(|| {
                ConvertError::UnsupportedPrimitive {
                    symbol: self.name.clone(),
                    kind: primitive.kind.clone(),
                    record: primitive.record,
                }
            })?;

            if stitch && rule == PrimitiveRule::Line {
                let [x1, y1, x2, y2] = self.fields(primitive, ["x1", "y1", "x2", "y2"])?;
                segments.push([[x1, y1], [x2, y2]]);
                stitch_slot.get_or_insert(graphics.len());
                continue;
            }
            graphics.push(self.graphic(primitive, rule)?);
        }

        if let Some(slot) = stitch_slot {
            let chains = stitch_segments(&segments, self.config.options.join_tolerance);
            self.report.segments_stitched = segments.len() - chains.len();
            let lines: Vec<Graphic> = chains
                .into_iter()
                .map(|chain| {
                    let points = chain.iter().map(|[x, y]| self.point(*x, *y)).collect();
                    self.outline(Shape::Polyline { points }, Fill::None)
                })
                .collect();
            graphics.splice(slot..slot, lines);
        }
        Ok(graphics)
    }

    fn outline(&self, shape: Shape, fill: Fill) -> Graphic {
        Graphic {
            shape,
            stroke_width: self.config.options.stroke_width,
            fill,
            unit: 0,
            style: 1,
        }
    }

    fn fields<const N: usize>(&self, primitive: &SourcePrimitive, keys: [&str; N]) -> Result<[f64; N]> {
        let mut values = [0.0; N];
        for (value, key) in values.iter_mut().zip(keys) {
            *value = primitive.number(key).ok_or_else(|| {
                self.malformed(
                    primitive.record,
                    format!("{} is missing numeric field '{key}'", primitive.kind),
                )
            })?;
        }
        Ok(values)
    }

    fn graphic(&self, primitive: &SourcePrimitive, rule: PrimitiveRule) -> Result<Graphic> {
        let fill = if primitive.flag("filled") {
            Fill::Background
        } else {
            Fill::None
        };
        let entity = format!("symbol '{}' record {}", self.name, primitive.record);

        let shape = match rule {
            PrimitiveRule::Line => {
                let [x1, y1, x2, y2] = self.fields(primitive, ["x1", "y1", "x2", "y2"])?;
                Shape::Polyline {
                    points: vec![self.point(x1, y1), self.point(x2, y2)],
                }
            }
            PrimitiveRule::Rectangle => {
                let [x1, y1, x2, y2] = self.fields(primitive, ["x1", "y1", "x2", "y2"])?;
                Shape::Rectangle {
                    start: self.point(x1, y1),
                    end: self.point(x2, y2),
                }
            }
            PrimitiveRule::Ellipse => self.ellipse(primitive, &entity)?,
            PrimitiveRule::Arc => self.arc(primitive, &entity)?,
            PrimitiveRule::Polyline | PrimitiveRule::Polygon => {
                let closed = rule == PrimitiveRule::Polygon;
                let minimum = if closed { 3 } else { 2 };
                if primitive.points.len() < minimum {
                    return Err(self.malformed(
                        primitive.record,
                        format!(
                            "{} needs at least {minimum} points, has {}",
                            primitive.kind,
                            primitive.points.len()
                        ),
                    ));
                }
                let mut points: Vec<Point> = primitive
                    .points
                    .iter()
                    .map(|[x, y]| self.point(*x, *y))
                    .collect();
                if closed && points.first() != points.last() {
                    points.push(points[0]);
                }
                Shape::Polyline { points }
            }
            PrimitiveRule::Text => self.text(primitive, &entity)?,
        };
        Ok(self.outline(shape, fill))
    }

    /// Circle, or a closed polygon when approximation is switched on
    fn ellipse(&self, primitive: &SourcePrimitive, entity: &str) -> Result<Shape> {
        let [x1, y1, x2, y2] = self.fields(primitive, ["x1", "y1", "x2", "y2"])?;
        let (width, height) = ((x2 - x1).abs(), (y2 - y1).abs());
        if width <= 0.0 || height <= 0.0 {
            return Err(self.malformed(
                primitive.record,
                format!("{} has an empty bounding box", primitive.kind),
            ));
        }
        let (cx, cy) = ((x1 + x2) / 2.0, (y1 + y2) / 2.0);
        if (width - height).abs() < PIN_EPSILON {
            return Ok(Shape::Circle {
                center: self.point(cx, cy),
                radius: self.config.scale.apply(width / 2.0),
            });
        }

        let Some(segments) = self.config.options.ellipse_segments.filter(|n| *n >= 8) else {
            return Err(ConvertError::geometry(
                entity,
                GeometryError::Ellipse(width, height),
            ));
        };
        let mut points: Vec<Point> = (0..segments)
            .map(|i| {
                let t = TAU * f64::from(i) / f64::from(segments);
                self.point(cx + width / 2.0 * t.cos(), cy + height / 2.0 * t.sin())
            })
            .collect();
        points.push(points[0]);
        Ok(Shape::Polyline { points })
    }

    /// Three-point arc, sweeping counter-clockwise (increasing angle) from
    /// start to end around the centre of a square bounding box.
    fn arc(&self, primitive: &SourcePrimitive, entity: &str) -> Result<Shape> {
        let [x1, y1, x2, y2] = self.fields(primitive, ["x1", "y1", "x2", "y2"])?;
        let [sx, sy, ex, ey] = self.fields(primitive, ["startX", "startY", "endX", "endY"])?;
        let (width, height) = ((x2 - x1).abs(), (y2 - y1).abs());
        if (width - height).abs() >= PIN_EPSILON {
            return Err(ConvertError::geometry(
                entity,
                GeometryError::EllipticalArc(width, height),
            ));
        }
        let (cx, cy) = ((x1 + x2) / 2.0, (y1 + y2) / 2.0);
        let radius = width / 2.0;

        let start = (sy - cy).atan2(sx - cx);
        let end = (ey - cy).atan2(ex - cx);
        let mut sweep = (end - start).rem_euclid(TAU);
        if sweep == 0.0 {
            sweep = TAU;
        }
        let on_circle = |angle: f64| self.point(cx + radius * angle.cos(), cy + radius * angle.sin());

        Ok(Shape::Arc {
            start: on_circle(start),
            mid: on_circle(start + sweep / 2.0),
            end: on_circle(end),
        })
    }

    fn text(&self, primitive: &SourcePrimitive, entity: &str) -> Result<Shape> {
        let text = primitive
            .text("text")
            .or_else(|| primitive.text("name"))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| self.malformed(primitive.record, "text has no content"))?;
        let [x, y] = self.fields(primitive, ["x", "y"])?;
        let angle = Rotation::from_degrees(primitive.number("rotation").unwrap_or(0.0))
            .map_err(|e| ConvertError::geometry(entity, e))?;
        let size = primitive
            .number("fontHeight")
            .or_else(|| primitive.number("size"))
            .map(|h| self.config.scale.apply(h))
            .unwrap_or(self.config.options.text_height);

        Ok(Shape::Text {
            text: text.to_string(),
            position: self.point(x, y),
            angle,
            size,
        })
    }
}

/// `NAME.Convert`, the De Morgan body of a part
fn is_convert_view(name: &str) -> bool {
    name.trim()
        .rsplit_once('.')
        .is_some_and(|(_, view)| view.eq_ignore_ascii_case("convert"))
}

/// Purely numeric pin names double as pin numbers
fn is_pin_number(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit())
}

/// Direction from the hot point into the body. The decoder's Y axis points
/// up, like KiCad's library axes.
fn pin_direction(pin: &SourcePin, vx: f64, vy: f64) -> std::result::Result<Rotation, GeometryError> {
    let vx = if vx.abs() <= PIN_EPSILON { 0.0 } else { vx };
    let vy = if vy.abs() <= PIN_EPSILON { 0.0 } else { vy };
    match (vx == 0.0, vy == 0.0) {
        (true, true) => Ok(pointing_flag(pin)),
        (false, true) if vx > 0.0 => Ok(Rotation::Deg0),
        (false, true) => Ok(Rotation::Deg180),
        (true, false) if vy > 0.0 => Ok(Rotation::Deg90),
        (true, false) => Ok(Rotation::Deg270),
        (false, false) => Err(GeometryError::DiagonalPin(vx, vy)),
    }
}

fn pointing_flag(pin: &SourcePin) -> Rotation {
    if pin.has_flag("isRightPointing") {
        Rotation::Deg0
    } else if pin.has_flag("isLeftPointing") {
        Rotation::Deg180
    } else if pin.has_flag("isUpPointing") {
        Rotation::Deg90
    } else if pin.has_flag("isDownPointing") || pin.has_flag("isClock") {
        Rotation::Deg270
    } else {
        Rotation::Deg0
    }
}

/// Join segments whose endpoints lie within `tolerance` into chains.
///
/// Chains grow from the first unused segment in input order. A chain whose
/// ends meet is closed on its first vertex.
fn stitch_segments(segments: &[[[f64; 2]; 2]], tolerance: f64) -> Vec<Vec<[f64; 2]>> {
    let close = |a: [f64; 2], b: [f64; 2]| {
        (a[0] - b[0]).abs() <= tolerance && (a[1] - b[1]).abs() <= tolerance
    };

    let mut unused: Vec<[[f64; 2]; 2]> = segments.to_vec();
    let mut chains = Vec::new();
    while !unused.is_empty() {
        let [a, b] = unused.remove(0);
        let mut chain = vec![a, b];
        loop {
            let tail = chain[chain.len() - 1];
            let head = chain[0];
            let Some((index, extend)) = unused.iter().enumerate().find_map(|(i, [p, q])| {
                if close(*p, tail) {
                    Some((i, (true, *q)))
                } else if close(*q, tail) {
                    Some((i, (true, *p)))
                } else if close(*p, head) {
                    Some((i, (false, *q)))
                } else if close(*q, head) {
                    Some((i, (false, *p)))
                } else {
                    None
                }
            }) else {
                break;
            };
            unused.remove(index);
            match extend {
                (true, point) => chain.push(point),
                (false, point) => chain.insert(0, point),
            }
        }
        let last = chain.len() - 1;
        if last >= 2 && close(chain[0], chain[last]) {
            chain[last] = chain[0];
        }
        chains.push(chain);
    }
    chains
}
