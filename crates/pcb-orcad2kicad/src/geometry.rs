//! Coordinate and unit conversion shared by every stage.
//!
//! Source coordinates are OrCAD units (usually 1/100 inch), destination
//! coordinates are millimetres rounded to KiCad's 0.0001 mm resolution.
//! Orientations are exact integer matrices so that composing rotations and
//! mirrors never accumulates error.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Decimal places kept in destination coordinates
pub const GRID_DECIMALS: u32 = 4;

/// Round a millimetre value to the destination grid, folding `-0` into `0`.
pub fn round_to_grid(value: f64) -> f64 {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Geometry that KiCad cannot represent exactly
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("rotation of {0} degrees is not a multiple of 90")]
    NonRightAngle(f64),
    #[error("rotation index {0} is outside 0..=3")]
    RotationIndex(i64),
    #[error("pin direction ({0}, {1}) is not axis-aligned")]
    DiagonalPin(f64, f64),
    #[error("arc bounding box {0} x {1} is not circular")]
    EllipticalArc(f64, f64),
    #[error("ellipse {0} x {1} is not a circle")]
    Ellipse(f64, f64),
    #[error("scale factor must be positive, got {0}")]
    NonPositiveScale(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn rounded(self) -> Self {
        Self::new(round_to_grid(self.x), round_to_grid(self.y))
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Equal within the destination grid
    pub fn coincides(self, other: Point) -> bool {
        (self.x - other.x).abs() < 0.5e-4 && (self.y - other.y).abs() < 0.5e-4
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Counter-clockwise rotation in quarter turns, as seen on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    /// OrCAD stores placement rotation as an index 0..=3.
    pub fn from_quarter_turns(turns: i64) -> Result<Self, GeometryError> {
        match turns {
            0 => Ok(Rotation::Deg0),
            1 => Ok(Rotation::Deg90),
            2 => Ok(Rotation::Deg180),
            3 => Ok(Rotation::Deg270),
            other => Err(GeometryError::RotationIndex(other)),
        }
    }

    pub fn from_degrees(degrees: f64) -> Result<Self, GeometryError> {
        let turns = degrees / 90.0;
        if !turns.is_finite() || (turns - turns.round()).abs() > 1e-9 {
            return Err(GeometryError::NonRightAngle(degrees));
        }
        let index = (turns.round() as i64).rem_euclid(4);
        Ok(Self::ALL[index as usize])
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub fn quarter_turns(self) -> usize {
        self as usize
    }

    pub fn plus(self, other: Rotation) -> Rotation {
        Self::ALL[(self.quarter_turns() + other.quarter_turns()) % 4]
    }
}

/// An exact orthogonal 2x2 matrix on Y-down coordinates.
///
/// Row-major `[xx, xy, yx, yy]`: `x' = xx*x + xy*y`, `y' = yx*x + yy*y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Orientation {
    m: [i8; 4],
}

impl Default for Orientation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Orientation {
    pub const IDENTITY: Orientation = Orientation { m: [1, 0, 0, 1] };
    /// `x -> -x` (KiCad `(mirror y)`)
    pub const MIRROR_HORIZONTAL: Orientation = Orientation { m: [-1, 0, 0, 1] };
    /// `y -> -y` (KiCad `(mirror x)`)
    pub const MIRROR_VERTICAL: Orientation = Orientation { m: [1, 0, 0, -1] };

    pub fn rotation(rotation: Rotation) -> Self {
        let m = match rotation {
            Rotation::Deg0 => [1, 0, 0, 1],
            // Counter-clockwise on a Y-down sheet: right becomes up.
            Rotation::Deg90 => [0, 1, -1, 0],
            Rotation::Deg180 => [-1, 0, 0, -1],
            Rotation::Deg270 => [0, -1, 1, 0],
        };
        Self { m }
    }

    /// OrCAD placement: mirror in symbol space, then rotate.
    pub fn from_placement(rotation: Rotation, mirror: bool) -> Self {
        let base = if mirror {
            Self::MIRROR_HORIZONTAL
        } else {
            Self::IDENTITY
        };
        base.then(Self::rotation(rotation))
    }

    /// Apply `self` first, then `next`.
    pub fn then(self, next: Orientation) -> Orientation {
        let [a, b, c, d] = next.m;
        let [e, f, g, h] = self.m;
        Orientation {
            m: [a * e + b * g, a * f + b * h, c * e + d * g, c * f + d * h],
        }
    }

    pub fn apply(self, p: Point) -> Point {
        let [xx, xy, yx, yy] = self.m;
        let x = f64::from(xx) * p.x + f64::from(xy) * p.y;
        let y = f64::from(yx) * p.x + f64::from(yy) * p.y;
        // Fold the -0.0 that a negated zero coordinate would produce.
        Point::new(x + 0.0, y + 0.0)
    }

    pub fn is_mirrored(self) -> bool {
        let [xx, xy, yx, yy] = self.m;
        xx * yy - xy * yx < 0
    }

    /// Decompose into KiCad's `(at x y angle)` plus optional `(mirror x)`.
    ///
    /// KiCad rotates first and mirrors afterwards, so a mirrored orientation
    /// `O` is written as the rotation `R` with `O = R.then(MIRROR_VERTICAL)`.
    pub fn kicad_form(self) -> (Rotation, bool) {
        let mirrored = self.is_mirrored();
        let rotation = if mirrored {
            self.then(Self::MIRROR_VERTICAL)
        } else {
            self
        };
        let angle = match (rotation.m[0], rotation.m[1]) {
            (1, 0) => Rotation::Deg0,
            (0, 1) => Rotation::Deg90,
            (-1, 0) => Rotation::Deg180,
            _ => Rotation::Deg270,
        };
        (angle, mirrored)
    }
}

/// Exact source-unit to millimetre ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Scale(Decimal);

impl Scale {
    pub const ONE: Scale = Scale(Decimal::ONE);

    pub fn new(factor: Decimal) -> Result<Self, GeometryError> {
        if factor <= Decimal::ZERO {
            return Err(GeometryError::NonPositiveScale(factor));
        }
        Ok(Self(factor))
    }

    pub fn factor(self) -> Decimal {
        self.0
    }

    /// Scale a length, rounding to the destination grid.
    pub fn apply(self, value: f64) -> f64 {
        let exact = Decimal::from_f64(value)
            .and_then(|v| v.checked_mul(self.0))
            .map(|v| v.round_dp_with_strategy(GRID_DECIMALS, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_f64());
        match exact {
            Some(v) => round_to_grid(v),
            None => round_to_grid(value * self.0.to_f64().unwrap_or(1.0)),
        }
    }

    /// Map a destination value back to source units (no rounding).
    pub fn invert(self, value: f64) -> f64 {
        value / self.0.to_f64().unwrap_or(1.0)
    }
}

impl TryFrom<Decimal> for Scale {
    type Error = GeometryError;
    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Scale::new(value)
    }
}

impl From<Scale> for Decimal {
    fn from(scale: Scale) -> Decimal {
        scale.0
    }
}

impl FromStr for Scale {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| format!("invalid scale '{s}': {e}"))?;
        Scale::new(value).map_err(|e| e.to_string())
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scale, then orient, then translate; results land on the destination grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Scale,
    pub orientation: Orientation,
    pub offset: Point,
}

impl Transform {
    pub fn new(scale: Scale) -> Self {
        Self {
            scale,
            orientation: Orientation::IDENTITY,
            offset: Point::ORIGIN,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_offset(mut self, offset: Point) -> Self {
        self.offset = offset;
        self
    }

    pub fn apply(&self, p: Point) -> Point {
        let scaled = Point::new(self.scale.apply(p.x), self.scale.apply(p.y));
        (self.orientation.apply(scaled) + self.offset).rounded()
    }

    pub fn length(&self, value: f64) -> f64 {
        self.scale.apply(value)
    }
}
