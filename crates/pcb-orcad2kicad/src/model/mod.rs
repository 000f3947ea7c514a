//! In-memory models for both sides of the conversion

mod schematic;
mod symbol;

pub use schematic::{
    ComponentInstance, Endpoint, InstancePin, LabelKind, Net, NetLabel, NetNaming,
    SchematicDesign, SchematicPage, SourcePlacement, Wire,
};
pub use symbol::{Fill, Graphic, Pin, PinElectricalType, Shape, SymbolDefinition};
