//! Error taxonomy for the conversion pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while converting OrCAD data to KiCad
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Non-right-angle rotation or a transform KiCad cannot represent
    #[error("unsupported geometry in {entity}: {reason}")]
    UnsupportedGeometry { entity: String, reason: String },

    /// A symbol graphic with no KiCad counterpart
    #[error("symbol '{symbol}' record {record}: unsupported primitive kind '{kind}'")]
    UnsupportedPrimitive {
        symbol: String,
        kind: String,
        record: usize,
    },

    /// Two inputs define the same symbol name with different geometry
    #[error("symbol '{name}' is defined differently in {first_source} and {second_source}")]
    ConflictingSymbolDefinition {
        name: String,
        first_source: String,
        second_source: String,
    },

    /// The schematic export lacks structure required to build a page
    #[error("malformed schematic page '{page}', {element}: {reason}")]
    MalformedSchematic {
        page: String,
        element: String,
        reason: String,
    },

    /// An intermediate symbol record is missing required data
    #[error("malformed symbol record '{symbol}' (record {record}): {reason}")]
    MalformedSymbolRecord {
        symbol: String,
        record: usize,
        reason: String,
    },

    /// Soft failure: collected into the unresolved report, never returned
    #[error("{designator}: no symbol found for part reference '{part_reference}'")]
    UnresolvedReference {
        designator: String,
        part_reference: String,
    },

    /// A source pin has no counterpart in the resolved symbol
    #[error("{designator}: pin '{pin}' does not exist in symbol {lib_id}")]
    UnmappedPin {
        designator: String,
        pin: String,
        lib_id: String,
    },

    /// A source pin exists only on a unit other than the one placed
    #[error("{designator}: pin '{pin}' is on unit {pin_unit} of {lib_id}, but unit {placed_unit} is placed")]
    PinOnOtherUnit {
        designator: String,
        pin: String,
        lib_id: String,
        pin_unit: u32,
        placed_unit: u32,
    },

    #[error("net '{net}' is split in the converted schematic")]
    NetSplit { net: String },

    #[error("nets '{first}' and '{second}' are merged in the converted schematic")]
    NetMerged { first: String, second: String },

    #[error("invalid XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("failed to parse {path}: {source}")]
    Sexpr {
        path: String,
        #[source]
        source: pcb_sexpr::ParseError,
    },

    #[error("invalid symbol library {path}: {reason}")]
    InvalidLibrary { path: String, reason: String },

    #[error("invalid configuration {path}: {reason}")]
    InvalidConfig { path: String, reason: String },

    #[error("invalid symbol records: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl ConvertError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn geometry(entity: impl Into<String>, reason: impl ToString) -> Self {
        ConvertError::UnsupportedGeometry {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }
}
