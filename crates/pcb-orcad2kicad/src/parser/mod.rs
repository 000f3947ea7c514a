//! Readers for the source formats and for existing KiCad libraries

pub mod library;
pub mod records;
pub mod schematic;
pub mod symbol_log;

use crate::error::{ConvertError, Result};
use records::SourceLibrary;
use std::fs;
use std::path::Path;

/// Load decoder output: `.json` records, anything else as a decoder log.
///
/// The library is named after the file stem.
pub fn load_source_library(path: &Path) -> Result<SourceLibrary> {
    let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let library = if is_json {
        SourceLibrary::from_json(&name, &text)?
    } else {
        symbol_log::parse_log(&name, &text)
    };
    log::info!(
        "Read {} symbol record(s) from {}",
        library.symbols.len(),
        path.display()
    );
    Ok(library)
}
