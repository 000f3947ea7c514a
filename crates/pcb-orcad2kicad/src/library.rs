//! Converted symbol libraries and how they reach disk

use crate::emit::symbols::{header_items, library_nodes};
use crate::error::{ConvertError, Result};
use crate::model::SymbolDefinition;
use crate::parser::library::read_library;
use pcb_sexpr::formatter::{format_tree, FormatMode};
use pcb_sexpr::Sexpr;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Symbols keyed by name, in insertion order
#[derive(Debug, Clone, Default)]
pub struct SymbolLibrary {
    nickname: String,
    symbols: Vec<SymbolDefinition>,
    index: HashMap<String, usize>,
}

impl PartialEq for SymbolLibrary {
    fn eq(&self, other: &Self) -> bool {
        self.nickname == other.nickname && self.symbols == other.symbols
    }
}

impl SymbolLibrary {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    /// Load a `.kicad_sym` file
    pub fn from_file(path: &Path, nickname: impl Into<String>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Self::from_text(&path.display().to_string(), &text, nickname)
    }

    pub fn from_text(label: &str, text: &str, nickname: impl Into<String>) -> Result<Self> {
        let parsed = read_library(label, text)?;
        let mut library = Self::new(nickname);
        library.merge(parsed.symbols)?;
        Ok(library)
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolDefinition> {
        self.symbols.iter()
    }

    pub fn get(&self, name: &str) -> Option<&SymbolDefinition> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    /// Add a symbol. Returns `false` when an identical symbol of the same
    /// name is already present.
    pub fn insert(&mut self, symbol: SymbolDefinition) -> Result<bool> {
        if let Some(existing) = self.get(&symbol.name) {
            if existing.same_geometry(&symbol) {
                log::debug!(
                    "{}: '{}' from {} duplicates {}",
                    self.nickname,
                    symbol.name,
                    symbol.source,
                    existing.source
                );
                return Ok(false);
            }
            return Err(ConvertError::ConflictingSymbolDefinition {
                name: symbol.name.clone(),
                first_source: existing.source.clone(),
                second_source: symbol.source,
            });
        }
        self.index.insert(symbol.name.clone(), self.symbols.len());
        self.symbols.push(symbol);
        Ok(true)
    }

    /// Add every definition, failing on the first conflict. Returns how many
    /// were new.
    pub fn merge(&mut self, symbols: impl IntoIterator<Item = SymbolDefinition>) -> Result<usize> {
        let mut added = 0;
        for symbol in symbols {
            if self.insert(symbol)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Library file text
    pub fn to_kicad_sym(&self) -> String {
        format_tree(
            &crate::emit::symbols::library_document(&self.symbols),
            FormatMode::Normal,
        )
    }
}

/// Outcome of [`write_library_file`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryWrite {
    pub appended: usize,
    /// Already present with identical geometry
    pub skipped: usize,
}

/// Write `library` to `path`, growing the file if it already exists.
///
/// Existing symbols keep their order and their exact text; new symbols are
/// appended. A name that exists with different geometry is a conflict, and
/// nothing is written unless every symbol has been checked. The file is
/// replaced atomically.
pub fn write_library_file(path: &Path, library: &SymbolLibrary) -> Result<LibraryWrite> {
    let label = path.display().to_string();
    let existing = if path.exists() {
        let text = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        Some(read_library(&label, &text)?)
    } else {
        None
    };

    let mut outcome = LibraryWrite::default();
    let mut items: Vec<Sexpr> = match &existing {
        Some(parsed) => parsed.header.iter().chain(&parsed.nodes).cloned().collect(),
        None => header_items("kicad_symbol_lib"),
    };

    let mut conflicts = Vec::new();
    for symbol in library.iter() {
        match existing.as_ref().and_then(|parsed| parsed.symbol(&symbol.name)) {
            Some(present) if present.same_geometry(symbol) => outcome.skipped += 1,
            Some(_) => conflicts.push(ConvertError::ConflictingSymbolDefinition {
                name: symbol.name.clone(),
                first_source: label.clone(),
                second_source: symbol.source.clone(),
            }),
            None => {
                items.extend(library_nodes(symbol));
                outcome.appended += 1;
            }
        }
    }
    if let Some(conflict) = conflicts.into_iter().next() {
        return Err(conflict);
    }

    let text = format_tree(&Sexpr::list(items), FormatMode::Normal);
    write_atomic(path, text.as_bytes())?;
    log::info!(
        "Wrote {} ({} new, {} unchanged)",
        path.display(),
        outcome.appended,
        outcome.skipped
    );
    Ok(outcome)
}

/// Write through a temporary file in the target directory, then rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ConvertError::io(dir, e))?;
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConvertError::io(dir, e))?;
    file.write_all(contents)
        .map_err(|e| ConvertError::io(file.path(), e))?;
    file.persist(path)
        .map_err(|e| ConvertError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Rotation};
    use crate::model::{Fill, Graphic, Pin, PinElectricalType, Shape};

    fn opamp(source: &str, pins: usize) -> SymbolDefinition {
        let mut symbol = SymbolDefinition::new("OPAMP1", source);
        symbol.properties.insert("Reference".into(), "U".into());
        symbol.properties.insert("Value".into(), "OPAMP1".into());
        symbol.properties.insert("Footprint".into(), "".into());
        symbol.graphics.push(Graphic {
            shape: Shape::Polyline {
                points: vec![
                    Point::new(-5.08, 5.08),
                    Point::new(5.08, 0.0),
                    Point::new(-5.08, -5.08),
                    Point::new(-5.08, 5.08),
                ],
            },
            stroke_width: 0.254,
            fill: Fill::Background,
            unit: 0,
            style: 1,
        });
        for i in 0..pins {
            symbol.pins.push(Pin {
                number: (i + 1).to_string(),
                name: format!("P{}", i + 1),
                electrical_type: PinElectricalType::Input,
                position: Point::new(-7.62, 2.54 - 2.54 * i as f64),
                orientation: Rotation::Deg0,
                length: 2.54,
                unit: 1,
                style: 1,
                hidden: false,
            });
        }
        symbol
    }

    #[test]
    fn test_identical_symbols_are_deduplicated() {
        let mut lib = SymbolLibrary::new("orcad");
        assert_eq!(lib.merge([opamp("A.OLB", 3), opamp("B.OLB", 3)]).unwrap(), 1);
        assert_eq!(lib.len(), 1);
        assert_eq!(lib.get("OPAMP1").unwrap().source, "A.OLB");
    }

    #[test]
    fn test_conflicting_symbols() {
        let mut lib = SymbolLibrary::new("orcad");
        let err = lib.merge([opamp("A.OLB", 3), opamp("B.OLB", 5)]).unwrap_err();
        match err {
            ConvertError::ConflictingSymbolDefinition {
                name,
                first_source,
                second_source,
            } => {
                assert_eq!(name, "OPAMP1");
                assert_eq!(first_source, "A.OLB");
                assert_eq!(second_source, "B.OLB");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_round_trip() {
        let mut lib = SymbolLibrary::new("orcad");
        let mut symbol = opamp("A.OLB", 3);
        symbol.aliases = vec!["OPAMP1_ALT".into(), "OPAMP1_B".into()];
        lib.merge([symbol]).unwrap();

        let text = lib.to_kicad_sym();
        let reread = SymbolLibrary::from_text("orcad.kicad_sym", &text, "orcad").unwrap();
        assert_eq!(reread, lib);
        assert_eq!(
            reread.get("OPAMP1").unwrap().aliases,
            ["OPAMP1_ALT", "OPAMP1_B"]
        );
        // And the text is stable
        assert_eq!(reread.to_kicad_sym(), text);
    }

    #[test]
    fn test_write_grows_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orcad.kicad_sym");

        let mut first = SymbolLibrary::new("orcad");
        first.merge([opamp("A.OLB", 3)]).unwrap();
        assert_eq!(
            write_library_file(&path, &first).unwrap(),
            LibraryWrite {
                appended: 1,
                skipped: 0
            }
        );

        let mut second = SymbolLibrary::new("orcad");
        let mut other = opamp("B.OLB", 2);
        other.name = "COMPARATOR".into();
        second.merge([opamp("B.OLB", 3), other]).unwrap();
        assert_eq!(
            write_library_file(&path, &second).unwrap(),
            LibraryWrite {
                appended: 1,
                skipped: 1
            }
        );

        let reread = SymbolLibrary::from_file(&path, "orcad").unwrap();
        let names: Vec<&str> = reread.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["OPAMP1", "COMPARATOR"]);
    }

    #[test]
    fn test_conflict_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orcad.kicad_sym");

        let mut first = SymbolLibrary::new("orcad");
        first.merge([opamp("A.OLB", 3)]).unwrap();
        write_library_file(&path, &first).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let mut second = SymbolLibrary::new("orcad");
        second.merge([opamp("B.OLB", 5)]).unwrap();
        let err = write_library_file(&path, &second).unwrap_err();
        assert!(matches!(err, ConvertError::ConflictingSymbolDefinition { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
