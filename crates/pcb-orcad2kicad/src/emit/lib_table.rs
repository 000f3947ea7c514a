//! `sym-lib-table` rows for the libraries a schematic uses

use crate::error::{ConvertError, Result};
use crate::library::write_atomic;
use pcb_sexpr::formatter::{format_tree, FormatMode};
use pcb_sexpr::{kv, ListBuilder, Sexpr};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const SYM_LIB_TABLE_FILE: &str = "sym-lib-table";
const TABLE_VERSION: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibTableEntry {
    pub nickname: String,
    /// Usually `${KIPRJMOD}/<file>.kicad_sym`
    pub uri: String,
    pub description: String,
}

impl LibTableEntry {
    /// Entry for a library stored next to the project
    pub fn project_relative(nickname: impl Into<String>, file_name: &str) -> Self {
        Self {
            nickname: nickname.into(),
            uri: format!("${{KIPRJMOD}}/{file_name}"),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn node(&self) -> Sexpr {
        let mut row = ListBuilder::node("lib");
        row.push(kv("name", Sexpr::string(&self.nickname)))
            .push(kv("type", Sexpr::string("KiCad")))
            .push(kv("uri", Sexpr::string(&self.uri)))
            .push(kv("options", Sexpr::string("")))
            .push(kv("descr", Sexpr::string(&self.description)));
        row.build()
    }
}

/// A fresh table
pub fn lib_table(entries: &[LibTableEntry]) -> String {
    let mut items = vec![Sexpr::symbol("sym_lib_table"), kv("version", TABLE_VERSION)];
    items.extend(entries.iter().map(LibTableEntry::node));
    format_tree(&Sexpr::list(items), FormatMode::LibraryTable)
}

fn row_name(row: &Sexpr) -> Option<&str> {
    let items = row.as_list()?;
    if items.first().and_then(Sexpr::as_sym) != Some("lib") {
        return None;
    }
    let name = pcb_sexpr::find_child_list(&items[1..], "name")?;
    name.get(1).and_then(Sexpr::as_atom)
}

/// Add rows for nicknames `existing` lacks; rows already present are kept
/// as they are. Returns the new text and how many rows were added.
pub fn merge_lib_table(label: &str, existing: &str, entries: &[LibTableEntry]) -> Result<(String, usize)> {
    let root = pcb_sexpr::parse(existing).map_err(|source| ConvertError::Sexpr {
        path: label.to_string(),
        source,
    })?;
    let items = root
        .as_list()
        .filter(|items| items.first().and_then(Sexpr::as_sym) == Some("sym_lib_table"))
        .ok_or_else(|| ConvertError::InvalidLibrary {
            path: label.to_string(),
            reason: "expected a sym_lib_table root".to_string(),
        })?;

    let present: BTreeSet<&str> = items.iter().filter_map(row_name).collect();
    let mut merged = items.to_vec();
    let mut added = 0;
    for entry in entries {
        if !present.contains(entry.nickname.as_str()) {
            merged.push(entry.node());
            added += 1;
        }
    }
    Ok((format_tree(&Sexpr::list(merged), FormatMode::LibraryTable), added))
}

/// Create or extend the table at `path`
pub fn write_lib_table(path: &Path, entries: &[LibTableEntry]) -> Result<usize> {
    let (text, added) = if path.exists() {
        let existing = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
        merge_lib_table(&path.display().to_string(), &existing, entries)?
    } else {
        (lib_table(entries), entries.len())
    };
    write_atomic(path, text.as_bytes())?;
    Ok(added)
}
