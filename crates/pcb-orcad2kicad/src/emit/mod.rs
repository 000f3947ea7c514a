//! KiCad writers: symbol libraries, schematics and library tables

pub mod lib_table;
pub mod schematic;
pub mod symbols;
