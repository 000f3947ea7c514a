//! Source to destination mapping: symbol geometry, names and connectivity

pub mod names;
pub mod nets;
pub mod rules;
pub mod symbols;
