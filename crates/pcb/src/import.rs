//! Import command for converting OrCAD data to KiCad

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pcb_orcad2kicad::emit::lib_table::{write_lib_table, LibTableEntry, SYM_LIB_TABLE_FILE};
use pcb_orcad2kicad::library::write_atomic;
use pcb_orcad2kicad::parser::load_source_library;
use pcb_orcad2kicad::{
    convert_schematic, convert_symbol_libraries, write_library_file, ConvertConfig,
    PlacementOptions, ReferenceResolver, Scale, SheetInfo, SourceLibrary, SymbolLibrary,
    SymbolProvider, SymbolRepository,
};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the `import` command
#[derive(Args, Debug)]
#[command(about = "Import designs from external formats")]
pub struct ImportArgs {
    #[command(subcommand)]
    pub command: ImportCommands,
}

#[derive(Subcommand, Debug)]
pub enum ImportCommands {
    /// Convert OrCAD symbol libraries and schematics to KiCad
    Orcad(OrcadArgs),
}

#[derive(Args, Debug)]
pub struct OrcadArgs {
    #[command(subcommand)]
    pub command: OrcadCommands,
}

#[derive(Subcommand, Debug)]
pub enum OrcadCommands {
    /// Convert decoded OrCAD libraries (.log or .json) into one .kicad_sym
    Symbols(SymbolsArgs),
    /// Convert OrCAD XML schematic exports into .kicad_sch files
    Schematic(SchematicArgs),
}

/// Settings shared by both subcommands
#[derive(Args, Debug)]
pub struct ConversionArgs {
    /// Source unit to millimetre ratio, e.g. 0.254 (overrides the config file)
    #[arg(long, value_name = "FACTOR")]
    pub scale: Option<Scale>,

    /// TOML file with conversion settings
    #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,
}

impl ConversionArgs {
    fn load(&self) -> Result<ConvertConfig> {
        let mut config = match &self.config {
            Some(path) => ConvertConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ConvertConfig::default(),
        };
        if self.scale.is_some() {
            config.scale = self.scale;
        }
        Ok(config)
    }
}

/// Arguments for the `import orcad symbols` subcommand
#[derive(Args, Debug)]
pub struct SymbolsArgs {
    /// Decoder output, one file per OrCAD library
    #[arg(value_name = "INPUT", required = true, value_hint = clap::ValueHint::FilePath)]
    pub inputs: Vec<PathBuf>,

    /// Library file to create or grow
    #[arg(short, long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Library nickname (defaults to the output file stem)
    #[arg(long)]
    pub nickname: Option<String>,

    #[command(flatten)]
    pub conversion: ConversionArgs,
}

/// Arguments for the `import orcad schematic` subcommand
#[derive(Args, Debug)]
pub struct SchematicArgs {
    /// OrCAD XML exports
    #[arg(value_name = "INPUT", required = true, value_hint = clap::ValueHint::FilePath)]
    pub inputs: Vec<PathBuf>,

    /// Directory for the .kicad_sch files, reports and sym-lib-table
    #[arg(short, long, value_name = "DIR", default_value = ".", value_hint = clap::ValueHint::DirPath)]
    pub output_dir: PathBuf,

    /// Converted .kicad_sym libraries, searched first and in the order given
    #[arg(short, long = "library", value_name = "FILE")]
    pub libraries: Vec<PathBuf>,

    /// Directories of existing .kicad_sym libraries, searched after --library
    #[arg(long = "library-dir", value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    pub library_dirs: Vec<PathBuf>,

    #[command(flatten)]
    pub conversion: ConversionArgs,
}

/// Execute the `import` command
pub fn execute(args: ImportArgs) -> Result<()> {
    match args.command {
        ImportCommands::Orcad(OrcadArgs {
            command: OrcadCommands::Symbols(args),
        }) => execute_symbols(args),
        ImportCommands::Orcad(OrcadArgs {
            command: OrcadCommands::Schematic(args),
        }) => execute_schematic(args),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Execute the `import orcad symbols` subcommand
fn execute_symbols(args: SymbolsArgs) -> Result<()> {
    let config = args.conversion.load()?;
    let symbol_config = config
        .symbol_config()
        .context("Pass --scale or set `scale` in the config file")?;
    let nickname = args.nickname.unwrap_or_else(|| file_stem(&args.output));

    let sources = args
        .inputs
        .par_iter()
        .map(|input| {
            load_source_library(input)
                .with_context(|| format!("Failed to read decoder output: {}", input.display()))
        })
        .collect::<Result<Vec<SourceLibrary>>>()?;
    for source in &sources {
        eprintln!("Read {} ({} symbol records)", source.name, source.symbols.len());
    }

    // A conflict fails here, before the output file is touched
    let conversion = convert_symbol_libraries(&nickname, &sources, &symbol_config)
        .context("Failed to convert symbol libraries")?;

    for report in &conversion.reports {
        for (pin, raw) in &report.unknown_pin_types {
            eprintln!(
                "  Warning: {}: pin {pin} has unknown type '{raw}', written as unspecified",
                report.symbol
            );
        }
    }
    for failure in &conversion.failures {
        eprintln!("  Error: {failure}");
    }

    let written = write_library_file(&args.output, &conversion.library)
        .with_context(|| format!("Failed to write library: {}", args.output.display()))?;
    eprintln!(
        "Wrote {} ({} new, {} unchanged)",
        args.output.display(),
        written.appended,
        written.skipped
    );

    if !conversion.failures.is_empty() {
        anyhow::bail!(
            "{} symbol(s) could not be converted",
            conversion.failures.len()
        );
    }
    Ok(())
}

/// One converted schematic, not yet written
struct SchematicOutcome {
    input: PathBuf,
    /// Page files, in page order
    pages: Vec<(PathBuf, String)>,
    report: (PathBuf, String),
    unresolved: usize,
    diagnostics: usize,
}

impl SchematicOutcome {
    fn files(&self) -> impl Iterator<Item = &(PathBuf, String)> {
        self.pages.iter().chain(std::iter::once(&self.report))
    }
}

/// Fail when two outputs of the run would land on the same file
fn check_output_paths(outcomes: &[SchematicOutcome]) -> Result<()> {
    let mut claimed: HashMap<&Path, &Path> = HashMap::new();
    for outcome in outcomes {
        for (path, _) in outcome.files() {
            if let Some(first) = claimed.insert(path.as_path(), outcome.input.as_path()) {
                anyhow::bail!(
                    "{} would be written twice (from {} and {}); nothing was written",
                    path.display(),
                    first.display(),
                    outcome.input.display()
                );
            }
        }
    }
    Ok(())
}

/// Execute the `import orcad schematic` subcommand
fn execute_schematic(args: SchematicArgs) -> Result<()> {
    let config = args.conversion.load()?;
    let scale = config
        .scale
        .context("Pass --scale or set `scale` in the config file")?;

    let libraries = args
        .libraries
        .iter()
        .map(|path| {
            SymbolLibrary::from_file(path, file_stem(path))
                .with_context(|| format!("Failed to read library: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let repositories = args
        .library_dirs
        .iter()
        .map(|dir| {
            SymbolRepository::open(dir)
                .with_context(|| format!("Failed to read library directory: {}", dir.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut resolver = ReferenceResolver::new().with_part_map(config.part_map.clone());
    for library in &libraries {
        resolver = resolver.with_provider(library as &dyn SymbolProvider);
    }
    for repository in &repositories {
        resolver = resolver.with_provider(repository as &dyn SymbolProvider);
    }
    let options = PlacementOptions::new(scale, config.schematic.library_nickname.clone())
        .with_power_symbols(config.schematic.power_symbols);

    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            args.output_dir.display()
        )
    })?;

    let outcomes = args
        .inputs
        .par_iter()
        .map(|input| convert_one(input, &args.output_dir, &resolver, &options, &config))
        .collect::<Result<Vec<_>>>()?;
    check_output_paths(&outcomes)?;

    for (path, contents) in outcomes.iter().flat_map(|o| o.files()) {
        write_atomic(path, contents.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let mut entries = Vec::new();
    for (library, path) in libraries.iter().zip(&args.libraries) {
        entries.push(table_entry(library.nickname(), path, &args.output_dir));
    }
    for repository in &repositories {
        for (nickname, path) in repository.entries() {
            entries.push(table_entry(nickname, path, &args.output_dir));
        }
    }
    if !entries.is_empty() {
        let table = args.output_dir.join(SYM_LIB_TABLE_FILE);
        let added = write_lib_table(&table, &entries)
            .with_context(|| format!("Failed to write {}", table.display()))?;
        eprintln!("Updated {} ({added} new)", table.display());
    }

    let mut problems = 0;
    for outcome in &outcomes {
        for (page, _) in &outcome.pages {
            eprintln!("Wrote {}", page.display());
        }
        if outcome.unresolved > 0 {
            eprintln!(
                "  Warning: {}: {} unresolved part(s)",
                outcome.input.display(),
                outcome.unresolved
            );
        }
        problems += outcome.unresolved + outcome.diagnostics;
    }
    if problems > 0 {
        anyhow::bail!("{problems} diagnostic(s) reported; see the warnings above");
    }
    Ok(())
}

fn convert_one(
    input: &Path,
    output_dir: &Path,
    resolver: &ReferenceResolver<'_>,
    options: &PlacementOptions,
    config: &ConvertConfig,
) -> Result<SchematicOutcome> {
    let xml = fs::read_to_string(input)
        .with_context(|| format!("Failed to read schematic: {}", input.display()))?;
    let stem = file_stem(input);

    let mut info = SheetInfo::new(config.schematic.project.clone().unwrap_or_else(|| stem.clone()));
    info.title = stem.clone();
    info.paper = config.schematic.paper.clone();
    info.source = input.file_name().map(|n| n.to_string_lossy().into_owned());

    let conversion = convert_schematic(&stem, &xml, resolver, options, &info)
        .with_context(|| format!("Failed to convert schematic: {}", input.display()))?;

    let single = conversion.pages.len() == 1;
    let mut pages = Vec::with_capacity(conversion.pages.len());
    for page in &conversion.pages {
        let file_name = if single {
            format!("{stem}.kicad_sch")
        } else {
            format!("{stem}_{}.kicad_sch", file_component(&page.placed.name))
        };
        pages.push((output_dir.join(file_name), page.text.clone()));
    }

    let report = output_dir.join(format!("{stem}.unresolved.json"));
    let json = conversion.unresolved.to_json()?;

    let mut diagnostics = 0;
    for diagnostic in conversion.diagnostics() {
        log::warn!("{}: {diagnostic}", input.display());
        diagnostics += 1;
    }

    Ok(SchematicOutcome {
        input: input.to_path_buf(),
        pages,
        report: (report, json),
        unresolved: conversion.unresolved.len(),
        diagnostics,
    })
}

/// `${KIPRJMOD}` when the library sits in the output directory
fn table_entry(nickname: &str, path: &Path, output_dir: &Path) -> LibTableEntry {
    let same_dir = match (
        path.parent().and_then(|p| fs::canonicalize(p).ok()),
        fs::canonicalize(output_dir).ok(),
    ) {
        (Some(parent), Some(dir)) => parent == dir,
        _ => false,
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if same_dir {
        LibTableEntry::project_relative(nickname, &file_name)
    } else {
        let uri = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        LibTableEntry {
            nickname: nickname.to_string(),
            uri: uri.display().to_string(),
            description: String::new(),
        }
    }
}

/// Page names may hold characters that do not belong in file names
fn file_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_component() {
        assert_eq!(file_component("PAGE 1/Power"), "PAGE_1_Power");
        assert_eq!(file_component("MAIN"), "MAIN");
    }

    fn outcome(input: &str, pages: &[&str]) -> SchematicOutcome {
        let stem = file_stem(Path::new(input));
        SchematicOutcome {
            input: PathBuf::from(input),
            pages: pages
                .iter()
                .map(|p| (PathBuf::from(format!("out/{p}")), String::new()))
                .collect(),
            report: (PathBuf::from(format!("out/{stem}.unresolved.json")), String::new()),
            unresolved: 0,
            diagnostics: 0,
        }
    }

    #[test]
    fn test_output_collisions() {
        let ok = [
            outcome("a/amp.xml", &["amp.kicad_sch"]),
            outcome("a/psu.xml", &["psu.kicad_sch"]),
        ];
        assert!(check_output_paths(&ok).is_ok());

        // Page names that differ only in characters dropped from file names
        let pages = [outcome("a/amp.xml", &["amp_PAGE_1.kicad_sch", "amp_PAGE_1.kicad_sch"])];
        assert!(check_output_paths(&pages).is_err());

        // Same stem from two directories
        let stems = [
            outcome("a/amp.xml", &["amp.kicad_sch"]),
            outcome("b/amp.xml", &["amp.kicad_sch"]),
        ];
        let err = check_output_paths(&stems).unwrap_err().to_string();
        assert!(err.contains("a/amp.xml") && err.contains("b/amp.xml"), "{err}");
    }

    #[test]
    fn test_table_entry_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("orcad.kicad_sym");
        fs::write(&lib, "(kicad_symbol_lib)").unwrap();
        let entry = table_entry("orcad", &lib, dir.path());
        assert_eq!(entry.uri, "${KIPRJMOD}/orcad.kicad_sym");

        let elsewhere = tempfile::tempdir().unwrap();
        let entry = table_entry("orcad", &lib, elsewhere.path());
        assert!(entry.uri.ends_with("orcad.kicad_sym"));
        assert!(!entry.uri.starts_with("${KIPRJMOD}"));
    }
}
