//! OrCAD to KiCad converter
//!
//! Converts decoded OrCAD symbol libraries to `.kicad_sym` libraries and
//! OrCAD XML schematic exports to `.kicad_sch` documents.
//!
//! Both pipelines are single pass: everything is parsed, resolved and placed
//! in memory before a byte is written, and independent inputs share nothing
//! mutable, so callers may convert several files in parallel.

pub mod config;
pub mod emit;
pub mod error;
pub mod geometry;
pub mod library;
pub mod mapping;
pub mod model;
pub mod parser;
pub mod placement;
pub mod resolve;

pub use config::{ConvertConfig, PartMap, PartTarget, SymbolConfig, SymbolOptions};
pub use emit::schematic::SheetInfo;
pub use error::{ConvertError, Result};
pub use geometry::{Orientation, Point, Rotation, Scale, Transform};
pub use library::{write_library_file, LibraryWrite, SymbolLibrary};
pub use mapping::symbols::BuildReport;
pub use model::{SchematicDesign, SchematicPage, SymbolDefinition};
pub use parser::records::SourceLibrary;
pub use placement::{PlacedPage, PlacementOptions};
pub use resolve::{
    MatchRule, ReferenceResolver, SymbolProvider, SymbolRepository, UnresolvedReferences,
};

use mapping::symbols::build_library;

/// Output of converting one or more decoded OrCAD libraries
#[derive(Debug)]
pub struct SymbolConversion {
    pub library: SymbolLibrary,
    pub reports: Vec<BuildReport>,
    /// Symbols that could not be converted
    pub failures: Vec<ConvertError>,
}

/// Convert decoded libraries into one library named `nickname`.
///
/// Per-symbol failures are collected; a name defined twice with different
/// geometry fails the whole conversion.
pub fn convert_symbol_libraries(
    nickname: &str,
    sources: &[SourceLibrary],
    config: &SymbolConfig,
) -> Result<SymbolConversion> {
    let mut conversion = SymbolConversion {
        library: SymbolLibrary::new(nickname),
        reports: Vec::new(),
        failures: Vec::new(),
    };
    for source in sources {
        let batch = build_library(source, config);
        let added = conversion.library.merge(batch.definitions)?;
        log::info!(
            "{}: {} symbol(s) converted, {} new, {} failed",
            source.name,
            batch.reports.len(),
            added,
            batch.failures.len()
        );
        conversion.reports.extend(batch.reports);
        conversion.failures.extend(batch.failures);
    }
    Ok(conversion)
}

/// One page of a converted schematic
#[derive(Debug)]
pub struct ConvertedPage {
    pub placed: PlacedPage,
    /// `.kicad_sch` text
    pub text: String,
}

#[derive(Debug)]
pub struct SchematicConversion {
    pub design: SchematicDesign,
    pub pages: Vec<ConvertedPage>,
    pub unresolved: UnresolvedReferences,
}

impl SchematicConversion {
    /// Instance-scoped problems across all pages
    pub fn diagnostics(&self) -> impl Iterator<Item = &ConvertError> {
        self.pages.iter().flat_map(|p| p.placed.diagnostics.iter())
    }
}

/// Parse, resolve, place and serialize an OrCAD XML export.
///
/// Unresolved parts are placed as placeholders and listed in the result. A
/// malformed page or a net the output would split or merge fails the call.
pub fn convert_schematic(
    name: &str,
    xml: &str,
    resolver: &ReferenceResolver<'_>,
    options: &PlacementOptions,
    info: &SheetInfo,
) -> Result<SchematicConversion> {
    let mut design = parser::schematic::parse_schematic(name, xml)?;
    let unresolved = resolver.resolve_design(&mut design);

    let multi_page = design.pages.len() > 1;
    let mut pages = Vec::with_capacity(design.pages.len());
    for page in &design.pages {
        let placed = placement::place_page(page, resolver, options);
        placed.check_connectivity()?;

        let mut sheet = info.clone();
        if multi_page {
            sheet.title = format!("{} - {}", info.title, page.name);
        }
        let text = emit::schematic::write_schematic(&placed, &sheet);
        pages.push(ConvertedPage { placed, text });
    }

    Ok(SchematicConversion {
        design,
        pages,
        unresolved,
    })
}
