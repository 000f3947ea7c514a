//! Matching placed parts to library symbols
//!
//! A [`ReferenceResolver`] queries an ordered list of [`SymbolProvider`]s.
//! Earlier providers shadow later ones, and within one key an exact match in
//! any provider beats an alias match, which beats a normalized match.

use crate::config::PartMap;
use crate::error::{ConvertError, Result};
use crate::geometry::Orientation;
use crate::library::SymbolLibrary;
use crate::mapping::names::lookup_key;
use crate::model::{ComponentInstance, SchematicDesign, SchematicPage, SymbolDefinition};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// How a key matched a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Symbol name, or a `Nickname:Name` lib_id
    Exact,
    /// One of the symbol's aliases
    Alias,
    /// Sanitized, case-insensitive name or alias
    Normalized,
}

impl MatchRule {
    pub const PRECEDENCE: [MatchRule; 3] = [MatchRule::Exact, MatchRule::Alias, MatchRule::Normalized];

    fn matches(self, symbol: &SymbolDefinition, name: &str) -> bool {
        match self {
            MatchRule::Exact => symbol.name == name,
            MatchRule::Alias => symbol.answers_to(name),
            MatchRule::Normalized => {
                let key = lookup_key(name);
                !key.is_empty()
                    && (lookup_key(&symbol.name) == key
                        || symbol.aliases.iter().any(|a| lookup_key(a) == key))
            }
        }
    }
}

/// A symbol found by a provider, with the library it lives in
#[derive(Debug, Clone, Copy)]
pub struct Found<'a> {
    pub nickname: &'a str,
    pub symbol: &'a SymbolDefinition,
}

impl Found<'_> {
    pub fn lib_id(&self) -> String {
        format!("{}:{}", self.nickname, self.symbol.name)
    }
}

/// A read-only source of symbols
pub trait SymbolProvider: Send + Sync {
    /// Name used in logs and reports
    fn label(&self) -> &str;

    fn find(&self, key: &str, rule: MatchRule) -> Option<Found<'_>>;
}

/// Split `Nickname:Name`. Keys without a colon match any library.
fn split_lib_id(key: &str) -> (Option<&str>, &str) {
    match key.split_once(':') {
        Some((nick, name)) if !nick.is_empty() && !name.is_empty() => (Some(nick), name),
        _ => (None, key),
    }
}

fn find_in<'a>(library: &'a SymbolLibrary, key: &str, rule: MatchRule) -> Option<Found<'a>> {
    let (nick, name) = split_lib_id(key);
    if nick.is_some_and(|n| n != library.nickname()) {
        return None;
    }
    let symbol = match rule {
        MatchRule::Exact => library.get(name),
        _ => library.iter().find(|s| rule.matches(s, name)),
    }?;
    Some(Found {
        nickname: library.nickname(),
        symbol,
    })
}

impl SymbolProvider for SymbolLibrary {
    fn label(&self) -> &str {
        self.nickname()
    }

    fn find(&self, key: &str, rule: MatchRule) -> Option<Found<'_>> {
        find_in(self, key, rule)
    }
}

/// A directory of existing `.kicad_sym` files, one library per file named
/// after the file stem
#[derive(Debug, Clone, Default)]
pub struct SymbolRepository {
    label: String,
    libraries: Vec<(SymbolLibrary, PathBuf)>,
}

impl SymbolRepository {
    /// Load every `.kicad_sym` in `dir`, ordered by file name
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| ConvertError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ConvertError::io(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "kicad_sym") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut libraries = Vec::with_capacity(paths.len());
        for path in paths {
            let nickname = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let library = SymbolLibrary::from_file(&path, nickname)?;
            log::debug!(
                "Loaded {} symbol(s) from {}",
                library.len(),
                path.display()
            );
            libraries.push((library, path));
        }
        log::info!(
            "Symbol repository {}: {} librar{}",
            dir.display(),
            libraries.len(),
            if libraries.len() == 1 { "y" } else { "ies" }
        );
        Ok(Self {
            label: dir.display().to_string(),
            libraries,
        })
    }

    pub fn from_libraries(label: impl Into<String>, libraries: Vec<(SymbolLibrary, PathBuf)>) -> Self {
        Self {
            label: label.into(),
            libraries,
        }
    }

    /// `(nickname, file)` of every library
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.libraries
            .iter()
            .map(|(lib, path)| (lib.nickname(), path.as_path()))
    }
}

impl SymbolProvider for SymbolRepository {
    fn label(&self) -> &str {
        &self.label
    }

    fn find(&self, key: &str, rule: MatchRule) -> Option<Found<'_>> {
        self.libraries
            .iter()
            .find_map(|(library, _)| find_in(library, key, rule))
    }
}

/// Back-reference from an instance to the symbol it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Index into the resolver's provider list
    pub provider: usize,
    pub name: String,
    /// `Nickname:Name`
    pub lib_id: String,
    pub rule: MatchRule,
    /// Orientation applied in symbol space before the placement's own
    pub intrinsic: Orientation,
}

/// An instance left without a symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub page: String,
    pub designator: String,
    pub part_reference: String,
}

impl UnresolvedReference {
    pub fn to_error(&self) -> ConvertError {
        ConvertError::UnresolvedReference {
            designator: self.designator.clone(),
            part_reference: self.part_reference.clone(),
        }
    }
}

/// Everything a resolution pass could not map, in page then designator order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UnresolvedReferences(Vec<UnresolvedReference>);

impl UnresolvedReferences {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnresolvedReference> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: UnresolvedReferences) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, designator: &str) -> bool {
        self.0.iter().any(|r| r.designator == designator)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-run resolution context
#[derive(Default)]
pub struct ReferenceResolver<'a> {
    providers: Vec<&'a dyn SymbolProvider>,
    part_map: PartMap,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider; it is consulted after every provider added before it
    pub fn with_provider(mut self, provider: &'a dyn SymbolProvider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_part_map(mut self, part_map: PartMap) -> Self {
        self.part_map = part_map;
        self
    }

    pub fn providers(&self) -> &[&'a dyn SymbolProvider] {
        &self.providers
    }

    /// Candidate keys for an instance, most specific first
    fn candidates(&self, instance: &ComponentInstance) -> Vec<(String, Orientation)> {
        let mut keys = Vec::with_capacity(2);
        if let Some(target) = self
            .part_map
            .target(&instance.part_reference, instance.designator_prefix())
        {
            keys.push((target.symbol.clone(), target.orientation()));
        }
        keys.push((instance.part_reference.clone(), Orientation::IDENTITY));
        keys
    }

    pub fn resolve_instance(&self, instance: &ComponentInstance) -> Option<ResolvedSymbol> {
        for (key, intrinsic) in self.candidates(instance) {
            for rule in MatchRule::PRECEDENCE {
                for (index, provider) in self.providers.iter().enumerate() {
                    if let Some(found) = provider.find(&key, rule) {
                        log::debug!(
                            "{}: '{}' -> {} ({:?} match in {})",
                            instance.designator,
                            key,
                            found.lib_id(),
                            rule,
                            provider.label()
                        );
                        return Some(ResolvedSymbol {
                            provider: index,
                            name: found.symbol.name.clone(),
                            lib_id: found.lib_id(),
                            rule,
                            intrinsic,
                        });
                    }
                }
            }
        }
        None
    }

    /// Resolve every instance of a page, replacing earlier results
    pub fn resolve_page(&self, page: &mut SchematicPage) -> UnresolvedReferences {
        let mut missing = Vec::new();
        for instance in &mut page.instances {
            instance.resolved = self.resolve_instance(instance);
            if instance.resolved.is_none() {
                log::warn!(
                    "{}: no symbol for part reference '{}'",
                    instance.designator,
                    instance.part_reference
                );
                missing.push(UnresolvedReference {
                    page: page.name.clone(),
                    designator: instance.designator.clone(),
                    part_reference: instance.part_reference.clone(),
                });
            }
        }
        missing.sort_by(|a, b| natord::compare(&a.designator, &b.designator));
        UnresolvedReferences(missing)
    }

    pub fn resolve_design(&self, design: &mut SchematicDesign) -> UnresolvedReferences {
        let mut all = UnresolvedReferences::default();
        for page in &mut design.pages {
            all.extend(self.resolve_page(page));
        }
        all
    }

    /// The definition a resolution points at
    pub fn symbol(&self, resolved: &ResolvedSymbol) -> Option<&'a SymbolDefinition> {
        let provider: &'a dyn SymbolProvider = *self.providers.get(resolved.provider)?;
        provider
            .find(&resolved.lib_id, MatchRule::Exact)
            .map(|found| found.symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PartTarget;
    use crate::geometry::{Point, Rotation};
    use crate::model::{Pin, PinElectricalType, SourcePlacement};

    fn symbol(name: &str, pins: usize) -> SymbolDefinition {
        let mut s = SymbolDefinition::new(name, "test");
        for i in 0..pins {
            s.pins.push(Pin {
                number: (i + 1).to_string(),
                name: "~".into(),
                electrical_type: PinElectricalType::Passive,
                position: Point::new(0.0, 2.54 * i as f64),
                orientation: Rotation::Deg0,
                length: 2.54,
                unit: 1,
                style: 1,
                hidden: false,
            });
        }
        s
    }

    fn library(nickname: &str, symbols: Vec<SymbolDefinition>) -> SymbolLibrary {
        let mut lib = SymbolLibrary::new(nickname);
        lib.merge(symbols).unwrap();
        lib
    }

    fn instance(designator: &str, part: &str) -> ComponentInstance {
        ComponentInstance {
            designator: designator.into(),
            part_reference: part.into(),
            value: None,
            properties: Default::default(),
            placement: SourcePlacement::default(),
            pins: Vec::new(),
            element: 1,
            resolved: None,
        }
    }

    #[test]
    fn test_first_provider_wins() {
        let converted = library("orcad", vec![symbol("OPAMP1", 3)]);
        let standard = library("Amplifier", vec![symbol("OPAMP1", 5)]);
        let resolver = ReferenceResolver::new()
            .with_provider(&converted)
            .with_provider(&standard);
        let r = resolver.resolve_instance(&instance("U1", "OPAMP1")).unwrap();
        assert_eq!(r.provider, 0);
        assert_eq!(r.lib_id, "orcad:OPAMP1");
        assert_eq!(resolver.symbol(&r).unwrap().pins.len(), 3);

        // Reversed order, reversed winner
        let resolver = ReferenceResolver::new()
            .with_provider(&standard)
            .with_provider(&converted);
        let r = resolver.resolve_instance(&instance("U1", "OPAMP1")).unwrap();
        assert_eq!(r.lib_id, "Amplifier:OPAMP1");
    }

    #[test]
    fn test_exact_match_beats_earlier_normalized_match() {
        let first = library("a", vec![symbol("opamp_1", 3)]);
        let second = library("b", vec![symbol("OPAMP-1", 3)]);
        let resolver = ReferenceResolver::new()
            .with_provider(&first)
            .with_provider(&second);
        let r = resolver.resolve_instance(&instance("U1", "OPAMP-1")).unwrap();
        assert_eq!((r.lib_id.as_str(), r.rule), ("b:OPAMP-1", MatchRule::Exact));

        let r = resolver
            .resolve_instance(&instance("U2", "Opamp 1.Normal"))
            .unwrap();
        assert_eq!((r.lib_id.as_str(), r.rule), ("a:opamp_1", MatchRule::Normalized));
    }

    #[test]
    fn test_alias_match() {
        let mut s = symbol("LM358", 8);
        s.aliases = vec!["LM358_DUAL".into(), "LM2904".into()];
        let lib = library("orcad", vec![s]);
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let r = resolver.resolve_instance(&instance("U4", "LM358_DUAL")).unwrap();
        assert_eq!(r.rule, MatchRule::Alias);
        assert_eq!(r.lib_id, "orcad:LM358");
        let r = resolver.resolve_instance(&instance("U5", "LM2904")).unwrap();
        assert_eq!(r.rule, MatchRule::Alias);
        assert_eq!(r.lib_id, "orcad:LM358");
    }

    #[test]
    fn test_part_map_targets_lib_id() {
        let converted = library("orcad", vec![symbol("R", 2)]);
        let device = library("Device", vec![symbol("R", 2)]);
        let mut map = PartMap::default();
        let mut target = PartTarget::new("Device:R");
        target.rotation = Rotation::Deg90;
        map.prefixes.insert("R".into(), target);

        let resolver = ReferenceResolver::new()
            .with_provider(&converted)
            .with_provider(&device)
            .with_part_map(map);
        let r = resolver.resolve_instance(&instance("R12", "RES_0805")).unwrap();
        assert_eq!(r.lib_id, "Device:R");
        assert_eq!(r.provider, 1);
        assert_eq!(r.intrinsic, Orientation::rotation(Rotation::Deg90));
    }

    #[test]
    fn test_unresolved_is_reported_and_idempotent() {
        let lib = library("orcad", vec![symbol("R", 2)]);
        let resolver = ReferenceResolver::new().with_provider(&lib);
        let mut page = SchematicPage {
            name: "MAIN".into(),
            instances: vec![
                instance("U10", "MYSTERY"),
                instance("R1", "R"),
                instance("U2", "MYSTERY"),
            ],
            ..Default::default()
        };

        let first = resolver.resolve_page(&mut page);
        let snapshot: Vec<_> = page.instances.iter().map(|i| i.resolved.clone()).collect();
        let second = resolver.resolve_page(&mut page);
        assert_eq!(first, second);
        assert_eq!(
            snapshot,
            page.instances
                .iter()
                .map(|i| i.resolved.clone())
                .collect::<Vec<_>>()
        );

        let designators: Vec<&str> = first.iter().map(|r| r.designator.as_str()).collect();
        assert_eq!(designators, vec!["U2", "U10"]);
        assert!(page.instance("R1").unwrap().resolved.is_some());

        let json: serde_json::Value = serde_json::from_str(&first.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["part_reference"], "MYSTERY");
        assert_eq!(json[0]["page"], "MAIN");
    }

    #[test]
    fn test_repository() {
        let dir = tempfile::tempdir().unwrap();
        let device = library("Device", vec![symbol("C", 2)]);
        std::fs::write(dir.path().join("Device.kicad_sym"), device.to_kicad_sym()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let repo = SymbolRepository::open(dir.path()).unwrap();
        let entries: Vec<&str> = repo.entries().map(|(nick, _)| nick).collect();
        assert_eq!(entries, vec!["Device"]);

        let resolver = ReferenceResolver::new().with_provider(&repo);
        let r = resolver.resolve_instance(&instance("C1", "Device:C")).unwrap();
        assert_eq!(r.lib_id, "Device:C");
        assert!(resolver.resolve_instance(&instance("C1", "Other:C")).is_none());
    }
}
