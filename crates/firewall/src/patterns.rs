//! Region-scoped PII pattern catalogue.
//!
//! Patterns load from YAML and are selected either by an explicit
//! `region.name` list or by a region set intersected with a type filter.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::{FirewallError, store::PiiType};

/// The embedded default catalogue.
const DEFAULT_CATALOGUE: &str = include_str!("patterns/default.yaml");

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    patterns: Vec<PatternDef>,
}

#[derive(Debug, Deserialize)]
struct PatternDef {
    name: String,
    region: String,
    pii_type: String,
    pattern: String,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_confidence() -> f64 {
    0.8
}

/// A compiled, selectable detection pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// Pattern name, unique within its region.
    pub name: String,
    /// Region scope, e.g. `global`, `us`, `cn`, `eu`.
    pub region: String,
    /// PII type this pattern detects.
    pub pii_type: PiiType,
    /// The compiled expression.
    pub regex: Regex,
    /// Severity recorded on detections.
    pub severity: String,
    /// Confidence recorded on detections.
    pub confidence: f64,
}

impl CompiledPattern {
    /// The `region.name` identifier used for explicit selection.
    pub fn id(&self) -> String {
        format!("{}.{}", self.region, self.name)
    }
}

/// A loaded pattern catalogue.
#[derive(Debug, Clone)]
pub struct PatternCatalogue {
    patterns: Vec<CompiledPattern>,
}

impl PatternCatalogue {
    /// Load the embedded default catalogue.
    pub fn embedded() -> crate::Result<Self> {
        Self::from_yaml(DEFAULT_CATALOGUE)
    }

    /// Load a catalogue from a YAML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FirewallError::Patterns(format!("cannot read {}: {e}", path.display())))?;

        Self::from_yaml(&content)
    }

    /// Parse and compile a catalogue from YAML text.
    pub fn from_yaml(content: &str) -> crate::Result<Self> {
        let file: CatalogueFile =
            serde_yaml::from_str(content).map_err(|e| FirewallError::Patterns(e.to_string()))?;

        let mut patterns = Vec::with_capacity(file.patterns.len());

        for def in file.patterns {
            let regex = Regex::new(&def.pattern)
                .map_err(|e| FirewallError::Patterns(format!("pattern '{}.{}': {e}", def.region, def.name)))?;

            patterns.push(CompiledPattern {
                name: def.name,
                region: def.region,
                pii_type: PiiType::from(def.pii_type),
                regex,
                severity: def.severity,
                confidence: def.confidence,
            });
        }

        Ok(Self { patterns })
    }

    /// Select patterns for a filter.
    ///
    /// A non-empty `explicit` list of `region.name` identifiers wins;
    /// otherwise the selection is the region set intersected with the type
    /// filter (an empty type filter means all types). Catalogue order is
    /// preserved, which fixes cross-pattern overlap resolution.
    pub fn select(&self, explicit: &[String], regions: &[String], types: &[String]) -> Vec<CompiledPattern> {
        if !explicit.is_empty() {
            return self
                .patterns
                .iter()
                .filter(|pattern| explicit.iter().any(|id| *id == pattern.id()))
                .cloned()
                .collect();
        }

        self.patterns
            .iter()
            .filter(|pattern| regions.iter().any(|region| *region == pattern.region))
            .filter(|pattern| types.is_empty() || types.iter().any(|t| t.eq_ignore_ascii_case(pattern.pii_type.as_str())))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn embedded_catalogue_compiles() {
        let catalogue = PatternCatalogue::embedded().unwrap();
        let all = catalogue.select(&[], &["global".to_string()], &[]);

        assert!(all.iter().any(|p| p.pii_type == PiiType::Email));
        assert!(all.iter().any(|p| p.pii_type == PiiType::IpAddress));
    }

    #[test]
    fn explicit_selection_wins() {
        let catalogue = PatternCatalogue::embedded().unwrap();

        let selected = catalogue.select(&["us.ssn".to_string()], &["global".to_string()], &[]);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].pii_type, PiiType::Ssn);
    }

    #[test]
    fn region_and_type_intersection() {
        let catalogue = PatternCatalogue::embedded().unwrap();

        let selected = catalogue.select(
            &[],
            &["global".to_string(), "us".to_string()],
            &["EMAIL".to_string(), "SSN".to_string()],
        );

        assert!(selected.iter().all(|p| matches!(p.pii_type, PiiType::Email | PiiType::Ssn)));
        assert!(selected.iter().any(|p| p.pii_type == PiiType::Ssn));
    }

    #[test]
    fn invalid_patterns_are_rejected_with_their_id() {
        let error = PatternCatalogue::from_yaml(indoc! {r#"
            patterns:
              - name: broken
                region: global
                pii_type: EMAIL
                pattern: "["
        "#})
        .unwrap_err();

        assert!(error.to_string().contains("global.broken"));
    }
}
