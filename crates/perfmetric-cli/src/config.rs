//! Data-driven configuration: per-architecture formula fixups and the event
//! catalog used to flag unknown event names.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CliError;

/// Ordered textual substitutions applied to raw formula text before parsing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixupTable {
    #[serde(default)]
    pub substitutions: Vec<Substitution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

impl FixupTable {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = read(path)?;
        Self::from_json(&text).map_err(|source| CliError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply every substitution in order
    pub fn apply(&self, formula: &str) -> String {
        self.substitutions
            .iter()
            .filter(|s| !s.from.is_empty())
            .fold(formula.to_string(), |text, s| text.replace(&s.from, &s.to))
    }
}

/// Known event names, compared case-insensitively
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    names: HashSet<String>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "EventName")]
    event_name: String,
}

impl EventCatalog {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = read(path)?;
        Self::from_json(&text).map_err(|source| CliError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse a JSON array of event objects carrying an `EventName` field
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(text)?;
        Ok(entries.into_iter().map(|e| e.event_name).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<String> for EventCatalog {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(|n| n.to_ascii_lowercase()).collect(),
        }
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixups_apply_in_order() {
        let table = FixupTable::from_json(
            r#"{"substitutions": [
                {"from": "TOPDOWN.SLOTS", "to": "SLOTS"},
                {"from": "SLOTS", "to": "(4 * CPU_CLK_UNHALTED.THREAD)"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            table.apply("IDQ.CORE / TOPDOWN.SLOTS"),
            "IDQ.CORE / (4 * CPU_CLK_UNHALTED.THREAD)"
        );
    }

    #[test]
    fn empty_fixup_table() {
        let table = FixupTable::from_json("{}").unwrap();
        assert!(table.substitutions.is_empty());
        assert_eq!(table.apply("a + b"), "a + b");
    }

    #[test]
    fn catalog_is_case_insensitive() {
        let catalog = EventCatalog::from_json(
            r#"[{"EventName": "INST_RETIRED.ANY", "EventCode": "0xc0"}, {"EventName": "cycles"}]"#,
        )
        .unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("inst_retired.any"));
        assert!(catalog.contains("CYCLES"));
        assert!(!catalog.contains("UOPS_ISSUED.ANY"));
    }

    #[test]
    fn catalog_rejects_malformed_json() {
        assert!(EventCatalog::from_json(r#"{"EventName": "x"}"#).is_err());
    }
}
