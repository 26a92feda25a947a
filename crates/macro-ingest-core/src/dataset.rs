use std::fmt;

use serde::{Deserialize, Serialize};

/// Upstream origin plus logical dataset name, e.g. `bea` / `regional_sqpce`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub source: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(source: &str, dataset: &str) -> Self {
        Self {
            source: sanitize(source),
            dataset: sanitize(dataset),
        }
    }

    /// `Regional` + `SQPCE` -> `regional_sqpce`.
    pub fn bea(dataset: &str, table_name: &str) -> Self {
        Self::new(crate::bea::BEA_SOURCE, &format!("{dataset}_{table_name}"))
    }

    /// Serving table name. Also a safe partition segment.
    pub fn serving_table(&self) -> &str {
        &self.dataset
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.dataset)
    }
}

/// Lowercase, with anything outside `[a-z0-9_]` folded to `_`.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bea_dataset_name() {
        let d = DatasetRef::bea("Regional", "SQPCE");
        assert_eq!(d.source, "bea");
        assert_eq!(d.dataset, "regional_sqpce");
        assert_eq!(d.to_string(), "bea/regional_sqpce");
    }

    #[test]
    fn unsafe_characters_are_folded() {
        let d = DatasetRef::new("bea", "NIPA/T1.1 ");
        assert_eq!(d.serving_table(), "nipa_t1_1");
    }
}
