//! Read-only reference data keyed by type name.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use serde_json::Value;
use tracing::info;

use crate::entity::{Entity, Source};
use crate::error::{BackendError, BackendResult};

/// Supplies immutable record collections by type name.
pub trait KnowledgeProvider: Send + Sync + 'static {
    /// Records of `type_name`, `None` if the type is unknown.
    fn get(&self, type_name: &str) -> BackendResult<Option<Arc<[Value]>>>;
}

/// Knowledge loaded from a JSON document of the form
/// `{ "<type>": [ record, ... ], ... }`.
#[derive(Debug, Default, Clone)]
pub struct JsonKnowledge {
    types: AHashMap<String, Arc<[Value]>>,
}

impl JsonKnowledge {
    /// Parses a JSON document.
    pub fn parse(json: &str) -> BackendResult<Self> {
        let raw: HashMap<String, Vec<Value>> =
            serde_json::from_str(json).map_err(|e| BackendError::Serialization(e.to_string()))?;
        let types: AHashMap<String, Arc<[Value]>> = raw
            .into_iter()
            .map(|(name, records)| (name, Arc::from(records)))
            .collect();
        Ok(Self { types })
    }

    /// Loads a JSON document from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> BackendResult<Self> {
        let path = path.as_ref();
        let knowledge = Self::parse(&fs::read_to_string(path)?)?;
        info!(
            "Loaded {} knowledge types from {}",
            knowledge.types.len(),
            path.display()
        );
        Ok(knowledge)
    }

    /// Known type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl KnowledgeProvider for JsonKnowledge {
    fn get(&self, type_name: &str) -> BackendResult<Option<Arc<[Value]>>> {
        Ok(self.types.get(type_name).cloned())
    }
}

/// All records of one knowledge type.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeSet {
    /// Type name
    pub type_name: String,
    /// Records, shared
    pub records: Arc<[Value]>,
}

impl KnowledgeSet {
    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the type has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Entity for KnowledgeSet {
    type Key = String;
    const KIND: &'static str = "knowledge";

    fn key(&self) -> String {
        self.type_name.clone()
    }
}

/// Adapts a [`KnowledgeProvider`] to a read-only [`Source`].
#[derive(Debug)]
pub struct KnowledgeSource<P: ?Sized> {
    provider: Arc<P>,
}

impl<P: ?Sized> KnowledgeSource<P> {
    /// Wraps a provider.
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider }
    }
}

impl<P: KnowledgeProvider + ?Sized> Source<KnowledgeSet> for KnowledgeSource<P> {
    fn fetch(&self, key: &String) -> BackendResult<Option<KnowledgeSet>> {
        Ok(self.provider.get(key)?.map(|records| KnowledgeSet {
            type_name: key.clone(),
            records,
        }))
    }

    fn store(&self, _key: &String, _value: &KnowledgeSet) -> BackendResult<()> {
        Err(BackendError::ReadOnly(KnowledgeSet::KIND))
    }

    fn store_all(&self, _values: &[(String, KnowledgeSet)]) -> BackendResult<()> {
        Err(BackendError::ReadOnly(KnowledgeSet::KIND))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOC: &str = r#"{
        "materials": [{"id": 1, "name": "granite"}, {"id": 2, "name": "soil"}],
        "plants": []
    }"#;

    #[test]
    fn test_parse_and_get() {
        let knowledge = JsonKnowledge::parse(DOC).expect("parse");
        assert_eq!(knowledge.type_names(), vec!["materials", "plants"]);
        let materials = knowledge.get("materials").expect("get").expect("known");
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[1]["name"], "soil");
        assert!(knowledge.get("weather").expect("get").is_none());
    }

    #[test]
    fn test_parse_rejects_non_arrays() {
        assert!(matches!(
            JsonKnowledge::parse(r#"{"materials": 3}"#),
            Err(BackendError::Serialization(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("knowledge.json");
        fs::write(&path, DOC).expect("write");
        let knowledge = JsonKnowledge::load(&path).expect("load");
        assert!(knowledge.get("plants").expect("get").expect("known").is_empty());
        assert!(JsonKnowledge::load(temp_dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_source_is_read_only() {
        let source = KnowledgeSource::new(Arc::new(JsonKnowledge::parse(DOC).expect("parse")));
        let set = source.fetch(&"materials".to_string()).expect("fetch").expect("known");
        assert_eq!(set.key(), "materials");
        assert!(matches!(source.store(&set.key(), &set), Err(BackendError::ReadOnly(_))));
    }
}
