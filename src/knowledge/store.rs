//! Knowledge Store
//!
//! Process-wide cache of knowledge indexes keyed by chatbot identity.
//! Rebuilds swap a whole `Arc`, so concurrent readers see either the old or
//! the new index. Entries are evicted only by `invalidate` / `clear`.

use crate::error::{PilotError, Result};
use crate::knowledge::index::KnowledgeIndex;
use crate::semantic::{from_raw, SchemaExtractor, SemanticSchema};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default)]
pub struct KnowledgeStore {
    entries: DashMap<String, Arc<KnowledgeIndex>>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chatbot_id: &str) -> Option<Arc<KnowledgeIndex>> {
        self.entries.get(chatbot_id).map(|e| Arc::clone(e.value()))
    }

    /// Like `get`, but a missing chatbot is an error
    pub fn require(&self, chatbot_id: &str) -> Result<Arc<KnowledgeIndex>> {
        self.get(chatbot_id)
            .ok_or_else(|| PilotError::UnknownChatbot(chatbot_id.to_string()))
    }

    pub fn put(&self, chatbot_id: &str, index: KnowledgeIndex) -> Arc<KnowledgeIndex> {
        let index = Arc::new(index);
        self.entries.insert(chatbot_id.to_string(), Arc::clone(&index));
        index
    }

    /// Drop the cached index; returns whether one was present
    pub fn invalidate(&self, chatbot_id: &str) -> bool {
        let removed = self.entries.remove(chatbot_id).is_some();
        if removed {
            info!("Invalidated knowledge index for chatbot {}", chatbot_id);
        }
        removed
    }

    pub fn clear(&self) {
        let n = self.entries.len();
        self.entries.clear();
        info!("Cleared {} cached knowledge indexes", n);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configure a chatbot with a schema. An unchanged schema keeps the cached
    /// index; any change rebuilds it from scratch.
    pub fn configure(&self, chatbot_id: &str, schema: SemanticSchema) -> Result<Arc<KnowledgeIndex>> {
        // Build outside the map so readers never wait on index construction
        let index = KnowledgeIndex::build(schema)?;
        if let Some(existing) = self.get(chatbot_id) {
            if existing.fingerprint() == index.fingerprint() {
                return Ok(existing);
            }
            info!("Schema changed for chatbot {}, rebuilding knowledge index", chatbot_id);
        }
        Ok(self.put(chatbot_id, index))
    }

    /// Rebuild a chatbot's index from the schema it already holds
    pub fn restart(&self, chatbot_id: &str) -> Result<Arc<KnowledgeIndex>> {
        let current = self.require(chatbot_id)?;
        let rebuilt = KnowledgeIndex::build(current.schema_arc())?;
        info!("Restarted knowledge index for chatbot {}", chatbot_id);
        Ok(self.put(chatbot_id, rebuilt))
    }

    /// Re-extract the raw schema and rebuild. Curated synonyms and date
    /// aliases that still point at existing tables/columns are carried over.
    pub async fn refresh(
        &self,
        chatbot_id: &str,
        extractor: &dyn SchemaExtractor,
    ) -> Result<Arc<KnowledgeIndex>> {
        let raw = extractor.extract().await?;
        let mut schema = from_raw(raw)?;

        if let Some(previous) = self.get(chatbot_id) {
            let old = previous.schema();
            for (table, syns) in &old.synonyms {
                if schema.table(table).is_some() {
                    schema.synonyms.insert(table.clone(), syns.clone());
                } else {
                    warn!("Dropping synonyms for vanished table {}", table);
                }
            }
            for (alias, def) in &old.date_aliases {
                let column_exists = def.column.as_deref().map_or(true, |c| {
                    c.split_once('.')
                        .map_or(false, |(t, col)| schema.column(t, col).is_some())
                });
                if column_exists {
                    schema.date_aliases.insert(alias.clone(), def.clone());
                } else {
                    warn!("Dropping date alias '{}' bound to a vanished column", alias);
                }
            }
        }

        self.configure(chatbot_id, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{ColumnType, RawColumn, RawSchema, RawTable, SemanticColumn, SemanticTable};
    use async_trait::async_trait;

    fn schema(description: &str) -> SemanticSchema {
        SemanticSchema {
            tables: vec![SemanticTable::new("orders", vec![SemanticColumn::new("id", ColumnType::Integer)])
                .with_description(description)],
            ..Default::default()
        }
    }

    #[test]
    fn test_get_put_invalidate() {
        let store = KnowledgeStore::new();
        assert!(store.get("bot").is_none());
        assert!(matches!(store.require("bot"), Err(PilotError::UnknownChatbot(_))));

        store.configure("bot", schema("orders")).unwrap();
        assert!(store.get("bot").is_some());
        assert!(store.invalidate("bot"));
        assert!(!store.invalidate("bot"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unchanged_schema_is_a_cache_hit() {
        let store = KnowledgeStore::new();
        let first = store.configure("bot", schema("orders")).unwrap();
        let second = store.configure("bot", schema("orders")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let third = store.configure("bot", schema("sales orders")).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        // readers holding the old Arc keep a complete index
        assert_eq!(first.schema().tables[0].description, "orders");
    }

    #[test]
    fn test_restart_rebuilds_identical_index() {
        let store = KnowledgeStore::new();
        let before = store.configure("bot", schema("orders")).unwrap();
        let after = store.restart("bot").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    struct FixedExtractor;

    #[async_trait]
    impl SchemaExtractor for FixedExtractor {
        async fn extract(&self) -> Result<RawSchema> {
            Ok(RawSchema {
                tables: vec![RawTable {
                    name: "orders".to_string(),
                    comment: Some("Sales orders".to_string()),
                    columns: vec![RawColumn {
                        name: "id".to_string(),
                        data_type: "bigint".to_string(),
                        comment: None,
                    }],
                }],
                foreign_keys: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_curated_synonyms() {
        let store = KnowledgeStore::new();
        let mut curated = schema("orders");
        curated.synonyms.insert("orders".into(), vec!["purchases".into()]);
        store.configure("bot", curated).unwrap();

        let refreshed = store.refresh("bot", &FixedExtractor).await.unwrap();
        assert_eq!(refreshed.schema().tables[0].description, "Sales orders");
        assert_eq!(refreshed.canonical_table("purchases"), Some("orders"));
    }
}
