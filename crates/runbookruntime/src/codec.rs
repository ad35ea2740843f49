//! Versioned schema codec table.
//!
//! Components that understand several versions of a schema keep one handler
//! per `(name, version)` pair here instead of discovering readers by naming
//! convention. Lookups are exact. [`SchemaCodecs::schemas`] lists the
//! newest version of each name first, so a factory declaring its schemas
//! from the table makes the newest version the planner's default unless a
//! workflow pins another one.

use runbookcore::Schema;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SchemaCodecs<H> {
    by_name: BTreeMap<String, Vec<(Schema, H)>>,
}

impl<H> Default for SchemaCodecs<H> {
    fn default() -> Self {
        Self {
            by_name: BTreeMap::new(),
        }
    }
}

impl<H> SchemaCodecs<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `schema`, replacing an existing entry for the
    /// same version.
    pub fn register(&mut self, schema: Schema, handler: H) {
        let versions = self.by_name.entry(schema.name().to_string()).or_default();
        match versions.iter_mut().find(|(s, _)| *s == schema) {
            Some(entry) => entry.1 = handler,
            None => {
                versions.push((schema, handler));
                // highest version first
                versions.sort_by(|(a, _), (b, _)| b.cmp_version(a));
            }
        }
    }

    pub fn with(mut self, schema: Schema, handler: H) -> Self {
        self.register(schema, handler);
        self
    }

    /// Exact-match lookup.
    pub fn get(&self, schema: &Schema) -> Option<&H> {
        self.by_name
            .get(schema.name())?
            .iter()
            .find(|(s, _)| s == schema)
            .map(|(_, h)| h)
    }

    /// Every registered schema, grouped by name, highest version first
    /// within a name.
    pub fn schemas(&self) -> Vec<Schema> {
        self.by_name
            .values()
            .flat_map(|versions| versions.iter().map(|(s, _)| s.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SchemaCodecs<&'static str> {
        SchemaCodecs::new()
            .with(Schema::new("records", "1.0.0"), "v1")
            .with(Schema::new("records", "2.0.0"), "v2")
            .with(Schema::new("records", "1.5.0"), "v1.5")
    }

    #[test]
    fn test_lookup_is_exact() {
        let codecs = table();
        assert_eq!(codecs.get(&Schema::new("records", "1.5.0")), Some(&"v1.5"));
        assert!(codecs.get(&Schema::new("records", "1.5")).is_none());
        assert!(codecs.get(&Schema::new("other", "1.0.0")).is_none());
    }

    #[test]
    fn test_register_replaces_same_version() {
        let mut codecs = table();
        codecs.register(Schema::new("records", "1.0.0"), "v1-new");
        assert_eq!(codecs.get(&Schema::new("records", "1.0.0")), Some(&"v1-new"));
        assert_eq!(codecs.schemas().len(), 3);
    }

    #[test]
    fn test_schemas_highest_first() {
        let versions: Vec<_> = table()
            .schemas()
            .iter()
            .map(|s| s.version().to_string())
            .collect();
        assert_eq!(versions, vec!["2.0.0", "1.5.0", "1.0.0"]);
    }
}
