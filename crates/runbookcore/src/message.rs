use crate::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Schema-tagged payload passed between components.
///
/// The content is an ordered list of items whose shape is defined by the
/// schema. The core never looks inside items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub schema: Schema,
    pub content: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, schema: Schema, content: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            schema,
            content,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Append the items of every message, in order, into one message tagged
    /// with `schema`. Callers guarantee the inputs share that schema.
    pub fn concatenate<'a>(
        id: impl Into<String>,
        schema: Schema,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> Message {
        let mut content = Vec::new();
        let mut sources = Vec::new();
        for message in messages {
            content.extend(message.content.iter().cloned());
            sources.push(Value::String(message.id.clone()));
        }
        Message::new(id, schema, content).with_metadata("merged_from", Value::Array(sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_concatenate_preserves_order_and_schema() {
        let schema = Schema::new("s", "1.0.0");
        let a = Message::new("a", schema.clone(), vec![json!(1), json!(2)]);
        let b = Message::new("b", schema.clone(), vec![json!(3)]);

        let merged = Message::concatenate("c", schema.clone(), [&a, &b]);

        assert_eq!(merged.content, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(merged.schema, schema);
        assert_eq!(merged.metadata["merged_from"], json!(["a", "b"]));
    }

    #[test]
    fn test_concatenate_empty_inputs() {
        let schema = Schema::new("s", "1.0.0");
        let merged = Message::concatenate("c", schema, std::iter::empty());
        assert!(merged.is_empty());
    }
}
