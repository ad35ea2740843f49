use crate::standard_input;
use runbookcore::{Analyser, ComponentError, Message, Properties, Schema};
use runbookruntime::{AnalyserFactory, ComponentMetadata, SchemaCodecs};
use serde_json::Value;
use std::sync::Arc;

/// Pass the input items through, re-tagged with the output schema
pub struct PassthroughAnalyser;

impl Analyser for PassthroughAnalyser {
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError> {
        Ok(Message {
            schema: output_schema.clone(),
            ..input
        })
    }
}

pub struct PassthroughAnalyserFactory;

impl AnalyserFactory for PassthroughAnalyserFactory {
    fn create(&self, _properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError> {
        Ok(Box::new(PassthroughAnalyser))
    }

    fn component_type(&self) -> &str {
        "passthrough"
    }

    fn input_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    // no declared outputs: the input schema is carried through
    fn output_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Forward input items unchanged".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Extracts the searchable text of one item for a given input version.
type TextReader = fn(&Value) -> Option<String>;

/// Renders selected text as an item of a given output version.
type TextWriter = fn(String) -> Value;

/// `standard_input/1.0.0` items are plain values.
fn read_v1(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `standard_input/2.0.0` items are objects carrying their text in `content`.
fn read_v2(item: &Value) -> Option<String> {
    item.get("content").and_then(Value::as_str).map(str::to_string)
}

fn write_v1(text: String) -> Value {
    Value::String(text)
}

fn write_v2(text: String) -> Value {
    serde_json::json!({ "content": text })
}

fn readers() -> SchemaCodecs<TextReader> {
    SchemaCodecs::new()
        .with(standard_input("1.0.0"), read_v1 as TextReader)
        .with(standard_input("2.0.0"), read_v2 as TextReader)
}

fn writers() -> SchemaCodecs<TextWriter> {
    SchemaCodecs::new()
        .with(standard_input("1.0.0"), write_v1 as TextWriter)
        .with(standard_input("2.0.0"), write_v2 as TextWriter)
}

/// Keep the items whose text contains the `contains` property, rendered in
/// the requested output version.
pub struct SelectAnalyser {
    needle: String,
    readers: Arc<SchemaCodecs<TextReader>>,
    writers: Arc<SchemaCodecs<TextWriter>>,
}

impl Analyser for SelectAnalyser {
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError> {
        let reader = self
            .readers
            .get(&input.schema)
            .ok_or_else(|| ComponentError::UnsupportedSchema(input.schema.clone()))?;
        let writer = self
            .writers
            .get(output_schema)
            .ok_or_else(|| ComponentError::UnsupportedSchema(output_schema.clone()))?;

        let total = input.len();
        let selected: Vec<Value> = input
            .content
            .iter()
            .filter_map(reader)
            .filter(|text| text.contains(&self.needle))
            .map(writer)
            .collect();
        tracing::debug!("Selected {} of {} items matching '{}'", selected.len(), total, self.needle);

        Ok(Message::new(input.id, output_schema.clone(), selected)
            .with_metadata("selected_from", total))
    }
}

pub struct SelectAnalyserFactory {
    readers: Arc<SchemaCodecs<TextReader>>,
    writers: Arc<SchemaCodecs<TextWriter>>,
}

impl SelectAnalyserFactory {
    pub fn new() -> Self {
        Self {
            readers: Arc::new(readers()),
            writers: Arc::new(writers()),
        }
    }
}

impl Default for SelectAnalyserFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyserFactory for SelectAnalyserFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError> {
        let needle = properties
            .get("contains")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ComponentError::Configuration("'contains' must be a string".to_string())
            })?;
        Ok(Box::new(SelectAnalyser {
            needle: needle.to_string(),
            readers: Arc::clone(&self.readers),
            writers: Arc::clone(&self.writers),
        }))
    }

    fn component_type(&self) -> &str {
        "select"
    }

    fn input_schemas(&self) -> Vec<Schema> {
        self.readers.schemas()
    }

    // newest first, so unpinned artifacts get the newest version
    fn output_schemas(&self) -> Vec<Schema> {
        self.writers.schemas()
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Keep items whose text contains a substring".to_string(),
            category: "transform".to_string(),
        }
    }
}
