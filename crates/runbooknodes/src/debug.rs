use runbookcore::{Analyser, ComponentError, Message, Properties, Schema};
use runbookruntime::{AnalyserFactory, ComponentMetadata};
use serde_json::Value;

/// Logs the items it receives, then passes them through
pub struct LogAnalyser {
    label: String,
}

impl Analyser for LogAnalyser {
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError> {
        tracing::info!("{}: {} items ({})", self.label, input.len(), input.schema);
        for (i, item) in input.content.iter().enumerate() {
            tracing::info!("  [{}] {}", i, item);
        }

        Ok(Message {
            schema: output_schema.clone(),
            ..input
        })
    }
}

pub struct LogAnalyserFactory;

impl AnalyserFactory for LogAnalyserFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError> {
        let label = properties
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("DEBUG")
            .to_string();
        Ok(Box::new(LogAnalyser { label }))
    }

    fn component_type(&self) -> &str {
        "log"
    }

    fn input_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    fn output_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Logs input items for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
