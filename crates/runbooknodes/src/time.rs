use runbookcore::{Analyser, ComponentError, Message, Properties, Schema};
use runbookruntime::{AnalyserFactory, ComponentMetadata};
use serde_json::Value;
use std::thread;
use std::time::Duration;

/// Block for a fixed duration, then pass the input through
pub struct DelayAnalyser {
    delay: Duration,
}

impl Analyser for DelayAnalyser {
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError> {
        tracing::debug!("Delaying for {}ms", self.delay.as_millis());
        thread::sleep(self.delay);

        Ok(Message {
            schema: output_schema.clone(),
            ..input
        })
    }
}

pub struct DelayAnalyserFactory;

impl AnalyserFactory for DelayAnalyserFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError> {
        let delay_ms = match properties.get("delay_ms") {
            None => 1000, // Default to 1 second if not specified
            Some(v) => v.as_u64().ok_or_else(|| {
                ComponentError::Configuration(format!(
                    "'delay_ms' must be a non-negative integer, got {}",
                    v
                ))
            })?,
        };
        Ok(Box::new(DelayAnalyser {
            delay: Duration::from_millis(delay_ms),
        }))
    }

    fn component_type(&self) -> &str {
        "delay"
    }

    fn input_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    fn output_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Delay for 'delay_ms' milliseconds, then forward the input".to_string(),
            category: "time".to_string(),
        }
    }
}
