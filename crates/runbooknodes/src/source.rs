use crate::standard_input;
use runbookcore::{ComponentError, Connector, Message, Properties, Schema};
use runbookruntime::{ComponentMetadata, ConnectorFactory};
use serde_json::Value;

/// Emits the items listed in its `items` property.
pub struct StaticConnector {
    items: Vec<Value>,
}

impl StaticConnector {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl Connector for StaticConnector {
    fn extract(&self, output_schema: &Schema) -> Result<Message, ComponentError> {
        tracing::debug!("Emitting {} static items", self.items.len());
        Ok(Message::new("static", output_schema.clone(), self.items.clone()))
    }
}

pub struct StaticConnectorFactory;

impl ConnectorFactory for StaticConnectorFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Connector>, ComponentError> {
        let items = match properties.get("items") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(ComponentError::Configuration(format!(
                    "'items' must be a list, got {}",
                    other
                )))
            }
        };
        Ok(Box::new(StaticConnector::new(items)))
    }

    fn component_type(&self) -> &str {
        "static"
    }

    fn output_schemas(&self) -> Vec<Schema> {
        vec![standard_input("1.0.0"), standard_input("2.0.0")]
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Emit the items listed in the 'items' property".to_string(),
            category: "source".to_string(),
        }
    }
}
