use runbookcore::{Analyser, ComponentError, ComponentKind, Connector, Properties, Schema, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for connector instances, registered under a type name.
pub trait ConnectorFactory: Send + Sync {
    /// Create a new connector configured from artifact properties
    fn create(&self, properties: &Properties) -> Result<Box<dyn Connector>, ComponentError>;

    /// Get connector type identifier
    fn component_type(&self) -> &str;

    /// Schemas this connector accepts. Connectors normally declare none.
    fn input_schemas(&self) -> Vec<Schema> {
        Vec::new()
    }

    /// Schemas this connector can produce; the first one is the default.
    fn output_schemas(&self) -> Vec<Schema>;

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::default()
    }
}

/// Factory for analyser (transform) instances.
pub trait AnalyserFactory: Send + Sync {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError>;

    fn component_type(&self) -> &str;

    /// Input schemas this analyser accepts. An empty list accepts any schema.
    fn input_schemas(&self) -> Vec<Schema>;

    /// Schemas this analyser can produce; the first one is the default.
    fn output_schemas(&self) -> Vec<Schema>;

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::default()
    }
}

/// Metadata about a component type
#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ComponentMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// Summary of one registered factory, for listings.
#[derive(Debug, Clone)]
pub struct ComponentInfo {
    pub kind: ComponentKind,
    pub component_type: String,
    pub input_schemas: Vec<Schema>,
    pub output_schemas: Vec<Schema>,
    pub metadata: ComponentMetadata,
}

/// Name-indexed lookup of connector and analyser factories.
///
/// Populated once at startup and then shared read-only (behind an `Arc`)
/// by the planner and executor.
#[derive(Default)]
pub struct ComponentRegistry {
    connectors: HashMap<String, Arc<dyn ConnectorFactory>>,
    analysers: HashMap<String, Arc<dyn AnalyserFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector factory, replacing any previous one with the same type
    pub fn register_connector(&mut self, factory: Arc<dyn ConnectorFactory>) {
        let component_type = factory.component_type().to_string();
        tracing::info!("Registering connector type: {}", component_type);
        self.connectors.insert(component_type, factory);
    }

    /// Register an analyser factory, replacing any previous one with the same type
    pub fn register_analyser(&mut self, factory: Arc<dyn AnalyserFactory>) {
        let component_type = factory.component_type().to_string();
        tracing::info!("Registering analyser type: {}", component_type);
        self.analysers.insert(component_type, factory);
    }

    pub fn get_connector_factory(
        &self,
        component_type: &str,
    ) -> Result<Arc<dyn ConnectorFactory>, WorkflowError> {
        self.connectors
            .get(component_type)
            .cloned()
            .ok_or_else(|| WorkflowError::ComponentNotFound {
                kind: ComponentKind::Connector,
                component_type: component_type.to_string(),
            })
    }

    pub fn get_analyser_factory(
        &self,
        component_type: &str,
    ) -> Result<Arc<dyn AnalyserFactory>, WorkflowError> {
        self.analysers
            .get(component_type)
            .cloned()
            .ok_or_else(|| WorkflowError::ComponentNotFound {
                kind: ComponentKind::Analyser,
                component_type: component_type.to_string(),
            })
    }

    /// All registered components, connectors first, each group sorted by type.
    pub fn list_components(&self) -> Vec<ComponentInfo> {
        let mut connectors: Vec<_> = self
            .connectors
            .values()
            .map(|f| ComponentInfo {
                kind: ComponentKind::Connector,
                component_type: f.component_type().to_string(),
                input_schemas: f.input_schemas(),
                output_schemas: f.output_schemas(),
                metadata: f.metadata(),
            })
            .collect();
        connectors.sort_by(|a, b| a.component_type.cmp(&b.component_type));

        let mut analysers: Vec<_> = self
            .analysers
            .values()
            .map(|f| ComponentInfo {
                kind: ComponentKind::Analyser,
                component_type: f.component_type().to_string(),
                input_schemas: f.input_schemas(),
                output_schemas: f.output_schemas(),
                metadata: f.metadata(),
            })
            .collect();
        analysers.sort_by(|a, b| a.component_type.cmp(&b.component_type));

        connectors.extend(analysers);
        connectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbookcore::Message;

    struct NullConnector;

    impl Connector for NullConnector {
        fn extract(&self, output_schema: &Schema) -> Result<Message, ComponentError> {
            Ok(Message::new("null", output_schema.clone(), Vec::new()))
        }
    }

    struct NullConnectorFactory;

    impl ConnectorFactory for NullConnectorFactory {
        fn create(&self, _properties: &Properties) -> Result<Box<dyn Connector>, ComponentError> {
            Ok(Box::new(NullConnector))
        }

        fn component_type(&self) -> &str {
            "null"
        }

        fn output_schemas(&self) -> Vec<Schema> {
            vec![Schema::new("empty", "1.0.0")]
        }
    }

    #[test]
    fn test_lookup_registered_connector() {
        let mut registry = ComponentRegistry::new();
        registry.register_connector(Arc::new(NullConnectorFactory));

        let factory = registry.get_connector_factory("null").unwrap();
        assert_eq!(factory.component_type(), "null");
        assert!(factory.input_schemas().is_empty());
    }

    #[test]
    fn test_unknown_types_are_component_not_found() {
        let mut registry = ComponentRegistry::new();
        registry.register_connector(Arc::new(NullConnectorFactory));

        let err = registry.get_analyser_factory("null").err().unwrap();
        assert_eq!(
            err,
            WorkflowError::ComponentNotFound {
                kind: ComponentKind::Analyser,
                component_type: "null".to_string(),
            }
        );
        assert!(registry.get_connector_factory("missing").is_err());
    }

    #[test]
    fn test_list_components() {
        let mut registry = ComponentRegistry::new();
        registry.register_connector(Arc::new(NullConnectorFactory));

        let listed = registry.list_components();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, ComponentKind::Connector);
        assert_eq!(listed[0].output_schemas, vec![Schema::new("empty", "1.0.0")]);
    }
}
