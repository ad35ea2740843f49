// Shared test components for the runtime integration suites.
#![allow(dead_code)]

use runbookcore::{
    Analyser, ComponentError, Connector, Message, Properties, Schema,
};
use runbookruntime::{AnalyserFactory, ComponentRegistry, ConnectorFactory};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub fn standard() -> Schema {
    Schema::new("standard_input", "1.0.0")
}

pub fn findings() -> Schema {
    Schema::new("findings", "1.0.0")
}

/// Records how many component calls overlap.
#[derive(Default)]
pub struct CallTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl CallTracker {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Behaviour shared by test connectors and analysers, read from properties:
/// `delay_ms` sleeps, `fail` returns an error, `wrong_schema` tags the
/// result with a schema nobody asked for.
#[derive(Clone)]
struct Behaviour {
    delay: Duration,
    fail: bool,
    wrong_schema: bool,
    tracker: Arc<CallTracker>,
}

impl Behaviour {
    fn from_properties(properties: &Properties, tracker: &Arc<CallTracker>) -> Self {
        Self {
            delay: Duration::from_millis(
                properties.get("delay_ms").and_then(Value::as_u64).unwrap_or(0),
            ),
            fail: properties.get("fail").and_then(Value::as_bool).unwrap_or(false),
            wrong_schema: properties
                .get("wrong_schema")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            tracker: Arc::clone(tracker),
        }
    }

    fn run(
        &self,
        id: &str,
        content: Vec<Value>,
        schema: &Schema,
    ) -> Result<Message, ComponentError> {
        self.tracker.enter();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.tracker.leave();

        if self.fail {
            return Err(ComponentError::Execution(format!("{} was told to fail", id)));
        }
        let schema = if self.wrong_schema {
            Schema::new("unexpected", "9.9.9")
        } else {
            schema.clone()
        };
        Ok(Message::new(id, schema, content))
    }
}

/// Connector emitting the `items` property.
struct StaticConnector {
    items: Vec<Value>,
    behaviour: Behaviour,
}

impl Connector for StaticConnector {
    fn extract(&self, output_schema: &Schema) -> Result<Message, ComponentError> {
        self.behaviour.run("static", self.items.clone(), output_schema)
    }
}

pub struct StaticConnectorFactory {
    component_type: String,
    outputs: Vec<Schema>,
    tracker: Arc<CallTracker>,
}

impl ConnectorFactory for StaticConnectorFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Connector>, ComponentError> {
        let items = match properties.get("items") {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(ComponentError::Configuration(
                    "'items' must be a list".to_string(),
                ))
            }
        };
        Ok(Box::new(StaticConnector {
            items,
            behaviour: Behaviour::from_properties(properties, &self.tracker),
        }))
    }

    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn output_schemas(&self) -> Vec<Schema> {
        self.outputs.clone()
    }
}

/// Analyser re-tagging its input items with the output schema.
struct IdentityAnalyser {
    behaviour: Behaviour,
}

impl Analyser for IdentityAnalyser {
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError> {
        self.behaviour.run("identity", input.content, output_schema)
    }
}

pub struct IdentityAnalyserFactory {
    component_type: String,
    inputs: Vec<Schema>,
    outputs: Vec<Schema>,
    tracker: Arc<CallTracker>,
}

impl AnalyserFactory for IdentityAnalyserFactory {
    fn create(&self, properties: &Properties) -> Result<Box<dyn Analyser>, ComponentError> {
        Ok(Box::new(IdentityAnalyser {
            behaviour: Behaviour::from_properties(properties, &self.tracker),
        }))
    }

    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn input_schemas(&self) -> Vec<Schema> {
        self.inputs.clone()
    }

    fn output_schemas(&self) -> Vec<Schema> {
        self.outputs.clone()
    }
}

/// Registry used by the integration tests:
///
/// - `static`: connector producing `standard_input/1.0.0`
/// - `static_v2`: connector producing `standard_input/2.0.0`
/// - `static_any`: connector declaring no schema
/// - `identity`: analyser accepting anything, producing `standard_input/1.0.0`
/// - `detect`: analyser accepting only `standard_input/1.0.0`, producing
///   `findings/1.0.0`
pub fn registry(tracker: &Arc<CallTracker>) -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    for (component_type, outputs) in [
        ("static", vec![standard()]),
        ("static_v2", vec![Schema::new("standard_input", "2.0.0")]),
        ("static_any", vec![]),
    ] {
        registry.register_connector(Arc::new(StaticConnectorFactory {
            component_type: component_type.to_string(),
            outputs,
            tracker: Arc::clone(tracker),
        }));
    }
    registry.register_analyser(Arc::new(IdentityAnalyserFactory {
        component_type: "identity".to_string(),
        inputs: vec![],
        outputs: vec![standard()],
        tracker: Arc::clone(tracker),
    }));
    registry.register_analyser(Arc::new(IdentityAnalyserFactory {
        component_type: "detect".to_string(),
        inputs: vec![standard()],
        outputs: vec![findings()],
        tracker: Arc::clone(tracker),
    }));
    Arc::new(registry)
}
