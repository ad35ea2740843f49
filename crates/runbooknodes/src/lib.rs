//! Standard component library
//!
//! A small set of blocking connectors and analysers for building and
//! testing runbooks

mod debug;
mod source;
mod time;
mod transform;

pub use debug::{LogAnalyser, LogAnalyserFactory};
pub use source::{StaticConnector, StaticConnectorFactory};
pub use time::{DelayAnalyser, DelayAnalyserFactory};
pub use transform::{
    PassthroughAnalyser, PassthroughAnalyserFactory, SelectAnalyser, SelectAnalyserFactory,
};

use runbookcore::Schema;
use runbookruntime::ComponentRegistry;
use std::sync::Arc;

/// Name of the generic record schema the standard components exchange.
pub const STANDARD_INPUT: &str = "standard_input";

pub fn standard_input(version: &str) -> Schema {
    Schema::new(STANDARD_INPUT, version)
}

/// Register all standard components with a registry
pub fn register_all(registry: &mut ComponentRegistry) {
    registry.register_connector(Arc::new(source::StaticConnectorFactory));
    registry.register_analyser(Arc::new(transform::PassthroughAnalyserFactory));
    registry.register_analyser(Arc::new(transform::SelectAnalyserFactory::new()));
    registry.register_analyser(Arc::new(time::DelayAnalyserFactory));
    registry.register_analyser(Arc::new(debug::LogAnalyserFactory));
}
