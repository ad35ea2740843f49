use crate::{ComponentError, Message, Schema};

/// Produces an artifact from an external source.
///
/// Implementations may block (file, network or database I/O); the executor
/// always calls them from its worker pool.
pub trait Connector: Send {
    /// Extract a message tagged with `output_schema`.
    fn extract(&self, output_schema: &Schema) -> Result<Message, ComponentError>;
}

/// Derives an artifact from the merged message of its inputs.
///
/// Like [`Connector`], implementations may block.
pub trait Analyser: Send {
    /// Process `input` (tagged with the resolved input schema) into a
    /// message tagged with `output_schema`.
    fn process(&self, input: Message, output_schema: &Schema) -> Result<Message, ComponentError>;
}
