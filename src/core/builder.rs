use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::error::UnitError;
use crate::subscribers::Subscribe;

use super::handlers::ErrorHandler;
use super::runtime::Runtime;

/// Builder for constructing a [`Runtime`] with subscribers and error handlers.
pub struct RuntimeBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    handlers: Vec<ErrorHandler>,
}

impl RuntimeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            handlers: Vec::new(),
        }
    }

    /// Sets inline event subscribers (replaces any set before).
    ///
    /// Subscribers are called in order, at publish time.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Appends one subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Appends an error handler.
    pub fn with_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&UnitError) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(f));
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> Runtime {
        Runtime::from_parts(self.cfg, self.subscribers, self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscribers::LogWriter;

    #[test]
    fn test_builder_wires_parts() {
        let rt = RuntimeBuilder::new(RuntimeConfig::default())
            .with_subscriber(Arc::new(LogWriter::new()))
            .with_error_handler(|_e| {})
            .build();

        assert_eq!(rt.inner.subs.len(), 1);
        assert!(!rt.is_started());
    }
}
