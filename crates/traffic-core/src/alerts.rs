use std::sync::Arc;

use crate::error::CoreError;
use crate::models::Alert;
use crate::store::AlertSink;

/// Hands finished alerts to the Alert Sink.
#[derive(Clone)]
pub struct AlertEmitter {
    sink: Arc<dyn AlertSink>,
}

impl AlertEmitter {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Write the alert and return it. Sink failures are returned to the caller.
    pub fn emit(&self, alert: Alert) -> Result<Alert, CoreError> {
        self.sink.create(&alert)?;
        Ok(alert)
    }
}
