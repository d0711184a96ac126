// Event bus - the single ingress point from entity mutations into the
// automation engine.
//
// Emission is fire and forget: the caller never blocks on workflow
// processing, and engine failures are logged here, never thrown back.

use std::sync::Arc;
use tracing::{error, info};

use crate::workflows::{AutomationEngine, BusinessEvent};

pub struct EventBus {
    engine: Arc<AutomationEngine>,
}

impl EventBus {
    pub fn new(engine: Arc<AutomationEngine>) -> Self {
        Self { engine }
    }

    /// Notify the core of a state-affecting fact. Returns immediately;
    /// matching and execution happen in a detached task.
    pub fn emit_business_event(&self, event: BusinessEvent) {
        info!(
            trigger = ?event.trigger_type,
            entity = %event.entity_type,
            entity_id = %event.entity_id,
            "business event emitted"
        );

        let engine = self.engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.process_event(event).await {
                error!("automation engine failed to process event: {:?}", e);
            }
        });
    }
}
