// Business Automation Engine
//
// Event-driven trigger -> condition -> action workflow runner. Workflows
// are user-configured, rate limited, and every action execution leaves a
// log row behind.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod logs;
pub mod triggers;

pub use actions::{ActionOutcome, ActionType, AfterFailure, WorkflowAction};
pub use conditions::{ConditionOperator, TriggerCondition};
pub use engine::{AutomationEngine, ExecutionSummary, WorkflowDefinition};
pub use executor::ActionExecutor;
pub use logs::{AutomationLog, AutomationLogStore, AutomationStats, LogStatus};
pub use triggers::{BusinessEvent, TriggerType, WorkflowTrigger};
