pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod repository;
pub mod worker;

pub use error::{DiscoveryError, Result};
pub use orchestrator::DiscoveryOrchestrator;
pub use queue::{RedisRunQueue, RunRequest};
pub use repository::{
    AutomationRepository, CorrelationRepository, InMemoryAutomationRepository,
    InMemoryCorrelationRepository, InMemoryRunRepository, PostgresAutomationRepository,
    PostgresCorrelationRepository, PostgresRunRepository, RunRepository, UpsertOutcome,
    UpsertScope,
};
pub use worker::DiscoveryWorkerPool;
