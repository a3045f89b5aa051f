//! Backend agent integration for the relay router.
//!
//! Composes task envelopes, submits them over a [`TaskTransport`], polls the
//! resulting task to a terminal state, and classifies the outcome under
//! per-persona SLA and retry budgets.

pub mod agent_config;
pub mod agent_contract;
pub mod agent_errors;
pub mod backoff;
pub mod envelope;
pub mod integration;
pub mod persona;
pub mod telemetry;
pub mod transport;

pub use agent_config::{
    default_compliance_tags, parse_compliance_tags, parse_issued_at, parse_persona_tags,
    seconds_to_duration, AgentConfig, ApiKeyAge, SlaBudgets,
};
pub use agent_contract::{
    AgentHealthProbe, AgentRequest, AgentResponse, EchoAgent, FailureClass, FinalState,
    RequestTrace, TaskAgent, TaskDiagnostics,
};
pub use agent_errors::{AgentConfigError, AgentInvokeError, TransportError};
pub use backoff::BackoffPolicy;
pub use envelope::{EnvelopeComposer, TaskCommand, TaskEnvelope, TraceContext};
pub use integration::{TaskIntegrationService, TaskOutcome};
pub use persona::Persona;
pub use telemetry::{AgentTelemetry, AgentTelemetrySnapshot};
pub use transport::{HttpTaskTransport, TaskSnapshot, TaskTransport, UpstreamTaskState};
