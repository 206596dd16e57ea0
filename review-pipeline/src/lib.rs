//! Review pipeline engine.
//!
//! End-to-end flow for one change request:
//!
//! 1) **Fetch**: provider I/O through the SCM client (meta + raw diff)
//! 2) **Parse**: unified diff into a typed document
//! 3) **Enrich**: context strategies in parallel with per-strategy isolation,
//!    plus file expansion, repository policies and ticket context (best-effort)
//! 4) **Prompt**: budgeted system/user assembly with section markers
//! 5) **Stream**: LLM analysis as ordered chunks over a bounded channel,
//!    schema-validated with one strict retry
//! 6) **Aggregate**: confidence filter, dedup, per-file cap, severity counts
//! 7) **Persist**: review aggregate with a one-way state machine
//! 8) **Publish**: summary + inline comments with position-mapping fallback
//!
//! The pipeline uses `tracing` for step logging and avoids `async-trait` and
//! heap trait objects. Provider, LLM and strategy dispatch are enum-based;
//! tests substitute the stub variants.

pub mod aggregate;
pub mod context;
pub mod diff;
pub mod errors;
pub mod findings;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod resilience;
pub mod scm;

pub use errors::{Error, PipelineResult};
pub use observability::{CorrelationId, MetricsSnapshot, RequestContext};
pub use pipeline::{PipelineConfig, ReviewPipeline};
pub use scm::{ChangeRequestRef, ProviderKind, ScmClient, ScmRouter};
