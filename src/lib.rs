//! Capture of feature flag evaluations that are part of an experiment, forwarded to a buffered
//! ingestion stream (Amazon Data Firehose) for downstream analytics.
//!
//! # Overview
//!
//! The flag engine is not part of this crate. It is plugged in through [`FlagEvaluator`] and
//! produces an [`EvaluationDetail`]: the value, the variation index and an
//! [`EvaluationReason`]. Whenever the reason says the evaluation is part of an experiment, an
//! [`EventEnvelope`](envelope::EventEnvelope) is built and shipped to the stream.
//!
//! There are two ways to capture evaluations:
//! - [`TrackedEvaluator`] wraps the engine's evaluate call;
//! - [`ExperimentHook`] is an [`EvaluationHook`] the engine runs after each evaluation (see
//!   [`HookedEvaluator`]).
//!
//! Both drive the same pipeline: the [sanitizer](sanitizer::extract) keeps `key`, `kind` and
//! caller-defined context attributes, the [envelope](envelope::build) is built, and
//! [`DeliveryClient`] writes it as one newline-delimited JSON record.
//!
//! Export is best-effort. The evaluation result is always returned unchanged; export errors are
//! logged and discarded. Without a [`DeliveryClient`] evaluations pass through untouched.
//! Delivery happens on the evaluating thread unless an [`ExportWorker`] is used to ship
//! envelopes in batches from a background thread.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. The only error a caller has to handle is a
//! [`ConfigurationError`](error::ConfigurationError) when creating a [`DeliveryClient`] at
//! startup, typically by running without export.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the
//! `experiment_firehose` target. Dropped attributes and failed deliveries are logged at `warn`.

#![warn(rustdoc::missing_crate_level_docs)]

mod attributes;
mod context;
mod delivery;
mod delivery_config;
pub mod envelope;
pub mod error;
mod evaluation;
mod export_worker;
mod firehose;
mod http_transport;
mod interceptor;
pub mod sanitizer;
#[cfg(test)]
mod testing;
pub mod transport;

pub use attributes::{AttributeValue, Attributes};
pub use context::EvaluationContext;
pub use delivery::{BatchOutcome, DeliveryClient, DeliveryOutcome};
pub use delivery_config::{CredentialSource, DeliveryConfig, ResolvedCredentials, ResolvedDelivery};
pub use envelope::{CaptureSource, EventEnvelope};
pub use error::{Error, Result};
pub use evaluation::{EvaluationDetail, EvaluationReason, FlagEvaluator};
pub use export_worker::{ExportHandle, ExportWorker, ExportWorkerConfig};
pub use firehose::FirehoseTransport;
pub use http_transport::HttpTransport;
pub use interceptor::{
    EvaluationHook, ExperimentExporter, ExperimentHook, HookedEvaluator, TrackedEvaluator,
};
