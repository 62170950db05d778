//! Capture of experiment evaluations, either by wrapping the flag engine or through an
//! after-evaluation hook.
use std::panic::{self, AssertUnwindSafe};

use crate::{
    envelope::{self, CaptureSource},
    error::TransportError,
    export_worker::ExportHandle,
    sanitizer, AttributeValue, DeliveryClient, Error, EvaluationContext, EvaluationDetail,
    FlagEvaluator, Result,
};

#[derive(Clone)]
enum Dispatch {
    /// Deliver on the evaluating thread.
    Inline(DeliveryClient),
    /// Hand over to an [`ExportWorker`](crate::ExportWorker).
    Background(ExportHandle),
}

/// Exports experiment evaluations to the delivery stream.
///
/// Export never fails from the caller's point of view: errors are logged and discarded. Without a
/// delivery client the exporter does nothing.
#[derive(Clone)]
pub struct ExperimentExporter {
    dispatch: Option<Dispatch>,
    source: CaptureSource,
}

impl ExperimentExporter {
    /// Export synchronously through `delivery`, or not at all if it is `None`.
    pub fn new(delivery: Option<DeliveryClient>, source: CaptureSource) -> Self {
        ExperimentExporter {
            dispatch: delivery.map(Dispatch::Inline),
            source,
        }
    }

    /// Export through a background [`ExportWorker`](crate::ExportWorker).
    pub fn background(handle: ExportHandle, source: CaptureSource) -> Self {
        ExperimentExporter {
            dispatch: Some(Dispatch::Background(handle)),
            source,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dispatch.is_some()
    }

    /// Export the evaluation if it is part of an experiment.
    pub fn capture(&self, flag_key: &str, context: &EvaluationContext, detail: &EvaluationDetail) {
        if !detail.is_in_experiment() {
            log::trace!(target: "experiment_firehose",
                        flag_key;
                        "evaluation is not part of an experiment, skipping export");
            return;
        }

        let Some(dispatch) = &self.dispatch else {
            log::trace!(target: "experiment_firehose",
                        flag_key;
                        "no delivery client configured, skipping export");
            return;
        };

        // A panic in the export path must not reach the evaluation caller.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.export(dispatch, flag_key, context, detail)
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::warn!(target: "experiment_firehose",
                           flag_key,
                           source = self.source.as_str();
                           "failed to export experiment evaluation: {:?}", err);
            }
            Err(_) => {
                log::warn!(target: "experiment_firehose",
                           flag_key,
                           source = self.source.as_str();
                           "export of experiment evaluation panicked");
            }
        }
    }

    fn export(
        &self,
        dispatch: &Dispatch,
        flag_key: &str,
        context: &EvaluationContext,
        detail: &EvaluationDetail,
    ) -> Result<()> {
        // Sanitized context and envelope own their data, so later changes to the caller's context
        // are not visible to the export.
        let context = sanitizer::extract(context);
        let envelope = envelope::build(flag_key, context, detail, self.source);

        log::trace!(target: "experiment_firehose",
                    envelope:serde;
                    "exporting experiment evaluation");

        match dispatch {
            Dispatch::Inline(client) => {
                let outcome = client.put_record(&envelope);
                match outcome.error {
                    Some(err) => Err(err),
                    None if outcome.success => Ok(()),
                    None => Err(TransportError::Unavailable.into()),
                }
            }
            Dispatch::Background(handle) => handle.submit(envelope).map_err(Error::from),
        }
    }
}

/// A [`FlagEvaluator`] that exports experiment evaluations of the wrapped engine.
///
/// Evaluation results are returned unchanged.
///
/// ```
/// # use experiment_firehose::{AttributeValue, EvaluationContext, EvaluationDetail, FlagEvaluator, TrackedEvaluator};
/// let engine = |_: &str, _: &EvaluationContext, default: AttributeValue| {
///     EvaluationDetail::default_value(default)
/// };
/// // No delivery client: evaluations pass through without export.
/// let evaluator = TrackedEvaluator::new(engine, None);
/// let detail = evaluator.evaluate("flag", &EvaluationContext::new("u1"), false.into());
/// assert_eq!(detail.value, AttributeValue::Boolean(false));
/// ```
pub struct TrackedEvaluator<E> {
    engine: E,
    exporter: ExperimentExporter,
}

impl<E: FlagEvaluator> TrackedEvaluator<E> {
    pub fn new(engine: E, delivery: Option<DeliveryClient>) -> Self {
        Self::with_exporter(
            engine,
            ExperimentExporter::new(delivery, CaptureSource::Wrapper),
        )
    }

    pub fn with_exporter(engine: E, exporter: ExperimentExporter) -> Self {
        TrackedEvaluator { engine, exporter }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E: FlagEvaluator> FlagEvaluator for TrackedEvaluator<E> {
    fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_value: AttributeValue,
    ) -> EvaluationDetail {
        let detail = self.engine.evaluate(flag_key, context, default_value);
        self.exporter.capture(flag_key, context, &detail);
        detail
    }
}

/// A callback the flag engine runs after each evaluation.
pub trait EvaluationHook {
    fn name(&self) -> &str;

    fn after_evaluation(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        detail: &EvaluationDetail,
    );
}

/// An [`EvaluationHook`] that exports experiment evaluations.
pub struct ExperimentHook {
    exporter: ExperimentExporter,
}

impl ExperimentHook {
    pub fn new(delivery: Option<DeliveryClient>) -> Self {
        ExperimentHook {
            exporter: ExperimentExporter::new(delivery, CaptureSource::Hook),
        }
    }

    pub fn with_exporter(exporter: ExperimentExporter) -> Self {
        ExperimentHook { exporter }
    }
}

impl EvaluationHook for ExperimentHook {
    fn name(&self) -> &str {
        "experiment-firehose"
    }

    fn after_evaluation(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        detail: &EvaluationDetail,
    ) {
        self.exporter.capture(flag_key, context, detail);
    }
}

/// Runs registered hooks after every evaluation of the wrapped engine.
pub struct HookedEvaluator<E> {
    engine: E,
    hooks: Vec<Box<dyn EvaluationHook + Send + Sync>>,
}

impl<E: FlagEvaluator> HookedEvaluator<E> {
    pub fn new(engine: E) -> Self {
        HookedEvaluator {
            engine,
            hooks: Vec::new(),
        }
    }

    /// Register a hook. Hooks run in registration order.
    pub fn add_hook(&mut self, hook: impl EvaluationHook + Send + Sync + 'static) -> &mut Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

impl<E: FlagEvaluator> FlagEvaluator for HookedEvaluator<E> {
    fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_value: AttributeValue,
    ) -> EvaluationDetail {
        let detail = self.engine.evaluate(flag_key, context, default_value);

        for hook in &self.hooks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                hook.after_evaluation(flag_key, context, &detail)
            }));
            if result.is_err() {
                log::warn!(target: "experiment_firehose",
                           flag_key,
                           hook = hook.name();
                           "evaluation hook panicked");
            }
        }

        detail
    }
}
