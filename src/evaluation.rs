//! Evaluation results as produced by the flag engine.
//!
//! The flag engine itself lives outside this crate and is plugged in through [`FlagEvaluator`].

use serde::{Deserialize, Serialize};

use crate::{AttributeValue, EvaluationContext};

/// Explanation of why a flag evaluated to its value.
///
/// Every kind may be flagged `inExperiment`; the engine decides which evaluations take part in an
/// experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationReason {
    /// The flag is off and returned its off variation.
    #[serde(rename_all = "camelCase")]
    Off {
        #[serde(default)]
        in_experiment: bool,
    },
    /// No target or rule matched and the fallthrough variation was served.
    #[serde(rename_all = "camelCase")]
    Fallthrough {
        #[serde(default)]
        in_experiment: bool,
    },
    /// The context was individually targeted.
    #[serde(rename_all = "camelCase")]
    TargetMatch {
        #[serde(default)]
        in_experiment: bool,
    },
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        rule_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        #[serde(default)]
        in_experiment: bool,
    },
    #[serde(rename_all = "camelCase")]
    PrerequisiteFailed {
        prerequisite_key: String,
        #[serde(default)]
        in_experiment: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error_kind: String,
        #[serde(default)]
        in_experiment: bool,
    },
}

impl EvaluationReason {
    /// Discriminant string of the reason, e.g. `"RULE_MATCH"`.
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationReason::Off { .. } => "OFF",
            EvaluationReason::Fallthrough { .. } => "FALLTHROUGH",
            EvaluationReason::TargetMatch { .. } => "TARGET_MATCH",
            EvaluationReason::RuleMatch { .. } => "RULE_MATCH",
            EvaluationReason::PrerequisiteFailed { .. } => "PREREQUISITE_FAILED",
            EvaluationReason::Error { .. } => "ERROR",
        }
    }

    /// Return `true` if this evaluation counts towards an active experiment.
    pub fn is_in_experiment(&self) -> bool {
        match self {
            EvaluationReason::Off { in_experiment }
            | EvaluationReason::Fallthrough { in_experiment }
            | EvaluationReason::TargetMatch { in_experiment }
            | EvaluationReason::RuleMatch { in_experiment, .. }
            | EvaluationReason::PrerequisiteFailed { in_experiment, .. }
            | EvaluationReason::Error { in_experiment, .. } => *in_experiment,
        }
    }
}

/// Result of a single flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail {
    pub value: AttributeValue,
    pub variation_index: Option<i64>,
    pub reason: Option<EvaluationReason>,
}

impl EvaluationDetail {
    /// A detail with no reason attached, as returned when evaluation fell back to the default.
    pub fn default_value(value: AttributeValue) -> Self {
        EvaluationDetail {
            value,
            variation_index: None,
            reason: None,
        }
    }

    pub fn is_in_experiment(&self) -> bool {
        self.reason
            .as_ref()
            .is_some_and(EvaluationReason::is_in_experiment)
    }
}

/// A flag evaluation engine.
pub trait FlagEvaluator {
    fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_value: AttributeValue,
    ) -> EvaluationDetail;
}

impl<T> FlagEvaluator for T
where
    T: Fn(&str, &EvaluationContext, AttributeValue) -> EvaluationDetail,
{
    fn evaluate(
        &self,
        flag_key: &str,
        context: &EvaluationContext,
        default_value: AttributeValue,
    ) -> EvaluationDetail {
        self(flag_key, context, default_value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::EvaluationReason;

    #[test]
    fn parses_reason_with_experiment_flag() {
        let reason: EvaluationReason = serde_json::from_value(json!({
            "kind": "RULE_MATCH",
            "ruleIndex": 0,
            "ruleId": "rule-1",
            "inExperiment": true
        }))
        .unwrap();

        assert_eq!(reason.kind(), "RULE_MATCH");
        assert!(reason.is_in_experiment());
    }

    #[test]
    fn reasons_without_experiment_flag_are_not_in_experiment() {
        let fallthrough: EvaluationReason =
            serde_json::from_value(json!({"kind": "FALLTHROUGH"})).unwrap();
        assert!(!fallthrough.is_in_experiment());
        let off: EvaluationReason = serde_json::from_value(json!({"kind": "OFF"})).unwrap();
        assert_eq!(
            off,
            EvaluationReason::Off {
                in_experiment: false
            }
        );
        assert!(!off.is_in_experiment());
    }

    #[test]
    fn every_reason_kind_can_be_in_experiment() {
        let reasons = [
            json!({"kind": "OFF", "inExperiment": true}),
            json!({"kind": "FALLTHROUGH", "inExperiment": true}),
            json!({"kind": "TARGET_MATCH", "inExperiment": true}),
            json!({"kind": "RULE_MATCH", "ruleIndex": 1, "inExperiment": true}),
            json!({"kind": "PREREQUISITE_FAILED", "prerequisiteKey": "p", "inExperiment": true}),
            json!({"kind": "ERROR", "errorKind": "FLAG_NOT_FOUND", "inExperiment": true}),
        ];

        for value in reasons {
            let reason: EvaluationReason = serde_json::from_value(value.clone()).unwrap();
            assert!(reason.is_in_experiment(), "{value}");
            assert_eq!(reason.kind(), value["kind"]);
        }
    }

    #[test]
    fn target_match_keeps_experiment_flag_on_the_wire() {
        let reason = EvaluationReason::TargetMatch {
            in_experiment: true,
        };

        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!({"kind": "TARGET_MATCH", "inExperiment": true})
        );
    }
}
