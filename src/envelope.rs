use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{sanitizer::SanitizedContext, AttributeValue, EvaluationDetail, Result};

/// Schema version written to `metadata.version` of every envelope.
pub const SCHEMA_VERSION: &str = "1.0";

/// Integration path that captured the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// Captured by an after-evaluation hook installed into the flag engine.
    Hook,
    /// Captured by a wrapper around the flag engine's evaluate call.
    Wrapper,
}

impl CaptureSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureSource::Hook => "hook",
            CaptureSource::Wrapper => "wrapper",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub source: String,
    pub version: String,
}

/// An experiment evaluation record, as shipped to the ingestion stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// When the evaluation was captured.
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub flag_key: String,
    pub evaluation_context: SanitizedContext,
    pub flag_value: AttributeValue,
    pub variation_index: Option<i64>,
    pub reason_kind: Option<String>,
    pub metadata: EnvelopeMetadata,
}

impl EventEnvelope {
    /// Encode the envelope as a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Build an envelope for an evaluation captured now.
pub fn build(
    flag_key: &str,
    context: SanitizedContext,
    detail: &EvaluationDetail,
    source: CaptureSource,
) -> EventEnvelope {
    build_at(flag_key, context, detail, source, Utc::now())
}

/// Build an envelope for an evaluation captured at `now`.
///
/// The timestamp is truncated to microseconds, the precision it is written with.
pub fn build_at(
    flag_key: &str,
    context: SanitizedContext,
    detail: &EvaluationDetail,
    source: CaptureSource,
    now: DateTime<Utc>,
) -> EventEnvelope {
    EventEnvelope {
        timestamp: now.trunc_subsecs(6),
        flag_key: flag_key.to_owned(),
        evaluation_context: context,
        flag_value: detail.value.clone(),
        variation_index: detail.variation_index,
        reason_kind: detail.reason.as_ref().map(|reason| reason.kind().to_owned()),
        metadata: EnvelopeMetadata {
            source: source.as_str().to_owned(),
            version: SCHEMA_VERSION.to_owned(),
        },
    }
}

/// RFC 3339 with an explicit `+00:00` offset and microsecond precision.
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}
