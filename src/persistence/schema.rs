//! Versioned JSON encoding of persisted entities.
//!
//! Every blob is an [`Envelope`] naming its schema and version. Decoding
//! checks both before touching the payload, then validates the payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::PersistenceError;
use crate::learning::{
    Action, Experience, ExperienceBuffer, LearningParams, PolicyStore, StateKey,
};
use crate::orchestrator::CycleRecord;

/// Version written by this build and the highest one it reads.
pub const SCHEMA_VERSION: u32 = 1;

/// Key and schema name of the Q-table.
pub const POLICY_STORE: &str = "policy_store";
/// Key and schema name of the replay buffer.
pub const EXPERIENCE_BUFFER: &str = "experience_buffer";
/// Key and schema name of the learning parameters.
pub const LEARNING_PARAMS: &str = "learning_params";
/// Key and schema name of the cycle history.
pub const CYCLE_HISTORY: &str = "cycle_history";

/// Wrapper stored around every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub schema: String,
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub data: T,
}

/// One Q-table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub state: StateKey,
    pub action: Action,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BufferData {
    capacity: usize,
    entries: Vec<Experience>,
}

fn encode<T: Serialize>(
    schema: &'static str,
    data: T,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, PersistenceError> {
    let envelope = Envelope {
        schema: schema.to_owned(),
        version: SCHEMA_VERSION,
        saved_at,
        data,
    };
    serde_json::to_vec(&envelope).map_err(|source| PersistenceError::Encode { schema, source })
}

fn decode<T: DeserializeOwned>(schema: &'static str, bytes: &[u8]) -> Result<T, PersistenceError> {
    let decode_err = |source| PersistenceError::Decode { schema, source };
    let envelope: Envelope<Value> = serde_json::from_slice(bytes).map_err(decode_err)?;
    if envelope.schema != schema {
        return Err(PersistenceError::SchemaMismatch {
            expected: schema,
            found: envelope.schema,
        });
    }
    if envelope.version == 0 || envelope.version > SCHEMA_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            schema,
            found: envelope.version,
            supported: SCHEMA_VERSION,
        });
    }
    serde_json::from_value(envelope.data).map_err(decode_err)
}

fn check_finite(schema: &'static str, what: &str, value: f64) -> Result<(), PersistenceError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PersistenceError::invalid(
            schema,
            format!("non-finite {what}: {value}"),
        ))
    }
}

/// Encodes the Q-table as a list of entries, sorted for stable output.
pub fn encode_policy_store(
    store: &PolicyStore,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, PersistenceError> {
    let mut entries: Vec<PolicyEntry> = store
        .iter()
        .map(|(state, action, value)| PolicyEntry {
            state: state.clone(),
            action: action.clone(),
            value,
        })
        .collect();
    entries.sort_by(|a, b| a.state.cmp(&b.state).then_with(|| a.action.cmp(&b.action)));
    encode(POLICY_STORE, entries, saved_at)
}

/// Decodes and validates a stored Q-table.
pub fn decode_policy_store(bytes: &[u8]) -> Result<PolicyStore, PersistenceError> {
    let entries: Vec<PolicyEntry> = decode(POLICY_STORE, bytes)?;
    for entry in &entries {
        if !entry.state.is_well_formed() {
            return Err(PersistenceError::invalid(
                POLICY_STORE,
                format!("malformed state key {:?}", entry.state.as_str()),
            ));
        }
        check_finite(POLICY_STORE, "Q-value", entry.value)?;
    }
    Ok(entries
        .into_iter()
        .map(|e| (e.state, e.action, e.value))
        .collect())
}

/// Encodes the replay buffer with its capacity.
pub fn encode_experience_buffer(
    buffer: &ExperienceBuffer,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, PersistenceError> {
    let data = BufferData {
        capacity: buffer.capacity(),
        entries: buffer.iter().cloned().collect(),
    };
    encode(EXPERIENCE_BUFFER, data, saved_at)
}

/// Rebuilds the buffer; entries beyond the capacity keep only the newest.
pub fn decode_experience_buffer(bytes: &[u8]) -> Result<ExperienceBuffer, PersistenceError> {
    let data: BufferData = decode(EXPERIENCE_BUFFER, bytes)?;
    let mut buffer = ExperienceBuffer::new(data.capacity)
        .map_err(|e| PersistenceError::invalid(EXPERIENCE_BUFFER, e.to_string()))?;
    for experience in data.entries {
        check_finite(EXPERIENCE_BUFFER, "reward", experience.reward)?;
        buffer.add(experience);
    }
    Ok(buffer)
}

/// Encodes the learning parameters.
pub fn encode_learning_params(
    params: &LearningParams,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, PersistenceError> {
    encode(LEARNING_PARAMS, params, saved_at)
}

/// Decodes and validates stored learning parameters.
pub fn decode_learning_params(bytes: &[u8]) -> Result<LearningParams, PersistenceError> {
    let params: LearningParams = decode(LEARNING_PARAMS, bytes)?;
    params
        .validate()
        .map_err(|e| PersistenceError::invalid(LEARNING_PARAMS, e.to_string()))?;
    Ok(params)
}

/// Encodes the given records, oldest first.
pub fn encode_cycle_history<'a>(
    records: impl IntoIterator<Item = &'a CycleRecord>,
    saved_at: DateTime<Utc>,
) -> Result<Vec<u8>, PersistenceError> {
    let records: Vec<&CycleRecord> = records.into_iter().collect();
    encode(CYCLE_HISTORY, records, saved_at)
}

/// Decodes the history; iterations must be strictly increasing.
pub fn decode_cycle_history(bytes: &[u8]) -> Result<Vec<CycleRecord>, PersistenceError> {
    let records: Vec<CycleRecord> = decode(CYCLE_HISTORY, bytes)?;
    if records.windows(2).any(|w| w[0].iteration >= w[1].iteration) {
        return Err(PersistenceError::invalid(
            CYCLE_HISTORY,
            "iterations out of order",
        ));
    }
    Ok(records)
}
