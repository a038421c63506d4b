use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::outcome::{ConfirmationRequest, ExecutionOutcome};
use crate::errors::ToolError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound invocation request, decoded from a subscription record.
///
/// The orchestrator is the system of record; a `ToolCall` lives only for the
/// duration of one execution attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: CallId,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub alt_index: u32,
    #[serde(default)]
    pub call_sequence: u32,
    pub tool_name: String,
    /// Opaque serialized payload. Its structure is owned by the handler.
    #[serde(default)]
    pub arguments: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub untrusted_result_key: String,
    #[serde(default)]
    pub caller_identity: String,
    #[serde(default)]
    pub location_scope: Option<String>,
    #[serde(default)]
    pub confirmed_by_human: Option<bool>,
}

/// Enough of a record to answer it even when the rest does not decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordIdentity {
    pub call_id: CallId,
    pub result_key: String,
}

impl RecordIdentity {
    pub fn of(record: &Value) -> Option<Self> {
        let call_id = record.get("call_id")?.as_str()?;
        let result_key = record.get("untrusted_result_key")?.as_str()?;
        Some(Self { call_id: CallId(call_id.to_owned()), result_key: result_key.to_owned() })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationState {
    NotAsked,
    Pending,
    Confirmed,
}

impl ToolCall {
    pub fn from_record(record: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(record)
    }

    pub fn confirmation_state(&self) -> ConfirmationState {
        match self.confirmed_by_human {
            None => ConfirmationState::NotAsked,
            Some(false) => ConfirmationState::Pending,
            Some(true) => ConfirmationState::Confirmed,
        }
    }

    /// Returns `Some(ConfirmationNeeded)` until the orchestrator re-delivers
    /// this call with `confirmed_by_human = true`.
    pub fn require_confirmation(
        &self,
        setup_key: impl Into<String>,
        command_text: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Option<ExecutionOutcome> {
        match self.confirmation_state() {
            ConfirmationState::Confirmed => None,
            ConfirmationState::NotAsked | ConfirmationState::Pending => {
                Some(ExecutionOutcome::ConfirmationNeeded(ConfirmationRequest::new(
                    setup_key,
                    command_text,
                    explanation,
                )))
            }
        }
    }

    /// Decodes `arguments` as JSON into the handler's payload type. An empty
    /// payload decodes as `{}`.
    pub fn parse_arguments<T>(&self) -> Result<T, ToolError>
    where
        T: DeserializeOwned,
    {
        let raw = self.arguments.trim();
        let raw = if raw.is_empty() { "{}" } else { raw };
        serde_json::from_str(raw).map_err(ToolError::InvalidArguments)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::{CallId, ConfirmationState, RecordIdentity, ToolCall};
    use crate::domain::outcome::ExecutionOutcome;
    use crate::errors::ToolError;

    fn record() -> serde_json::Value {
        json!({
            "call_id": "call-1",
            "thread_id": "thread-9",
            "alt_index": 0,
            "call_sequence": 2,
            "tool_name": "crm_lookup",
            "arguments": "{\"account\":\"acme\"}",
            "created_at": "2026-10-01T12:00:00Z",
            "untrusted_result_key": "rk-1",
            "caller_identity": "user@example.com",
            "location_scope": "group-7"
        })
    }

    #[test]
    fn decodes_record_with_absent_confirmation() {
        let call = ToolCall::from_record(record()).expect("record should decode");

        assert_eq!(call.call_id, CallId("call-1".to_owned()));
        assert_eq!(call.call_sequence, 2);
        assert_eq!(call.location_scope.as_deref(), Some("group-7"));
        assert_eq!(call.confirmation_state(), ConfirmationState::NotAsked);
    }

    #[test]
    fn record_without_result_key_is_rejected() {
        let mut value = record();
        value.as_object_mut().expect("object").remove("untrusted_result_key");

        assert!(ToolCall::from_record(value).is_err());
    }

    #[test]
    fn missing_created_at_defaults_to_now() {
        let mut value = record();
        value.as_object_mut().expect("object").remove("created_at");

        let before = chrono::Utc::now();
        let call = ToolCall::from_record(value).expect("record should decode");
        assert!(call.created_at >= before);
    }

    #[test]
    fn identity_survives_an_undecodable_record() {
        let value = json!({
            "call_id": "call-7",
            "untrusted_result_key": "rk-7",
            "created_at": "yesterday"
        });

        assert!(ToolCall::from_record(value.clone()).is_err());
        let identity = RecordIdentity::of(&value).expect("identity fields present");
        assert_eq!(identity.call_id, CallId("call-7".to_owned()));
        assert_eq!(identity.result_key, "rk-7");

        assert_eq!(RecordIdentity::of(&json!({"call_id": "call-7"})), None);
        assert_eq!(RecordIdentity::of(&json!("not an object")), None);
    }

    #[test]
    fn require_confirmation_gates_until_confirmed() {
        let mut call = ToolCall::from_record(record()).expect("record should decode");

        let gated = call.require_confirmation("budget_key", "withdraw $100", "needs approval");
        assert!(matches!(gated, Some(ExecutionOutcome::ConfirmationNeeded(ref request))
            if request.setup_key == "budget_key"));

        call.confirmed_by_human = Some(false);
        assert_eq!(call.confirmation_state(), ConfirmationState::Pending);
        assert!(call.require_confirmation("budget_key", "withdraw $100", "x").is_some());

        call.confirmed_by_human = Some(true);
        assert!(call.require_confirmation("budget_key", "withdraw $100", "x").is_none());
    }

    #[derive(Debug, Deserialize)]
    struct LookupArgs {
        account: String,
    }

    #[test]
    fn parse_arguments_reports_invalid_payloads() {
        let mut call = ToolCall::from_record(record()).expect("record should decode");
        let args: LookupArgs = call.parse_arguments().expect("arguments should decode");
        assert_eq!(args.account, "acme");

        call.arguments = "not json".to_owned();
        let error = call.parse_arguments::<LookupArgs>().expect_err("should fail");
        assert!(matches!(error, ToolError::InvalidArguments(_)));
        assert_eq!(error.kind(), "InvalidArguments");
    }
}
