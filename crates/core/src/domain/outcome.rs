use serde::{Deserialize, Serialize};

use crate::errors::ToolError;

/// Raised by a handler instead of a result when a call must be approved by a
/// human before it proceeds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Identifies which sensitive capability is gated.
    pub setup_key: String,
    pub command_text: String,
    pub explanation: String,
}

impl ConfirmationRequest {
    pub fn new(
        setup_key: impl Into<String>,
        command_text: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            setup_key: setup_key.into(),
            command_text: command_text.into(),
            explanation: explanation.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ready to report now.
    Immediate { content: String, provenance: String },
    /// The handler reports later on its own; the runtime posts nothing.
    Deferred,
    /// A result was already posted under this call id.
    AlreadyReported,
    ConfirmationNeeded(ConfirmationRequest),
}

impl ExecutionOutcome {
    pub fn immediate(content: impl Into<String>, provenance: impl Into<String>) -> Self {
        Self::Immediate { content: content.into(), provenance: provenance.into() }
    }

    /// Builds an outcome from the nullable `(content, provenance)` pair used by
    /// adapters. Only both-present or both-absent are valid.
    pub fn from_parts(
        content: Option<String>,
        provenance: Option<String>,
    ) -> Result<Self, ToolError> {
        match (content, provenance) {
            (Some(content), Some(provenance)) => Ok(Self::Immediate { content, provenance }),
            (None, None) => Ok(Self::Deferred),
            (Some(_), None) => Err(ToolError::ContractViolation(
                "content returned without provenance".to_owned(),
            )),
            (None, Some(_)) => Err(ToolError::ContractViolation(
                "provenance returned without content".to_owned(),
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Immediate { .. } => "immediate",
            Self::Deferred => "deferred",
            Self::AlreadyReported => "already_reported",
            Self::ConfirmationNeeded(_) => "confirmation_needed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfirmationRequest, ExecutionOutcome};
    use crate::errors::ToolError;

    #[test]
    fn labels_name_each_branch() {
        let gated = ExecutionOutcome::ConfirmationNeeded(ConfirmationRequest::new(
            "budget_key",
            "withdraw $5",
            "needs approval",
        ));

        assert_eq!(ExecutionOutcome::immediate("ok", "crm").label(), "immediate");
        assert_eq!(ExecutionOutcome::Deferred.label(), "deferred");
        assert_eq!(ExecutionOutcome::AlreadyReported.label(), "already_reported");
        assert_eq!(gated.label(), "confirmation_needed");
    }

    #[test]
    fn from_parts_accepts_only_matching_shapes() {
        let immediate =
            ExecutionOutcome::from_parts(Some("ok".to_owned()), Some("crm".to_owned()))
                .expect("both parts present");
        assert_eq!(immediate, ExecutionOutcome::immediate("ok", "crm"));

        let deferred = ExecutionOutcome::from_parts(None, None).expect("both parts absent");
        assert_eq!(deferred, ExecutionOutcome::Deferred);
    }

    #[test]
    fn from_parts_rejects_half_null_pairs() {
        let error = ExecutionOutcome::from_parts(Some("ok".to_owned()), None)
            .expect_err("half-null must be rejected");
        assert!(matches!(error, ToolError::ContractViolation(_)));

        let error = ExecutionOutcome::from_parts(None, Some("crm".to_owned()))
            .expect_err("half-null must be rejected");
        assert_eq!(error.kind(), "ContractViolation");
    }
}
