//! Built-in tools served by the local worker.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use toolrelay_core::{
    CallContext, ExecutionOutcome, Tool, ToolCall, ToolCatalog, ToolDescriptor, ToolError,
};

const PROVENANCE: &str = "toolrelay.builtin";

pub fn builtin_catalog() -> ToolCatalog {
    ToolCatalog::new().with(EchoTool).with(DelayedEchoTool).with(BudgetWithdrawTool)
}

#[derive(Debug, Deserialize)]
struct EchoArgs {
    text: String,
}

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "echo",
            "Returns the given text unchanged.",
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        )
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &CallContext,
    ) -> Result<ExecutionOutcome, ToolError> {
        let args: EchoArgs = call.parse_arguments()?;
        Ok(ExecutionOutcome::immediate(args.text, PROVENANCE))
    }
}

#[derive(Debug, Deserialize)]
struct DelayedEchoArgs {
    text: String,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

fn default_delay_ms() -> u64 {
    1_000
}

/// Answers after a delay from a background task, freeing its WorkSet slot
/// immediately.
pub struct DelayedEchoTool;

#[async_trait]
impl Tool for DelayedEchoTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "delayed_echo",
            "Returns the given text after a delay.",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "delay_ms": { "type": "integer", "minimum": 0 }
                },
                "required": ["text"]
            }),
        )
    }

    async fn execute(
        &self,
        call: &ToolCall,
        ctx: &CallContext,
    ) -> Result<ExecutionOutcome, ToolError> {
        let args: DelayedEchoArgs = call.parse_arguments()?;
        let reporter = ctx.reporter();
        let cancellation = ctx.cancellation().clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(args.delay_ms)) => {}
            }
            if let Err(error) = reporter.post(args.text, PROVENANCE).await {
                warn!(
                    event_name = "tools.delayed_echo.report_failed",
                    correlation_id = %reporter.call_id(),
                    error = %error,
                    "deferred echo result could not be posted"
                );
            }
        });

        Ok(ExecutionOutcome::Deferred)
    }
}

#[derive(Debug, Deserialize)]
struct WithdrawArgs {
    account: String,
    amount: u64,
}

/// Confirmation-gated example: the withdrawal only happens once a human has
/// approved the re-delivered call.
pub struct BudgetWithdrawTool;

#[async_trait]
impl Tool for BudgetWithdrawTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "budget_withdraw",
            "Withdraws an amount from a shared budget after human approval.",
            json!({
                "type": "object",
                "properties": {
                    "account": { "type": "string" },
                    "amount": { "type": "integer", "minimum": 1 }
                },
                "required": ["account", "amount"]
            }),
        )
    }

    async fn execute(
        &self,
        call: &ToolCall,
        _ctx: &CallContext,
    ) -> Result<ExecutionOutcome, ToolError> {
        let args: WithdrawArgs = call.parse_arguments()?;
        if args.amount == 0 {
            return Err(ToolError::failed("amount must be positive"));
        }

        if let Some(confirmation) = call.require_confirmation(
            format!("budget_key:{}", args.account),
            format!("withdraw ${} from {}", args.amount, args.account),
            "moves money out of a shared budget",
        ) {
            return Ok(confirmation);
        }

        Ok(ExecutionOutcome::immediate(
            format!("withdrew ${} from {}", args.amount, args.account),
            PROVENANCE,
        ))
    }
}
