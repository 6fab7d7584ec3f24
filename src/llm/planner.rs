//! Planner - one LLM call from question to Plan, one retry on recoverable
//! execution failures

use crate::error::{ServiceError, ServiceResult};
use crate::llm::client::{ChatCompletion, ChatMessage};
use crate::llm::plan::Plan;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

static PERCENTILE_OVER_ERR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)percentile_(cont|disc).*over").unwrap());

/// Execution error classes worth exactly one fresh plan
pub fn is_recoverable_execution_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("syntax error")
        || lower.contains("over is not supported for ordered-set aggregate")
        || PERCENTILE_OVER_ERR.is_match(message)
}

pub struct Planner {
    client: Arc<dyn ChatCompletion>,
    schema_doc: String,
}

impl Planner {
    pub fn new(client: Arc<dyn ChatCompletion>, schema_doc: String) -> Self {
        Self { client, schema_doc }
    }

    /// Primary planning call
    pub async fn plan(&self, question: &str) -> ServiceResult<Plan> {
        let messages = [
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(format!(
                "Question: {}\n\nRespond only with the JSON object.",
                question
            )),
        ];
        let raw = self
            .client
            .complete(&messages)
            .await
            .map_err(|e| ServiceError::llm_failure("planning", e.to_string()))?;
        debug!(reply_len = raw.len(), "planner reply received");
        parse_plan(&raw)
    }

    /// Single retry after a recoverable execution failure. The failed SQL
    /// and the database error travel verbatim so the model can route around
    /// the failing construct.
    pub async fn replan(
        &self,
        question: &str,
        failed_sql: &str,
        db_error: &str,
    ) -> ServiceResult<Plan> {
        let messages = [
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(format!(
                "Question: {question}\n\n\
                 Your previous SQL failed to execute.\n\
                 Previous SQL:\n{failed_sql}\n\n\
                 Database error:\n{db_error}\n\n\
                 Produce a corrected query that avoids the failing construct. \
                 If the error mentions an ordered-set aggregate used as a window \
                 function, compute the percentile with a correlated subquery \
                 instead of OVER. Respond only with the JSON object."
            )),
        ];
        let raw = self
            .client
            .complete(&messages)
            .await
            .map_err(|e| ServiceError::llm_failure("replanning", e.to_string()))?;
        parse_plan(&raw)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You translate analytics questions about a DeFi data warehouse into \
             one Postgres query.\n\n\
             Routing rules:\n\
             - Lending questions (utilization, borrow or supply APY, supplied or \
             borrowed totals) read public.market_data.\n\
             - DEX questions (volume, trades, fees, pairs) read \
             public.dex_trades_daily.\n\
             - Price questions read public.token_prices.\n\n\
             Query constraints:\n\
             - Exactly one statement. CTEs (WITH ...) are allowed.\n\
             - No comments, no semicolons.\n\
             - Portable Postgres only; no vendor extensions.\n\
             - Only the tables and columns listed in the schema below.\n\n\
             Modeling rules:\n\
             - Lending rows span many protocols; include protocol = 'aave' \
             unless the question names another protocol.\n\
             - Asset symbols are stored upper-case; write symbol = 'WETH', \
             never 'weth'. The symbol for ETH is WETH.\n\
             - utilization, borrow_apy and supply_apy are fractions in [0,1]; \
             a question about \"80%\" means 0.8.\n\n\
             Reply with a single JSON object, no markdown fences:\n\
             {{\"domain\": \"lending|dex|prices\", \"reason\": \"one short \
             sentence\", \"sql\": \"...\", \"presentation\": {{\"style\": \
             \"concise|bulleted|headline\", \"include\": [\"col\", ...], \
             \"notes\": \"...\"}}}}\n\
             A bare {{\"sql\": \"...\"}} is also accepted.\n\n\
             Schema:\n{}",
            self.schema_doc
        )
    }
}

/// Parse the reply as JSON; on failure, try once more with the first
/// balanced brace-delimited substring. Anything else is a parse error
/// carrying the raw text.
fn parse_plan(raw: &str) -> ServiceResult<Plan> {
    let attempt = serde_json::from_str::<Plan>(raw.trim());
    let plan = match attempt {
        Ok(plan) => plan,
        Err(_) => match balanced_object(raw).and_then(|s| serde_json::from_str::<Plan>(s).ok()) {
            Some(plan) => plan,
            None => {
                return Err(ServiceError::PlannerParse {
                    raw: raw.to_string(),
                })
            }
        },
    };
    if plan.sql.trim().is_empty() {
        return Err(ServiceError::PlannerParse {
            raw: raw.to_string(),
        });
    }
    Ok(plan)
}

/// First balanced `{...}` substring, JSON-string aware
fn balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
