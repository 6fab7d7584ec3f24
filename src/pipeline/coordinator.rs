//! Coordinator - the end-to-end request lifecycle
//!
//! Within a request everything is strictly sequential: normalize, probe,
//! fast path or plan, rewrite, guard, execute, retry once on a recoverable
//! class, fall back once on an empty time-filtered result, summarize,
//! polish. Concurrency lives across requests, in the pool.

use crate::config::ServiceConfig;
use crate::db::{Db, Row};
use crate::error::{ServiceError, ServiceResult};
use crate::guard::Guard;
use crate::llm::{is_recoverable_execution_error, ChatCompletion, Plan, Planner, Summarizer};
use crate::pipeline::audit::QueryAudit;
use crate::pipeline::fallback::strip_time_filter;
use crate::pipeline::fastpath;
use crate::pipeline::format::polish_answer;
use crate::pipeline::normalize::normalize_question;
use crate::rewrite::HeuristicRewriter;
use crate::schema::SchemaRegistry;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything one request produces
#[derive(Clone, Debug)]
pub struct QueryOutcome {
    pub answer: String,
    pub sql: String,
    pub rows: Vec<Row>,
}

/// Process-wide application state: one pool, one LLM client, one immutable
/// registry, created at startup and shared by every request
pub struct App {
    pub config: ServiceConfig,
    pub registry: Arc<SchemaRegistry>,
    pub db: Db,
    pub audit: QueryAudit,
    guard: Guard,
    rewriter: HeuristicRewriter,
    planner: Planner,
    summarizer: Summarizer,
}

impl App {
    pub fn new(
        config: ServiceConfig,
        registry: SchemaRegistry,
        db: Db,
        llm: Arc<dyn ChatCompletion>,
    ) -> Self {
        let registry = Arc::new(registry);
        let guard = Guard::new(&registry);
        let planner = Planner::new(llm.clone(), registry.doc().to_string());
        let summarizer = Summarizer::new(llm);
        Self {
            config,
            registry,
            db,
            audit: QueryAudit::default(),
            guard,
            rewriter: HeuristicRewriter::market_default(),
            planner,
            summarizer,
        }
    }

    /// Answer one question end to end
    pub async fn answer_question(&self, raw_question: &str) -> ServiceResult<QueryOutcome> {
        let started = Instant::now();
        let question = normalize_question(raw_question);
        if question.is_empty() {
            return Err(ServiceError::MissingQuestion);
        }

        // fail fast before spending LLM tokens
        self.db.probe().await?;

        if let Some(path) = fastpath::detect(&question) {
            info!(?path, "fast path matched");
            let guarded = self
                .guard
                .check(&path.sql())
                .map_err(|source| ServiceError::GuardRejection {
                    source,
                    sql: path.sql(),
                })?;
            let rows = self.db.run(guarded.as_str()).await?;
            let answer = path
                .answer(&rows)
                .unwrap_or_else(|| canned_answer(rows.len()));
            let answer = polish_answer(&question, &answer);
            let sql = guarded.into_inner();
            self.audit.log(
                question,
                None,
                sql.clone(),
                rows.len(),
                started.elapsed().as_secs_f64() * 1000.0,
            );
            return Ok(QueryOutcome { answer, sql, rows });
        }

        let plan = self.planner.plan(&question).await?;
        let (sql, rows, plan) = self.execute_plan(&question, plan).await?;

        // one shot at widening an over-filtered empty result
        let (sql, rows) = if rows.is_empty() {
            match strip_time_filter(&sql) {
                Some(widened) => match self.guard.check(&widened) {
                    Ok(guarded) => {
                        info!("empty result, retrying without time filter");
                        let rows = self.db.run(guarded.as_str()).await?;
                        (guarded.into_inner(), rows)
                    }
                    Err(e) => {
                        warn!(error = %e, "stripped statement failed the guard, keeping empty result");
                        (sql, rows)
                    }
                },
                None => (sql, rows),
            }
        } else {
            (sql, rows)
        };

        let answer = match self
            .summarizer
            .summarize(&question, &rows, plan.presentation.as_ref())
            .await
        {
            Ok(text) => polish_answer(&question, &text),
            Err(e) => {
                warn!(error = %e, "summary failed, degrading to row count");
                canned_answer(rows.len())
            }
        };

        self.audit.log(
            question,
            plan.domain.clone(),
            sql.clone(),
            rows.len(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(QueryOutcome { answer, sql, rows })
    }

    /// Rewrite, guard and execute one plan, with a single replan when the
    /// failure class is recoverable
    async fn execute_plan(
        &self,
        question: &str,
        plan: Plan,
    ) -> ServiceResult<(String, Vec<Row>, Plan)> {
        let candidate = self.rewriter.rewrite(question, &plan.sql);
        let guarded = self
            .guard
            .check(&candidate)
            .map_err(|source| ServiceError::GuardRejection {
                source,
                sql: candidate.clone(),
            })?;

        match self.db.run(guarded.as_str()).await {
            Ok(rows) => Ok((guarded.into_inner(), rows, plan)),
            Err(ServiceError::Execution { message, .. })
                if is_recoverable_execution_error(&message) =>
            {
                info!(error = %message, "recoverable execution error, replanning once");
                let retry = self
                    .planner
                    .replan(question, guarded.as_str(), &message)
                    .await?;
                let candidate = self.rewriter.rewrite(question, &retry.sql);
                let guarded = self
                    .guard
                    .check(&candidate)
                    .map_err(|source| ServiceError::GuardRejection {
                        source,
                        sql: candidate.clone(),
                    })?;
                match self.db.run(guarded.as_str()).await {
                    Ok(rows) => Ok((guarded.into_inner(), rows, retry)),
                    Err(ServiceError::Execution { message, sql }) => {
                        Err(ServiceError::RetryExhausted { message, sql })
                    }
                    Err(other) => Err(other),
                }
            }
            Err(other) => Err(other),
        }
    }
}

fn canned_answer(row_count: usize) -> String {
    format!("Returned {} row(s).", row_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_answer_shape() {
        assert_eq!(canned_answer(0), "Returned 0 row(s).");
        assert_eq!(canned_answer(7), "Returned 7 row(s).");
    }
}
