//! Plan - structured planner reply carrying the candidate SQL
//!
//! The reply is untyped JSON from the model; everything except `sql` is
//! optional and parsed defensively. A bare `{"sql": "..."}` is as valid as
//! the richer shape.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    /// Short free-form domain tag, e.g. "lending"
    #[serde(default)]
    pub domain: Option<String>,

    /// Short free-form rationale
    #[serde(default)]
    pub reason: Option<String>,

    /// The one candidate statement
    pub sql: String,

    /// Presentation hints for the summarizer
    #[serde(default)]
    pub presentation: Option<Presentation>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Presentation {
    /// concise | bulleted | headline; anything else falls back to concise
    #[serde(default)]
    pub style: Option<String>,

    /// Fields worth calling out in the answer
    #[serde(default)]
    pub include: Vec<String>,

    /// Free-text notes from the planner
    #[serde(default)]
    pub notes: Option<String>,
}

impl Plan {
    pub fn style(&self) -> &str {
        match self
            .presentation
            .as_ref()
            .and_then(|p| p.style.as_deref())
        {
            Some(s @ ("concise" | "bulleted" | "headline")) => s,
            _ => "concise",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_sql_reply_parses() {
        let plan: Plan = serde_json::from_str(r#"{"sql": "SELECT 1"}"#).unwrap();
        assert_eq!(plan.sql, "SELECT 1");
        assert!(plan.domain.is_none());
        assert_eq!(plan.style(), "concise");
    }

    #[test]
    fn test_rich_reply_parses() {
        let plan: Plan = serde_json::from_str(
            r#"{
                "domain": "lending",
                "reason": "utilization question",
                "sql": "SELECT ts FROM public.market_data",
                "presentation": {"style": "headline", "include": ["utilization"], "notes": "x"}
            }"#,
        )
        .unwrap();
        assert_eq!(plan.style(), "headline");
        assert_eq!(plan.presentation.unwrap().include, vec!["utilization"]);
    }

    #[test]
    fn test_unknown_style_falls_back() {
        let plan: Plan = serde_json::from_str(
            r#"{"sql": "SELECT 1", "presentation": {"style": "interpretive-dance"}}"#,
        )
        .unwrap();
        assert_eq!(plan.style(), "concise");
    }
}
