//! 反思生成器：三档回退链
//!
//! 1. SchemaGuided：提示词附带叙述字段 JSON Schema，输出须通过反序列化与校验；
//! 2. ManualParse：普通提示词 + 容错的标签解析；
//! 3. Minimal：不做任何生成，只保留确定性字段，不会失败。
//! 数值字段在任何一档运行之前就已从 MetricsSummary 提取，生成步骤只影响叙述部分。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use thiserror::Error;

use crate::config::ReflectionSection;
use crate::llm::{LlmClient, Message};
use crate::reflection::parse::parse_narrative;
use crate::reflection::schema::{narrative_schema_json, NarrativeFields};
use crate::reflection::{
    extract_metric_fields, MetricField, ProposedChange, ReflectionEntry, ReflectionInput,
    ReflectionTier,
};
use crate::routing::planner::extract_json;

/// 回复预览最大字符数
const REPLY_PREVIEW_CHARS: usize = 300;

#[derive(Error, Debug)]
enum TierError {
    #[error("tier disabled")]
    Disabled,
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("generation timed out")]
    Timeout,
    #[error("validation failed: {0}")]
    Validation(String),
}

/// 三档回退的反思生成器
pub struct ReflectionGenerator {
    llm: Arc<dyn LlmClient>,
    schema_guided: bool,
    manual_parse: bool,
    timeout: Duration,
}

impl ReflectionGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: &ReflectionSection) -> Self {
        Self {
            llm,
            schema_guided: cfg.schema_guided,
            manual_parse: cfg.manual_parse,
            timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
        }
    }

    /// 总能返回一条记录
    pub async fn generate(&self, input: &ReflectionInput) -> ReflectionEntry {
        let metrics = extract_metric_fields(&input.summary);
        let context = describe(input, &metrics);

        let (tier, narrative) = match self.schema_guided_tier(&context).await {
            Ok(n) => (ReflectionTier::SchemaGuided, Some(n)),
            Err(e) => {
                tracing::debug!(
                    trace_id = %input.trace_id,
                    error = %e,
                    "schema-guided reflection failed"
                );
                match self.manual_parse_tier(&context).await {
                    Ok(n) => (ReflectionTier::ManualParse, Some(n)),
                    Err(e) => {
                        tracing::debug!(
                            trace_id = %input.trace_id,
                            error = %e,
                            "manual-parse reflection failed"
                        );
                        (ReflectionTier::Minimal, None)
                    }
                }
            }
        };

        let (rationale, proposed_change) = match narrative {
            Some(n) => (
                Some(n.rationale),
                n.proposed_change.map(|description| ProposedChange {
                    description,
                    impact: n.impact,
                }),
            ),
            None => (None, None),
        };

        ReflectionEntry {
            trace_id: input.trace_id.clone(),
            final_state: input.final_state,
            duration_seconds: input.summary.duration_seconds,
            created_at: Utc::now(),
            rationale,
            metrics,
            proposed_change,
            tier,
        }
    }

    async fn schema_guided_tier(&self, context: &str) -> Result<NarrativeFields, TierError> {
        if !self.schema_guided {
            return Err(TierError::Disabled);
        }
        let prompt = format!(
            "Reflect on the execution below. \
             Respond with ONLY a JSON object that conforms to this JSON Schema:\n{}\n\
             Do not repeat any numbers; metrics are recorded separately.\n\n{}",
            narrative_schema_json(),
            context
        );
        let output = self.call(prompt).await?;
        let json = extract_json(&output)
            .ok_or_else(|| TierError::Validation("no JSON object in output".into()))?;
        let fields: NarrativeFields =
            serde_json::from_str(json).map_err(|e| TierError::Validation(e.to_string()))?;
        let fields = fields.normalized();
        fields.validate().map_err(TierError::Validation)?;
        Ok(fields)
    }

    async fn manual_parse_tier(&self, context: &str) -> Result<NarrativeFields, TierError> {
        if !self.manual_parse {
            return Err(TierError::Disabled);
        }
        let prompt = format!(
            "Reflect on the execution below. Answer in exactly this format:\n\
             RATIONALE: <one to three sentences>\n\
             PROPOSED CHANGE: <one sentence, or none>\n\
             IMPACT: <one sentence, or none>\n\n{}",
            context
        );
        let output = self.call(prompt).await?;
        parse_narrative(&output).map_err(TierError::Validation)
    }

    /// 带超时调用 LLM；客户端 panic 也只算本档失败
    async fn call(&self, prompt: String) -> Result<String, TierError> {
        let messages = vec![Message::user(prompt)];
        let fut = AssertUnwindSafe(self.llm.complete(&messages)).catch_unwind();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(e))) => Err(TierError::Generation(e.to_string())),
            Ok(Err(_)) => Err(TierError::Generation("llm client panicked".into())),
            Err(_) => Err(TierError::Timeout),
        }
    }
}

/// 执行元数据的文本描述（数值部分取自已提取的字段）
fn describe(input: &ReflectionInput, metrics: &[MetricField]) -> String {
    let mut out = format!(
        "Request: {}\nFinal state: {}\nMode: {}\n",
        input.request, input.final_state, input.mode
    );
    if let Some(route) = input.route {
        out.push_str(&format!("Route: {route}\n"));
    }
    if let Some(reply) = &input.reply {
        let preview: String = reply.chars().take(REPLY_PREVIEW_CHARS).collect();
        out.push_str(&format!("Reply: {preview}\n"));
    }
    if let Some(err) = &input.error {
        out.push_str(&format!("Error: {err}\n"));
    }
    out.push_str("Metrics:\n");
    for m in metrics {
        out.push_str(&format!("- {} = {} ({:?})\n", m.name, m.value, m.unit));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ExternalError, TaskState};
    use crate::llm::{ScriptStep, ScriptedLlmClient};
    use crate::mode::Mode;
    use crate::monitor::{MetricAggregate, MetricsSummary};

    fn input() -> ReflectionInput {
        let mut summary = MetricsSummary::empty(7.2);
        summary.sample_count = 1;
        summary.cpu = MetricAggregate::single(11.9);
        summary.memory = MetricAggregate::single(54.0);
        ReflectionInput {
            trace_id: "trace-r".into(),
            request: "what is the load?".into(),
            final_state: TaskState::Completed,
            route: Some(TaskState::ToolCall),
            reply: Some("{\"cpu_percent\": 11.9}".into()),
            error: None,
            mode: Mode::Normal,
            summary,
        }
    }

    fn generator(llm: ScriptedLlmClient) -> ReflectionGenerator {
        ReflectionGenerator::new(Arc::new(llm), &ReflectionSection::default())
    }

    #[tokio::test]
    async fn test_schema_guided_tier() {
        let llm = ScriptedLlmClient::new([ScriptStep::Reply(
            r#"{"rationale": "Tool answer was sufficient.", "proposed_change": "Skip routing for metric queries", "impact": "Saves one model call"}"#.into(),
        )]);
        let entry = generator(llm).generate(&input()).await;
        assert_eq!(entry.tier, ReflectionTier::SchemaGuided);
        assert_eq!(entry.rationale.as_deref(), Some("Tool answer was sufficient."));
        let change = entry.proposed_change.unwrap();
        assert_eq!(change.impact.as_deref(), Some("Saves one model call"));
    }

    #[tokio::test]
    async fn test_invalid_schema_output_falls_back_to_manual() {
        let llm = ScriptedLlmClient::new([
            ScriptStep::Reply(r#"{"summary": "wrong shape"}"#.into()),
            ScriptStep::Reply("RATIONALE: Direct answer was enough.\nPROPOSED CHANGE: none".into()),
        ]);
        let entry = generator(llm).generate(&input()).await;
        assert_eq!(entry.tier, ReflectionTier::ManualParse);
        assert_eq!(entry.rationale.as_deref(), Some("Direct answer was enough."));
        assert!(entry.proposed_change.is_none());
    }

    #[tokio::test]
    async fn test_both_tiers_fail_minimal_keeps_metrics() {
        let llm = ScriptedLlmClient::new([
            ScriptStep::Fail(ExternalError::Timeout("tier1".into())),
            ScriptStep::Panic("tier2 exploded".into()),
        ]);
        let input = input();
        let entry = generator(llm).generate(&input).await;
        assert_eq!(entry.tier, ReflectionTier::Minimal);
        assert!(entry.rationale.is_none());
        assert_eq!(entry.trace_id, "trace-r");
        assert_eq!(entry.final_state, TaskState::Completed);
        assert_eq!(entry.duration_seconds, input.summary.duration_seconds);
        assert_eq!(entry.metrics, extract_metric_fields(&input.summary));
        assert_eq!(entry.metric("cpu_avg"), input.summary.cpu.avg);
        assert_eq!(entry.metric("memory_avg"), input.summary.memory.avg);
    }

    #[tokio::test]
    async fn test_disabled_tiers_skip_generation() {
        let llm = Arc::new(ScriptedLlmClient::always("RATIONALE: unused"));
        let cfg = ReflectionSection {
            schema_guided: false,
            manual_parse: false,
            ..ReflectionSection::default()
        };
        let entry = ReflectionGenerator::new(llm.clone(), &cfg).generate(&input()).await;
        assert_eq!(entry.tier, ReflectionTier::Minimal);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_tier_times_out() {
        let llm = ScriptedLlmClient::new([
            ScriptStep::Hang(Duration::from_secs(3600), "{}".into()),
            ScriptStep::Reply("Rationale: recovered on second tier".into()),
        ]);
        let entry = generator(llm).generate(&input()).await;
        assert_eq!(entry.tier, ReflectionTier::ManualParse);
    }

    #[tokio::test]
    async fn test_narrative_numbers_never_override_metrics() {
        let llm = ScriptedLlmClient::new([ScriptStep::Reply(
            r#"{"rationale": "CPU was 99% for 100 seconds"}"#.into(),
        )]);
        let entry = generator(llm).generate(&input()).await;
        assert_eq!(entry.tier, ReflectionTier::SchemaGuided);
        assert_eq!(entry.metric("cpu_avg"), Some(11.9));
        assert_eq!(entry.duration_seconds, 7.2);
    }
}
