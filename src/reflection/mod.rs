//! 反思层：执行结束后生成带数值指标的反思记录
//!
//! 数值字段确定性提取，叙述字段按 SchemaGuided → ManualParse → Minimal 三档回退生成。

pub mod generator;
pub mod parse;
pub mod schema;
pub mod types;

pub use generator::ReflectionGenerator;
pub use parse::parse_narrative;
pub use schema::{narrative_schema_json, NarrativeFields};
pub use types::{
    extract_metric_fields, MetricField, MetricUnit, ProposedChange, ReflectionEntry,
    ReflectionInput, ReflectionTier,
};
