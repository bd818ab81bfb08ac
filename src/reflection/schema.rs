//! 第一档：叙述字段的 JSON Schema（schemars 生成）与校验
//!
//! 生成的 schema 注入提示词，约束模型只输出固定的命名字段；返回值仍须通过 validate 才会被采用。

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

/// 叙述上限，超出视为不合格输出
const MAX_FIELD_CHARS: usize = 2000;

/// 模型需要产出的叙述字段（不含任何数值字段）
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NarrativeFields {
    /// 一到三句话说明本次执行为何如此展开、结果如何
    pub rationale: String,
    /// 可选：下一次可以改进的地方
    #[serde(default)]
    pub proposed_change: Option<String>,
    /// 可选：该改进的预期影响
    #[serde(default)]
    pub impact: Option<String>,
}

impl NarrativeFields {
    pub fn validate(&self) -> Result<(), String> {
        if self.rationale.trim().is_empty() {
            return Err("rationale is empty".into());
        }
        for (name, value) in [
            ("rationale", Some(&self.rationale)),
            ("proposed_change", self.proposed_change.as_ref()),
            ("impact", self.impact.as_ref()),
        ] {
            if let Some(v) = value {
                if v.chars().count() > MAX_FIELD_CHARS {
                    return Err(format!("{name} exceeds {MAX_FIELD_CHARS} chars"));
                }
            }
        }
        Ok(())
    }

    /// 去除首尾空白，空串与 "none" 之类的占位视为缺省
    pub fn normalized(mut self) -> Self {
        self.rationale = self.rationale.trim().to_string();
        self.proposed_change = normalize_optional(self.proposed_change);
        self.impact = normalize_optional(self.impact);
        self
    }
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    let v = value?.trim().to_string();
    match v.to_lowercase().as_str() {
        "" | "none" | "n/a" | "na" | "null" | "-" => None,
        _ => Some(v),
    }
}

/// 返回叙述字段的 JSON Schema 字符串，可拼入提示词
pub fn narrative_schema_json() -> String {
    let schema = schema_for!(NarrativeFields);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
