//! 系统指标工具：经共享 SensorCache 同步读取主机与加速器指标
//!
//! 与后台监控读取同一缓存；TTL 内的重复请求直接命中，不会再次发起昂贵轮询。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ExternalError;
use crate::sensors::{MetricGroup, SensorCache, SensorError};
use crate::tools::Tool;

pub struct SystemMetricsTool {
    cache: Arc<SensorCache>,
}

impl SystemMetricsTool {
    pub fn new(cache: Arc<SensorCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for SystemMetricsTool {
    fn name(&self) -> &str {
        "system_metrics"
    }

    fn description(&self) -> &str {
        "Report current CPU, memory and accelerator utilization (percent). \
         Args: {\"group\": \"host\" | \"accelerator\" | \"all\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "group": { "type": "string", "enum": ["host", "accelerator", "all"] }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ExternalError> {
        let requested = args.get("group").and_then(|v| v.as_str()).unwrap_or("all");
        let groups: &[MetricGroup] = match requested {
            "host" => &[MetricGroup::Host],
            "accelerator" => &[MetricGroup::Accelerator],
            "all" => &[MetricGroup::Host, MetricGroup::Accelerator],
            other => {
                return Err(ExternalError::MalformedResponse(format!(
                    "unknown metric group '{other}'"
                )))
            }
        };

        let mut out = serde_json::Map::new();
        for &group in groups {
            match self.cache.get(group).await {
                Ok(reading) => {
                    for (name, value) in reading.values {
                        out.insert(name, Value::from(value));
                    }
                }
                // 加速器缺失不影响主机指标
                Err(SensorError::Unavailable(msg)) if groups.len() > 1 => {
                    out.insert(format!("{group}_error"), Value::from(msg));
                }
                Err(SensorError::Timeout(d)) => {
                    return Err(ExternalError::Timeout(format!("{group} sensors after {d:?}")))
                }
                Err(e) => return Err(ExternalError::Connection(e.to_string())),
            }
        }
        Ok(Value::Object(out).to_string())
    }
}
