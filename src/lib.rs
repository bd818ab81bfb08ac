//! Homeostat - 稳态执行核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、恢复、执行状态机与 TaskExecutor
//! - **sensors**: 指标源与带防击穿的 TTL 缓存
//! - **monitor**: 请求级资源监控与汇总
//! - **mode**: 运行模式控制器与治理接口
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock / Scripted）
//! - **routing**: 请求路由
//! - **tools**: 工具注册表与执行器
//! - **reflection**: 三档回退的反思生成
//! - **persistence**: 反思记录存储

pub mod config;
pub mod core;
pub mod llm;
pub mod mode;
pub mod monitor;
pub mod observability;
pub mod persistence;
pub mod reflection;
pub mod routing;
pub mod sensors;
pub mod tools;

pub use crate::core::{ExecutionContext, ExecutorBuilder, TaskExecutor, TaskState};
