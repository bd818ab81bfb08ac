//! 工具层：Tool trait、注册表、带超时与审计的执行器，以及 echo / system_metrics 工具

pub mod echo;
pub mod executor;
pub mod registry;
pub mod system_metrics;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
pub use system_metrics::SystemMetricsTool;
