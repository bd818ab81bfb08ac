//! 治理接口：依据当前模式决定是否允许较高风险的操作
//!
//! ModeController 只维护状态，具体放行规则由实现 Governance 的外部组件决定。

use crate::mode::Mode;

/// 需要治理放行的操作类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    ToolCall,
    ModelDelegate,
}

pub trait Governance: Send + Sync {
    fn permits(&self, mode: Mode, operation: Operation) -> bool;
}

/// 默认规则：LOCKDOWN 禁止工具与委托，DEGRADED 禁止委托模型
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultGovernance;

impl Governance for DefaultGovernance {
    fn permits(&self, mode: Mode, operation: Operation) -> bool {
        match (mode, operation) {
            (Mode::Lockdown, _) => false,
            (Mode::Degraded, Operation::ModelDelegate) => false,
            _ => true,
        }
    }
}

/// 全部放行
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Governance for AllowAll {
    fn permits(&self, _mode: Mode, _operation: Operation) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_governance() {
        let g = DefaultGovernance;
        assert!(g.permits(Mode::Normal, Operation::ModelDelegate));
        assert!(g.permits(Mode::Degraded, Operation::ToolCall));
        assert!(!g.permits(Mode::Degraded, Operation::ModelDelegate));
        assert!(!g.permits(Mode::Lockdown, Operation::ToolCall));
    }
}
