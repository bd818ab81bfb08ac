//! 路由层：请求分派（直接回复 / 工具 / 委托模型）

pub mod planner;

pub use planner::{parse_route, PlannerRouter, Route, Router};
