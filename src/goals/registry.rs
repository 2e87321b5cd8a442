//! 目标注册表：按名称创建目标实例

use std::sync::Arc;
use std::time::Duration;

use crate::config::GoalsSection;
use crate::core::GoalLookupError;
use crate::goals::{ApiTestGoal, Goal, SqlBenchmarkGoal};

/// 内置目标名（稳定顺序，用于错误提示与帮助信息）
pub const GOAL_NAMES: &[&str] = &["api-test", "sql-benchmark"];

pub fn available_goals() -> Vec<&'static str> {
    GOAL_NAMES.to_vec()
}

/// 按默认设置创建目标
pub fn get_goal(name: &str) -> Result<Arc<dyn Goal>, GoalLookupError> {
    get_goal_with(name, &GoalsSection::default())
}

/// 按 [goals] 配置段创建目标
pub fn get_goal_with(name: &str, settings: &GoalsSection) -> Result<Arc<dyn Goal>, GoalLookupError> {
    match name {
        "api-test" => Ok(Arc::new(
            ApiTestGoal::new().with_default_timeout(Duration::from_secs(settings.default_http_timeout_secs)),
        )),
        "sql-benchmark" => Ok(Arc::new(
            SqlBenchmarkGoal::new().with_default_timeout(Duration::from_secs(settings.query_timeout_secs)),
        )),
        other => Err(GoalLookupError {
            name: other.to_string(),
            available: GOAL_NAMES.join(", "),
        }),
    }
}
