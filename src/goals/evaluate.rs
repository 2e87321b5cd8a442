//! 每轮评估：工具执行完后检查目标，推进迭代计数并把当前状态告诉 Agent
//!
//! 状态迁移：`Pending → {Achieved, Exhausted}`。未达成且已到迭代上限时 reason 加上
//! `Max iterations (N) reached.` 前缀。soft 模式下倒数第二轮会追加收尾提示。

use crate::agent::{Message, RunState, StopMode};
use crate::goals::{Goal, GoalResult};

/// 一轮评估后的运行阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunPhase {
    /// 未达成，继续迭代
    Pending,
    Achieved,
    /// 未达成且迭代用尽
    Exhausted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunPhase::Pending)
    }
}

fn header(state: &RunState) -> String {
    let mut h = format!("[Iteration {}/{}", state.iteration, state.max_iterations);
    if state.total_tokens > 0 {
        h.push_str(&format!(" | Tokens: {}", group_thousands(state.total_tokens)));
    }
    if state.estimated_cost_usd > 0.0 {
        h.push_str(&format!(" | Cost: ${:.4}", state.estimated_cost_usd));
    }
    h.push(']');
    h
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn status_message(state: &RunState, result: &GoalResult) -> String {
    let header = header(state);
    if result.achieved {
        return format!("{} ✅ Goal ACHIEVED! {}", header, result.reason);
    }
    if state.iteration >= state.max_iterations {
        return format!("{} ⛔ Max iterations reached. Final status: {}", header, result.reason);
    }

    let remaining = state.max_iterations - state.iteration;
    let mut msg = format!(
        "{} Goal NOT YET achieved. {}\n\n\
         You have {} iterations remaining. \
         DO NOT give up. Analyze what went wrong and try a different approach. \
         If your current strategy isn't working, consider:\n\
         - Reading the error messages more carefully\n\
         - Searching the codebase for related code\n\
         - Trying an alternative solution\n\
         - Running diagnostic commands to gather more info\n\
         - Simplifying your approach\n\
         Keep going until the goal is achieved.",
        header, result.reason, remaining
    );
    if state.stop_mode == StopMode::Soft && remaining == 1 {
        msg.push_str(
            "\n\n⚠️ SOFT STOP: the next iteration is your last one. \
             Finish any in-progress change, then write a summary report covering \
             what you changed, what is still failing and what you would try next.",
        );
    }
    msg
}

/// 推进一轮：iteration + 1，检查目标，更新 goal_achieved / goal_reason / consecutive_failures，
/// 追加一条 Human 状态消息，返回新阶段
pub async fn evaluate(goal: &dyn Goal, state: &mut RunState) -> RunPhase {
    state.iteration += 1;
    let cwd = state.cwd.clone();
    let result = goal.check(state, &cwd).await;
    record(state, &result)
}

/// 把一次检查结果写进状态（不调用目标）
pub fn record(state: &mut RunState, result: &GoalResult) -> RunPhase {
    let exhausted = !result.achieved && state.iteration >= state.max_iterations;

    state.push(Message::human(status_message(state, result)));
    state.goal_achieved = result.achieved;
    state.goal_reason = if exhausted {
        format!("Max iterations ({}) reached. {}", state.max_iterations, result.reason)
    } else {
        result.reason.clone()
    };
    if result.achieved {
        state.consecutive_failures = 0;
    } else {
        state.consecutive_failures += 1;
    }

    tracing::info!(
        run_id = %state.run_id,
        iteration = state.iteration,
        achieved = result.achieved,
        reason = %result.reason,
        "goal evaluated"
    );

    if result.achieved {
        RunPhase::Achieved
    } else if exhausted {
        RunPhase::Exhausted
    } else {
        RunPhase::Pending
    }
}
