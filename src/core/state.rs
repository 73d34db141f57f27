//! 回合状态机：TurnPhase 及其合法转移、回合执行轨迹、回合结果

use serde::Serialize;

use crate::actions::{ActionRequest, ActionResult};

/// 单个回合经历的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TurnPhase {
    Routing,
    /// 规则直接给出最终回复
    RuleShortcut,
    /// 规则给出预置动作，跳过生成与提取
    RuleAction,
    Generate,
    Extract,
    Resolve,
    Dispatch,
    Synthesize,
    Done,
    /// 吸收态：降级回复后结束
    Error,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnPhase::Done | TurnPhase::Error)
    }

    pub fn can_transition_to(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        if next == Error {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Routing, RuleShortcut)
                | (Routing, RuleAction)
                | (Routing, Generate)
                | (RuleShortcut, Done)
                | (RuleAction, Resolve)
                | (Generate, Extract)
                | (Extract, Resolve)
                | (Extract, Done)
                | (Resolve, Dispatch)
                | (Dispatch, Synthesize)
                | (Synthesize, Done)
        )
    }
}

/// 回合轨迹：记录实际走过的阶段
#[derive(Clone, Debug)]
pub struct TurnTrace {
    phases: Vec<TurnPhase>,
}

impl Default for TurnTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTrace {
    pub fn new() -> Self {
        Self {
            phases: vec![TurnPhase::Routing],
        }
    }

    pub fn current(&self) -> TurnPhase {
        self.phases.last().copied().unwrap_or(TurnPhase::Routing)
    }

    /// 推进到下一阶段；非法转移记录错误日志并忽略
    pub fn advance(&mut self, next: TurnPhase) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            tracing::error!(from = ?current, to = ?next, "illegal turn transition");
            return false;
        }
        tracing::debug!(from = ?current, to = ?next, "turn phase");
        self.phases.push(next);
        true
    }

    pub fn phases(&self) -> &[TurnPhase] {
        &self.phases
    }

    pub fn into_phases(self) -> Vec<TurnPhase> {
        self.phases
    }
}

/// 一个回合的结果
#[derive(Clone, Debug, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    /// 实际派发的动作（解析后）
    pub actions_taken: Vec<ActionRequest>,
    pub results: Vec<ActionResult>,
    pub phases: Vec<TurnPhase>,
    /// 命中的规则名
    pub rule: Option<String>,
}

impl TurnOutcome {
    pub fn ended_in_error(&self) -> bool {
        self.phases.last() == Some(&TurnPhase::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnPhase::*;

    #[test]
    fn test_full_generate_path_is_valid() {
        let mut trace = TurnTrace::new();
        for p in [Generate, Extract, Resolve, Dispatch, Synthesize, Done] {
            assert!(trace.advance(p));
        }
        assert_eq!(trace.phases().len(), 7);
    }

    #[test]
    fn test_rule_action_skips_generate() {
        assert!(RuleAction.can_transition_to(Resolve));
        assert!(!RuleAction.can_transition_to(Extract));
        assert!(!Routing.can_transition_to(Dispatch));
    }

    #[test]
    fn test_illegal_advance_is_ignored() {
        let mut trace = TurnTrace::new();
        assert!(!trace.advance(Dispatch));
        assert_eq!(trace.current(), Routing);
        assert!(trace.advance(Generate));
        assert!(trace.advance(Error));
        assert!(!trace.advance(Done));
        assert_eq!(trace.phases(), &[Routing, Generate, Error]);
    }

    #[test]
    fn test_error_is_absorbing() {
        assert!(Generate.can_transition_to(Error));
        assert!(Synthesize.can_transition_to(Error));
        assert!(!Error.can_transition_to(Done));
        assert!(!Error.can_transition_to(Error));
        assert!(!Done.can_transition_to(Error));
    }
}
