use bevy::prelude::Entity;

/// 活动系统错误
///
/// Errors raised by activity, strategy and state machine operations.
///
/// A vetoed start or finish is not an error, it is reported as `Ok(false)`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivityError {
    #[error("entity {0} has no Activity component")]
    NotAnActivity(Entity),
    #[error("entity {0} has no StateMachine for the requested state type")]
    NotAStateMachine(Entity),
    #[error("unknown timing strategy kind `{0}`")]
    UnknownStrategyKind(String),
    #[error("invalid timing strategy code {0}")]
    InvalidStrategyCode(u8),
    #[error("invalid condition expression: {0}")]
    InvalidExpression(String),
    #[error("condition `{0}` is not registered")]
    UnknownCondition(String),
    #[error("state machine {0} already has an ongoing transition")]
    TransitionAlreadyOngoing(Entity),
    #[error("state handler failed: {0}")]
    Handler(String),
}
