use std::{fmt::Display, str::FromStr, time::Duration};

use bevy::{platform::collections::HashMap, prelude::*};

use crate::{
    error::ActivityError,
    payload::Payload,
    state_condition::{ActivityConditions, CombinationCondition, CombinationConditionId, ConditionContext},
};

/// 时机策略的种类
///
/// Timing strategy kind, with stable numeric codes
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum TimingStrategyKind {
    #[default]
    Immediate = 0,
    AfterDuration = 64,
    AnimationMarker = 128,
    ExpressionIsTrue = 192,
    Never = 255,
}

impl TimingStrategyKind {
    pub const ALL: [Self; 5] = [
        Self::Immediate,
        Self::AfterDuration,
        Self::AnimationMarker,
        Self::ExpressionIsTrue,
        Self::Never,
    ];

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "Immediate",
            Self::AfterDuration => "AfterDuration",
            Self::AnimationMarker => "AnimationMarker",
            Self::ExpressionIsTrue => "ExpressionIsTrue",
            Self::Never => "Never",
        }
    }
}

impl Display for TimingStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimingStrategyKind {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ActivityError::UnknownStrategyKind(s.to_string()))
    }
}

impl TryFrom<u8> for TimingStrategyKind {
    type Error = ActivityError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or(ActivityError::InvalidStrategyCode(code))
    }
}

/// 策略检测时的上下文
///
/// What a strategy is tested against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyContext {
    /// 活动组件
    pub component: Entity,
    /// 父活动
    pub parent: Option<Entity>,
    /// 本次固定帧的时长
    pub delta: Duration,
}

/// 时机策略
///
/// Timing strategy
/// # 作用\Effect
/// * 每个固定帧最多检测一次, 决定活动组件何时自行开始或结束
/// - Tested at most once per fixed tick, decides when an activity component starts or finishes by itself
#[derive(Debug, Default, Clone)]
pub enum TimingStrategy {
    /// 总是满足
    #[default]
    Immediate,
    /// 经过一段时间后满足
    AfterDuration(AfterDuration),
    /// 动画播放到标记时满足
    AnimationMarker(AnimationMarker),
    /// 条件表达式为真时满足
    ExpressionIsTrue(ExpressionIsTrue),
    /// 从不满足
    Never,
}

impl TimingStrategy {
    /// 使用默认配置构造指定种类的策略
    ///
    /// A freshly configured strategy of the given kind
    pub fn from_kind(kind: TimingStrategyKind) -> Self {
        match kind {
            TimingStrategyKind::Immediate => Self::Immediate,
            TimingStrategyKind::AfterDuration => Self::AfterDuration(AfterDuration::default()),
            TimingStrategyKind::AnimationMarker => Self::AnimationMarker(AnimationMarker::default()),
            TimingStrategyKind::ExpressionIsTrue => {
                Self::ExpressionIsTrue(ExpressionIsTrue::default())
            }
            TimingStrategyKind::Never => Self::Never,
        }
    }

    pub fn after(duration: Duration) -> Self {
        Self::AfterDuration(AfterDuration::new(duration))
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Self::ExpressionIsTrue(ExpressionIsTrue::new(expression))
    }

    pub fn kind(&self) -> TimingStrategyKind {
        match self {
            Self::Immediate => TimingStrategyKind::Immediate,
            Self::AfterDuration(_) => TimingStrategyKind::AfterDuration,
            Self::AnimationMarker(_) => TimingStrategyKind::AnimationMarker,
            Self::ExpressionIsTrue(_) => TimingStrategyKind::ExpressionIsTrue,
            Self::Never => TimingStrategyKind::Never,
        }
    }

    pub fn test(&mut self, world: &mut World, context: &StrategyContext) -> bool {
        match self {
            Self::Immediate => true,
            Self::AfterDuration(strategy) => strategy.test(context.delta),
            Self::AnimationMarker(strategy) => strategy.test(world),
            Self::ExpressionIsTrue(strategy) => strategy.test(world, context),
            Self::Never => false,
        }
    }
}

/// 经过一段时间后满足, 满足后计时归零
///
/// Fires once the accumulated tick time reaches `duration`, then re-arms from zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterDuration {
    pub duration: Duration,
    elapsed: Duration,
}

impl Default for AfterDuration {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl AfterDuration {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            elapsed: Duration::ZERO,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn test(&mut self, delta: Duration) -> bool {
        self.elapsed += delta;
        if self.elapsed >= self.duration {
            self.elapsed = Duration::ZERO;
            true
        } else {
            false
        }
    }
}

/// 动画播放状态
///
/// Playback state of an animation player, read by [`AnimationMarker`]
#[derive(Component, Debug, Default, Clone)]
pub struct AnimationPlayback {
    pub current_animation: Option<String>,
    /// 当前播放位置 (秒)
    pub position: f32,
    markers: HashMap<String, HashMap<String, f32>>,
}

impl AnimationPlayback {
    /// 从头开始播放
    pub fn play(&mut self, animation: impl Into<String>) {
        self.current_animation = Some(animation.into());
        self.position = 0.0;
    }

    pub fn stop(&mut self) {
        self.current_animation = None;
        self.position = 0.0;
    }

    /// 添加一个标记
    ///
    /// Add a named marker at `time` seconds into `animation`
    pub fn with_marker(
        mut self,
        animation: impl Into<String>,
        marker: impl Into<String>,
        time: f32,
    ) -> Self {
        self.markers
            .entry(animation.into())
            .or_default()
            .insert(marker.into(), time);
        self
    }

    pub fn marker_time(&self, animation: &str, marker: &str) -> Option<f32> {
        self.markers.get(animation)?.get(marker).copied()
    }
}

/// 动画播放到标记时满足
///
/// Fires once the player's playback position reaches the marker
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnimationMarker {
    /// 带有[`AnimationPlayback`]的实体
    pub player: Option<Entity>,
    /// 为空时使用播放器当前的动画
    pub animation: String,
    pub marker: String,
}

impl AnimationMarker {
    pub fn new(player: Entity, animation: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            player: Some(player),
            animation: animation.into(),
            marker: marker.into(),
        }
    }

    /// 标记的时间, 找不到时为正无穷
    fn marker_time(&self, playback: &AnimationPlayback) -> f32 {
        let animation = if self.animation.trim().is_empty() {
            playback.current_animation.as_deref().unwrap_or_default()
        } else {
            self.animation.as_str()
        };
        if animation.trim().is_empty() {
            return f32::INFINITY;
        }
        playback
            .marker_time(animation, &self.marker)
            .unwrap_or(f32::INFINITY)
    }

    pub fn test(&self, world: &World) -> bool {
        let Some(playback) = self
            .player
            .and_then(|player| world.get::<AnimationPlayback>(player))
        else {
            return false;
        };
        playback.position >= self.marker_time(playback) - f32::EPSILON
    }
}

/// 条件表达式为真时满足
///
/// Fires while a condition expression evaluates to true.
///
/// The expression is compiled on the first test after it last changed. An
/// expression that fails to compile is reported once and never fires.
#[derive(Debug, Clone, Default)]
pub struct ExpressionIsTrue {
    expression: String,
    /// 上下文实体, 为空时使用活动组件本身
    pub context: Option<Entity>,
    pub param: Payload,
    compiled: Option<CombinationConditionId>,
    failed: bool,
}

impl ExpressionIsTrue {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..default()
        }
    }

    pub fn with_context(mut self, context: Entity) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_param(mut self, param: Payload) -> Self {
        self.param = param;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn set_expression(&mut self, expression: impl Into<String>) {
        self.expression = expression.into();
        self.compiled = None;
        self.failed = false;
    }

    fn compile(&mut self, world: &World) -> Option<&CombinationConditionId> {
        if self.compiled.is_none() && !self.failed {
            let compiled = CombinationCondition::parse(&self.expression).and_then(|condition| {
                world
                    .get_resource::<ActivityConditions>()
                    .ok_or_else(|| ActivityError::UnknownCondition(condition.to_string()))?
                    .resolve(&condition)
            });
            match compiled {
                Ok(compiled) => self.compiled = Some(compiled),
                Err(e) => {
                    error!("Failed to compile expression `{}`: {}", self.expression, e);
                    self.failed = true;
                }
            }
        }
        self.compiled.as_ref()
    }

    pub fn test(&mut self, world: &mut World, context: &StrategyContext) -> bool {
        let input = ConditionContext {
            activity: context.component,
            context: self.context.unwrap_or(context.component),
            param: self.param.clone(),
        };
        let Some(compiled) = self.compile(world) else {
            return false;
        };
        match compiled.run(world, &input) {
            Ok(result) => result,
            Err(e) => {
                warn!("Error evaluating expression `{}`: {:?}", self.expression, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(world: &mut World, delta_millis: u64) -> StrategyContext {
        StrategyContext {
            component: world.spawn_empty().id(),
            parent: None,
            delta: Duration::from_millis(delta_millis),
        }
    }

    #[test]
    fn test_kind_codes_and_names() {
        for kind in TimingStrategyKind::ALL {
            assert_eq!(TimingStrategyKind::try_from(kind.code()), Ok(kind));
            assert_eq!(kind.as_str().parse::<TimingStrategyKind>(), Ok(kind));
            assert_eq!(TimingStrategy::from_kind(kind).kind(), kind);
        }
        assert_eq!(TimingStrategyKind::AnimationMarker.code(), 128);
        assert_eq!(
            TimingStrategyKind::try_from(7),
            Err(ActivityError::InvalidStrategyCode(7))
        );
        assert_eq!(
            "Sometimes".parse::<TimingStrategyKind>(),
            Err(ActivityError::UnknownStrategyKind("Sometimes".to_string()))
        );
    }

    #[test]
    fn test_after_duration_rearms_from_zero() {
        let mut world = World::new();
        let context = context(&mut world, 400);
        let mut strategy = TimingStrategy::after(Duration::from_secs(1));

        let results: Vec<bool> = (0..4).map(|_| strategy.test(&mut world, &context)).collect();
        assert_eq!(results, vec![false, false, true, false]);
        let TimingStrategy::AfterDuration(after) = &strategy else {
            panic!("strategy kind changed");
        };
        assert_eq!(after.elapsed(), Duration::from_millis(400));
    }

    #[test]
    fn test_immediate_and_never() {
        let mut world = World::new();
        let context = context(&mut world, 16);
        assert!(TimingStrategy::Immediate.test(&mut world, &context));
        assert!(!TimingStrategy::Never.test(&mut world, &context));
    }

    #[test]
    fn test_animation_marker() {
        let mut world = World::new();
        let context = context(&mut world, 16);
        let mut playback = AnimationPlayback::default()
            .with_marker("open", "hinge", 0.5)
            .with_marker("close", "latch", 0.2);
        playback.play("open");
        let player = world.spawn(playback).id();

        let mut current = TimingStrategy::AnimationMarker(AnimationMarker::new(player, "", "hinge"));
        let mut other = TimingStrategy::AnimationMarker(AnimationMarker::new(player, "close", "latch"));
        let mut missing = TimingStrategy::AnimationMarker(AnimationMarker::new(player, "open", "nope"));
        assert!(!current.test(&mut world, &context));

        world.get_mut::<AnimationPlayback>(player).unwrap().position = 0.5;
        assert!(current.test(&mut world, &context));
        assert!(other.test(&mut world, &context));
        assert!(!missing.test(&mut world, &context));

        world.get_mut::<AnimationPlayback>(player).unwrap().stop();
        assert!(!current.test(&mut world, &context));

        let mut no_player = TimingStrategy::from_kind(TimingStrategyKind::AnimationMarker);
        assert!(!no_player.test(&mut world, &context));
    }

    #[derive(Resource, Default)]
    struct Open(bool);

    fn is_open(_: In<ConditionContext>, open: Res<Open>) -> bool {
        open.0
    }

    fn is_self(context: In<ConditionContext>) -> bool {
        context.activity == context.context
    }

    #[test]
    fn test_expression_is_true() {
        let mut world = World::new();
        world.init_resource::<Open>();
        let mut conditions = ActivityConditions::default();
        conditions.insert("is_open", world.register_system(is_open));
        conditions.insert("is_self", world.register_system(is_self));
        world.insert_resource(conditions);
        let context = context(&mut world, 16);

        let mut strategy = TimingStrategy::expression("And(is_open, is_self)");
        assert!(!strategy.test(&mut world, &context));
        world.resource_mut::<Open>().0 = true;
        assert!(strategy.test(&mut world, &context));

        let other = world.spawn_empty().id();
        let mut with_context = TimingStrategy::ExpressionIsTrue(
            ExpressionIsTrue::new("Not(is_self)").with_context(other),
        );
        assert!(with_context.test(&mut world, &context));
    }

    #[test]
    fn test_expression_recompiles_after_change() {
        let mut world = World::new();
        world.init_resource::<ActivityConditions>();
        let context = context(&mut world, 16);

        let mut expression = ExpressionIsTrue::new("is_open");
        assert!(!expression.test(&mut world, &context));

        world.init_resource::<Open>();
        world.resource_mut::<Open>().0 = true;
        let id = world.register_system(is_open);
        world.resource_mut::<ActivityConditions>().insert("is_open", id);
        // 编译失败后保持为假, 直到表达式改变
        assert!(!expression.test(&mut world, &context));

        expression.set_expression("is_open");
        assert!(expression.test(&mut world, &context));

        expression.set_expression("And(is_open");
        assert!(!expression.test(&mut world, &context));
    }
}
