use std::time::Duration;

use bevy::{
    ecs::{
        lifecycle::{HookContext, Insert, Replace},
        world::DeferredWorld,
    },
    prelude::*,
};

use crate::{
    activity::{
        Activity, ActivityFinished, ActivityListeners, ActivityStarted, ActivityWillFinish,
        ActivityWillStart, ActivityWorldExt,
    },
    listeners::{ListenerId, run_listener},
    payload::Payload,
    timing_strategy::{StrategyContext, TimingStrategy, TimingStrategyKind},
};

/// 活动组件的状态
///
/// Activity component state
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
#[repr(u8)]
pub enum ComponentState {
    /// 父活动没有进行
    ///
    /// The parent activity is not active
    #[default]
    Inactive = 0,
    /// 父活动已开始, 组件等待开始条件满足
    ///
    /// The parent activity started, the component waits for its start conditions
    StandBy = 32,
    /// 组件正在进行
    ///
    /// The component is active
    Started = 64,
    /// 组件已结束, 等待父活动结束后才能再次开始
    ///
    /// The component finished and waits for the parent activity to finish before it can start again
    Finished = 96,
}

/// 活动组件
///
/// Activity component
/// # 作用\Effect
/// * 挂在父活动下的活动, 父活动在实体层级中向上查找
/// - An activity attached under a parent activity, looked up through the entity hierarchy
/// * 父活动开始后进入待命, 由开始策略决定何时开始
/// - Stands by once the parent starts, the start strategy decides when it starts
/// * 父活动结束时强制结束
/// - Force-finished when the parent finishes
///
/// 父活动在插入时确定, [`ActivityPlugin`](crate::ActivityPlugin)会在父实体改变时重新查找
///
/// The parent is resolved on insert, [`ActivityPlugin`](crate::ActivityPlugin) re-resolves it
/// when the entity or one of its ancestors is re-parented.
/// # 示例\Example
/// ```
/// # use std::time::Duration;
/// # use bevy::prelude::*;
/// # use bevy_activity::prelude::*;
/// # fn foo(mut commands: Commands) {
/// commands.spawn(Activity::default()).with_children(|parent| {
///     parent.spawn(
///         ActivityComponent::default()
///             .with_start_strategy(TimingStrategy::after(Duration::from_millis(500))),
///     );
/// });
/// # }
/// ```
#[derive(Component, Debug, Clone)]
#[require(Activity)]
#[component(on_insert = Self::on_insert, on_replace = Self::on_replace)]
pub struct ActivityComponent {
    /// 为假时开始总是被取消, 进行中时会结束
    pub enabled: bool,
    start_strategy: TimingStrategy,
    finish_strategy: TimingStrategy,
    state: ComponentState,
    parent: Option<Entity>,
}

impl Default for ActivityComponent {
    fn default() -> Self {
        Self {
            enabled: true,
            start_strategy: TimingStrategy::Immediate,
            finish_strategy: TimingStrategy::Never,
            state: ComponentState::Inactive,
            parent: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Finish,
}

impl ActivityComponent {
    pub fn with_start_strategy(mut self, strategy: TimingStrategy) -> Self {
        self.start_strategy = strategy;
        self
    }

    pub fn with_finish_strategy(mut self, strategy: TimingStrategy) -> Self {
        self.finish_strategy = strategy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    /// 插入时找到的父活动
    #[inline]
    pub fn parent(&self) -> Option<Entity> {
        self.parent
    }

    pub fn start_strategy(&self) -> &TimingStrategy {
        &self.start_strategy
    }

    pub fn finish_strategy(&self) -> &TimingStrategy {
        &self.finish_strategy
    }

    pub fn start_strategy_mut(&mut self) -> &mut TimingStrategy {
        &mut self.start_strategy
    }

    pub fn finish_strategy_mut(&mut self) -> &mut TimingStrategy {
        &mut self.finish_strategy
    }

    pub fn set_start_strategy(&mut self, strategy: TimingStrategy) {
        self.start_strategy = strategy;
    }

    pub fn set_finish_strategy(&mut self, strategy: TimingStrategy) {
        self.finish_strategy = strategy;
    }

    /// 切换开始策略的种类, 种类改变时丢弃旧策略及其累计状态
    ///
    /// Switch the start strategy kind, a different kind discards the old strategy and its accumulated state
    pub fn set_start_strategy_kind(&mut self, kind: TimingStrategyKind) {
        if self.start_strategy.kind() != kind {
            self.start_strategy = TimingStrategy::from_kind(kind);
        }
    }

    /// 切换结束策略的种类, 种类改变时丢弃旧策略及其累计状态
    ///
    /// Switch the finish strategy kind, a different kind discards the old strategy and its accumulated state
    pub fn set_finish_strategy_kind(&mut self, kind: TimingStrategyKind) {
        if self.finish_strategy.kind() != kind {
            self.finish_strategy = TimingStrategy::from_kind(kind);
        }
    }

    fn strategy_mut(&mut self, phase: Phase) -> &mut TimingStrategy {
        match phase {
            Phase::Start => &mut self.start_strategy,
            Phase::Finish => &mut self.finish_strategy,
        }
    }

    fn on_insert(mut world: DeferredWorld, HookContext { entity, .. }: HookContext) {
        let parent = find_parent_activity(&world, entity);
        if let Some(mut component) = world.get_mut::<ActivityComponent>(entity) {
            component.parent = parent;
        }
        let Some(parent) = parent else {
            warn!("ActivityComponent<{}> has no parent activity", entity);
            return;
        };
        if let Some(mut listeners) = world.get_mut::<ActivityListeners>(parent) {
            add_relays(&mut listeners, entity);
        }
    }

    fn on_replace(mut world: DeferredWorld, HookContext { entity, .. }: HookContext) {
        let Some(parent) = world
            .get::<ActivityComponent>(entity)
            .and_then(|component| component.parent)
        else {
            return;
        };
        if let Some(mut listeners) = world.get_mut::<ActivityListeners>(parent) {
            remove_relays(&mut listeners, entity);
        }
    }
}

fn add_relays(listeners: &mut ActivityListeners, entity: Entity) {
    listeners.will_start.add_relay(entity);
    listeners.started.add_relay(entity);
    listeners.will_finish.add_relay(entity);
    listeners.finished.add_relay(entity);
}

fn remove_relays(listeners: &mut ActivityListeners, entity: Entity) {
    listeners.will_start.remove_relay(entity);
    listeners.started.remove_relay(entity);
    listeners.will_finish.remove_relay(entity);
    listeners.finished.remove_relay(entity);
}

/// 重新查找父活动, 父活动改变时转移监听
///
/// Re-resolve the parent activity, moving the relays when it changed
fn reattach(world: &mut World, entity: Entity) {
    let Some(component) = world.get::<ActivityComponent>(entity) else {
        return;
    };
    let previous = component.parent;
    let parent = find_parent_activity(world, entity);
    if previous == parent {
        return;
    }
    if let Some(mut listeners) = previous.and_then(|p| world.get_mut::<ActivityListeners>(p)) {
        remove_relays(&mut listeners, entity);
    }
    if let Some(mut listeners) = parent.and_then(|p| world.get_mut::<ActivityListeners>(p)) {
        add_relays(&mut listeners, entity);
    }
    if let Some(mut component) = world.get_mut::<ActivityComponent>(entity) {
        component.parent = parent;
    }
    debug!("ActivityComponent<{}> parent changed: {:?} -> {:?}", entity, previous, parent);
}

/// 重新查找实体及其后代中所有活动组件的父活动
fn reattach_tree(world: &mut World, root: Entity) {
    let mut stack = vec![root];
    while let Some(entity) = stack.pop() {
        reattach(world, entity);
        if let Some(children) = world.get::<Children>(entity) {
            stack.extend_from_slice(children);
        }
    }
}

/// 父实体改变后重新查找父活动
///
/// Observer keeping [`ActivityComponent`] parents in sync with [`ChildOf`]
/// # 作用\Effect
/// * 插入或替换[`ChildOf`]后, 实体及其后代的活动组件会转移到新的父活动
/// - After [`ChildOf`] is inserted or replaced, activity components of the entity and its descendants move to the new parent activity
/// * 移除[`ChildOf`]后, 它们会脱离原来的父活动
/// - After [`ChildOf`] is removed, they detach from the old parent activity
pub fn track_parent_on_insert(insert: On<Insert, ChildOf>, mut commands: Commands) {
    let entity = insert.entity;
    commands.queue(move |world: &mut World| reattach_tree(world, entity));
}

/// 见[`track_parent_on_insert`]
pub fn track_parent_on_replace(replace: On<Replace, ChildOf>, mut commands: Commands) {
    let entity = replace.entity;
    commands.queue(move |world: &mut World| reattach_tree(world, entity));
}

/// 父活动事件的钩子, 在内置处理之后调用
///
/// Hooks for the parent activity's events, called after the built-in handling.
///
/// The "will" hooks receive the parent's own controller, so they can veto the
/// parent's start or finish.
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct ParentActivityHooks {
    pub will_start: Option<ListenerId<ActivityWillStart>>,
    pub started: Option<ListenerId<ActivityStarted>>,
    pub will_finish: Option<ListenerId<ActivityWillFinish>>,
    pub finished: Option<ListenerId<ActivityFinished>>,
}

/// 向上查找最近的活动
///
/// Nearest ancestor carrying an [`Activity`]
pub fn find_parent_activity(world: &World, entity: Entity) -> Option<Entity> {
    let mut current = world.get::<ChildOf>(entity)?.parent();
    loop {
        if world.get::<Activity>(current).is_some() {
            return Some(current);
        }
        current = world.get::<ChildOf>(current)?.parent();
    }
}

fn parent_is_active(world: &World, parent: Option<Entity>) -> bool {
    parent
        .and_then(|parent| world.get::<Activity>(parent))
        .is_some_and(Activity::is_active)
}

fn set_state(world: &mut World, entity: Entity, state: ComponentState) {
    if let Some(mut component) = world.get_mut::<ActivityComponent>(entity) {
        component.state = state;
    }
}

fn run_parent_hook<E: Send + Sync + Clone + 'static>(
    world: &mut World,
    entity: Entity,
    hook: fn(&ParentActivityHooks) -> Option<ListenerId<E>>,
    event: &E,
) {
    if let Some(id) = world.get::<ParentActivityHooks>(entity).and_then(hook) {
        run_listener(world, id, event.clone());
    }
}

pub(crate) fn is_disabled(world: &World, entity: Entity) -> bool {
    world
        .get::<ActivityComponent>(entity)
        .is_some_and(|component| !component.enabled)
}

pub(crate) fn on_parent_will_start(world: &mut World, entity: Entity, event: &ActivityWillStart) {
    run_parent_hook(world, entity, |hooks| hooks.will_start, event);
}

pub(crate) fn on_parent_started(world: &mut World, entity: Entity, event: &ActivityStarted) {
    set_state(world, entity, ComponentState::StandBy);
    run_parent_hook(world, entity, |hooks| hooks.started, event);
}

pub(crate) fn on_parent_will_finish(world: &mut World, entity: Entity, event: &ActivityWillFinish) {
    run_parent_hook(world, entity, |hooks| hooks.will_finish, event);
}

pub(crate) fn on_parent_finished(world: &mut World, entity: Entity, event: &ActivityFinished) {
    if world.get::<Activity>(entity).is_some_and(Activity::is_active) {
        let reason = format!("ActivityComponent.ParentFinished({})", event.reason);
        if let Err(e) = world.force_finish_activity(entity, reason, event.details.clone()) {
            warn!("Failed to finish ActivityComponent<{}>: {}", entity, e);
        }
        set_state(world, entity, ComponentState::Finished);
    } else {
        set_state(world, entity, ComponentState::Inactive);
    }
    run_parent_hook(world, entity, |hooks| hooks.finished, event);
}

pub(crate) fn on_own_started(world: &mut World, entity: Entity) {
    // 通知送达前可能已经结束
    if world.get::<Activity>(entity).is_some_and(Activity::is_active) {
        set_state(world, entity, ComponentState::Started);
    }
}

pub(crate) fn on_own_finished(world: &mut World, entity: Entity) {
    let Some(component) = world.get::<ActivityComponent>(entity) else {
        return;
    };
    // 父活动结束时已经更新过状态
    if component.state != ComponentState::Started {
        return;
    }
    let state = if parent_is_active(world, component.parent) {
        ComponentState::Finished
    } else {
        ComponentState::Inactive
    };
    set_state(world, entity, state);
}

/// 取出策略检测, 检测期间策略不在组件中
fn poll_strategy(world: &mut World, entity: Entity, phase: Phase, context: &StrategyContext) -> bool {
    let Some(mut component) = world.get_mut::<ActivityComponent>(entity) else {
        return false;
    };
    let mut strategy = std::mem::replace(component.strategy_mut(phase), TimingStrategy::Never);
    let fired = strategy.test(world, context);
    if let Some(mut component) = world.get_mut::<ActivityComponent>(entity) {
        *component.strategy_mut(phase) = strategy;
    }
    fired
}

pub(crate) fn try_strategy_start(world: &mut World, entity: Entity, delta: Duration) {
    let Some(component) = world.get::<ActivityComponent>(entity) else {
        return;
    };
    if component.state != ComponentState::StandBy
        || !component.enabled
        || world.get::<Activity>(entity).is_none_or(Activity::is_active)
    {
        return;
    }
    let parent = component.parent;
    let kind = component.start_strategy.kind();
    // 不会被处理时不开始, 否则将无法检测结束条件
    if !world.test_active_state_can_process(entity) || !parent_is_active(world, parent) {
        return;
    }
    let context = StrategyContext {
        component: entity,
        parent,
        delta,
    };
    if !poll_strategy(world, entity, Phase::Start, &context) {
        return;
    }
    let mode = format!("ActivityComponent.StartStrategy({}).ConditionSatisfied", kind);
    if let Err(e) = world.start_activity(entity, mode, Payload::none()) {
        warn!("Failed to start ActivityComponent<{}>: {}", entity, e);
    }
}

pub(crate) fn try_strategy_finish(world: &mut World, entity: Entity, delta: Duration) {
    let Some(component) = world.get::<ActivityComponent>(entity) else {
        return;
    };
    if component.state != ComponentState::Started {
        return;
    }
    let parent = component.parent;
    let kind = component.finish_strategy.kind();
    let satisfied = !component.enabled
        || !parent_is_active(world, parent)
        || poll_strategy(
            world,
            entity,
            Phase::Finish,
            &StrategyContext {
                component: entity,
                parent,
                delta,
            },
        );
    if !satisfied {
        return;
    }
    let reason = format!("ActivityComponent.FinishStrategy({}).ConditionSatisfied", kind);
    if let Err(e) = world.finish_activity(entity, reason, Payload::none()) {
        warn!("Failed to finish ActivityComponent<{}>: {}", entity, e);
    }
}
