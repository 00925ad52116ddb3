use std::time::Duration;

use bevy::{
    ecs::{lifecycle::HookContext, world::DeferredWorld},
    prelude::*,
};

use crate::{
    activity_component,
    cancellation::CancellationController,
    deferred::CallDeferred,
    error::ActivityError,
    listeners::{ListenerId, Listeners, run_listener},
    payload::Payload,
    process_mode::{ProcessMode, can_process, is_design_time, would_process},
};

/// 活动
///
/// Activity
/// # 作用\Effect
/// * 一个要么正在进行, 要么没有进行的行为单元
/// - A unit of behavior that is either happening or not
/// * 开始和结束前都会先通知监听者, 任何监听者都可以取消
/// - Starting and finishing both run a "will" phase that any listener may cancel
/// * 提交后的通知会延迟到下一次延迟调用时发送
/// - The notification after a commit is delivered on the next deferred drain
///
/// 同一时刻只允许一个开始或结束处于预处理阶段, 此时再次请求会被拒绝
///
/// Only one start or finish may be in its "will" phase at a time, a second
/// request made meanwhile is rejected.
#[derive(Component, Debug, Clone, PartialEq)]
#[require(ProcessMode, ActivityListeners)]
#[component(on_insert = Self::on_insert)]
pub struct Activity {
    /// 活动进行时的处理模式
    pub when_active: ProcessMode,
    /// 活动未进行时的处理模式
    pub when_inactive: ProcessMode,
    /// 为假时不修改实体的[`ProcessMode`]
    pub process_mode_managed: bool,
    is_active: bool,
    active_time: Duration,
    pending: bool,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            when_active: ProcessMode::Inherit,
            when_inactive: ProcessMode::Disabled,
            process_mode_managed: true,
            is_active: false,
            active_time: Duration::ZERO,
            pending: false,
        }
    }
}

impl Activity {
    pub fn new(when_active: ProcessMode, when_inactive: ProcessMode) -> Self {
        Self {
            when_active,
            when_inactive,
            ..default()
        }
    }

    /// 不管理实体的处理模式
    pub fn unmanaged() -> Self {
        Self {
            process_mode_managed: false,
            ..default()
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// 活动开始后的时长, 只在固定帧中累加, 未进行时为零
    ///
    /// Time since the activity started, accumulated on fixed ticks, zero while inactive
    #[inline]
    pub fn active_time(&self) -> Duration {
        self.active_time
    }

    /// 是否有开始或结束处于预处理阶段
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn current_process_mode(&self) -> ProcessMode {
        if self.is_active {
            self.when_active
        } else {
            self.when_inactive
        }
    }

    fn on_insert(mut world: DeferredWorld, HookContext { entity, .. }: HookContext) {
        let Some(activity) = world.get::<Activity>(entity) else {
            return;
        };
        if !activity.process_mode_managed {
            return;
        }
        let mode = activity.current_process_mode();
        if let Some(mut process_mode) = world.get_mut::<ProcessMode>(entity) {
            *process_mode = mode;
        }
    }
}

/// 活动即将开始
#[derive(Debug, Clone)]
pub struct ActivityWillStart {
    pub activity: Entity,
    pub mode: String,
    pub argument: Payload,
    /// 调用[`CancellationController::cancel`]以阻止开始
    pub controller: CancellationController,
}

/// 活动已开始
#[derive(Debug, Clone)]
pub struct ActivityStarted {
    pub activity: Entity,
    pub mode: String,
    pub argument: Payload,
}

/// 活动即将结束
#[derive(Debug, Clone)]
pub struct ActivityWillFinish {
    pub activity: Entity,
    pub reason: String,
    pub details: Payload,
    /// 调用[`CancellationController::cancel`]以阻止结束
    pub controller: CancellationController,
}

/// 活动已结束
#[derive(Debug, Clone)]
pub struct ActivityFinished {
    pub activity: Entity,
    pub reason: String,
    pub details: Payload,
}

/// 活动进行中的一帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTick {
    pub activity: Entity,
    pub delta: Duration,
}

/// 活动的监听者, 按注册顺序调用
///
/// Listeners of an activity, called in registration order
#[derive(Component, Debug, Default, Clone)]
pub struct ActivityListeners {
    pub will_start: Listeners<ActivityWillStart>,
    pub started: Listeners<ActivityStarted>,
    pub will_finish: Listeners<ActivityWillFinish>,
    pub finished: Listeners<ActivityFinished>,
}

/// 活动自身的钩子, 总是在监听者之前调用
///
/// The activity's own hooks, always called before its listeners
/// # 示例\Example
/// ```
/// # use bevy::prelude::*;
/// # use bevy_activity::prelude::*;
/// fn on_started(event: In<ActivityStarted>) {
///     info!("{} started by {}", event.activity, event.mode);
/// }
///
/// # fn foo(mut commands: Commands) {
/// let started = commands.register_system(on_started);
/// commands.spawn((
///     Activity::default(),
///     ActivityHooks {
///         started: Some(started),
///         ..default()
///     },
/// ));
/// # }
/// ```
#[derive(Component, Debug, Default, Clone, Copy)]
pub struct ActivityHooks {
    pub will_start: Option<ListenerId<ActivityWillStart>>,
    pub started: Option<ListenerId<ActivityStarted>>,
    pub will_finish: Option<ListenerId<ActivityWillFinish>>,
    pub finished: Option<ListenerId<ActivityFinished>>,
    /// 活动进行中的每个可变帧
    pub process: Option<ListenerId<ActivityTick>>,
    /// 活动进行中的每个固定帧, 此时[`Activity::active_time`]已包含本帧
    pub physics_process: Option<ListenerId<ActivityTick>>,
    /// 每个可变帧, 不论活动是否进行, 也不受暂停和处理模式影响
    pub process_always: Option<ListenerId<ActivityTick>>,
    /// 每个固定帧, 不论活动是否进行, 也不受暂停和处理模式影响
    pub physics_process_always: Option<ListenerId<ActivityTick>>,
}

/// 先调用钩子, 再调用监听者; 钩子取消后不再调用监听者
fn notify<E: Clone + Send + Sync + 'static>(
    world: &mut World,
    entity: Entity,
    event: &E,
    hook: fn(&ActivityHooks) -> Option<ListenerId<E>>,
    listeners: fn(&ActivityListeners) -> &Listeners<E>,
    controller: Option<&CancellationController>,
    relay: fn(&mut World, Entity, &E),
) {
    if let Some(id) = world.get::<ActivityHooks>(entity).and_then(hook) {
        run_listener(world, id, event.clone());
    }
    if controller.is_some_and(CancellationController::is_cancelled) {
        return;
    }
    let Some(listeners) = world
        .get::<ActivityListeners>(entity)
        .map(|l| listeners(l).clone())
    else {
        return;
    };
    listeners.trigger_with(world, event, relay);
}

/// 提交状态, 返回状态是否改变
fn commit(world: &mut World, entity: Entity, active: bool) -> bool {
    let Some(mut activity) = world.get_mut::<Activity>(entity) else {
        return false;
    };
    activity.pending = false;
    if activity.is_active == active {
        return false;
    }
    activity.is_active = active;
    activity.active_time = Duration::ZERO;
    let managed = activity.process_mode_managed;
    let mode = activity.current_process_mode();
    if managed && let Some(mut process_mode) = world.get_mut::<ProcessMode>(entity) {
        *process_mode = mode;
    }
    true
}

fn clear_pending(world: &mut World, entity: Entity) {
    if let Some(mut activity) = world.get_mut::<Activity>(entity) {
        activity.pending = false;
    }
}

fn deliver_started(world: &mut World, event: ActivityStarted) {
    let entity = event.activity;
    if world.get_entity(entity).is_err() {
        warn!("Activity<{}> despawned before its started notification", entity);
        return;
    }
    activity_component::on_own_started(world, entity);
    notify(
        world,
        entity,
        &event,
        |hooks| hooks.started,
        |listeners| &listeners.started,
        None,
        activity_component::on_parent_started,
    );
}

fn deliver_finished(world: &mut World, event: ActivityFinished) {
    let entity = event.activity;
    if world.get_entity(entity).is_err() {
        warn!("Activity<{}> despawned before its finished notification", entity);
        return;
    }
    activity_component::on_own_finished(world, entity);
    notify(
        world,
        entity,
        &event,
        |hooks| hooks.finished,
        |listeners| &listeners.finished,
        None,
        activity_component::on_parent_finished,
    );
}

/// 活动操作
///
/// Activity operations on the world
pub trait ActivityWorldExt {
    /// 尝试开始活动
    ///
    /// Try to start an activity
    /// # 返回\Returns
    /// * `Ok(true)`: 已开始, 或本来就在进行
    /// - `Ok(true)`: started, or was already active
    /// * `Ok(false)`: 被取消, 或已有开始或结束处于预处理阶段
    /// - `Ok(false)`: vetoed, or another start or finish is in its "will" phase
    fn start_activity(
        &mut self,
        entity: Entity,
        mode: impl Into<String>,
        argument: Payload,
    ) -> Result<bool, ActivityError>;

    /// 尝试结束活动, 没有进行时直接返回`Ok(true)`
    ///
    /// Try to finish an activity, an inactive one returns `Ok(true)` without any event
    fn finish_activity(
        &mut self,
        entity: Entity,
        reason: impl Into<String>,
        details: Payload,
    ) -> Result<bool, ActivityError>;

    /// 跳过预处理阶段直接开始
    ///
    /// Start without running the "will" phase
    fn force_start_activity(
        &mut self,
        entity: Entity,
        mode: impl Into<String>,
        argument: Payload,
    ) -> Result<(), ActivityError>;

    /// 跳过预处理阶段直接结束
    ///
    /// Finish without running the "will" phase
    fn force_finish_activity(
        &mut self,
        entity: Entity,
        reason: impl Into<String>,
        details: Payload,
    ) -> Result<(), ActivityError>;

    /// 活动进行时是否会被处理
    ///
    /// Whether the activity would be ticked if it were active right now
    fn test_active_state_can_process(&self, entity: Entity) -> bool;

    /// 重新应用当前状态的处理模式
    ///
    /// Re-apply the process mode of the current state, after editing `when_active` or `when_inactive`
    fn refresh_process_mode(&mut self, entity: Entity) -> Result<(), ActivityError>;
}

impl ActivityWorldExt for World {
    fn start_activity(
        &mut self,
        entity: Entity,
        mode: impl Into<String>,
        argument: Payload,
    ) -> Result<bool, ActivityError> {
        let mut activity = self
            .get_mut::<Activity>(entity)
            .ok_or(ActivityError::NotAnActivity(entity))?;
        if activity.is_active {
            return Ok(true);
        }
        if activity.pending {
            debug!("Activity<{}> start rejected, another transition is pending", entity);
            return Ok(false);
        }
        activity.pending = true;

        let event = ActivityWillStart {
            activity: entity,
            mode: mode.into(),
            argument,
            controller: CancellationController::new(),
        };
        if activity_component::is_disabled(self, entity) {
            event.controller.cancel();
        } else {
            notify(
                self,
                entity,
                &event,
                |hooks| hooks.will_start,
                |listeners| &listeners.will_start,
                Some(&event.controller),
                activity_component::on_parent_will_start,
            );
        }

        if event.controller.is_cancelled() {
            clear_pending(self, entity);
            debug!("Activity<{}> start `{}` cancelled", entity, event.mode);
            return Ok(false);
        }
        if !commit(self, entity, true) {
            // 预处理阶段中被强制开始或被移除
            return Ok(self.get::<Activity>(entity).is_some_and(Activity::is_active));
        }
        trace!("Activity<{}> started `{}`", entity, event.mode);

        let started = ActivityStarted {
            activity: entity,
            mode: event.mode,
            argument: event.argument,
        };
        self.call_deferred(move |world| deliver_started(world, started));
        Ok(true)
    }

    fn finish_activity(
        &mut self,
        entity: Entity,
        reason: impl Into<String>,
        details: Payload,
    ) -> Result<bool, ActivityError> {
        let mut activity = self
            .get_mut::<Activity>(entity)
            .ok_or(ActivityError::NotAnActivity(entity))?;
        if !activity.is_active {
            return Ok(true);
        }
        if activity.pending {
            debug!("Activity<{}> finish rejected, another transition is pending", entity);
            return Ok(false);
        }
        activity.pending = true;

        let event = ActivityWillFinish {
            activity: entity,
            reason: reason.into(),
            details,
            controller: CancellationController::new(),
        };
        notify(
            self,
            entity,
            &event,
            |hooks| hooks.will_finish,
            |listeners| &listeners.will_finish,
            Some(&event.controller),
            activity_component::on_parent_will_finish,
        );

        if event.controller.is_cancelled() {
            clear_pending(self, entity);
            debug!("Activity<{}> finish `{}` cancelled", entity, event.reason);
            return Ok(false);
        }
        if !commit(self, entity, false) {
            return Ok(self.get::<Activity>(entity).is_none_or(|a| !a.is_active()));
        }
        trace!("Activity<{}> finished `{}`", entity, event.reason);

        let finished = ActivityFinished {
            activity: entity,
            reason: event.reason,
            details: event.details,
        };
        self.call_deferred(move |world| deliver_finished(world, finished));
        Ok(true)
    }

    fn force_start_activity(
        &mut self,
        entity: Entity,
        mode: impl Into<String>,
        argument: Payload,
    ) -> Result<(), ActivityError> {
        if self.get::<Activity>(entity).is_none() {
            return Err(ActivityError::NotAnActivity(entity));
        }
        if !commit(self, entity, true) {
            return Ok(());
        }
        let started = ActivityStarted {
            activity: entity,
            mode: mode.into(),
            argument,
        };
        trace!("Activity<{}> force started `{}`", entity, started.mode);
        self.call_deferred(move |world| deliver_started(world, started));
        Ok(())
    }

    fn force_finish_activity(
        &mut self,
        entity: Entity,
        reason: impl Into<String>,
        details: Payload,
    ) -> Result<(), ActivityError> {
        if self.get::<Activity>(entity).is_none() {
            return Err(ActivityError::NotAnActivity(entity));
        }
        if !commit(self, entity, false) {
            return Ok(());
        }
        let finished = ActivityFinished {
            activity: entity,
            reason: reason.into(),
            details,
        };
        trace!("Activity<{}> force finished `{}`", entity, finished.reason);
        self.call_deferred(move |world| deliver_finished(world, finished));
        Ok(())
    }

    fn test_active_state_can_process(&self, entity: Entity) -> bool {
        match self.get::<Activity>(entity) {
            Some(activity) if activity.process_mode_managed && !activity.is_active => {
                would_process(self, entity, activity.when_active)
            }
            _ => can_process(self, entity),
        }
    }

    fn refresh_process_mode(&mut self, entity: Entity) -> Result<(), ActivityError> {
        let activity = self
            .get::<Activity>(entity)
            .ok_or(ActivityError::NotAnActivity(entity))?;
        if activity.process_mode_managed {
            let mode = activity.current_process_mode();
            self.entity_mut(entity).insert(mode);
        }
        Ok(())
    }
}

fn activity_entities(world: &mut World) -> Vec<Entity> {
    world
        .query_filtered::<Entity, With<Activity>>()
        .iter(world)
        .collect()
}

fn run_tick_hook(
    world: &mut World,
    entity: Entity,
    hook: fn(&ActivityHooks) -> Option<ListenerId<ActivityTick>>,
    delta: Duration,
) {
    if let Some(id) = world.get::<ActivityHooks>(entity).and_then(hook) {
        run_listener(world, id, ActivityTick { activity: entity, delta });
    }
}

fn is_ticking(world: &World, entity: Entity) -> bool {
    world.get::<Activity>(entity).is_some_and(Activity::is_active) && can_process(world, entity)
}

/// 固定帧
///
/// Fixed tick
/// # 作用\Effect
/// * 先让待命的活动组件检测开始条件
/// - Standing-by activity components test their start conditions first
/// * 再为进行中的活动累加时长, 调用钩子, 并让活动组件检测结束条件
/// - Then active activities accumulate time, run their hook, and components test their finish conditions
pub fn process_fixed_tick(world: &mut World, delta: Duration) {
    if is_design_time(world) {
        return;
    }
    let entities = activity_entities(world);
    for &entity in &entities {
        activity_component::try_strategy_start(world, entity, delta);
    }
    for entity in entities {
        run_tick_hook(world, entity, |h| h.physics_process_always, delta);
        if !is_ticking(world, entity) {
            continue;
        }
        if let Some(mut activity) = world.get_mut::<Activity>(entity) {
            activity.active_time += delta;
        }
        run_tick_hook(world, entity, |h| h.physics_process, delta);
        activity_component::try_strategy_finish(world, entity, delta);
    }
}

/// 可变帧
///
/// Variable tick, runs every `process_always` hook and the `process` hook of every active activity
pub fn process_variable_tick(world: &mut World, delta: Duration) {
    if is_design_time(world) {
        return;
    }
    for entity in activity_entities(world) {
        run_tick_hook(world, entity, |h| h.process_always, delta);
        if is_ticking(world, entity) {
            run_tick_hook(world, entity, |h| h.process, delta);
        }
    }
}

pub fn activity_fixed_tick(world: &mut World) {
    let delta = world
        .get_resource::<Time>()
        .map(Time::delta)
        .unwrap_or_default();
    process_fixed_tick(world, delta);
}

pub fn activity_variable_tick(world: &mut World) {
    let delta = world
        .get_resource::<Time>()
        .map(Time::delta)
        .unwrap_or_default();
    process_variable_tick(world, delta);
}

/// 通过命令操作活动
///
/// Fire-and-forget activity commands, failures are logged
pub trait ActivityCommandsExt {
    fn start_activity(&mut self, mode: impl Into<String>, argument: Payload) -> &mut Self;

    fn finish_activity(&mut self, reason: impl Into<String>, details: Payload) -> &mut Self;
}

impl ActivityCommandsExt for EntityCommands<'_> {
    fn start_activity(&mut self, mode: impl Into<String>, argument: Payload) -> &mut Self {
        let entity = self.id();
        let mode = mode.into();
        self.commands().queue(move |world: &mut World| {
            if let Err(e) = world.start_activity(entity, mode, argument) {
                warn!("Failed to start activity: {}", e);
            }
        });
        self
    }

    fn finish_activity(&mut self, reason: impl Into<String>, details: Payload) -> &mut Self {
        let entity = self.id();
        let reason = reason.into();
        self.commands().queue(move |world: &mut World| {
            if let Err(e) = world.finish_activity(entity, reason, details) {
                warn!("Failed to finish activity: {}", e);
            }
        });
        self
    }
}
