use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bevy::{
    ecs::{lifecycle::HookContext, system::SystemId, world::DeferredWorld},
    prelude::*,
};

use crate::{
    deferred::CallDeferred, error::ActivityError, history::StateHistory, listeners::Listeners,
    payload::Payload, process_mode::ProcessMode,
};

/// 状态机中的状态
///
/// A state a [`StateMachine`] can be in.
///
/// Handler errors are logged and the transition carries on as if the handler
/// had succeeded.
pub trait MachineState: Clone + PartialEq + Debug + Send + Sync + 'static {
    fn enter_state(&self, _world: &mut World, _transition: &Transition<Self>) -> Result {
        Ok(())
    }

    fn exit_state(&self, _world: &mut World, _transition: &Transition<Self>) -> Result {
        Ok(())
    }
}

/// 状态转换
///
/// State transition record
///
/// Clones share the cancellation flag, a listener cancelling its copy cancels
/// the transition.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    id: u64,
    machine: Entity,
    pub exit_state: Option<T>,
    pub enter_state: Option<T>,
    pub data: Payload,
    flags: Arc<TransitionFlags>,
}

#[derive(Debug, Default)]
struct TransitionFlags {
    cancelled: AtomicBool,
    performed: AtomicBool,
}

impl<T> Transition<T> {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 所属的状态机实体
    #[inline]
    pub fn machine(&self) -> Entity {
        self.machine
    }

    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flags.cancelled.load(Ordering::Acquire)
    }

    /// 是否已经开始执行, 执行过的转换由执行者报告结果
    fn is_performed(&self) -> bool {
        self.flags.performed.load(Ordering::Acquire)
    }
}

/// 状态机的监听者
///
/// State machine listeners
/// # 作用\Effect
/// * `before_exit`, `before_enter`: 可以取消转换
/// - `before_exit`, `before_enter`: may cancel the transition
/// * `started`, `stopped`: 参数是状态机实体
/// - `started`, `stopped`: receive the machine entity
#[derive(Debug, Clone)]
pub struct StateMachineListeners<T: MachineState> {
    pub before_exit: Listeners<Transition<T>>,
    pub before_enter: Listeners<Transition<T>>,
    pub canceled: Listeners<Transition<T>>,
    pub completed: Listeners<Transition<T>>,
    pub started: Listeners<Entity>,
    pub stopped: Listeners<Entity>,
}

impl<T: MachineState> Default for StateMachineListeners<T> {
    fn default() -> Self {
        Self {
            before_exit: Listeners::default(),
            before_enter: Listeners::default(),
            canceled: Listeners::default(),
            completed: Listeners::default(),
            started: Listeners::default(),
            stopped: Listeners::default(),
        }
    }
}

/// 状态机
///
/// State machine
/// # 作用\Effect
/// * 转换总是在下一次延迟调用时执行, 不会在请求时同步执行
/// - Transitions run on the next deferred drain, never inside the call that requested them
/// * 新的请求会取消排队中和进行中的转换
/// - A new request cancels both the queued and the ongoing transition
/// * 退出已提交后才取消时, 状态机会停在没有状态的位置
/// - A cancel after the exit committed leaves the machine without an active state
/// * 进入处理中发出新的请求时, 刚进入的状态不会保留
/// - A request made by an enter handler drops the state that was just entered
/// # 示例\Example
/// ```
/// # use bevy::prelude::*;
/// # use bevy_activity::prelude::*;
/// #[derive(Debug, Clone, PartialEq)]
/// enum Door {
///     Closed,
///     Open,
/// }
///
/// impl MachineState for Door {}
///
/// let mut world = World::new();
/// let door = world.spawn(StateMachine::<Door>::new()).id();
/// world.transition_to(door, Door::Closed).unwrap();
/// assert_eq!(world.get::<StateMachine<Door>>(door).unwrap().active_state(), None);
///
/// run_deferred_calls(&mut world);
/// assert_eq!(
///     world.get::<StateMachine<Door>>(door).unwrap().active_state(),
///     Some(&Door::Closed)
/// );
/// ```
#[derive(Component, Debug)]
pub struct StateMachine<T: MachineState> {
    active: Option<T>,
    history: StateHistory<T>,
    last_transition_at: Duration,
    ongoing: Option<Transition<T>>,
    queued: Option<Transition<T>>,
    next_id: u64,
    pub listeners: StateMachineListeners<T>,
}

impl<T: MachineState> Default for StateMachine<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MachineState> StateMachine<T> {
    pub fn new() -> Self {
        Self::with_history(10)
    }

    pub fn with_history(capacity: usize) -> Self {
        Self {
            active: None,
            history: StateHistory::new(capacity),
            last_transition_at: Duration::ZERO,
            ongoing: None,
            queued: None,
            next_id: 0,
            listeners: StateMachineListeners::default(),
        }
    }

    #[inline]
    pub fn active_state(&self) -> Option<&T> {
        self.active.as_ref()
    }

    /// 上一个状态
    #[inline]
    pub fn previous_state(&self) -> Option<&T> {
        self.history.last()
    }

    pub fn history(&self) -> &StateHistory<T> {
        &self.history
    }

    pub fn ongoing_transition(&self) -> Option<&Transition<T>> {
        self.ongoing.as_ref()
    }

    pub fn queued_transition(&self) -> Option<&Transition<T>> {
        self.queued.as_ref()
    }

    /// 是否有转换在排队或进行中
    pub fn is_transitioning(&self) -> bool {
        self.ongoing.is_some() || self.queued.is_some()
    }

    /// 上一次改变状态时的[`Time::elapsed`]
    pub fn last_transition_at(&self) -> Duration {
        self.last_transition_at
    }

    /// 当前状态持续的时长, 没有状态时为空
    pub fn active_state_duration(&self, now: Duration) -> Option<Duration> {
        self.active
            .as_ref()
            .map(|_| now.saturating_sub(self.last_transition_at))
    }
}

fn now(world: &World) -> Duration {
    world
        .get_resource::<Time>()
        .map(Time::elapsed)
        .unwrap_or_default()
}

/// 状态机操作
///
/// State machine operations on the world
pub trait StateMachineWorldExt {
    /// 排队一个转换, 在下一次延迟调用时执行
    ///
    /// Queue a transition that runs on the next deferred drain
    /// # 返回\Returns
    /// 转换记录, 可以用来取消
    ///
    /// The transition record, which can be used to cancel it
    fn queue_transition<T: MachineState>(
        &mut self,
        machine: Entity,
        target: Option<T>,
        data: Payload,
    ) -> Result<Transition<T>, ActivityError>;

    fn transition_to<T: MachineState>(
        &mut self,
        machine: Entity,
        target: T,
    ) -> Result<Transition<T>, ActivityError> {
        self.queue_transition(machine, Some(target), Payload::none())
    }

    /// 排队一个转换到空状态
    ///
    /// Queue a transition to no state
    fn stop_state_machine<T: MachineState>(
        &mut self,
        machine: Entity,
    ) -> Result<Transition<T>, ActivityError> {
        self.queue_transition::<T>(machine, None, Payload::none())
    }

    /// 立即执行排队中的转换, 返回是否有转换被执行
    ///
    /// Run the queued transition now, returns whether there was one
    /// # 错误\Errors
    /// 已有转换进行中时返回[`ActivityError::TransitionAlreadyOngoing`]
    fn perform_transition<T: MachineState>(&mut self, machine: Entity) -> Result<bool, ActivityError>;
}

impl StateMachineWorldExt for World {
    fn queue_transition<T: MachineState>(
        &mut self,
        machine: Entity,
        target: Option<T>,
        data: Payload,
    ) -> Result<Transition<T>, ActivityError> {
        let mut state_machine = self
            .get_mut::<StateMachine<T>>(machine)
            .ok_or(ActivityError::NotAStateMachine(machine))?;
        if let Some(ongoing) = &state_machine.ongoing {
            debug!("StateMachine<{}> ongoing transition {} cancelled", machine, ongoing.id);
            ongoing.cancel();
        }
        if let Some(queued) = state_machine.queued.take() {
            debug!("StateMachine<{}> queued transition {} superseded", machine, queued.id);
            queued.cancel();
        }
        state_machine.next_id += 1;
        let transition = Transition {
            id: state_machine.next_id,
            machine,
            exit_state: state_machine.active.clone(),
            enter_state: target,
            data,
            flags: Arc::default(),
        };
        state_machine.queued = Some(transition.clone());

        let queued = transition.clone();
        self.call_deferred(move |world| run_queued(world, queued));
        Ok(transition)
    }

    fn perform_transition<T: MachineState>(&mut self, machine: Entity) -> Result<bool, ActivityError> {
        let mut state_machine = self
            .get_mut::<StateMachine<T>>(machine)
            .ok_or(ActivityError::NotAStateMachine(machine))?;
        if state_machine.ongoing.is_some() {
            return Err(ActivityError::TransitionAlreadyOngoing(machine));
        }
        let Some(mut transition) = state_machine.queued.take() else {
            return Ok(false);
        };
        // 退出的总是开始执行时的状态
        transition.exit_state = state_machine.active.clone();
        transition.flags.performed.store(true, Ordering::Release);
        state_machine.ongoing = Some(transition.clone());

        let completed = run_transition(self, &transition);
        finish_transition(self, &transition, completed);
        Ok(true)
    }
}

fn run_queued<T: MachineState>(world: &mut World, transition: Transition<T>) {
    let machine = transition.machine;
    if transition.is_performed() {
        return;
    }
    let Some(mut state_machine) = world.get_mut::<StateMachine<T>>(machine) else {
        warn!("StateMachine<{}> removed before transition {} ran", machine, transition.id);
        return;
    };
    let is_queued = state_machine
        .queued
        .as_ref()
        .is_some_and(|queued| queued.id == transition.id);
    if transition.is_cancelled() {
        if is_queued {
            state_machine.queued = None;
        }
        let canceled = state_machine.listeners.canceled.clone();
        canceled.trigger(world, &transition);
        return;
    }
    if !is_queued {
        return;
    }
    if let Err(e) = world.perform_transition::<T>(machine) {
        error!("StateMachine<{}> transition {} failed: {}", machine, transition.id, e);
    }
}

fn listeners<T: MachineState>(
    world: &World,
    machine: Entity,
    select: fn(&StateMachineListeners<T>) -> &Listeners<Transition<T>>,
) -> Listeners<Transition<T>> {
    world
        .get::<StateMachine<T>>(machine)
        .map(|state_machine| select(&state_machine.listeners).clone())
        .unwrap_or_default()
}

/// 执行退出和进入两个阶段, 返回是否完成
fn run_transition<T: MachineState>(world: &mut World, transition: &Transition<T>) -> bool {
    let machine = transition.machine;
    if transition.is_cancelled() {
        return false;
    }

    if let Some(exit_state) = &transition.exit_state {
        listeners(world, machine, |l| &l.before_exit).trigger(world, transition);
        if transition.is_cancelled() {
            return false;
        }
        if let Err(e) = exit_state.exit_state(world, transition) {
            error!("StateMachine<{}> failed to exit {:?}: {}", machine, exit_state, e);
        }
        let now = now(world);
        if let Some(mut state_machine) = world.get_mut::<StateMachine<T>>(machine) {
            if let Some(previous) = state_machine.active.take() {
                state_machine.history.push(previous);
            }
            state_machine.last_transition_at = now;
        }
    }

    if let Some(enter_state) = &transition.enter_state {
        if transition.is_cancelled() {
            return false;
        }
        listeners(world, machine, |l| &l.before_enter).trigger(world, transition);
        if transition.is_cancelled() {
            return false;
        }
        let now = now(world);
        if let Some(mut state_machine) = world.get_mut::<StateMachine<T>>(machine) {
            state_machine.active = Some(enter_state.clone());
            state_machine.last_transition_at = now;
        }
        if let Err(e) = enter_state.enter_state(world, transition) {
            error!("StateMachine<{}> failed to enter {:?}: {}", machine, enter_state, e);
        }
        // 进入时被新的请求取消, 不保留进入的状态
        if transition.is_cancelled() {
            if let Some(mut state_machine) = world.get_mut::<StateMachine<T>>(machine) {
                state_machine.active = None;
            }
            return false;
        }
    }
    true
}

fn finish_transition<T: MachineState>(world: &mut World, transition: &Transition<T>, completed: bool) {
    let machine = transition.machine;
    let Some(mut state_machine) = world.get_mut::<StateMachine<T>>(machine) else {
        return;
    };
    state_machine.ongoing = None;
    let listeners = state_machine.listeners.clone();

    if completed {
        trace!(
            "StateMachine<{}> transition {} completed: {:?} -> {:?}",
            machine, transition.id, transition.exit_state, transition.enter_state
        );
        listeners.completed.trigger(world, transition);
        if transition.exit_state.is_none() && transition.enter_state.is_some() {
            listeners.started.trigger(world, &machine);
        }
    } else {
        debug!("StateMachine<{}> transition {} canceled", machine, transition.id);
        listeners.canceled.trigger(world, transition);
    }

    let stopped = world
        .get::<StateMachine<T>>(machine)
        .is_some_and(|state_machine| state_machine.active.is_none() && state_machine.queued.is_none());
    if stopped {
        listeners.stopped.trigger(world, &machine);
    }
}

/// 状态实体的钩子
///
/// Hooks of an entity used as a state
/// # 作用\Effect
/// * 进入时将状态实体的[`ProcessMode`]设为`Inherit`, 退出时设为`process_mode_while_inactive`
/// - Entering sets the state entity's [`ProcessMode`] to `Inherit`, exiting sets it to `process_mode_while_inactive`
#[derive(Component, Debug, Clone, Copy)]
#[component(on_insert = Self::on_insert)]
pub struct StateHooks {
    pub on_enter: Option<SystemId<In<Transition<Entity>>>>,
    pub on_exit: Option<SystemId<In<Transition<Entity>>>>,
    pub process_mode_while_inactive: ProcessMode,
}

impl Default for StateHooks {
    fn default() -> Self {
        Self {
            on_enter: None,
            on_exit: None,
            process_mode_while_inactive: ProcessMode::Disabled,
        }
    }
}

impl StateHooks {
    fn on_insert(mut world: DeferredWorld, HookContext { entity, .. }: HookContext) {
        if world.get::<ProcessMode>(entity).is_some() {
            return;
        }
        let Some(mode) = world
            .get::<StateHooks>(entity)
            .map(|hooks| hooks.process_mode_while_inactive)
        else {
            return;
        };
        world.commands().entity(entity).insert(mode);
    }
}

fn run_state_hook(
    world: &mut World,
    hook: Option<SystemId<In<Transition<Entity>>>>,
    transition: &Transition<Entity>,
) -> Result<(), ActivityError> {
    let Some(id) = hook else {
        return Ok(());
    };
    world
        .run_system_with(id, transition.clone())
        .map_err(|e| ActivityError::Handler(e.to_string()))
}

fn state_hooks(world: &World, state: Entity) -> Result<StateHooks, ActivityError> {
    if world.get_entity(state).is_err() {
        return Err(ActivityError::Handler(format!("state entity {} does not exist", state)));
    }
    Ok(world.get::<StateHooks>(state).copied().unwrap_or_default())
}

impl MachineState for Entity {
    fn enter_state(&self, world: &mut World, transition: &Transition<Self>) -> Result {
        let hooks = state_hooks(world, *self)?;
        world.entity_mut(*self).insert(ProcessMode::Inherit);
        run_state_hook(world, hooks.on_enter, transition)?;
        Ok(())
    }

    fn exit_state(&self, world: &mut World, transition: &Transition<Self>) -> Result {
        let hooks = state_hooks(world, *self)?;
        let result = run_state_hook(world, hooks.on_exit, transition);
        world
            .entity_mut(*self)
            .insert(hooks.process_mode_while_inactive);
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::run_deferred_calls;

    #[derive(Resource, Default)]
    struct Log(Vec<String>);

    fn push(world: &mut World, entry: String) {
        if let Some(mut log) = world.get_resource_mut::<Log>() {
            log.0.push(entry);
        }
    }

    fn log(world: &World) -> Vec<String> {
        world.resource::<Log>().0.clone()
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Light {
        Red,
        Green,
        Yellow,
        Broken,
        Flashing,
    }

    impl MachineState for Light {
        fn enter_state(&self, world: &mut World, transition: &Transition<Self>) -> Result {
            push(world, format!("enter:{:?}", self));
            match self {
                Light::Broken => return Err("broken bulb".into()),
                Light::Flashing => {
                    world.transition_to(transition.machine(), Light::Red)?;
                }
                _ => {}
            }
            Ok(())
        }

        fn exit_state(&self, world: &mut World, _transition: &Transition<Self>) -> Result {
            push(world, format!("exit:{:?}", self));
            Ok(())
        }
    }

    fn on_canceled(In(transition): In<Transition<Light>>, mut log: ResMut<Log>) {
        log.0.push(format!("canceled:{:?}", transition.enter_state));
    }

    fn on_completed(In(transition): In<Transition<Light>>, mut log: ResMut<Log>) {
        log.0.push(format!("completed:{:?}", transition.enter_state));
    }

    fn on_started(In(_): In<Entity>, mut log: ResMut<Log>) {
        log.0.push("started".to_string());
    }

    fn on_stopped(In(_): In<Entity>, mut log: ResMut<Log>) {
        log.0.push("stopped".to_string());
    }

    fn cancel(In(transition): In<Transition<Light>>) {
        transition.cancel();
    }

    fn setup() -> (World, Entity) {
        let mut world = World::new();
        world.init_resource::<Log>();
        let mut state_machine = StateMachine::<Light>::new();
        let canceled = world.register_system(on_canceled);
        let completed = world.register_system(on_completed);
        let started = world.register_system(on_started);
        let stopped = world.register_system(on_stopped);
        state_machine.listeners.canceled.add(canceled);
        state_machine.listeners.completed.add(completed);
        state_machine.listeners.started.add(started);
        state_machine.listeners.stopped.add(stopped);
        let machine = world.spawn(state_machine).id();
        (world, machine)
    }

    fn machine(world: &World, entity: Entity) -> &StateMachine<Light> {
        world.get::<StateMachine<Light>>(entity).unwrap()
    }

    fn settle(world: &mut World, entity: Entity, state: Light) {
        world.transition_to(entity, state).unwrap();
        run_deferred_calls(world);
        world.resource_mut::<Log>().0.clear();
    }

    #[test]
    fn test_transition_is_deferred() {
        let (mut world, entity) = setup();
        world.transition_to(entity, Light::Red).unwrap();
        assert!(machine(&world, entity).is_transitioning());
        assert_eq!(machine(&world, entity).active_state(), None);
        assert!(log(&world).is_empty());

        run_deferred_calls(&mut world);
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Red));
        assert!(!machine(&world, entity).is_transitioning());
        assert_eq!(log(&world), vec!["enter:Red", "completed:Some(Red)", "started"]);

        world.resource_mut::<Log>().0.clear();
        world.transition_to(entity, Light::Green).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["exit:Red", "enter:Green", "completed:Some(Green)"]);
        assert_eq!(machine(&world, entity).previous_state(), Some(&Light::Red));
    }

    #[test]
    fn test_queued_transition_is_superseded() {
        let (mut world, entity) = setup();
        settle(&mut world, entity, Light::Red);

        let first = world.transition_to(entity, Light::Green).unwrap();
        world.transition_to(entity, Light::Yellow).unwrap();
        assert!(first.is_cancelled());

        run_deferred_calls(&mut world);
        assert_eq!(
            log(&world),
            vec![
                "canceled:Some(Green)",
                "exit:Red",
                "enter:Yellow",
                "completed:Some(Yellow)"
            ]
        );
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Yellow));
    }

    #[test]
    fn test_cancel_before_exit_keeps_state() {
        let (mut world, entity) = setup();
        settle(&mut world, entity, Light::Red);
        let veto = world.register_system(cancel);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_exit
            .add(veto);

        world.transition_to(entity, Light::Green).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["canceled:Some(Green)"]);
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Red));
    }

    #[test]
    fn test_cancel_before_enter_leaves_no_state() {
        let (mut world, entity) = setup();
        settle(&mut world, entity, Light::Red);
        let veto = world.register_system(cancel);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_enter
            .add(veto);

        world.transition_to(entity, Light::Green).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["exit:Red", "canceled:Some(Green)", "stopped"]);
        let state_machine = machine(&world, entity);
        assert_eq!(state_machine.active_state(), None);
        assert_eq!(state_machine.previous_state(), Some(&Light::Red));
    }

    #[test]
    fn test_handler_error_does_not_corrupt_machine() {
        let (mut world, entity) = setup();
        world.transition_to(entity, Light::Broken).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Broken));
        assert!(log(&world).contains(&"completed:Some(Broken)".to_string()));
    }

    #[test]
    fn test_stop_and_duration() {
        let (mut world, entity) = setup();
        let mut time = Time::<()>::default();
        time.advance_by(Duration::from_secs(2));
        world.insert_resource(time);
        settle(&mut world, entity, Light::Red);

        assert_eq!(
            machine(&world, entity).active_state_duration(Duration::from_secs(5)),
            Some(Duration::from_secs(3))
        );

        world.stop_state_machine::<Light>(entity).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["exit:Red", "completed:None", "stopped"]);
        assert_eq!(machine(&world, entity).active_state_duration(Duration::from_secs(5)), None);
    }

    #[derive(Resource, Default)]
    struct Direct(Option<Result<bool, ActivityError>>);

    fn perform_again(In(transition): In<Transition<Light>>, world: &mut World) {
        let result = world.perform_transition::<Light>(transition.machine());
        world.resource_mut::<Direct>().0 = Some(result);
    }

    fn requeue(In(transition): In<Transition<Light>>, world: &mut World) {
        if transition.enter_state == Some(Light::Green) {
            world.transition_to(transition.machine(), Light::Yellow).unwrap();
        }
    }

    #[test]
    fn test_direct_perform_while_ongoing() {
        let (mut world, entity) = setup();
        world.init_resource::<Direct>();
        let id = world.register_system(perform_again);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_enter
            .add(id);

        world.transition_to(entity, Light::Red).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(
            world.resource::<Direct>().0,
            Some(Err(ActivityError::TransitionAlreadyOngoing(entity)))
        );
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Red));
    }

    #[test]
    fn test_request_during_transition_cancels_it() {
        let (mut world, entity) = setup();
        settle(&mut world, entity, Light::Red);
        let id = world.register_system(requeue);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_enter
            .add(id);

        world.transition_to(entity, Light::Green).unwrap();
        run_deferred_calls(&mut world);
        // 退出已提交, 新的转换在下一次执行
        assert_eq!(log(&world), vec!["exit:Red", "canceled:Some(Green)"]);
        assert_eq!(machine(&world, entity).active_state(), None);

        run_deferred_calls(&mut world);
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Yellow));
        assert_eq!(machine(&world, entity).previous_state(), Some(&Light::Red));
    }

    #[test]
    fn test_stopped_fires_without_active_state() {
        let (mut world, entity) = setup();
        world.stop_state_machine::<Light>(entity).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["completed:None", "stopped"]);

        world.resource_mut::<Log>().0.clear();
        let veto = world.register_system(cancel);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_enter
            .add(veto);
        world.transition_to(entity, Light::Red).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["canceled:Some(Red)", "stopped"]);
        assert_eq!(machine(&world, entity).active_state(), None);
    }

    #[test]
    fn test_request_from_enter_handler_cancels_entered_state() {
        let (mut world, entity) = setup();
        settle(&mut world, entity, Light::Green);

        world.transition_to(entity, Light::Flashing).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(
            log(&world),
            vec!["exit:Green", "enter:Flashing", "canceled:Some(Flashing)"]
        );
        assert_eq!(machine(&world, entity).active_state(), None);
        assert_eq!(machine(&world, entity).previous_state(), Some(&Light::Green));

        world.resource_mut::<Log>().0.clear();
        run_deferred_calls(&mut world);
        assert_eq!(log(&world), vec!["enter:Red", "completed:Some(Red)", "started"]);
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Red));
    }

    #[test]
    fn test_performed_transition_reports_cancel_once() {
        let (mut world, entity) = setup();
        let id = world.register_system(requeue);
        world
            .get_mut::<StateMachine<Light>>(entity)
            .unwrap()
            .listeners
            .before_enter
            .add(id);

        world.transition_to(entity, Light::Green).unwrap();
        assert_eq!(world.perform_transition::<Light>(entity), Ok(true));
        assert_eq!(log(&world), vec!["canceled:Some(Green)"]);

        run_deferred_calls(&mut world);
        assert_eq!(
            log(&world),
            vec![
                "canceled:Some(Green)",
                "enter:Yellow",
                "completed:Some(Yellow)",
                "started"
            ]
        );
        assert_eq!(machine(&world, entity).active_state(), Some(&Light::Yellow));
    }

    #[derive(Resource, Default)]
    struct Visits(Vec<(Entity, &'static str)>);

    fn entered(In(transition): In<Transition<Entity>>, mut visits: ResMut<Visits>) {
        if let Some(state) = transition.enter_state {
            visits.0.push((state, "enter"));
        }
    }

    fn exited(In(transition): In<Transition<Entity>>, mut visits: ResMut<Visits>) {
        if let Some(state) = transition.exit_state {
            visits.0.push((state, "exit"));
        }
    }

    #[test]
    fn test_entity_states() {
        let mut world = World::new();
        world.init_resource::<Visits>();
        let on_enter = world.register_system(entered);
        let on_exit = world.register_system(exited);
        let hooks = StateHooks {
            on_enter: Some(on_enter),
            on_exit: Some(on_exit),
            ..default()
        };
        let idle = world.spawn(hooks).id();
        let walk = world.spawn(hooks).id();
        world.flush();
        assert_eq!(world.get::<ProcessMode>(idle), Some(&ProcessMode::Disabled));

        let entity = world.spawn(StateMachine::<Entity>::new()).id();
        world.transition_to(entity, idle).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(world.get::<ProcessMode>(idle), Some(&ProcessMode::Inherit));

        world.transition_to(entity, walk).unwrap();
        run_deferred_calls(&mut world);
        assert_eq!(world.get::<ProcessMode>(idle), Some(&ProcessMode::Disabled));
        assert_eq!(world.get::<ProcessMode>(walk), Some(&ProcessMode::Inherit));
        assert_eq!(
            world.resource::<Visits>().0,
            vec![(idle, "enter"), (idle, "exit"), (walk, "enter")]
        );

        let gone = world.spawn_empty().id();
        world.despawn(gone);
        world.transition_to(entity, gone).unwrap();
        run_deferred_calls(&mut world);
        // 进入失败只会记录错误
        assert_eq!(
            world.get::<StateMachine<Entity>>(entity).unwrap().active_state(),
            Some(&gone)
        );
    }
}
