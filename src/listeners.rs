use std::fmt::Debug;

use bevy::{ecs::system::SystemId, prelude::*};
use smallvec::SmallVec;

/// 监听者的系统ID
///
/// Listener system ID, receives a clone of the event as input
pub type ListenerId<E> = SystemId<In<E>>;

/// 监听者
///
/// Listener
/// * `System`: 注册的一次性系统
/// - `System`: a registered one-shot system
/// * `Relay`: 转发给另一个实体 (例如子活动组件)
/// - `Relay`: forwarded to another entity (e.g. a child activity component)
pub enum Listener<E: 'static> {
    System(ListenerId<E>),
    Relay(Entity),
}

impl<E: 'static> Clone for Listener<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: 'static> Copy for Listener<E> {}

impl<E: 'static> PartialEq for Listener<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::System(a), Self::System(b)) => a == b,
            (Self::Relay(a), Self::Relay(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: 'static> Eq for Listener<E> {}

impl<E: 'static> Debug for Listener<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System(id) => write!(f, "System({:?})", id.entity()),
            Self::Relay(entity) => write!(f, "Relay({})", entity),
        }
    }
}

/// 有序的监听者集合
///
/// Ordered listener set
/// # 作用\Effect
/// * 按注册顺序同步调用
/// - Invoked synchronously in registration order
/// * 一个监听者运行失败只会记录警告, 不会影响其余监听者
/// - A failing listener is logged and the remaining listeners still run
pub struct Listeners<E: 'static>(SmallVec<[Listener<E>; 4]>);

impl<E: 'static> Default for Listeners<E> {
    fn default() -> Self {
        Self(SmallVec::new())
    }
}

impl<E: 'static> Clone for Listeners<E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<E: 'static> Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl<E: Clone + Send + Sync + 'static> Listeners<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加一个监听系统
    ///
    /// Add a listener system
    pub fn add(&mut self, id: ListenerId<E>) {
        self.0.push(Listener::System(id));
    }

    /// 移除一个监听系统
    ///
    /// Remove a listener system, returns whether it was registered
    pub fn remove(&mut self, id: ListenerId<E>) -> bool {
        self.remove_listener(Listener::System(id))
    }

    pub(crate) fn add_relay(&mut self, entity: Entity) {
        self.0.push(Listener::Relay(entity));
    }

    pub(crate) fn remove_relay(&mut self, entity: Entity) -> bool {
        self.remove_listener(Listener::Relay(entity))
    }

    fn remove_listener(&mut self, listener: Listener<E>) -> bool {
        let Some(index) = self.0.iter().position(|l| *l == listener) else {
            return false;
        };
        self.0.remove(index);
        true
    }

    pub fn contains(&self, id: ListenerId<E>) -> bool {
        self.0.contains(&Listener::System(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Listener<E>> {
        self.0.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 依次调用所有监听者, 转发监听者交给 `relay` 处理
    ///
    /// Invoke every listener in order, relays are handed to `relay`
    pub fn trigger_with(
        &self,
        world: &mut World,
        event: &E,
        mut relay: impl FnMut(&mut World, Entity, &E),
    ) {
        for listener in self.0.iter() {
            match *listener {
                Listener::System(id) => run_listener(world, id, event.clone()),
                Listener::Relay(entity) => relay(world, entity, event),
            }
        }
    }

    /// 依次调用所有监听系统
    ///
    /// Invoke every listener system in order
    pub fn trigger(&self, world: &mut World, event: &E) {
        self.trigger_with(world, event, |_, _, _| {});
    }
}

/// 运行一个监听或钩子系统, 失败时记录警告
pub(crate) fn run_listener<E: Send + Sync + 'static>(
    world: &mut World,
    id: ListenerId<E>,
    event: E,
) {
    if let Err(e) = world.run_system_with(id, event) {
        warn!("Error running listener system {:?}: {:?}", id.entity(), e);
    }
}
