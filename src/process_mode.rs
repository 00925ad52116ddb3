use bevy::prelude::*;

/// 处理模式
///
/// Decides whether an entity is ticked, the same way a scene node is.
#[derive(Component, Debug, Default, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ProcessMode {
    /// 跟随父实体, 没有父实体时等同于 [`ProcessMode::Pausable`]
    #[default]
    Inherit,
    /// 全局暂停时停止
    Pausable,
    /// 仅在全局暂停时处理
    WhenPaused,
    /// 总是处理
    Always,
    /// 从不处理
    Disabled,
}

/// 全局暂停
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq, Deref, DerefMut)]
pub struct GlobalPause(pub bool);

/// 设计时 (编辑器) 模式, 为真时不运行任何逐帧逻辑
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq, Deref, DerefMut)]
pub struct DesignTime(pub bool);

pub fn is_paused(world: &World) -> bool {
    world.get_resource::<GlobalPause>().is_some_and(|p| p.0)
}

pub fn is_design_time(world: &World) -> bool {
    world.get_resource::<DesignTime>().is_some_and(|d| d.0)
}

/// 实体当前是否会被处理
///
/// Whether the entity would be ticked right now.
pub fn can_process(world: &World, entity: Entity) -> bool {
    let paused = is_paused(world);
    let mut current = entity;
    loop {
        let mode = world.get::<ProcessMode>(current).copied().unwrap_or_default();
        match mode {
            ProcessMode::Inherit => {}
            other => return mode_allows(other, paused),
        }
        match world.get::<ChildOf>(current) {
            Some(child_of) => current = child_of.parent(),
            None => return !paused,
        }
    }
}

/// 按给定模式判断是否会被处理, `Inherit` 交由父实体决定
///
/// Whether an entity set to `mode` would be ticked, `Inherit` defers to the parent.
pub fn would_process(world: &World, entity: Entity, mode: ProcessMode) -> bool {
    match mode {
        ProcessMode::Inherit => match world.get::<ChildOf>(entity) {
            Some(child_of) => can_process(world, child_of.parent()),
            None => !is_paused(world),
        },
        other => mode_allows(other, is_paused(world)),
    }
}

fn mode_allows(mode: ProcessMode, paused: bool) -> bool {
    match mode {
        ProcessMode::Always => true,
        ProcessMode::Pausable => !paused,
        ProcessMode::WhenPaused => paused,
        ProcessMode::Disabled => false,
        ProcessMode::Inherit => !paused,
    }
}
