//! # Bevy Activity
//!
//! 一个基于 Bevy 引擎的活动生命周期系统。
//!
//! ## 功能特性
//!
//! - 活动的开始和结束分为可取消的"将要"阶段和延迟通知的"已经"阶段
//! - 活动组件跟随父活动的生命周期, 由时机策略决定何时开始和结束
//! - 通用的状态机, 转换是延迟执行并且可以取消的
//! - 消息总线, 命令消息可以在发布前取消
//! -------------------------------------------------------
//! # Bevy Activity
//!
//! An activity lifecycle system for the Bevy engine.
//!
//! ## Features
//!
//! - Starting and finishing an activity goes through a cancellable "will" phase and a deferred "did" notification
//! - Activity components follow their parent activity, timing strategies decide when they start and finish
//! - A generic state machine with deferred, cancellable transitions
//! - A message bus whose command messages can be cancelled before they are published

pub mod activity;
pub mod activity_component;
pub mod cancellation;
pub mod deferred;
pub mod error;
#[cfg(feature = "state_machine")]
pub mod history;
pub mod listeners;
#[cfg(feature = "message_bus")]
pub mod message_bus;
pub mod payload;
pub mod process_mode;
pub mod state_condition;
#[cfg(feature = "state_machine")]
pub mod state_machine;
pub mod timing_strategy;

use bevy::{
    ecs::schedule::{InternedScheduleLabel, ScheduleLabel},
    prelude::*,
};

use crate::{
    activity::{activity_fixed_tick, activity_variable_tick},
    activity_component::{track_parent_on_insert, track_parent_on_replace},
    deferred::{DeferredCalls, run_deferred_calls},
    process_mode::{DesignTime, GlobalPause},
    state_condition::ActivityConditions,
};

/// 活动插件
///
/// Activity plugin
/// # 作用\Effect
/// * `variable_schedule`: 每帧的`process`钩子
/// - `variable_schedule`: runs the per frame `process` hooks
/// * `fixed_schedule`: 时机策略, 活动时间和`physics_process`钩子
/// - `fixed_schedule`: timing strategies, active time and `physics_process` hooks
/// * `deferred_schedule`: 执行延迟调用
/// - `deferred_schedule`: drains the deferred calls
/// * `design_time`: 为真时不会处理固定更新
/// - `design_time`: when set, fixed ticks are skipped
#[derive(Debug, Clone)]
pub struct ActivityPlugin {
    pub variable_schedule: InternedScheduleLabel,
    pub fixed_schedule: InternedScheduleLabel,
    pub deferred_schedule: InternedScheduleLabel,
    pub design_time: bool,
}

impl Default for ActivityPlugin {
    fn default() -> Self {
        Self {
            variable_schedule: Update.intern(),
            fixed_schedule: FixedUpdate.intern(),
            deferred_schedule: Last.intern(),
            design_time: false,
        }
    }
}

impl Plugin for ActivityPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DeferredCalls>();
        app.init_resource::<ActivityConditions>();
        app.init_resource::<GlobalPause>();
        app.insert_resource(DesignTime(self.design_time));
        #[cfg(feature = "message_bus")]
        app.init_resource::<message_bus::MessageBus>();

        app.add_observer(track_parent_on_insert);
        app.add_observer(track_parent_on_replace);

        app.add_systems(self.variable_schedule, activity_variable_tick);
        app.add_systems(self.fixed_schedule, activity_fixed_tick);
        app.add_systems(
            self.deferred_schedule,
            run_deferred_calls.run_if(|deferred_calls: Res<DeferredCalls>| !deferred_calls.is_empty()),
        );
    }
}

pub mod prelude {
    pub use crate::{
        ActivityPlugin, activity::*, activity_component::*, cancellation::*, deferred::*,
        error::*, listeners::*, payload::*, process_mode::*, state_condition::*,
        timing_strategy::*,
    };

    #[cfg(feature = "state_machine")]
    pub use crate::{history::*, state_machine::*};

    #[cfg(feature = "message_bus")]
    pub use crate::message_bus::*;
}
