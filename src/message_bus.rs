use bevy::{ecs::system::SystemId, prelude::*};

use crate::{
    cancellation::CancellationController, deferred::CallDeferred, listeners::Listeners,
    payload::Payload,
};

/// 命令的执行系统
pub type CommandEffect = SystemId<In<BusMessage>>;

/// 命令
///
/// Command part of a [`BusMessage`]
#[derive(Debug, Clone)]
pub struct BusCommand {
    pub effect: Option<CommandEffect>,
    pub controller: CancellationController,
}

/// 消息
///
/// Message published on the [`MessageBus`]
#[derive(Debug, Clone)]
pub struct BusMessage {
    id: u64,
    pub topic: String,
    pub payload: Payload,
    pub command: Option<BusCommand>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: 0,
            topic: topic.into(),
            payload,
            command: None,
        }
    }

    /// 命令消息, `before_command_published`的监听者可以取消它
    ///
    /// Command message, listeners of `before_command_published` may cancel it
    pub fn command(topic: impl Into<String>, payload: Payload, effect: Option<CommandEffect>) -> Self {
        Self {
            command: Some(BusCommand {
                effect,
                controller: CancellationController::new(),
            }),
            ..Self::new(topic, payload)
        }
    }

    /// 发布时分配的编号, 未发布时为0
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_command(&self) -> bool {
        self.command.is_some()
    }

    pub fn controller(&self) -> Option<&CancellationController> {
        self.command.as_ref().map(|command| &command.controller)
    }
}

/// 消息总线
///
/// Message bus
/// # 作用\Effect
/// * 所有分发都是延迟的, 按发布顺序进行
/// - Every dispatch is deferred and happens in publish order
/// * 命令消息: `before_command_published` -> `command_published` -> 执行`effect`
/// - Command messages: `before_command_published` -> `command_published` -> run `effect`
#[derive(Resource, Debug, Default)]
pub struct MessageBus {
    /// 记录每条发布的消息
    pub debug: bool,
    next_id: u64,
    pub message_published: Listeners<BusMessage>,
    pub before_command_published: Listeners<BusMessage>,
    pub command_published: Listeners<BusMessage>,
}

impl MessageBus {
    /// 已发布的消息数量
    pub fn published(&self) -> u64 {
        self.next_id
    }
}

pub trait MessageBusWorldExt {
    /// 发布消息, 返回分配了编号的消息
    ///
    /// Publish a message, returns it with its id assigned
    fn publish(&mut self, message: BusMessage) -> BusMessage;
}

impl MessageBusWorldExt for World {
    fn publish(&mut self, mut message: BusMessage) -> BusMessage {
        let mut bus = self.get_resource_or_init::<MessageBus>();
        bus.next_id += 1;
        message.id = bus.next_id;
        if bus.debug {
            info!("MessageBus published #{} `{}`: {:?}", message.id, message.topic, message.payload);
        }

        let published = message.clone();
        self.call_deferred(move |world| {
            let listeners = world
                .get_resource::<MessageBus>()
                .map(|bus| bus.message_published.clone())
                .unwrap_or_default();
            listeners.trigger(world, &published);
        });

        if message.is_command() {
            let command = message.clone();
            self.call_deferred(move |world| run_command(world, command));
        }
        message
    }
}

fn run_command(world: &mut World, message: BusMessage) {
    let Some(command) = message.command.clone() else {
        return;
    };
    let Some(bus) = world.get_resource::<MessageBus>() else {
        return;
    };
    let before = bus.before_command_published.clone();
    before.trigger(world, &message);
    if command.controller.is_cancelled() {
        debug!("MessageBus command #{} `{}` cancelled", message.id, message.topic);
        return;
    }

    world.call_deferred(move |world| {
        let listeners = world
            .get_resource::<MessageBus>()
            .map(|bus| bus.command_published.clone())
            .unwrap_or_default();
        listeners.trigger(world, &message);
        if let Some(effect) = command.effect
            && let Err(e) = world.run_system_with(effect, message.clone())
        {
            warn!("MessageBus command #{} `{}` failed: {}", message.id, message.topic, e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::run_deferred_calls;

    #[derive(Resource, Default)]
    struct Log(Vec<String>);

    fn published(In(message): In<BusMessage>, mut log: ResMut<Log>) {
        log.0.push(format!("published:{}", message.id()));
    }

    fn before_command(In(message): In<BusMessage>, mut log: ResMut<Log>) {
        log.0.push(format!("before:{}", message.id()));
        if message.topic == "forbidden"
            && let Some(controller) = message.controller()
        {
            controller.cancel();
        }
    }

    fn command_published(In(message): In<BusMessage>, mut log: ResMut<Log>) {
        log.0.push(format!("command:{}", message.id()));
    }

    fn effect(In(message): In<BusMessage>, mut log: ResMut<Log>) {
        let value = message.payload.downcast_ref::<u32>().copied().unwrap_or_default();
        log.0.push(format!("effect:{}", value));
    }

    fn setup() -> (World, CommandEffect) {
        let mut world = World::new();
        world.init_resource::<Log>();
        let ids = (
            world.register_system(published),
            world.register_system(before_command),
            world.register_system(command_published),
            world.register_system(effect),
        );
        let mut bus = MessageBus::default();
        bus.message_published.add(ids.0);
        bus.before_command_published.add(ids.1);
        bus.command_published.add(ids.2);
        world.insert_resource(bus);
        (world, ids.3)
    }

    #[test]
    fn test_messages_are_deferred_and_ordered() {
        let (mut world, _) = setup();
        let first = world.publish(BusMessage::new("door", Payload::none()));
        let second = world.publish(BusMessage::new("door", Payload::none()));
        assert_eq!((first.id(), second.id()), (1, 2));
        assert!(world.resource::<Log>().0.is_empty());

        run_deferred_calls(&mut world);
        assert_eq!(world.resource::<Log>().0, vec!["published:1", "published:2"]);
        assert_eq!(world.resource::<MessageBus>().published(), 2);
    }

    #[test]
    fn test_command_phases() {
        let (mut world, effect) = setup();
        world.publish(BusMessage::command("open", Payload::new(7_u32), Some(effect)));

        run_deferred_calls(&mut world);
        assert_eq!(world.resource::<Log>().0, vec!["published:1", "before:1"]);

        run_deferred_calls(&mut world);
        assert_eq!(
            world.resource::<Log>().0,
            vec!["published:1", "before:1", "command:1", "effect:7"]
        );
    }

    #[test]
    fn test_cancelled_command_is_not_executed() {
        let (mut world, effect) = setup();
        let message = world.publish(BusMessage::command("forbidden", Payload::new(1_u32), Some(effect)));

        run_deferred_calls(&mut world);
        run_deferred_calls(&mut world);
        assert_eq!(world.resource::<Log>().0, vec!["published:1", "before:1"]);
        assert!(message.controller().is_some_and(CancellationController::is_cancelled));
    }
}
