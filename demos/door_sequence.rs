use std::time::Duration;

use bevy::{log::LogPlugin, prelude::*, time::TimeUpdateStrategy};
use bevy_activity::prelude::*;

#[derive(Resource)]
struct Door {
    machine: Entity,
    closed: Entity,
    opening: Entity,
    open: Entity,
}

fn state_name(world: &World, state: Entity) -> String {
    world
        .get::<Name>(state)
        .map(|name| name.to_string())
        .unwrap_or_else(|| state.to_string())
}

fn enter_state(In(transition): In<Transition<Entity>>, world: &mut World) {
    let Some(state) = transition.enter_state else {
        return;
    };
    info!("Door enters `{}`", state_name(world, state));
    if let Err(e) = world.start_activity(state, "Door.EnterState", transition.data.clone()) {
        warn!("{}", e);
    }
}

fn exit_state(In(transition): In<Transition<Entity>>, world: &mut World) {
    let Some(state) = transition.exit_state else {
        return;
    };
    if let Err(e) = world.finish_activity(state, "Door.ExitState", Payload::none()) {
        warn!("{}", e);
    }
}

fn motor_tick(In(tick): In<ActivityTick>, query: Query<&Activity>) {
    if let Ok(activity) = query.get(tick.activity) {
        debug!("Motor running for {:?}", activity.active_time());
    }
}

fn motor_finished(In(event): In<ActivityFinished>, world: &mut World) {
    if !event.reason.starts_with("ActivityComponent.FinishStrategy") {
        return;
    }
    let (machine, open) = {
        let door = world.resource::<Door>();
        (door.machine, door.open)
    };
    if let Err(e) = world.transition_to(machine, open) {
        warn!("{}", e);
    }
}

fn announce(In(message): In<BusMessage>) {
    info!("Message #{} `{}`", message.id(), message.topic);
}

fn door_opened(In(transition): In<Transition<Entity>>, world: &mut World) {
    if transition.enter_state == Some(world.resource::<Door>().open) {
        world.publish(BusMessage::new("door.opened", Payload::none()));
    }
}

fn setup(world: &mut World) {
    let on_enter = world.register_system(enter_state);
    let on_exit = world.register_system(exit_state);
    let hooks = StateHooks {
        on_enter: Some(on_enter),
        on_exit: Some(on_exit),
        ..default()
    };

    let closed = world.spawn((Name::new("closed"), Activity::default(), hooks)).id();
    let opening = world.spawn((Name::new("opening"), Activity::default(), hooks)).id();
    let open = world.spawn((Name::new("open"), Activity::default(), hooks)).id();

    let physics_process = world.register_system(motor_tick);
    let finished = world.register_system(motor_finished);
    world.spawn((
        Name::new("motor"),
        ActivityComponent::default()
            .with_finish_strategy(TimingStrategy::after(Duration::from_millis(1000))),
        ActivityHooks {
            physics_process: Some(physics_process),
            finished: Some(finished),
            ..default()
        },
        ChildOf(opening),
    ));

    let completed = world.register_system(door_opened);
    let mut state_machine = StateMachine::<Entity>::new();
    state_machine.listeners.completed.add(completed);
    let machine = world.spawn((Name::new("door"), state_machine)).id();

    let published = world.register_system(announce);
    world
        .resource_mut::<MessageBus>()
        .message_published
        .add(published);

    world.insert_resource(Door {
        machine,
        closed,
        opening,
        open,
    });
}

fn main() {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default(), ActivityPlugin::default()))
        .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(50)));
    app.finish();
    app.cleanup();

    let world = app.world_mut();
    setup(world);
    let door = world.resource::<Door>();
    let (machine, closed, opening) = (door.machine, door.closed, door.opening);
    if let Err(e) = world.transition_to(machine, closed) {
        error!("{}", e);
        return;
    }

    for frame in 0..40 {
        if frame == 4
            && let Err(e) = app.world_mut().transition_to(machine, opening)
        {
            error!("{}", e);
        }
        app.update();
    }

    let world = app.world();
    let active = world
        .get::<StateMachine<Entity>>(machine)
        .and_then(|state_machine| state_machine.active_state().copied());
    info!(
        "Door ended in `{}`",
        active.map_or_else(|| "none".to_string(), |state| state_name(world, state))
    );
}
