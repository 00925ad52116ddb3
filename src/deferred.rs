use std::collections::VecDeque;

use bevy::prelude::*;

pub type DeferredCall = Box<dyn FnOnce(&mut World) + Send + Sync + 'static>;

/// 延迟调用队列
///
/// Deferred Call Queue
/// # 作用\Effect
/// * 收集当前帧安排的调用, 在调度结束时按先进先出顺序执行
/// - Collects calls scheduled during a frame and runs them in FIFO order when drained
/// * 执行期间新安排的调用会留到下一次执行
/// - Calls scheduled while draining wait for the next drain
#[derive(Resource, Default)]
pub struct DeferredCalls {
    queue: VecDeque<DeferredCall>,
}

impl DeferredCalls {
    pub fn push(&mut self, call: DeferredCall) {
        self.queue.push_back(call);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl std::fmt::Debug for DeferredCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeferredCalls[{}]", self.queue.len())
    }
}

pub trait CallDeferred {
    /// 安排一个在下一次延迟执行时运行的调用
    ///
    /// Schedule a call for the next deferred drain
    fn call_deferred(&mut self, call: impl FnOnce(&mut World) + Send + Sync + 'static);
}

impl CallDeferred for World {
    fn call_deferred(&mut self, call: impl FnOnce(&mut World) + Send + Sync + 'static) {
        self.get_resource_or_init::<DeferredCalls>()
            .push(Box::new(call));
    }
}

/// 执行所有已安排的延迟调用
///
/// Drains the calls scheduled so far.
pub fn run_deferred_calls(world: &mut World) {
    let Some(mut deferred) = world.get_resource_mut::<DeferredCalls>() else {
        return;
    };
    if deferred.is_empty() {
        return;
    }
    let calls = std::mem::take(&mut deferred.queue);
    trace!("Running {} deferred calls", calls.len());
    for call in calls {
        call(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Resource, Default)]
    struct Order(Vec<u32>);

    #[test]
    fn test_deferred_fifo_and_next_drain() {
        let mut world = World::new();
        world.init_resource::<Order>();

        world.call_deferred(|world| world.resource_mut::<Order>().0.push(1));
        world.call_deferred(|world| {
            world.resource_mut::<Order>().0.push(2);
            world.call_deferred(|world| world.resource_mut::<Order>().0.push(4));
        });
        world.call_deferred(|world| world.resource_mut::<Order>().0.push(3));

        assert!(world.resource::<Order>().0.is_empty());

        run_deferred_calls(&mut world);
        assert_eq!(world.resource::<Order>().0, vec![1, 2, 3]);
        assert_eq!(world.resource::<DeferredCalls>().len(), 1);

        run_deferred_calls(&mut world);
        assert_eq!(world.resource::<Order>().0, vec![1, 2, 3, 4]);
        assert!(world.resource::<DeferredCalls>().is_empty());
    }
}
