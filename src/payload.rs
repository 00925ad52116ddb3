use std::{
    any::{Any, type_name},
    fmt::Debug,
    sync::Arc,
};

/// 不透明的负载
///
/// Opaque value carried by lifecycle events, transitions and messages.
///
/// Cloning only bumps a reference count, so a payload can be handed to every
/// listener of an event.
#[derive(Clone, Default)]
pub struct Payload {
    value: Option<Arc<dyn Any + Send + Sync>>,
    type_name: &'static str,
}

impl Payload {
    pub const fn none() -> Self {
        Self {
            value: None,
            type_name: "",
        }
    }

    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Arc::new(value)),
            type_name: type_name::<T>(),
        }
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.value.is_none()
    }

    #[inline]
    pub fn is_some(&self) -> bool {
        self.value.is_some()
    }

    /// 获取负载的值
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref::<T>()
    }

    /// 两个负载是否指向同一个值
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.value, &other.value) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Some(_) => write!(f, "Payload<{}>", self.type_name),
            None => write!(f, "Payload(None)"),
        }
    }
}
