use std::collections::VecDeque;

/// 状态历史记录
///
/// Bounded history of exited states, the most recent one last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHistory<T> {
    history: VecDeque<T>,
    max_size: usize,
}

impl<T> StateHistory<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// 推送一个状态到历史记录中, 超出容量时丢弃最旧的记录
    pub fn push(&mut self, state: T) {
        if self.max_size == 0 {
            return;
        }
        if self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(state);
    }

    /// 最近一次退出的状态
    pub fn last(&self) -> Option<&T> {
        self.history.back()
    }

    /// 获取指定索引的历史状态 (0是最近的状态，1是更早的状态，等等)
    pub fn get_at(&self, index: usize) -> Option<&T> {
        self.history.iter().rev().nth(index)
    }

    /// 从旧到新遍历
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl<T> Default for StateHistory<T> {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = StateHistory::new(3);
        for state in ["idle", "walk", "run", "jump"] {
            history.push(state);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.last(), Some(&"jump"));
        assert_eq!(history.get_at(2), Some(&"walk"));
        assert_eq!(history.get_at(3), None);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec!["walk", "run", "jump"]);

        let mut disabled = StateHistory::new(0);
        disabled.push(1);
        assert!(disabled.is_empty());
        assert_eq!(StateHistory::<u8>::default().max_size(), 10);
    }
}
