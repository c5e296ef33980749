//! 按 frame slot 延迟处理的队列
//!
//! 资源 destroy 时原生对象不会立即销毁，而是带着资源最后一次被使用的 frame slot
//! 进入队列；等到这个 slot 再次轮到、并且它上一次提交的命令已经执行完毕（fence 已等待），
//! 才真正销毁。回读请求也用同样的方式等待完成。

/// 队列中的一项
pub(crate) struct Deferred<T> {
    pub item: T,
    /// None 表示从未被已提交的命令引用
    pub last_active_frame_slot: Option<usize>,
}

pub(crate) struct DeferredQueue<T> {
    entries: Vec<Deferred<T>>,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn release(&mut self, item: T, last_active_frame_slot: Option<usize>) {
        self.entries.push(Deferred {
            item,
            last_active_frame_slot,
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deferred<T>> {
        self.entries.iter()
    }

    /// 取出所有可以处理的项，并按入队顺序交给 `f`
    ///
    /// 调用前必须已经等待 `current_slot` 上一次提交的 fence；
    /// `forced` 要求调用前 GPU 已经空闲（queue / device wait idle）。
    pub fn drain(&mut self, forced: bool, current_slot: usize, mut f: impl FnMut(T)) {
        if self.entries.is_empty() {
            return;
        }

        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let ready = forced
                || match entry.last_active_frame_slot {
                    None => true,
                    Some(slot) => slot == current_slot,
                };
            if ready {
                f(entry.item);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum FakeNative {
        Buffer(u64),
        Image(u64),
    }

    #[test]
    fn test_entry_survives_until_matching_slot() {
        let mut queue = DeferredQueue::new();
        queue.release(FakeNative::Buffer(1), Some(1));

        let mut destroyed = Vec::new();
        // slot 0 的 fence 完成，不影响 slot 1 上仍在执行的命令
        queue.drain(false, 0, |item| destroyed.push(item));
        assert!(destroyed.is_empty());
        assert_eq!(queue.len(), 1);

        queue.drain(false, 1, |item| destroyed.push(item));
        assert_eq!(destroyed, vec![FakeNative::Buffer(1)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_never_used_is_released_on_next_drain() {
        let mut queue = DeferredQueue::new();
        queue.release(FakeNative::Image(3), None);

        let mut destroyed = Vec::new();
        queue.drain(false, 1, |item| destroyed.push(item));
        assert_eq!(destroyed, vec![FakeNative::Image(3)]);
    }

    #[test]
    fn test_forced_drain_releases_everything_in_order() {
        let mut queue = DeferredQueue::new();
        queue.release(FakeNative::Buffer(1), Some(0));
        queue.release(FakeNative::Image(2), Some(1));
        queue.release(FakeNative::Buffer(3), Some(2));

        let mut destroyed = Vec::new();
        queue.drain(true, 0, |item| destroyed.push(item));
        assert_eq!(destroyed, vec![FakeNative::Buffer(1), FakeNative::Image(2), FakeNative::Buffer(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_drain_keeps_order_of_remaining() {
        let mut queue = DeferredQueue::new();
        queue.release(1u32, Some(1));
        queue.release(2u32, Some(0));
        queue.release(3u32, Some(1));
        queue.release(4u32, Some(0));

        let mut destroyed = Vec::new();
        queue.drain(false, 0, |item| destroyed.push(item));
        assert_eq!(destroyed, vec![2, 4]);
        assert_eq!(queue.iter().map(|e| e.item).collect::<Vec<_>>(), vec![1, 3]);
    }
}
