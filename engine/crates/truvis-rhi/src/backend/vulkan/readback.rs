use ash::vk;

use crate::backend::vulkan::VulkanRhi;
use crate::backend::vulkan::buffer::HostBuffer;
use crate::desc::TextureFormat;
use crate::resource_update::{ReadbackCallback, ReadbackData};

/// 已经录制了拷贝命令、等待 GPU 完成的回读
pub(crate) struct ActiveReadback {
    pub buffer: HostBuffer,
    pub size: usize,
    pub format: Option<TextureFormat>,
    pub width: u32,
    pub height: u32,
    pub callback: ReadbackCallback,
}

impl ActiveReadback {
    /// 把读到的数据交给回调，map 失败时回调收到空数据
    fn deliver(
        callback: ReadbackCallback,
        mapped: Result<Vec<u8>, vk::Result>,
        format: Option<TextureFormat>,
        width: u32,
        height: u32,
    ) {
        let data = mapped.unwrap_or_else(|e| {
            log::error!("failed to map readback buffer: {:?}", e);
            Vec::new()
        });
        callback(ReadbackData {
            data,
            format,
            width,
            height,
        });
    }
}

impl VulkanRhi {
    /// 读取已完成的回读并执行回调，回调按请求顺序执行
    ///
    /// `forced` 只能在 GPU 空闲之后使用
    pub(super) fn finish_active_readbacks(&mut self, forced: bool) {
        let _span = tracy_client::span!("finish_active_readbacks");
        let current_slot = self.current_frame_slot;
        let ctx = &self.ctx;
        self.active_readbacks.drain(forced, current_slot, |readback| {
            let ActiveReadback {
                mut buffer,
                size,
                format,
                width,
                height,
                callback,
            } = readback;
            let mapped = buffer.read(ctx, size);
            buffer.destroy(ctx);
            ActiveReadback::deliver(callback, mapped, format, width, height);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use ash::vk;

    use crate::backend::vulkan::readback::ActiveReadback;
    use crate::backend::vulkan::release_queue::DeferredQueue;
    use crate::desc::TextureFormat;
    use crate::resource_update::{ReadbackCallback, ReadbackData};

    fn callback(log: &Rc<RefCell<Vec<u8>>>, tag: u8) -> ReadbackCallback {
        let log = log.clone();
        Box::new(move |data: ReadbackData| {
            assert_eq!(data.data, vec![tag]);
            log.borrow_mut().push(tag);
        })
    }

    fn drain(queue: &mut DeferredQueue<(u8, ReadbackCallback)>, forced: bool, slot: usize) {
        queue.drain(forced, slot, |(tag, callback)| {
            callback(ReadbackData {
                data: vec![tag],
                ..Default::default()
            })
        });
    }

    #[test]
    fn test_callback_waits_for_its_slot() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        queue.release((1, callback(&log, 1)), Some(0));
        queue.release((2, callback(&log, 2)), Some(1));

        // 提交之后、slot 0 再次开始之前，回调都不能执行
        drain(&mut queue, false, 1);
        assert_eq!(*log.borrow(), vec![2]);
        drain(&mut queue, false, 0);
        assert_eq!(*log.borrow(), vec![2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_forced_drain_runs_callbacks_in_request_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeferredQueue::new();
        for (tag, slot) in [(3, 1), (4, 0), (5, 1)] {
            queue.release((tag, callback(&log, tag)), Some(slot));
        }
        drain(&mut queue, true, 0);
        assert_eq!(*log.borrow(), vec![3, 4, 5]);
    }

    #[test]
    fn test_deliver_passes_mapped_data_and_size() {
        let received = Rc::new(RefCell::new(None));
        let sink = received.clone();
        let callback: ReadbackCallback = Box::new(move |data: ReadbackData| *sink.borrow_mut() = Some(data));
        ActiveReadback::deliver(callback, Ok(vec![1, 2, 3, 4]), Some(TextureFormat::Rgba8), 1, 1);

        let data = received.borrow_mut().take().unwrap();
        assert_eq!(data.data, vec![1, 2, 3, 4]);
        assert_eq!(data.format, Some(TextureFormat::Rgba8));
        assert_eq!((data.width, data.height), (1, 1));
    }

    #[test]
    fn test_map_failure_still_runs_callback_with_empty_data() {
        let received = Rc::new(RefCell::new(None));
        let sink = received.clone();
        let callback: ReadbackCallback = Box::new(move |data: ReadbackData| *sink.borrow_mut() = Some(data));
        ActiveReadback::deliver(callback, Err(vk::Result::ERROR_MEMORY_MAP_FAILED), None, 0, 0);

        let data = received.borrow_mut().take().unwrap();
        assert!(data.data.is_empty());
        assert_eq!(data.format, None);
    }
}
