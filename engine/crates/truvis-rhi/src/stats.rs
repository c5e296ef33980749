use std::time::Duration;

/// 只读的统计快照，用于诊断
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RhiStats {
    pub block_count: u32,
    pub allocation_count: u32,
    pub used_bytes: u64,
    pub unused_bytes: u64,
    /// 累计的 pipeline 创建耗时
    pub total_pipeline_creation_time: Duration,
}

impl std::fmt::Display for RhiStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "blocks: {}, allocations: {}, used: {} KiB, unused: {} KiB, pipeline creation: {:.3} ms",
            self.block_count,
            self.allocation_count,
            self.used_bytes / 1024,
            self.unused_bytes / 1024,
            self.total_pipeline_creation_time.as_secs_f64() * 1000.0
        )
    }
}
