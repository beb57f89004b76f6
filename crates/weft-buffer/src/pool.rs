use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;
use tracing::trace;

use crate::{PoolConfig, Result};

/// `BufferPool` 是按 2 的幂分级的字节缓冲池，
/// 专注在**高并发、低延迟**场景下复用 `BytesMut`，以减少堆分配次数。
///
/// # 模块角色（Why）
/// - 作为 [`LinkBuffer`](crate::LinkBuffer) 的内存来源，节点与跨节点读取缓存都从这里租借；
/// - 超大块（容量达到或超过 `malloc_max`）很少被复用，放进池里只会挤占其它级别的缓存，因此直接交给堆分配。
///
/// # 核心机制（How）
/// - 每个尺寸级别维护一条 `spin::Mutex<Vec<BytesMut>>` 自由链表，临界区仅包含 `push`/`pop`；
/// - `malloc` 将容量向上取整到级别大小，命中则复用，未命中则新建；
/// - `free` 只接收容量恰为某级别大小的缓冲，超过 `malloc_max` 的块与非标准容量直接丢弃，交给常规回收；
///   恰为 `malloc_max` 的顶级别只由略小于阈值的申请向上取整得到；
/// - `PoolMetrics` 通过原子计数跟踪分配、命中、旁路等指标，支撑 [`BufferPool::statistics`] 快照。
///
/// # 契约说明（What）
/// - **线程安全**：所有共享状态均由自旋锁与原子计数保护，满足 `Send + Sync + 'static`；
/// - **后置条件**：`malloc(size, capacity)` 返回的缓冲满足 `len() == size` 且 `capacity() >= capacity`；
///   复用块的内容未清零，调用方只能依赖自己写入的字节；
/// - **污染标记**：池本身不感知 readonly / nocopy-read 标记，带标记的节点由调用方拒绝归还（见 `node` 模块）。
///
/// # 设计权衡（Trade-offs）
/// - 每级缓存数量受 `max_cached_per_class` 约束，峰值过后多余的块直接释放，避免常驻内存无限增长；
/// - `shrink_to_fit` 采取“清空全部自由链表”的简单策略，便于在压测后快速归还峰值内存。
pub struct BufferPool {
    config: PoolConfig,
    classes: Box<[Mutex<Vec<BytesMut>>]>,
    metrics: PoolMetrics,
}

/// 池统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 池内新建过、仍被追踪的字节总量。
    pub allocated_bytes: usize,
    /// 自由链表中可立即复用的字节数。
    pub available_bytes: usize,
    /// 仍在外租借的池内缓冲数量。
    pub active_leases: usize,
    /// 自由链表命中次数。
    pub pool_hits: u64,
    /// 自由链表未命中、需要新建的次数。
    pub pool_misses: u64,
    /// 超过阈值而绕过池的分配次数。
    pub bypass_allocations: u64,
    /// 自由链表中的缓冲块数量。
    pub free_slots: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::with_validated(PoolConfig::default())
    }
}

impl BufferPool {
    /// 按配置创建空池；配置未通过 [`PoolConfig::validate`] 时返回错误。
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_validated(config))
    }

    fn with_validated(config: PoolConfig) -> Self {
        let classes = (0..config.class_count())
            .map(|_| Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            config,
            classes,
            metrics: PoolMetrics::default(),
        }
    }

    /// 进程级共享的默认池，供 [`LinkBuffer::new`](crate::LinkBuffer::new) 使用。
    pub fn shared() -> Arc<BufferPool> {
        static SHARED: OnceLock<Arc<BufferPool>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(BufferPool::default())))
    }

    /// 当前生效的配置。
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 租借一块 `len() == size`、容量不小于 `capacity` 的缓冲。
    pub fn malloc(&self, size: usize, capacity: usize) -> BytesMut {
        let capacity = capacity.max(size);
        if capacity >= self.config.malloc_max {
            self.metrics.bypass_allocations.fetch_add(1, Ordering::Relaxed);
            trace!(capacity, "oversized allocation bypasses buffer pool");
            let mut buf = BytesMut::with_capacity(capacity);
            buf.resize(size, 0);
            return buf;
        }

        let (index, class_size) = self.class_for(capacity);
        let reused = self.classes[index].lock().pop();
        let mut buf = match reused {
            Some(buf) => {
                self.metrics.pool_hits.fetch_add(1, Ordering::Relaxed);
                saturating_sub(&self.metrics.available_bytes, class_size);
                buf
            }
            None => {
                self.metrics.pool_misses.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .allocated_bytes
                    .fetch_add(class_size, Ordering::Relaxed);
                BytesMut::zeroed(class_size)
            }
        };
        if buf.len() < size {
            buf.resize(size, 0);
        } else {
            buf.truncate(size);
        }
        self.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        buf
    }

    /// 归还缓冲。超过阈值与非级别容量的缓冲直接丢弃。
    pub fn free(&self, buf: BytesMut) {
        let capacity = buf.capacity();
        if capacity > self.config.malloc_max {
            return;
        }
        let Some(index) = self.exact_class(capacity) else {
            return;
        };
        saturating_sub(&self.metrics.active_leases, 1);
        let mut list = self.classes[index].lock();
        if list.len() >= self.config.max_cached_per_class {
            drop(list);
            saturating_sub(&self.metrics.allocated_bytes, capacity);
            return;
        }
        list.push(buf);
        self.metrics
            .available_bytes
            .fetch_add(capacity, Ordering::Relaxed);
    }

    /// 清空全部自由链表，返回释放的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        let mut reclaimed = 0;
        for class in self.classes.iter() {
            let mut list = class.lock();
            reclaimed += list.iter().map(BytesMut::capacity).sum::<usize>();
            list.clear();
        }
        saturating_sub(&self.metrics.available_bytes, reclaimed);
        saturating_sub(&self.metrics.allocated_bytes, reclaimed);
        reclaimed
    }

    /// 读取统计快照。
    pub fn statistics(&self) -> PoolStats {
        let free_slots = self.classes.iter().map(|class| class.lock().len()).sum();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            pool_hits: self.metrics.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.metrics.pool_misses.load(Ordering::Relaxed),
            bypass_allocations: self.metrics.bypass_allocations.load(Ordering::Relaxed),
            free_slots,
        }
    }

    /// 将容量向上取整到级别，返回 `(级别下标, 级别大小)`。
    fn class_for(&self, capacity: usize) -> (usize, usize) {
        let class_size = capacity.max(self.config.min_class).next_power_of_two();
        let index = (class_size.trailing_zeros() - self.config.min_class.trailing_zeros()) as usize;
        (index, class_size)
    }

    fn exact_class(&self, capacity: usize) -> Option<usize> {
        if capacity < self.config.min_class || !capacity.is_power_of_two() {
            return None;
        }
        Some(self.class_for(capacity).0)
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    bypass_allocations: AtomicU64,
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}
