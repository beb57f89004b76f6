use std::{
    any::Any,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    thread,
};

use tracing::{debug, trace, warn};
use weft_buffer::LinkBuffer;
use weft_transport::{Connection, TransportError};

use crate::{MuxConfig, MuxError, Result, TaskRunner, gate::DrainGate};

/// 延迟求值的写端获取器：排空任务真正需要数据时才调用，返回 `None` 表示“无需写出”。
pub type WriterGetter = Box<dyn FnOnce() -> Option<LinkBuffer> + Send>;

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// 队列生命周期：`Active → Closing → Closed`，只能单向推进。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    /// 接受新的提交。
    Active,
    /// 拒绝新提交，已接受的工作仍在排空。
    Closing,
    /// 所有已接受的工作均已处理完毕。
    Closed,
}

impl QueueState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            ACTIVE => QueueState::Active,
            CLOSING => QueueState::Closing,
            _ => QueueState::Closed,
        }
    }
}

/// 等待排空的分片下标环。
///
/// 只有“从空变为非空”的分片才会入环，而分片在被排空任务取出前不会再次入环，
/// 因此容量等于分片数时永不溢出。
struct TriggerRing {
    slots: Box<[usize]>,
    write: usize,
    read: usize,
}

impl TriggerRing {
    fn new(size: usize) -> Self {
        Self {
            slots: vec![0; size].into_boxed_slice(),
            write: 0,
            read: 0,
        }
    }

    fn push(&mut self, shard: usize) {
        self.slots[self.write] = shard;
        self.write = (self.write + 1) % self.slots.len();
    }

    fn pop(&mut self) -> usize {
        let shard = self.slots[self.read];
        self.read = (self.read + 1) % self.slots.len();
        shard
    }
}

struct QueueInner<C> {
    conn: Arc<C>,
    runner: Arc<dyn TaskRunner>,
    size: usize,
    cursor: AtomicUsize,
    shards: Box<[spin::Mutex<Vec<WriterGetter>>]>,
    scratch: spin::Mutex<Vec<WriterGetter>>,
    ring: spin::Mutex<TriggerRing>,
    gate: DrainGate,
    adding: AtomicUsize,
    state: AtomicU8,
}

/// 进入 `add` 的生产者计数守卫，离开作用域时归还。
struct AddGuard<'a>(&'a AtomicUsize);

impl<'a> AddGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for AddGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 面向单连接的分片写合并队列。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 任意多个生产者并发向同一连接提交待写数据，生产者既不等待网络，也不互相争抢同一把锁；
/// - 后台只有一个排空任务负责把各分片积压的数据追加进连接写端，
///   并以一次 `flush` 合并整轮排空的所有数据，把系统调用次数降到最低。
///
/// ## 逻辑 (How)
/// - `add`：以原子游标轮转选择分片，只锁该分片追加获取器；
///   若分片由空变为非空，先把分片下标写入触发环，再登记触发计数；
///   把计数从 0 抬起的生产者负责争夺运行权并调度排空任务；
/// - 排空：读取当前触发数，逐个弹出分片，与暂存向量交换后在锁外求值并追加；
///   本地累计已处理数，只在观察值即将耗尽时才与共享计数对账；
///   整轮结束后 `flush` 一次，释放运行权，若期间有新触发则重新调度自身；
/// - `close`：`Active → Closing` 后轮询（让出线程）直至没有生产者停留在 `add` 内、
///   没有未处理触发、也没有排空任务运行，随后推进到 `Closed`。
///
/// ## 契约 (What)
/// - 同一分片内按提交顺序求值；跨分片按触发顺序求值；
/// - `add` 在非 `Active` 状态下静默丢弃提交；
/// - 追加或刷新失败会关闭连接；此后的批次不再求值、整轮不再刷新，失败不反馈给生产者；
/// - 获取器或连接写端在排空中 panic 时按写失败处理：panic 被就地捕获并关闭连接，
///   排空任务照常归还触发计数与运行权，队列仍可关闭；
/// - 第二次 `close` 返回 [`MuxError::AlreadyClosed`]。
///
/// ## 注意事项 (Trade-offs)
/// - 获取器在连接写锁内求值，应避免在其中执行耗时操作；
/// - `close` 会阻塞调用线程直到在途工作完成，不应在排空任务所在的调度器异步线程上调用。
pub struct ShardQueue<C: Connection> {
    inner: Arc<QueueInner<C>>,
}

impl<C: Connection> Clone for ShardQueue<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> fmt::Debug for ShardQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardQueue")
            .field("conn", &self.inner.conn.id())
            .field("shards", &self.inner.size)
            .field("state", &self.state())
            .field("pending_triggers", &self.inner.gate.pending())
            .finish()
    }
}

impl<C: Connection> ShardQueue<C> {
    /// 按配置构造队列；分片数缺省为宿主可用并行度。
    pub fn new(config: &MuxConfig, conn: Arc<C>, runner: Arc<dyn TaskRunner>) -> Result<Self> {
        Self::with_shards(config.resolved_shard_count()?, conn, runner)
    }

    /// 以固定分片数构造队列。
    pub fn with_shards(size: usize, conn: Arc<C>, runner: Arc<dyn TaskRunner>) -> Result<Self> {
        if size == 0 {
            return Err(MuxError::InvalidShardCount);
        }
        let shards = (0..size)
            .map(|_| spin::Mutex::new(Vec::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            inner: Arc::new(QueueInner {
                conn,
                runner,
                size,
                cursor: AtomicUsize::new(0),
                shards,
                scratch: spin::Mutex::new(Vec::new()),
                ring: spin::Mutex::new(TriggerRing::new(size)),
                gate: DrainGate::new(),
                adding: AtomicUsize::new(0),
                state: AtomicU8::new(ACTIVE),
            }),
        })
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_raw(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn shard_count(&self) -> usize {
        self.inner.size
    }

    /// 队列服务的连接。
    pub fn connection(&self) -> &Arc<C> {
        &self.inner.conn
    }

    /// 提交一组获取器；它们会进入同一分片并按给定顺序求值。
    pub fn add<I>(&self, getters: I)
    where
        I: IntoIterator<Item = WriterGetter>,
    {
        let inner = &*self.inner;
        let _guard = AddGuard::enter(&inner.adding);
        if inner.state.load(Ordering::SeqCst) != ACTIVE {
            trace!(conn = %inner.conn.id(), "queue is not active, submission dropped");
            return;
        }
        let mut getters = getters.into_iter().collect::<Vec<_>>();
        if getters.is_empty() {
            return;
        }

        let shard = inner.cursor.fetch_add(1, Ordering::Relaxed) % inner.size;
        let was_empty = {
            let mut lane = inner.shards[shard].lock();
            let was_empty = lane.is_empty();
            lane.append(&mut getters);
            was_empty
        };
        if was_empty {
            self.triggering(shard);
        }
    }

    /// 终止队列：拒绝新提交并等待已接受的工作全部完成。
    pub fn close(&self) -> Result<()> {
        let inner = &*self.inner;
        if inner
            .state
            .compare_exchange(ACTIVE, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MuxError::AlreadyClosed);
        }
        debug!(
            conn = %inner.conn.id(),
            pending = inner.gate.pending(),
            "closing shard queue"
        );
        loop {
            if inner.state.load(Ordering::SeqCst) == CLOSED {
                break;
            }
            if self.quiescent() {
                let _ = inner.state.compare_exchange(
                    CLOSING,
                    CLOSED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                break;
            }
            thread::yield_now();
        }
        debug!(conn = %inner.conn.id(), "shard queue closed");
        Ok(())
    }

    fn triggering(&self, shard: usize) {
        // 先入环再计数：任何被计数看到的触发，其分片下标一定已在环中。
        self.inner.ring.lock().push(shard);
        if self.inner.gate.arm() {
            self.launch();
        }
    }

    fn launch(&self) {
        if !self.inner.gate.try_enter() {
            return;
        }
        let queue = self.clone();
        self.inner.runner.run(Box::new(move || queue.drain_pass()));
    }

    fn drain_pass(&self) {
        let inner = &*self.inner;
        let mut observed = inner.gate.pending();
        let mut consumed = 0;
        let mut batches = 0usize;
        trace!(conn = %inner.conn.id(), pending = observed, "drain pass started");

        while observed > 0 {
            let shard = inner.ring.lock().pop();
            let mut batch = mem::take(&mut *inner.scratch.lock());
            mem::swap(&mut *inner.shards[shard].lock(), &mut batch);
            self.deal(shard, &mut batch);
            *inner.scratch.lock() = batch;

            batches += 1;
            consumed += 1;
            if observed - consumed == 0 {
                observed = inner.gate.settle(consumed);
                consumed = 0;
            }
        }
        self.flush();
        trace!(conn = %inner.conn.id(), batches, "drain pass finished");

        if inner.gate.leave() {
            self.launch();
            return;
        }
        if inner.state.load(Ordering::SeqCst) == CLOSING && self.quiescent() {
            let _ = inner.state.compare_exchange(
                CLOSING,
                CLOSED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        }
    }

    /// 求值一个分片批次并追加进连接写端；失败时关闭连接并放弃批次剩余部分。
    fn deal(&self, shard: usize, batch: &mut Vec<WriterGetter>) {
        let conn = &*self.inner.conn;
        if !conn.is_active() {
            trace!(
                conn = %conn.id(),
                shard,
                discarded = batch.len(),
                "connection inactive, batch discarded"
            );
            batch.clear();
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            conn.with_writer(|writer| {
                for getter in batch.drain(..) {
                    if let Some(buf) = getter() {
                        writer.append(buf)?;
                    }
                }
                Ok::<_, weft_buffer::BufferError>(())
            })
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(
                    conn = %conn.id(),
                    shard,
                    error = %error,
                    code = error.code(),
                    "append failed, closing connection"
                );
                self.close_connection();
            }
            Err(payload) => {
                // 展开时 drain 迭代器已丢弃批次剩余的获取器。
                batch.clear();
                warn!(
                    conn = %conn.id(),
                    shard,
                    panic = panic_message(payload.as_ref()),
                    "writer getter panicked, closing connection"
                );
                self.close_connection();
            }
        }
    }

    fn flush(&self) {
        let conn = &*self.inner.conn;
        if !conn.is_active() {
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| conn.with_writer(|writer| writer.flush())));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(
                    conn = %conn.id(),
                    error = %error,
                    code = error.code(),
                    "flush failed, closing connection"
                );
                self.close_connection();
            }
            Err(payload) => {
                warn!(
                    conn = %conn.id(),
                    panic = panic_message(payload.as_ref()),
                    "flush panicked, closing connection"
                );
                self.close_connection();
            }
        }
    }

    fn close_connection(&self) {
        match self.inner.conn.close() {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                debug!(conn = %self.inner.conn.id(), "connection already closed");
            }
            Err(error) => {
                warn!(
                    conn = %self.inner.conn.id(),
                    error = %error,
                    code = error.code(),
                    "connection close reported an error"
                );
            }
        }
    }

    /// 没有生产者停留在 `add` 内、没有未处理触发、也没有排空任务运行。
    fn quiescent(&self) -> bool {
        let inner = &*self.inner;
        inner.adding.load(Ordering::SeqCst) == 0
            && inner.gate.pending() == 0
            && !inner.gate.is_running()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
