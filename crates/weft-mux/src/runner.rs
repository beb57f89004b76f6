use tokio::runtime::Handle;

use crate::{MuxError, Result};

/// 交给 [`TaskRunner`] 执行的后台任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 排空任务的调度接缝。
///
/// # 教案式说明
/// - **意图 (Why)**：队列不为每个连接独占线程，而是把排空任务提交到共享的工作池；
///   抽象成 trait 后，测试可以改用手动或内联调度来精确控制交错；
/// - **契约 (What)**：`run` 不得在调用线程上阻塞等待任务完成以外的资源；
///   任务内部可能执行阻塞 IO（例如 `TcpConnection` 的 `flush`），实现需要允许这一点。
pub trait TaskRunner: Send + Sync + 'static {
    fn run(&self, task: Task);
}

impl<F> TaskRunner for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn run(&self, task: Task) {
        self(task)
    }
}

/// 把任务提交到 Tokio 阻塞线程池的 [`TaskRunner`]。
///
/// 阻塞线程池允许任务内部同步等待套接字可写，且不会占用异步工作线程。
#[derive(Clone, Debug)]
pub struct TokioRunner {
    handle: Handle,
}

impl TokioRunner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 使用当前线程所在运行时的句柄。
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(MuxError::NoRuntime)
    }
}

impl TaskRunner for TokioRunner {
    fn run(&self, task: Task) {
        // 分离任务：排空结果通过连接状态观察，不经由 JoinHandle 传递。
        let _detached = self.handle.spawn_blocking(task);
    }
}
