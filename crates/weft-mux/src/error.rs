use thiserror::Error;

/// `weft-mux` 的统一返回别名。
pub type Result<T, E = MuxError> = core::result::Result<T, E>;

/// 写合并队列错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：队列对生产者是“投递即忘”的，写失败只体现为连接被关闭；
///   因此这里只剩生命周期误用与构造期错误两类，均同步返回给调用方；
/// - **契约 (What)**：`code()` 返回稳定的 `mux.<语义>` 字符串。
#[derive(Debug, Error)]
pub enum MuxError {
    /// 队列已经进入关闭流程，重复调用 `close`。
    #[error("写合并队列已关闭")]
    AlreadyClosed,

    /// 分片数量必须至少为 1。
    #[error("分片数量必须大于 0")]
    InvalidShardCount,

    /// 配置文本无法解析。
    #[error("写合并队列配置解析失败: {0}")]
    Config(#[source] toml::de::Error),

    /// 当前线程不在 Tokio 运行时内，无法取得调度句柄。
    #[error("当前线程不在 Tokio 运行时内: {0}")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),
}

impl MuxError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            MuxError::AlreadyClosed => "mux.already_closed",
            MuxError::InvalidShardCount => "mux.invalid_shard_count",
            MuxError::Config(_) => "mux.config",
            MuxError::NoRuntime(_) => "mux.no_runtime",
        }
    }
}
