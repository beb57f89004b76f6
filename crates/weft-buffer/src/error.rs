use std::{borrow::Cow, io, string::FromUtf8Error};

use thiserror::Error;

/// `weft-buffer` 的统一返回别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

/// 缓冲层错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：读写契约的失败路径只有少数几类（数据不足、源已耗尽、参数越界、底层 IO），
///   用细粒度枚举表达，便于连接层与队列层根据 [`BufferError::code`] 做统一处置；
/// - **契约 (What)**：所有变体均为 `Send + Sync + 'static`，可跨线程传播；
///   `code()` 返回稳定的 `<域>.<语义>` 字符串，适合作为日志字段或指标标签；
/// - **风险 (Trade-offs)**：使用后视图等契约违规由借用检查在编译期拒绝，因此这里没有对应变体。
#[derive(Debug, Error)]
pub enum BufferError {
    /// 内存中的可读数据不足以满足请求。
    #[error("可读数据不足：请求 {requested} 字节，仅剩 {available} 字节")]
    InsufficientData { requested: usize, available: usize },

    /// 底层数据源已到达 EOF，无法再凑够请求的字节数。
    #[error("数据源已结束：请求 {requested} 字节，仅剩 {available} 字节")]
    Eof { requested: usize, available: usize },

    /// 调用参数违反契约（例如 `malloc_ack` 超过已申请长度）。
    #[error("非法参数：{0}")]
    InvalidArgument(Cow<'static, str>),

    /// `read_string` 读到的字节不是合法 UTF-8。
    #[error("读取的数据不是合法 UTF-8: {0}")]
    InvalidUtf8(#[source] FromUtf8Error),

    /// 底层 IO 失败。
    #[error("底层 IO 失败（{op}）: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// 配置文本无法解析。
    #[error("缓冲池配置解析失败: {0}")]
    Config(#[source] toml::de::Error),
}

impl BufferError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BufferError::InsufficientData { .. } => "buffer.insufficient_data",
            BufferError::Eof { .. } => "buffer.eof",
            BufferError::InvalidArgument(_) => "buffer.invalid_argument",
            BufferError::InvalidUtf8(_) => "buffer.invalid_utf8",
            BufferError::Io { .. } => "buffer.io",
            BufferError::Config(_) => "buffer.config",
        }
    }

    /// 数据已读尽（内存不足或源已结束）时返回 `true`。
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            BufferError::InsufficientData { .. } | BufferError::Eof { .. }
        )
    }

    pub(crate) fn invalid(message: impl Into<Cow<'static, str>>) -> Self {
        BufferError::InvalidArgument(message.into())
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        BufferError::Io { op, source }
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Io { source, .. } => source,
            BufferError::InsufficientData { .. } | BufferError::Eof { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            other => io::Error::new(io::ErrorKind::InvalidInput, other),
        }
    }
}
