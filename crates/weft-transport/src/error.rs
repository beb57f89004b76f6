use std::io;

use thiserror::Error;

/// `weft-transport` 的统一返回别名。
pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// 传输层错误。
///
/// `code()` 返回稳定的 `transport.<语义>` 字符串，适合作为日志字段。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 连接已经关闭，重复关闭或在关闭后继续使用。
    #[error("连接已关闭")]
    Closed,

    /// 套接字层面的 IO 失败。
    #[error("传输层 IO 失败（{op}）: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// 构造连接时当前线程不在 Tokio 运行时内。
    #[error("当前线程不在 Tokio 运行时内: {0}")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),
}

impl TransportError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Closed => "transport.closed",
            TransportError::Io { .. } => "transport.io",
            TransportError::NoRuntime(_) => "transport.no_runtime",
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        TransportError::Io { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_a_transport_code() {
        let cases = [
            (TransportError::Closed, "transport.closed"),
            (
                TransportError::io("shutdown", io::ErrorKind::NotConnected.into()),
                "transport.io",
            ),
            (
                TransportError::NoRuntime(
                    tokio::runtime::Handle::try_current().expect_err("测试线程不在运行时内"),
                ),
                "transport.no_runtime",
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
            assert!(!err.to_string().is_empty());
        }
    }
}
