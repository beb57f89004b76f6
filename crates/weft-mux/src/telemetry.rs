//! 进程级 `tracing` 订阅器安装入口。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 安装过程可能出现的错误。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `install` 被重复调用。
    #[error("weft 日志订阅器已完成安装，禁止重复调用 install")]
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber，无法再次注册。
    #[error("全局 tracing Subscriber 已存在，weft 无法覆盖")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 失败的底层错误。
    #[error("设置 tracing 全局 Subscriber 失败: {0}")]
    SetGlobalSubscriber(#[source] tracing::subscriber::SetGlobalDefaultError),
}

impl TelemetryError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TelemetryError::AlreadyInstalled => "telemetry.already_installed",
            TelemetryError::SubscriberAlreadySet => "telemetry.subscriber_already_set",
            TelemetryError::SetGlobalSubscriber(_) => "telemetry.set_global_subscriber",
        }
    }
}

/// 安装全局日志订阅器：`fmt` 输出层 + `EnvFilter`。
///
/// # 教案式说明
/// - **意图（Why）**：队列与连接层在排空、关闭、写失败等边界都会输出结构化事件，
///   宿主只需调用一次 `install` 即可看到这些事件；
/// - **逻辑（How）**：过滤规则优先读取 `RUST_LOG`，缺省为 `info`；
/// - **契约（What）**：多次调用返回 [`TelemetryError::AlreadyInstalled`]；
///   调用前若外部已配置 Subscriber，返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn install() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(TelemetryError::SetGlobalSubscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
