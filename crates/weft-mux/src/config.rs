use std::{num::NonZeroUsize, thread};

use serde::Deserialize;

use crate::{MuxError, Result};

/// 写合并队列的可调参数。
///
/// - `shard_count`：分片数量；缺省时取宿主的可用并行度（见 [`default_shard_count`]），
///   显式配置为 0 会在解析阶段被拒绝。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    pub shard_count: Option<usize>,
}

impl MuxConfig {
    /// 以固定分片数构造配置。
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            shard_count: Some(shard_count),
        }
    }

    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MuxConfig = toml::from_str(text).map_err(MuxError::Config)?;
        config.resolved_shard_count()?;
        Ok(config)
    }

    /// 解析后的分片数量。
    pub fn resolved_shard_count(&self) -> Result<usize> {
        match self.shard_count {
            Some(0) => Err(MuxError::InvalidShardCount),
            Some(count) => Ok(count),
            None => Ok(default_shard_count()),
        }
    }
}

/// 宿主可用并行度，无法探测时回落为 1。
pub fn default_shard_count() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
