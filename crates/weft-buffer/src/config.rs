use serde::Deserialize;

use crate::{BufferError, Result};

const BLOCK1K: usize = 1024;
const BLOCK8K: usize = 8 * BLOCK1K;

/// 缓冲池的可调参数。
///
/// # 教案式说明
/// - **意图 (Why)**：尺寸分级、超大阈值与每级缓存上限决定了池的内存占用上界，
///   需要在部署时可调，而不是散落在代码中的常量；
/// - **契约 (What)**：
///   - `malloc_max`：容量达到或超过该值的申请绕过池，默认 8 MiB，必须是 2 的幂；
///   - `min_class`：最小尺寸级别，默认 64 字节，必须是 2 的幂且不大于 `malloc_max`；
///   - `max_cached_per_class`：每个级别最多缓存的空闲块数量，超出部分直接丢弃；
///   - `page_size`：`LinkBuffer` 扩容时新节点的最小容量，默认 8 KiB；
/// - **逻辑 (How)**：支持 `serde` 反序列化，缺省字段回落到 [`Default`]，
///   [`PoolConfig::from_toml_str`] 在解析后立即执行 [`PoolConfig::validate`]。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub malloc_max: usize,
    pub min_class: usize,
    pub max_cached_per_class: usize,
    pub page_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            malloc_max: BLOCK8K * BLOCK1K,
            min_class: 64,
            max_cached_per_class: 256,
            page_size: BLOCK8K,
        }
    }
}

impl PoolConfig {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(text).map_err(BufferError::Config)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验尺寸分级相关的不变量。
    pub fn validate(&self) -> Result<()> {
        if !self.malloc_max.is_power_of_two() {
            return Err(BufferError::invalid(format!(
                "malloc_max 必须是 2 的幂，当前为 {}",
                self.malloc_max
            )));
        }
        if !self.min_class.is_power_of_two() || self.min_class > self.malloc_max {
            return Err(BufferError::invalid(format!(
                "min_class 必须是不大于 malloc_max 的 2 的幂，当前为 {}",
                self.min_class
            )));
        }
        if self.page_size == 0 {
            return Err(BufferError::invalid("page_size 不能为 0"));
        }
        Ok(())
    }

    /// 尺寸级别的数量，覆盖 `[min_class, malloc_max]` 中的每个 2 的幂。
    pub(crate) fn class_count(&self) -> usize {
        (self.malloc_max.trailing_zeros() - self.min_class.trailing_zeros()) as usize + 1
    }
}
