#![doc = r#"
# weft-mux

## 设计动机（Why）
- 同一连接上往往有大量并发的生产者：业务任务、心跳、推送各自生成待发送数据；
  若每个生产者都直接加锁写套接字，锁竞争与系统调用次数都会随并发度线性增长；
- 本 crate 把“提交”与“写出”拆开：生产者只把延迟求值的获取器放进分片，
  由唯一的后台排空任务批量追加并一次性刷新。

## 核心契约（What）
- [`ShardQueue`]：分片写合并队列，提供 `add`/`close`/`state`；
- [`TaskRunner`]：排空任务的调度接缝，[`TokioRunner`] 把任务交给 Tokio 阻塞线程池；
- [`MuxConfig`]：分片数配置，缺省取宿主可用并行度；
- [`telemetry::install`]：安装进程级 `tracing` 订阅器。

## 实现策略（How）
- 每个分片一把自旋锁，只保护 O(1) 的追加与交换，求值与 IO 全部在锁外进行；
- 触发计数 + 运行标志组成准入闸门，保证同一队列同一时刻至多一个排空任务；
- 关闭流程先拒绝新提交，再等待在途工作排空，最后推进到 `Closed`。

## 风险与注意（Trade-offs）
- 提交是“投递即忘”的：写失败只会表现为连接被关闭，调用方需通过连接状态观察失败；
- 跨分片只保证按触发顺序排空，不保证全局提交顺序。
"#]

mod config;
mod error;
mod gate;
mod queue;
mod runner;
pub mod telemetry;

pub use config::{MuxConfig, default_shard_count};
pub use error::{MuxError, Result};
pub use queue::{QueueState, ShardQueue, WriterGetter};
pub use runner::{Task, TaskRunner, TokioRunner};
