use std::borrow::Cow;

use weft_buffer::Writer;

/// 写合并队列所依赖的连接契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 队列的排空任务只需要三件事：拿到写端追加数据并刷新、在失败时关闭连接、
///   在处理下一批数据前确认连接仍然可用；
/// - 以闭包借出写端，让连接自行决定写端的加锁方式，同时保证写端引用无法逃逸。
///
/// ## 契约说明（What）
/// - `with_writer`：在连接的写锁内执行 `f`；同一连接上的多次调用互斥执行；
/// - `close`：第一次调用关闭连接并返回 `Ok(())`，此后返回 [`TransportError::Closed`](crate::TransportError::Closed)；
/// - `is_active`：连接尚未关闭时返回 `true`；
/// - `id`：用于日志与追踪的连接标识。
///
/// ## 风险提示（Trade-offs）
/// - `with_writer` 中的 `flush` 可能执行真实 IO，实现应在文档中声明其阻塞特性；
/// - 实现必须保证 `close` 可以在任意线程、任意时刻调用，包括在另一次 `with_writer` 执行期间。
pub trait Connection: Send + Sync + 'static {
    /// 在写锁保护下借出零拷贝写端。
    fn with_writer<R>(&self, f: impl FnOnce(&mut dyn Writer) -> R) -> R;

    /// 关闭连接。
    fn close(&self) -> crate::Result<()>;

    /// 连接是否仍可使用。
    fn is_active(&self) -> bool;

    /// 返回可用于日志或追踪的连接 ID。
    fn id(&self) -> Cow<'_, str>;
}
