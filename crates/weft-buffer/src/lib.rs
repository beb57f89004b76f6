//! `weft-buffer` 提供连接写路径所需的池化内存与零拷贝缓冲契约。
//!
//! # 模块定位（Why）
//! - 写路径上的生产者需要“先申请、再填充、最后提交”的两段式写入协议，
//!   同时希望把已有的内存块直接挂入待发送流，避免中间拷贝；
//! - 读路径需要“凑够 n 字节才返回”的阻塞式语义，以及在确认数据不再使用后集中归还内存的能力。
//!
//! # 设计概要（How）
//! - `pool` 模块实现按尺寸分级的 [`BufferPool`]，小块走自由链表复用，超大块绕过池直接分配；
//! - `node` 模块定义链表节点及其 *readonly* / *nocopy-read* 两个污染标记，决定节点能否回池；
//! - `nocopy` 模块给出 [`Reader`]/[`Writer`] 契约，`link_buffer` 模块以 [`LinkBuffer`] 落地；
//! - `io` 模块在标准库 `io::Read`/`io::Write` 与零拷贝契约之间双向转换。
//!
//! # 命名约定（Consistency）
//! - 读写方法沿用 `next`/`peek`/`malloc`/`flush` 等术语，与连接层、队列层保持一致。

mod config;
mod error;
mod io;
mod link_buffer;
mod node;
mod nocopy;
mod pool;

pub use config::PoolConfig;
pub use error::{BufferError, Result};
pub use io::{
    IoReadAdapter, IoReadWriter, IoReader, IoWriteAdapter, IoWriter, new_io_reader, new_io_writer,
    new_read_writer, new_reader, new_writer,
};
pub use link_buffer::LinkBuffer;
pub use nocopy::{MIN_REUSE_BYTES, ReadWriter, Reader, Writer};
pub use pool::{BufferPool, PoolStats};
