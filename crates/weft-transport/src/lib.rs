#![doc = r#"
# weft-transport

## 设计动机（Why）
- **定位**：写合并队列只关心“拿到连接的零拷贝写端、追加数据、刷新、失败时关闭连接”，
  本 crate 把这组能力抽象为 [`Connection`] 契约，使队列与具体传输解耦；
- **架构角色**：位于 `weft-buffer` 之上、`weft-mux` 之下，是写路径上唯一接触套接字的层。

## 核心契约（What）
- [`Connection::with_writer`] 在连接内部的写锁保护下把 [`Writer`](weft_buffer::Writer) 借给调用方，
  借用结束即释放锁，调用方无法把写端带出闭包；
- [`Connection::close`] 只有第一次调用成功，之后返回 [`TransportError::Closed`]；
- [`TcpConnection`] 是基于 Tokio `TcpStream` 的实现，`flush` 以非阻塞向量化写入为主，
  套接字写满时借助运行时句柄等待可写。

## 风险与考量（Trade-offs）
- `TcpConnection` 的 `flush` 可能同步等待套接字可写，因此必须在 Tokio 阻塞线程池
  （或其它非异步工作线程）中调用；`weft-mux` 的 `TokioRunner` 正是如此调度的；
- 读方向、握手与 TLS 不在本 crate 范围内。
"#]

mod connection;
mod error;
mod tcp;

pub use connection::Connection;
pub use error::{Result, TransportError};
pub use tcp::TcpConnection;
