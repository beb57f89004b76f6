use std::{
    borrow::Cow,
    io,
    net::{Shutdown, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use socket2::SockRef;
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    runtime::Handle,
};
use tracing::{debug, trace};
use weft_buffer::{BufferError, LinkBuffer, Reader, Writer};

use crate::{Connection, Result, TransportError};

#[derive(Debug)]
struct TcpConnectionInner {
    stream: TcpStream,
    handle: Handle,
    outbound: Mutex<LinkBuffer>,
    active: AtomicBool,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    id: String,
}

/// 基于 Tokio `TcpStream` 的 [`Connection`] 实现。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 为写合并队列提供真实套接字上的写端：队列在后台线程里 `append` 多个生产者的缓冲，
///   最后一次 `flush` 把它们合并成尽量少的系统调用；
/// - 关闭走 `socket2::SockRef` 的双向 `shutdown`，让对端立即观察到 EOF，
///   即使还有其它克隆持有底层套接字。
///
/// ## 逻辑 (How)
/// - 内部以 `std::sync::Mutex<LinkBuffer>` 充当写锁，锁中毒时直接取回内部数据继续使用；
/// - `flush` 先提交写端，再循环 `try_write_vectored` 把全部已提交数据写出；
///   遇到 `WouldBlock` 时借助运行时句柄 `block_on(writable())` 等待套接字可写；
/// - `active` 原子标志记录连接状态，`close` 以 `swap` 保证只有第一次调用生效。
///
/// ## 契约 (What)
/// - `connect`/`from_stream` 必须在 Tokio 运行时上下文中调用；
/// - `with_writer` 内的 `flush` 会同步等待套接字可写，只能在阻塞线程池等非异步线程中调用，
///   否则运行时会因嵌套 `block_on` 而 panic；
/// - 连接关闭后 `flush` 返回 `NotConnected` IO 错误，已追加的数据被丢弃。
///
/// ## 注意事项 (Trade-offs)
/// - 读方向不在职责范围内，调用方若需读取可通过 [`TcpConnection::stream`] 自行处理；
/// - 写锁为同步互斥锁，持锁期间可能执行真实 IO，因此同一连接应只由一个排空任务驱动写出。
#[derive(Clone, Debug)]
pub struct TcpConnection {
    inner: Arc<TcpConnectionInner>,
}

impl TcpConnection {
    /// 建立到目标地址的连接。
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| TransportError::io("connect", err))?;
        Self::from_stream(stream)
    }

    /// 以已建立的 `TcpStream` 构造连接，并开启 `TCP_NODELAY`。
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let handle = Handle::try_current().map_err(TransportError::NoRuntime)?;
        stream
            .set_nodelay(true)
            .map_err(|err| TransportError::io("set_nodelay", err))?;
        let local_addr = stream
            .local_addr()
            .map_err(|err| TransportError::io("local_addr", err))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|err| TransportError::io("peer_addr", err))?;
        Ok(Self {
            inner: Arc::new(TcpConnectionInner {
                stream,
                handle,
                outbound: Mutex::new(LinkBuffer::new()),
                active: AtomicBool::new(true),
                local_addr,
                peer_addr,
                id: format!("tcp:{local_addr}->{peer_addr}"),
            }),
        })
    }

    /// 获取本地地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// 获取对端地址。
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// 底层 `TcpStream`，供调用方自行处理读方向。
    pub fn stream(&self) -> &TcpStream {
        &self.inner.stream
    }
}

impl Connection for TcpConnection {
    fn with_writer<R>(&self, f: impl FnOnce(&mut dyn Writer) -> R) -> R {
        let mut outbound = match self.inner.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut writer = SocketWriter {
            inner: &self.inner,
            buf: &mut *outbound,
        };
        f(&mut writer)
    }

    fn close(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        debug!(conn = %self.inner.id, "closing tcp connection");
        match SockRef::from(&self.inner.stream).shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // 对端先行断开时套接字已不在连接态，视为关闭成功。
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(TransportError::io("shutdown", err)),
        }
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.inner.id)
    }
}

/// 写锁内借出的写端：申请类操作委托给 `LinkBuffer`，`flush` 写入套接字。
struct SocketWriter<'a> {
    inner: &'a TcpConnectionInner,
    buf: &'a mut LinkBuffer,
}

impl SocketWriter<'_> {
    fn drain(&mut self) -> weft_buffer::Result<usize> {
        let mut written = 0;
        while !self.buf.is_empty() {
            if !self.inner.active.load(Ordering::Acquire) {
                return Err(io_error("flush", io::ErrorKind::NotConnected.into()));
            }
            let outcome = {
                let slices = self.buf.readable_slices();
                self.inner.stream.try_write_vectored(&slices)
            };
            match outcome {
                Ok(0) => return Err(io_error("flush", io::ErrorKind::WriteZero.into())),
                Ok(n) => {
                    self.buf.skip(n)?;
                    written += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    trace!(
                        conn = %self.inner.id,
                        pending = self.buf.len(),
                        "socket buffer full, waiting for writability"
                    );
                    self.inner
                        .handle
                        .block_on(self.inner.stream.writable())
                        .map_err(|err| io_error("writable", err))?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(io_error("flush", err)),
            }
        }
        Ok(written)
    }
}

impl Writer for SocketWriter<'_> {
    fn malloc(&mut self, n: usize) -> weft_buffer::Result<&mut [u8]> {
        self.buf.malloc(n)
    }

    fn write_string(&mut self, s: String) -> weft_buffer::Result<usize> {
        self.buf.write_string(s)
    }

    fn write_binary(&mut self, b: Bytes) -> weft_buffer::Result<usize> {
        self.buf.write_binary(b)
    }

    fn write_byte(&mut self, b: u8) -> weft_buffer::Result<()> {
        self.buf.write_byte(b)
    }

    fn write_direct(&mut self, p: Bytes, remain_cap: usize) -> weft_buffer::Result<()> {
        self.buf.write_direct(p, remain_cap)
    }

    fn malloc_ack(&mut self, n: usize) -> weft_buffer::Result<()> {
        self.buf.malloc_ack(n)
    }

    fn append(&mut self, other: LinkBuffer) -> weft_buffer::Result<()> {
        self.buf.append(other)
    }

    fn flush(&mut self) -> weft_buffer::Result<()> {
        self.buf.flush()?;
        let outcome = self.drain();
        self.buf.release()?;
        let written = outcome?;
        trace!(conn = %self.inner.id, written, "tcp flush completed");
        Ok(())
    }

    fn malloc_len(&self) -> usize {
        self.buf.malloc_len()
    }
}

fn io_error(op: &'static str, source: io::Error) -> BufferError {
    BufferError::Io { op, source }
}
