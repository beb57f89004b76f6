//! 标准库 `io::Read`/`io::Write` 与零拷贝契约之间的双向适配。
//!
//! # 教案式说明
//! - **正向 (How)**：[`IoReader`]/[`IoWriter`]/[`IoReadWriter`] 把任意阻塞式数据源包装成 [`Reader`]/[`Writer`]，
//!   读侧按需从源拉取直到凑够请求的字节数，写侧在 `flush` 时把已提交数据一次写出；
//! - **反向 (How)**：[`IoReadAdapter`]/[`IoWriteAdapter`] 让零拷贝读写端可以交给只认识标准库 trait 的代码；
//! - **契约 (What)**：数据源结束而请求仍未满足时返回 [`BufferError::Eof`]，绝不返回残缺结果；
//!   被信号打断（`Interrupted`）的读写会透明重试。

use std::io::{self, Read, Write};

use bytes::Bytes;

use crate::{BufferError, LinkBuffer, Reader, Result, Writer};

/// 从阻塞数据源拉取数据的读端状态。
#[derive(Debug, Default)]
struct Inbound {
    buf: LinkBuffer,
}

impl Inbound {
    /// 持续拉取直到至少有 `n` 个可读字节。
    fn fill<R: Read + ?Sized>(&mut self, source: &mut R, n: usize) -> Result<()> {
        while self.buf.len() < n {
            if self.pull(source, n - self.buf.len())? == 0 {
                return Err(BufferError::Eof {
                    requested: n,
                    available: self.buf.len(),
                });
            }
        }
        Ok(())
    }

    /// 持续拉取直到已提交数据中出现 `delim`。
    fn fill_until<R: Read + ?Sized>(&mut self, source: &mut R, delim: u8) -> Result<()> {
        loop {
            if self.buf.index_of(delim).is_some() {
                return Ok(());
            }
            if self.pull(source, 1)? == 0 {
                return Err(BufferError::Eof {
                    requested: self.buf.len() + 1,
                    available: self.buf.len(),
                });
            }
        }
    }

    /// 执行一次读取，返回新增的字节数；0 表示数据源已结束。
    fn pull<R: Read + ?Sized>(&mut self, source: &mut R, hint: usize) -> Result<usize> {
        let want = hint.max(self.buf.pool().config().page_size);
        loop {
            let dst = self.buf.malloc(want)?;
            match source.read(dst) {
                Ok(read) => {
                    self.buf.malloc_ack(read)?;
                    self.buf.flush()?;
                    return Ok(read);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    self.buf.malloc_ack(0)?;
                }
                Err(err) => {
                    self.buf.malloc_ack(0)?;
                    return Err(BufferError::io("read", err));
                }
            }
        }
    }
}

/// 以阻塞数据源为后端的 [`Reader`]。由 [`new_reader`] 构造。
#[derive(Debug)]
pub struct IoReader<R> {
    source: R,
    inbound: Inbound,
}

/// 把 `io::Read` 包装为 [`Reader`]。
pub fn new_reader<R: Read>(source: R) -> IoReader<R> {
    IoReader {
        source,
        inbound: Inbound::default(),
    }
}

impl<R> IoReader<R> {
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

/// 写出到阻塞数据汇的 [`Writer`]。由 [`new_writer`] 构造。
///
/// `flush` 在提交后立即把全部已提交数据写入数据汇，并调用数据汇自身的 `flush`。
#[derive(Debug)]
pub struct IoWriter<W> {
    sink: W,
    outbound: LinkBuffer,
}

/// 把 `io::Write` 包装为 [`Writer`]。
pub fn new_writer<W: Write>(sink: W) -> IoWriter<W> {
    IoWriter {
        sink,
        outbound: LinkBuffer::new(),
    }
}

impl<W> IoWriter<W> {
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// 同时包装读写两端的 [`ReadWriter`](crate::ReadWriter)。由 [`new_read_writer`] 构造。
#[derive(Debug)]
pub struct IoReadWriter<RW> {
    inner: RW,
    inbound: Inbound,
    outbound: LinkBuffer,
}

/// 把同时实现 `io::Read` 与 `io::Write` 的对象包装为 [`ReadWriter`](crate::ReadWriter)。
pub fn new_read_writer<RW: Read + Write>(inner: RW) -> IoReadWriter<RW> {
    IoReadWriter {
        inner,
        inbound: Inbound::default(),
        outbound: LinkBuffer::new(),
    }
}

impl<RW> IoReadWriter<RW> {
    pub fn get_ref(&self) -> &RW {
        &self.inner
    }

    pub fn into_inner(self) -> RW {
        self.inner
    }
}

/// 为“拉取式读端”生成 [`Reader`] 实现：先从数据源补足，再委托给内部 `LinkBuffer`。
macro_rules! pulling_reader {
    ($ty:ident, $source:ident, $($bound:tt)+) => {
        impl<T: $($bound)+> Reader for $ty<T> {
            fn next(&mut self, n: usize) -> Result<&[u8]> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.next(n)
            }

            fn peek(&mut self, n: usize) -> Result<&[u8]> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.peek(n)
            }

            fn skip(&mut self, n: usize) -> Result<()> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.skip(n)
            }

            fn until(&mut self, delim: u8) -> Result<&[u8]> {
                self.inbound.fill_until(&mut self.$source, delim)?;
                self.inbound.buf.until(delim)
            }

            fn read_string(&mut self, n: usize) -> Result<String> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.read_string(n)
            }

            fn read_binary(&mut self, n: usize) -> Result<Bytes> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.read_binary(n)
            }

            fn read_byte(&mut self) -> Result<u8> {
                self.inbound.fill(&mut self.$source, 1)?;
                self.inbound.buf.read_byte()
            }

            fn slice(&mut self, n: usize) -> Result<LinkBuffer> {
                self.inbound.fill(&mut self.$source, n)?;
                self.inbound.buf.slice(n)
            }

            fn release(&mut self) -> Result<()> {
                self.inbound.buf.release()
            }

            fn len(&self) -> usize {
                self.inbound.buf.len()
            }
        }
    };
}

/// 为“推送式写端”生成 [`Writer`] 实现：申请类操作委托给内部 `LinkBuffer`，`flush` 写出到数据汇。
macro_rules! pushing_writer {
    ($ty:ident, $sink:ident, $($bound:tt)+) => {
        impl<T: $($bound)+> Writer for $ty<T> {
            fn malloc(&mut self, n: usize) -> Result<&mut [u8]> {
                self.outbound.malloc(n)
            }

            fn write_string(&mut self, s: String) -> Result<usize> {
                self.outbound.write_string(s)
            }

            fn write_binary(&mut self, b: Bytes) -> Result<usize> {
                self.outbound.write_binary(b)
            }

            fn write_byte(&mut self, b: u8) -> Result<()> {
                self.outbound.write_byte(b)
            }

            fn write_direct(&mut self, p: Bytes, remain_cap: usize) -> Result<()> {
                self.outbound.write_direct(p, remain_cap)
            }

            fn malloc_ack(&mut self, n: usize) -> Result<()> {
                self.outbound.malloc_ack(n)
            }

            fn append(&mut self, other: LinkBuffer) -> Result<()> {
                self.outbound.append(other)
            }

            fn flush(&mut self) -> Result<()> {
                self.outbound.flush()?;
                self.outbound.write_to(&mut self.$sink)?;
                self.$sink
                    .flush()
                    .map_err(|err| BufferError::io("flush", err))
            }

            fn malloc_len(&self) -> usize {
                self.outbound.malloc_len()
            }
        }
    };
}

pulling_reader!(IoReader, source, Read);
pushing_writer!(IoWriter, sink, Write);
pulling_reader!(IoReadWriter, inner, Read + Write);
pushing_writer!(IoReadWriter, inner, Read + Write);

/// 把 [`Reader`] 暴露为 `io::Read`。由 [`new_io_reader`] 构造。
///
/// 每次 `read` 拷贝出当前可读数据后立即 `release`；数据读尽时返回 `Ok(0)`。
#[derive(Debug)]
pub struct IoReadAdapter<R> {
    inner: R,
}

/// 把 [`Reader`] 包装为 `io::Read`。
pub fn new_io_reader<R: Reader>(inner: R) -> IoReadAdapter<R> {
    IoReadAdapter { inner }
}

impl<R> IoReadAdapter<R> {
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Reader> Read for IoReadAdapter<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.inner.is_empty() {
            // 拉取式读端会在这里阻塞等待数据源。
            match self.inner.peek(1) {
                Ok(_) => {}
                Err(err) if err.is_exhausted() => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
        let n = dst.len().min(self.inner.len());
        dst[..n].copy_from_slice(self.inner.next(n)?);
        self.inner.release()?;
        Ok(n)
    }
}

/// 把 [`Writer`] 暴露为 `io::Write`。由 [`new_io_writer`] 构造。
///
/// `write` 拷贝进新申请的空间，`flush` 提交并触发底层写端的 `flush`。
#[derive(Debug)]
pub struct IoWriteAdapter<W> {
    inner: W,
}

/// 把 [`Writer`] 包装为 `io::Write`。
pub fn new_io_writer<W: Writer>(inner: W) -> IoWriteAdapter<W> {
    IoWriteAdapter { inner }
}

impl<W> IoWriteAdapter<W> {
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Writer> Write for IoWriteAdapter<W> {
    fn write(&mut self, src: &[u8]) -> io::Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        self.inner.malloc(src.len())?.copy_from_slice(src);
        Ok(src.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Writer::flush(&mut self.inner)?;
        Ok(())
    }
}
