use std::{
    collections::VecDeque,
    fmt,
    io::{self, IoSlice},
    mem,
    sync::Arc,
};

use bytes::{Bytes, BytesMut};

use crate::{
    BufferError, BufferPool, MIN_REUSE_BYTES, Reader, Result, Writer, node::BufferNode,
};

/// `LinkBuffer` 以节点链实现 [`Reader`] 与 [`Writer`]，是写路径上的标准缓冲。
///
/// # 设计动机（Why）
/// - 生产者在各自线程里 `malloc`/填充/`write_binary`，最终把整个缓冲交给连接的写端 `append`，
///   全程只移动节点所有权，不拷贝负载；
/// - 读侧单节点内的请求直接返回节点视图，跨节点请求才借一块池内缓存拼接，`release` 时统一归还。
///
/// # 架构关系（How）
/// - `nodes` 依次排列：已读完待释放的节点、含已提交数据的节点、仅含已申请数据的节点；
///   已提交区始终是链的前缀，`flush` 把全部已申请区一次性转为已提交；
/// - `readable` 与 `malloc_size` 分别缓存已提交未读、已申请未提交的字节数，
///   所有操作都保持“各节点对应区间之和等于缓存值”的不变量；
/// - 节点内存来自 `pool`，释放时根据污染标记决定回池还是交给引用计数。
///
/// # 契约说明（What）
/// - 视图生命周期绑定在 `&mut self` 上，`release` 之后继续使用旧视图无法通过编译：
///
/// ```compile_fail
/// use weft_buffer::{LinkBuffer, Reader, Writer};
///
/// let mut buf = LinkBuffer::new();
/// buf.malloc(4).unwrap().copy_from_slice(b"ping");
/// buf.flush().unwrap();
/// let view = buf.next(4).unwrap();
/// buf.release().unwrap();
/// assert_eq!(view, b"ping");
/// ```
///
/// - 同一个 `LinkBuffer` 不是线程安全的写入目标，跨线程共享时需外部加锁。
///
/// # 风险与取舍（Trade-offs）
/// - 跨节点的 `next`/`peek` 需要一次拷贝；解码器若频繁跨节点读取，应改用 `skip` 或 `read_binary`；
/// - `read_binary` 对大块数据零拷贝借出，会让所在节点永久失去回池资格。
pub struct LinkBuffer {
    nodes: VecDeque<BufferNode>,
    readable: usize,
    malloc_size: usize,
    caches: Vec<BytesMut>,
    pool: Arc<BufferPool>,
}

impl Default for LinkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LinkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkBuffer")
            .field("nodes", &self.nodes.len())
            .field("readable", &self.readable)
            .field("malloc_size", &self.malloc_size)
            .field("caches", &self.caches.len())
            .finish()
    }
}

impl LinkBuffer {
    /// 使用进程级共享池创建空缓冲。
    pub fn new() -> Self {
        Self::with_pool(BufferPool::shared())
    }

    /// 使用指定的池创建空缓冲。
    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        Self {
            nodes: VecDeque::new(),
            readable: 0,
            malloc_size: 0,
            caches: Vec::new(),
            pool,
        }
    }

    /// 以外部内存构造一个立即可读的缓冲，内存以只读节点挂入，不会回池。
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let mut buffer = Self::new();
        if !bytes.is_empty() {
            buffer.readable = bytes.len();
            buffer.nodes.push_back(BufferNode::readonly_committed(bytes));
        }
        buffer
    }

    /// 节点内存所属的池。
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// 以 `IoSlice` 形式列出全部已提交未读数据，供向量化写入使用。
    pub fn readable_slices(&self) -> Vec<IoSlice<'_>> {
        self.nodes
            .iter()
            .map(BufferNode::chunk)
            .filter(|chunk| !chunk.is_empty())
            .map(IoSlice::new)
            .collect()
    }

    /// 把全部已提交数据写入 `sink`，随后释放已读内存，返回写出的字节数。
    pub fn write_to<W>(&mut self, sink: &mut W) -> Result<usize>
    where
        W: io::Write + ?Sized,
    {
        let mut written = 0;
        while self.readable > 0 {
            let outcome = {
                let slices = self.readable_slices();
                sink.write_vectored(&slices)
            };
            match outcome {
                Ok(0) => {
                    return Err(BufferError::io(
                        "write_to",
                        io::Error::from(io::ErrorKind::WriteZero),
                    ));
                }
                Ok(n) => {
                    self.skip(n)?;
                    written += n;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(BufferError::io("write_to", err)),
            }
        }
        self.release()?;
        Ok(written)
    }

    /// 已提交数据中首个 `delim` 相对读游标的偏移。
    pub(crate) fn index_of(&self, delim: u8) -> Option<usize> {
        let mut base = 0;
        for node in &self.nodes {
            let chunk = node.chunk();
            if let Some(pos) = chunk.iter().position(|&b| b == delim) {
                return Some(base + pos);
            }
            base += chunk.len();
        }
        None
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.readable {
            return Err(BufferError::InsufficientData {
                requested: n,
                available: self.readable,
            });
        }
        Ok(())
    }

    /// 首个仍有已提交未读数据的节点下标。
    fn read_index(&self, requested: usize) -> Result<usize> {
        self.nodes
            .iter()
            .position(|node| node.readable() > 0)
            .ok_or(BufferError::InsufficientData {
                requested,
                available: self.readable,
            })
    }

    /// 从读游标起拷贝 `dst.len()` 个字节，`consume` 为真时同时推进各节点读游标。
    fn gather(&mut self, dst: &mut [u8], consume: bool) {
        let mut filled = 0;
        for node in self.nodes.iter_mut() {
            if filled == dst.len() {
                break;
            }
            let chunk = node.chunk();
            let take = chunk.len().min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&chunk[..take]);
            if consume {
                node.advance(take);
            }
            filled += take;
        }
    }

    /// 跨节点读取时借一块池内缓存拼接数据，缓存在 `release` 时归还。
    fn cached(&mut self, n: usize, consume: bool) -> &[u8] {
        let mut cache = self.pool.malloc(n, n);
        self.gather(&mut cache, consume);
        let slot = self.caches.len();
        self.caches.push(cache);
        &self.caches[slot]
    }
}

impl Reader for LinkBuffer {
    fn next(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        if n == 0 {
            return Ok(&[]);
        }
        let index = self.read_index(n)?;
        self.readable -= n;
        if self.nodes[index].readable() >= n {
            return Ok(self.nodes[index].take(n));
        }
        Ok(self.cached(n, true))
    }

    fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        if n == 0 {
            return Ok(&[]);
        }
        let index = self.read_index(n)?;
        if self.nodes[index].readable() >= n {
            return Ok(&self.nodes[index].chunk()[..n]);
        }
        Ok(self.cached(n, false))
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        let mut remaining = n;
        for node in self.nodes.iter_mut() {
            if remaining == 0 {
                break;
            }
            let take = node.readable().min(remaining);
            node.advance(take);
            remaining -= take;
        }
        self.readable -= n;
        Ok(())
    }

    fn until(&mut self, delim: u8) -> Result<&[u8]> {
        let pos = self
            .index_of(delim)
            .ok_or(BufferError::InsufficientData {
                requested: self.readable + 1,
                available: self.readable,
            })?;
        self.next(pos + 1)
    }

    fn read_string(&mut self, n: usize) -> Result<String> {
        let raw = self.peek(n)?.to_vec();
        let text = String::from_utf8(raw).map_err(BufferError::InvalidUtf8)?;
        self.skip(n)?;
        Ok(text)
    }

    fn read_binary(&mut self, n: usize) -> Result<Bytes> {
        self.ensure(n)?;
        if n == 0 {
            return Ok(Bytes::new());
        }
        let index = self.read_index(n)?;
        if n >= MIN_REUSE_BYTES && self.nodes[index].readable() >= n {
            self.readable -= n;
            return Ok(self.nodes[index].share(n));
        }
        Ok(Bytes::copy_from_slice(self.next(n)?))
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.next(1)?[0])
    }

    fn slice(&mut self, n: usize) -> Result<LinkBuffer> {
        self.ensure(n)?;
        let mut sliced = LinkBuffer::with_pool(Arc::clone(&self.pool));
        let mut remaining = n;
        for node in self.nodes.iter_mut() {
            if remaining == 0 {
                break;
            }
            let take = node.readable().min(remaining);
            if take == 0 {
                continue;
            }
            sliced
                .nodes
                .push_back(BufferNode::readonly_committed(node.share(take)));
            remaining -= take;
        }
        self.readable -= n;
        sliced.readable = n;
        self.release()?;
        Ok(sliced)
    }

    fn release(&mut self) -> Result<()> {
        for cache in self.caches.drain(..) {
            self.pool.free(cache);
        }
        loop {
            let single = self.nodes.len() == 1;
            let Some(front) = self.nodes.front_mut() else {
                break;
            };
            if !front.is_consumed() {
                break;
            }
            if single && front.rewind() {
                break;
            }
            if let Some(node) = self.nodes.pop_front() {
                node.recycle(&self.pool);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.readable
    }
}

impl Writer for LinkBuffer {
    fn malloc(&mut self, n: usize) -> Result<&mut [u8]> {
        if n == 0 {
            return Ok(&mut []);
        }
        let fits = self.nodes.back().is_some_and(|node| node.spare() >= n);
        if !fits {
            let capacity = n.max(self.pool.config().page_size);
            let buf = self.pool.malloc(capacity, capacity);
            self.nodes.push_back(BufferNode::owned(buf));
        }
        self.malloc_size += n;
        self.nodes
            .back_mut()
            .and_then(|node| node.reserve(n))
            .ok_or_else(|| BufferError::invalid("新建节点的容量不足以满足 malloc"))
    }

    fn write_string(&mut self, s: String) -> Result<usize> {
        self.write_binary(Bytes::from(s))
    }

    fn write_binary(&mut self, b: Bytes) -> Result<usize> {
        let n = b.len();
        if n == 0 {
            return Ok(0);
        }
        if n < MIN_REUSE_BYTES {
            self.malloc(n)?.copy_from_slice(&b);
            return Ok(n);
        }
        self.nodes.push_back(BufferNode::readonly(b));
        self.malloc_size += n;
        Ok(n)
    }

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.malloc(1)?[0] = b;
        Ok(())
    }

    fn write_direct(&mut self, p: Bytes, remain_cap: usize) -> Result<()> {
        if remain_cap > self.malloc_size {
            return Err(BufferError::invalid(format!(
                "write_direct 的 remain_cap {remain_cap} 超过已申请长度 {}",
                self.malloc_size
            )));
        }
        let n = p.len();
        if n == 0 {
            return Ok(());
        }
        // 拆分点之前应保留的已申请字节数。
        let mut before = self.malloc_size - remain_cap;
        let mut split = None;
        for (index, node) in self.nodes.iter().enumerate() {
            let reserved = node.reserved();
            if before < reserved {
                split = Some((index, node.reserved_start() + before));
                break;
            }
            before -= reserved;
        }
        let data = BufferNode::readonly(p);
        match split {
            Some((index, at)) => {
                let tail = self.nodes[index].split_reserved(at);
                self.nodes.insert(index + 1, data);
                self.nodes.insert(index + 2, tail);
            }
            None => self.nodes.push_back(data),
        }
        self.malloc_size += n;
        Ok(())
    }

    fn malloc_ack(&mut self, n: usize) -> Result<()> {
        if n > self.malloc_size {
            return Err(BufferError::invalid(format!(
                "malloc_ack({n}) 超过已申请长度 {}",
                self.malloc_size
            )));
        }
        let mut keep = n;
        for node in self.nodes.iter_mut() {
            let reserved = node.reserved();
            if keep >= reserved {
                keep -= reserved;
            } else {
                node.trim_reserved(keep);
                keep = 0;
            }
        }
        self.malloc_size = n;
        Ok(())
    }

    fn append(&mut self, mut other: LinkBuffer) -> Result<()> {
        for cache in other.caches.drain(..) {
            other.pool.free(cache);
        }
        let moved = other.readable + other.malloc_size;
        for mut node in mem::take(&mut other.nodes) {
            if node.is_consumed() {
                node.recycle(&other.pool);
                continue;
            }
            node.uncommit();
            self.nodes.push_back(node);
        }
        other.readable = 0;
        other.malloc_size = 0;
        self.malloc_size += moved;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.malloc_size == 0 {
            return Ok(());
        }
        for node in self.nodes.iter_mut() {
            node.commit();
        }
        self.readable += self.malloc_size;
        self.malloc_size = 0;
        Ok(())
    }

    fn malloc_len(&self) -> usize {
        self.malloc_size
    }
}

impl Drop for LinkBuffer {
    fn drop(&mut self) {
        for cache in self.caches.drain(..) {
            self.pool.free(cache);
        }
        for node in self.nodes.drain(..) {
            node.recycle(&self.pool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PoolConfig;

    fn filled(payload: &[u8]) -> LinkBuffer {
        let mut buf = LinkBuffer::new();
        buf.malloc(payload.len())
            .expect("申请空间")
            .copy_from_slice(payload);
        buf.flush().expect("提交");
        buf
    }

    #[test]
    fn malloc_is_invisible_until_flush() {
        let mut buf = LinkBuffer::new();
        buf.malloc(3).expect("申请空间").copy_from_slice(b"abc");
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.malloc_len(), 3);
        assert!(buf.next(1).is_err());
        buf.flush().expect("提交");
        assert_eq!(buf.malloc_len(), 0);
        assert_eq!(buf.next(3).expect("读取"), b"abc");
    }

    #[test]
    fn reads_spanning_nodes_are_stitched() {
        let mut buf = LinkBuffer::new();
        buf.write_binary(Bytes::from(vec![b'a'; 70])).expect("写入");
        buf.malloc(2).expect("申请空间").copy_from_slice(b"bc");
        buf.flush().expect("提交");

        let peeked = buf.peek(72).expect("跨节点 peek").to_vec();
        assert_eq!(&peeked[68..], b"aabc");
        assert_eq!(buf.len(), 72);
        buf.skip(69).expect("跳过");
        assert_eq!(buf.next(3).expect("跨节点 next"), b"abc");
        assert!(buf.is_empty());
    }

    #[test]
    fn until_includes_delimiter_and_keeps_rest() {
        let mut buf = filled(b"GET /\r\nrest");
        assert_eq!(buf.until(b'\n').expect("查找分隔符"), b"GET /\r\n");
        assert_eq!(buf.len(), 4);
        let err = buf.until(b'\n').expect_err("没有分隔符");
        assert!(err.is_exhausted());
        assert_eq!(buf.len(), 4, "失败时不应消费数据");
    }

    #[test]
    fn read_string_validates_utf8_without_consuming_on_error() {
        let mut buf = filled(&[0xff, 0xfe]);
        let err = buf.read_string(2).expect_err("非法 UTF-8");
        assert_eq!(err.code(), "buffer.invalid_utf8");
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.read_byte().expect("读取单字节"), 0xff);
    }

    #[test]
    fn malloc_ack_discards_tail_of_reservation() {
        let mut buf = LinkBuffer::new();
        buf.malloc(8).expect("申请空间")[..5].copy_from_slice(b"hello");
        buf.malloc_ack(5).expect("截断申请区");
        buf.flush().expect("提交");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.read_string(5).expect("读取"), "hello");
        assert!(buf.malloc_ack(1).is_err());
    }

    #[test]
    fn write_direct_interleaves_external_chunk() {
        let mut buf = LinkBuffer::new();
        buf.malloc(8).expect("申请空间").copy_from_slice(b"AAAABBBB");
        buf.write_direct(Bytes::from_static(b"xx"), 4)
            .expect("插入外部内存");
        assert_eq!(buf.malloc_len(), 10);
        buf.flush().expect("提交");
        assert_eq!(buf.next(10).expect("读取"), b"AAAAxxBBBB");
    }

    #[test]
    fn write_direct_rejects_oversized_remainder() {
        let mut buf = LinkBuffer::new();
        buf.malloc(2).expect("申请空间");
        let err = buf
            .write_direct(Bytes::from_static(b"x"), 3)
            .expect_err("remain_cap 越界");
        assert_eq!(err.code(), "buffer.invalid_argument");
    }

    #[test]
    fn append_moves_pending_and_committed_content() {
        let mut target = filled(b"head-");
        target.skip(5).expect("读完头部");
        let mut source = filled(b"body-");
        source.malloc(4).expect("申请空间").copy_from_slice(b"tail");

        target.append(source).expect("追加");
        assert_eq!(target.len(), 0);
        assert_eq!(target.malloc_len(), 9);
        target.flush().expect("提交");
        assert_eq!(target.next(9).expect("读取"), b"body-tail");
    }

    #[test]
    fn release_returns_consumed_nodes_to_pool() {
        let pool = Arc::new(
            BufferPool::new(PoolConfig {
                page_size: 64,
                ..PoolConfig::default()
            })
            .expect("合法配置"),
        );
        let mut buf = LinkBuffer::with_pool(Arc::clone(&pool));
        buf.malloc(64).expect("申请空间").fill(1);
        buf.malloc(64).expect("申请空间").fill(2);
        buf.flush().expect("提交");
        buf.skip(128).expect("读完");
        buf.release().expect("释放");
        let stats = pool.statistics();
        assert_eq!(stats.free_slots, 1, "首个节点回池，末尾节点原地复用");
        assert_eq!(stats.active_leases, 1);
    }

    #[test]
    fn read_binary_large_is_immune_to_release() {
        let pool = Arc::new(BufferPool::default());
        let mut buf = LinkBuffer::with_pool(Arc::clone(&pool));
        buf.malloc(128).expect("申请空间").fill(7);
        buf.flush().expect("提交");
        let owned = buf.read_binary(100).expect("零拷贝读取");
        buf.skip(28).expect("读完");
        buf.release().expect("释放");
        drop(buf);
        assert_eq!(owned.len(), 100);
        assert!(owned.iter().all(|&b| b == 7));
        assert_eq!(pool.statistics().free_slots, 0, "被借出的节点不应回池");
    }

    #[test]
    fn slice_shares_memory_and_releases_source() {
        let mut buf = filled(b"0123456789");
        buf.skip(2).expect("跳过前缀");
        let mut sliced = buf.slice(5).expect("切片");
        assert_eq!(sliced.len(), 5);
        assert_eq!(buf.len(), 3);
        assert_eq!(sliced.next(5).expect("读取切片"), b"23456");
        assert_eq!(buf.next(3).expect("读取剩余"), b"789");
    }

    #[test]
    fn write_to_drains_committed_bytes() {
        let mut buf = filled(b"ping");
        buf.write_binary(Bytes::from(vec![b'!'; 64])).expect("写入");
        buf.flush().expect("提交");
        let mut sink = Vec::new();
        assert_eq!(buf.write_to(&mut sink).expect("写出"), 68);
        assert_eq!(&sink[..4], b"ping");
        assert!(buf.is_empty());
    }
}
