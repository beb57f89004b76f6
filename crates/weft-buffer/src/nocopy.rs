use bytes::Bytes;

use crate::{LinkBuffer, Result};

/// 小于该长度的 `write_binary`/`write_string` 负载直接拷贝进申请区，
/// 不小于该长度时以只读节点零拷贝挂入；`read_binary` 也据此决定是否零拷贝借出。
pub const MIN_REUSE_BYTES: usize = 64;

/// `Reader` 是零拷贝读取操作的集合。
///
/// # 教案式说明
/// - **意图 (Why)**：解码器按“凑够 n 字节再处理”的节奏消费数据，
///   因此推荐把实现做成阻塞式：可读字节不足时等待，而不是返回残缺结果；
/// - **契约 (What)**：
///   - `next`/`peek`/`until` 返回借用视图，生命周期绑定在 `&mut self` 上，
///     下一次可变调用（包括 [`Reader::release`]）之前视图必然失效，编译器据此拒绝释放后使用；
///   - `read_binary`/`read_string` 返回独立数据，不受后续 `release` 影响；
///   - 任一方法要么恰好返回请求的字节数，要么返回错误，绝不静默返回部分结果；
/// - **实现提示 (How)**：内存实现在数据不足时返回 [`BufferError::InsufficientData`](crate::BufferError::InsufficientData)，
///   包装 `io::Read` 的实现会持续拉取直到满足或遇到 EOF。
pub trait Reader {
    /// 读取接下来的 `n` 个字节并前进读游标。视图在下一次可变调用前有效。
    fn next(&mut self, n: usize) -> Result<&[u8]>;

    /// 读取接下来的 `n` 个字节但不前进读游标。
    fn peek(&mut self, n: usize) -> Result<&[u8]>;

    /// 跳过接下来的 `n` 个字节。
    fn skip(&mut self, n: usize) -> Result<()>;

    /// 读取直到首次出现 `delim`（包含分隔符）。
    ///
    /// 找不到分隔符时不消费任何数据并返回错误。
    fn until(&mut self, delim: u8) -> Result<&[u8]>;

    /// 读取 `n` 个字节并转换为独立的 `String`。
    fn read_string(&mut self, n: usize) -> Result<String>;

    /// 读取 `n` 个字节为独立的 `Bytes`，不受后续 `release` 影响。
    fn read_binary(&mut self, n: usize) -> Result<Bytes>;

    /// 读取单个字节。
    fn read_byte(&mut self) -> Result<u8>;

    /// 以零拷贝方式切出接下来的 `n` 个字节组成新的读者，并释放当前读者已读的内存。
    ///
    /// 等价于“先 `next(n)`，再以该视图构造新读者，最后 `release()`”。
    fn slice(&mut self, n: usize) -> Result<LinkBuffer>;

    /// 归还所有已读数据占用的内存。此前通过 `next`/`peek`/`until` 取得的视图全部失效。
    fn release(&mut self) -> Result<()>;

    /// 当前可读字节数。
    fn len(&self) -> usize;

    /// 没有可读字节时返回 `true`。
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `Writer` 是零拷贝写入操作的集合。
///
/// # 教案式说明
/// - **意图 (Why)**：两段式协议：先 `malloc` 申请一段内存、填充，再 `flush` 提交；
///   只有提交后的数据才会被读取或发送；
/// - **契约 (What)**：
///   - `malloc` 返回的切片在下一次可变调用前有效，必须在此之前写满；
///   - `write_binary`/`write_string` 接管调用方内存的所有权，不做拷贝（小负载除外），
///     `Bytes` 的不可变性保证提交前内容不会被篡改；
///   - `append` 消费另一个 `LinkBuffer`，被追加方随之失效；
/// - **注意事项 (Trade-offs)**：写入方是单线程语义，跨线程共享需由调用方加锁（例如连接层的写锁）。
pub trait Writer {
    /// 申请 `n` 字节可写空间，提交后才会生效。
    fn malloc(&mut self, n: usize) -> Result<&mut [u8]>;

    /// 写入字符串，复用其堆内存而不拷贝。
    fn write_string(&mut self, s: String) -> Result<usize>;

    /// 写入二进制数据，复用其内存而不拷贝。
    fn write_binary(&mut self, b: Bytes) -> Result<usize>;

    /// 写入单个字节。
    fn write_byte(&mut self, b: u8) -> Result<()>;

    /// 在当前待提交流中插入一段外部内存，并让最近申请区的末尾 `remain_cap` 字节排在它之后。
    ///
    /// 例如原计划是：
    ///
    /// ```text
    /// malloc(na); write_binary(b); malloc(nb);
    /// ```
    ///
    /// 可以改写为 `malloc(na + nb)`，写满后调用 `write_direct(b, nb)`，
    /// 此时前 `na` 字节、`b`、后 `nb` 字节依次进入发送流。
    fn write_direct(&mut self, p: Bytes, remain_cap: usize) -> Result<()>;

    /// 仅保留已申请区的前 `n` 个字节，丢弃其余部分。
    fn malloc_ack(&mut self, n: usize) -> Result<()>;

    /// 将另一个缓冲的全部内容零拷贝地追加到尾部。
    fn append(&mut self, other: LinkBuffer) -> Result<()>;

    /// 提交全部已申请数据。
    fn flush(&mut self) -> Result<()>;

    /// 已申请但尚未提交的字节数。
    fn malloc_len(&self) -> usize;
}

/// 同时具备读写能力的组合契约。
pub trait ReadWriter: Reader + Writer {}

impl<T> ReadWriter for T where T: Reader + Writer {}
