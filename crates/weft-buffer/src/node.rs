use std::mem;

use bytes::{Bytes, BytesMut};

use crate::BufferPool;

/// 节点内存不归本节点所有（外部注入或由其它读者切出），既不能写入也不能回池。
pub(crate) const READONLY_MASK: u8 = 1 << 0;
/// 节点内存已被零拷贝读出，仍可能有视图引用它，不能回池复用。
pub(crate) const NOCOPY_READ_MASK: u8 = 1 << 1;

/// 节点底层内存。
///
/// - `Owned`：独占的可写内存，`len()` 恒等于可用区域总长；
/// - `Shared`：冻结后的只读内存，通过 `Bytes` 引用计数与零拷贝视图共享。
#[derive(Debug)]
enum Storage {
    Owned(BytesMut),
    Shared(Bytes),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(buf) => buf.as_ref(),
            Storage::Shared(bytes) => bytes.as_ref(),
        }
    }
}

/// `BufferNode` 是 [`LinkBuffer`](crate::LinkBuffer) 链上的一段内存。
///
/// # 教案式说明
/// - **游标 (How)**：`[off, len)` 为已提交可读区，`[len, malloc)` 为已申请未提交区，
///   `malloc` 之后到存储末尾为空闲容量；三者满足 `off <= len <= malloc <= storage.len()`；
/// - **污染标记 (What)**：`READONLY_MASK` 与 `NOCOPY_READ_MASK` 任一置位，节点在回收时都会被丢弃而非回池；
///   两个标记相互独立：前者表示“内存天生不归我管”，后者表示“内存曾被零拷贝借出”；
/// - **共享 (Trade-offs)**：零拷贝借出时节点会把 `BytesMut` 冻结为 `Bytes`，
///   借出的视图依靠引用计数保活，因此即使节点被释放，视图也始终指向有效内存。
#[derive(Debug)]
pub(crate) struct BufferNode {
    storage: Storage,
    off: usize,
    len: usize,
    malloc: usize,
    mode: u8,
}

impl BufferNode {
    /// 以池分配的可写内存构造空节点。
    pub(crate) fn owned(buf: BytesMut) -> Self {
        Self {
            storage: Storage::Owned(buf),
            off: 0,
            len: 0,
            malloc: 0,
            mode: 0,
        }
    }

    /// 以外部内存构造只读节点，全部字节处于“已申请未提交”状态。
    pub(crate) fn readonly(bytes: Bytes) -> Self {
        let malloc = bytes.len();
        Self {
            storage: Storage::Shared(bytes),
            off: 0,
            len: 0,
            malloc,
            mode: READONLY_MASK,
        }
    }

    /// 以外部内存构造只读节点，全部字节立即可读。
    pub(crate) fn readonly_committed(bytes: Bytes) -> Self {
        let mut node = Self::readonly(bytes);
        node.len = node.malloc;
        node
    }

    pub(crate) fn readable(&self) -> usize {
        self.len - self.off
    }

    pub(crate) fn reserved(&self) -> usize {
        self.malloc - self.len
    }

    /// 已申请区的起点（即已提交区的终点），以存储内的绝对位置表示。
    pub(crate) fn reserved_start(&self) -> usize {
        self.len
    }

    /// 剩余可申请容量；只读内存恒为 0。
    pub(crate) fn spare(&self) -> usize {
        match &self.storage {
            Storage::Owned(buf) => buf.len() - self.malloc,
            Storage::Shared(_) => 0,
        }
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.off == self.malloc
    }

    #[cfg(test)]
    pub(crate) fn mode(&self) -> u8 {
        self.mode
    }

    /// 已提交且未读的字节。
    pub(crate) fn chunk(&self) -> &[u8] {
        &self.storage.as_slice()[self.off..self.len]
    }

    /// 从读游标起、长度为 `n` 的视图并推进读游标。调用方保证 `n <= readable()`。
    pub(crate) fn take(&mut self, n: usize) -> &[u8] {
        let start = self.off;
        self.off += n;
        &self.storage.as_slice()[start..start + n]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.off += n;
    }

    /// 申请 `n` 字节可写区域；容量不足或内存只读时返回 `None`。
    pub(crate) fn reserve(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.spare() < n {
            return None;
        }
        let start = self.malloc;
        self.malloc += n;
        match &mut self.storage {
            Storage::Owned(buf) => Some(&mut buf[start..start + n]),
            Storage::Shared(_) => None,
        }
    }

    /// 提交全部已申请字节。
    pub(crate) fn commit(&mut self) {
        self.len = self.malloc;
    }

    /// 撤销可读区的提交状态，使 `[off, malloc)` 整体回到已申请区，供 `append` 转移所有权。
    pub(crate) fn uncommit(&mut self) {
        self.len = self.off;
    }

    /// 仅保留已申请区的前 `keep` 字节。
    pub(crate) fn trim_reserved(&mut self, keep: usize) {
        self.malloc = self.len + keep;
    }

    /// 零拷贝借出接下来的 `n` 个可读字节，并为节点打上 nocopy-read 标记。
    pub(crate) fn share(&mut self, n: usize) -> Bytes {
        let frozen = self.freeze();
        let view = frozen.slice(self.off..self.off + n);
        self.off += n;
        self.mode |= NOCOPY_READ_MASK;
        view
    }

    /// 在绝对位置 `at` 处把节点一分为二，返回尾部节点。
    ///
    /// 要求 `len <= at <= malloc`：拆分点只能落在已申请未提交区。头部保留 `[0, at)` 且不再有空闲容量，
    /// 尾部接管 `[at, malloc)` 的已申请字节以及原节点剩余的空闲容量。
    pub(crate) fn split_reserved(&mut self, at: usize) -> BufferNode {
        let tail_storage = match &mut self.storage {
            Storage::Owned(buf) => Storage::Owned(buf.split_off(at)),
            Storage::Shared(bytes) => Storage::Shared(bytes.split_off(at)),
        };
        let tail = BufferNode {
            storage: tail_storage,
            off: 0,
            len: 0,
            malloc: self.malloc - at,
            mode: self.mode,
        };
        self.malloc = at;
        tail
    }

    /// 读写游标归零以便原地复用。仅对未被污染的独占节点生效。
    pub(crate) fn rewind(&mut self) -> bool {
        if self.mode != 0 || !matches!(self.storage, Storage::Owned(_)) {
            return false;
        }
        self.off = 0;
        self.len = 0;
        self.malloc = 0;
        true
    }

    /// 释放节点：未污染的独占内存回池，其余交给引用计数回收。
    pub(crate) fn recycle(self, pool: &BufferPool) {
        if self.mode != 0 {
            return;
        }
        if let Storage::Owned(buf) = self.storage {
            pool.free(buf);
        }
    }

    /// 将独占内存冻结为共享态并返回一份引用计数句柄。
    fn freeze(&mut self) -> Bytes {
        let frozen = match mem::replace(&mut self.storage, Storage::Shared(Bytes::new())) {
            Storage::Owned(buf) => buf.freeze(),
            Storage::Shared(bytes) => bytes,
        };
        self.storage = Storage::Shared(frozen.clone());
        frozen
    }
}
