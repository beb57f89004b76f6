//! 写合并队列契约测试共用的桩件：可记录、可注入故障的连接，以及可控的任务调度器。
#![allow(dead_code)]

use std::{
    borrow::Cow,
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use bytes::Bytes;
use weft_buffer::{BufferError, LinkBuffer, Reader, Writer};
use weft_mux::{Task, TaskRunner, WriterGetter};
use weft_transport::{Connection, TransportError};

#[derive(Default)]
struct Recording {
    buf: LinkBuffer,
    wire: Vec<u8>,
    flushes: usize,
    appends: usize,
    fail_append_at: Option<usize>,
    fail_flush: bool,
}

/// 把每次 `flush` 的数据记录到内存的连接。
///
/// `with_writer` 在加锁前登记进入次数，若发现已有调用在执行，则记为一次“重叠”，
/// 用来观察是否出现了并发的排空任务。
#[derive(Default)]
pub struct RecordingConnection {
    recording: Mutex<Recording>,
    active: AtomicBool,
    closes: AtomicUsize,
    entered: AtomicUsize,
    overlaps: AtomicUsize,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// 第 `n` 次（从 1 计数）`append` 返回错误。
    pub fn failing_append_at(self, n: usize) -> Self {
        self.lock().fail_append_at = Some(n);
        self
    }

    /// 每次 `flush` 均返回错误。
    pub fn failing_flush(self) -> Self {
        self.lock().fail_flush = true;
        self
    }

    pub fn wire(&self) -> Vec<u8> {
        self.lock().wire.clone()
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    pub fn appends(&self) -> usize {
        self.lock().appends
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        // 获取器在写锁内 panic 会使锁中毒，记录数据本身仍然可用。
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Connection for RecordingConnection {
    fn with_writer<R>(&self, f: impl FnOnce(&mut dyn Writer) -> R) -> R {
        if self.entered.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let _entered = Entered(&self.entered);
        let mut recording = self.lock();
        let mut writer = RecordingWriter {
            rec: &mut *recording,
        };
        f(&mut writer)
    }

    fn close(&self) -> weft_transport::Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed("recording")
    }
}

/// 离开 `with_writer` 时（包括展开）归还进入计数。
struct Entered<'a>(&'a AtomicUsize);

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RecordingWriter<'a> {
    rec: &'a mut Recording,
}

impl Writer for RecordingWriter<'_> {
    fn malloc(&mut self, n: usize) -> weft_buffer::Result<&mut [u8]> {
        self.rec.buf.malloc(n)
    }

    fn write_string(&mut self, s: String) -> weft_buffer::Result<usize> {
        self.rec.buf.write_string(s)
    }

    fn write_binary(&mut self, b: Bytes) -> weft_buffer::Result<usize> {
        self.rec.buf.write_binary(b)
    }

    fn write_byte(&mut self, b: u8) -> weft_buffer::Result<()> {
        self.rec.buf.write_byte(b)
    }

    fn write_direct(&mut self, p: Bytes, remain_cap: usize) -> weft_buffer::Result<()> {
        self.rec.buf.write_direct(p, remain_cap)
    }

    fn malloc_ack(&mut self, n: usize) -> weft_buffer::Result<()> {
        self.rec.buf.malloc_ack(n)
    }

    fn append(&mut self, other: LinkBuffer) -> weft_buffer::Result<()> {
        self.rec.appends += 1;
        if self.rec.fail_append_at == Some(self.rec.appends) {
            return Err(BufferError::InvalidArgument(Cow::Borrowed("injected append failure")));
        }
        self.rec.buf.append(other)
    }

    fn flush(&mut self) -> weft_buffer::Result<()> {
        if self.rec.fail_flush {
            return Err(BufferError::InvalidArgument(Cow::Borrowed("injected flush failure")));
        }
        self.rec.buf.flush()?;
        self.rec.flushes += 1;
        let n = self.rec.buf.len();
        if n > 0 {
            let chunk = self.rec.buf.next(n)?;
            self.rec.wire.extend_from_slice(chunk);
        }
        self.rec.buf.release()
    }

    fn malloc_len(&self) -> usize {
        self.rec.buf.malloc_len()
    }
}

/// 直接返回给定字节的获取器。
pub fn payload(bytes: impl Into<Bytes>) -> WriterGetter {
    let bytes = bytes.into();
    Box::new(move || Some(LinkBuffer::from_bytes(bytes)))
}

/// 求值时计数的获取器。
pub fn counting(counter: &Arc<AtomicUsize>, bytes: impl Into<Bytes>) -> WriterGetter {
    let counter = Arc::clone(counter);
    let bytes = bytes.into();
    Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Some(LinkBuffer::from_bytes(bytes))
    })
}

/// 表示“无需写出”的获取器。
pub fn nothing() -> WriterGetter {
    Box::new(|| None)
}

/// 只排队不执行的调度器，由测试线程手动驱动任务。
#[derive(Default)]
pub struct ManualRunner {
    tasks: Mutex<VecDeque<Task>>,
}

impl ManualRunner {
    pub fn pending(&self) -> usize {
        self.tasks.lock().expect("任务队列锁不应中毒").len()
    }

    pub fn run_next(&self) -> bool {
        let task = self.tasks.lock().expect("任务队列锁不应中毒").pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// 执行全部任务（包括执行期间新提交的任务），返回执行数量。
    pub fn run_all(&self) -> usize {
        let mut executed = 0;
        while self.run_next() {
            executed += 1;
        }
        executed
    }
}

impl TaskRunner for ManualRunner {
    fn run(&self, task: Task) {
        self.tasks.lock().expect("任务队列锁不应中毒").push_back(task);
    }
}

/// 每个任务一个新线程。
pub fn thread_runner() -> Arc<dyn TaskRunner> {
    Arc::new(|task: Task| {
        thread::spawn(task);
    })
}

/// 在提交线程上立即执行任务。
pub fn inline_runner() -> Arc<dyn TaskRunner> {
    Arc::new(|task: Task| task())
}
