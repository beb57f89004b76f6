//! 分片写合并队列吞吐基准：多生产者并发 `add`，随后 `close` 等待排空完成。
//!
//! 连接端只做内存追加，基准衡量的是分片加锁、触发调度与合并刷新本身的开销。

use std::{
    borrow::Cow,
    hint::black_box,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use weft_buffer::{LinkBuffer, Reader, Writer};
use weft_mux::{ShardQueue, Task, TaskRunner, WriterGetter};
use weft_transport::Connection;

/// 刷新时直接丢弃数据的连接。
struct NullConnection {
    buf: Mutex<LinkBuffer>,
    active: AtomicBool,
}

impl Connection for NullConnection {
    fn with_writer<R>(&self, f: impl FnOnce(&mut dyn Writer) -> R) -> R {
        let mut buf = match self.buf.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcome = f(&mut *buf);
        let flushed = Reader::len(&*buf);
        if flushed > 0 {
            let _ = buf.skip(flushed);
            let _ = buf.release();
        }
        outcome
    }

    fn close(&self) -> weft_transport::Result<()> {
        self.active.store(false, Ordering::Release);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn id(&self) -> Cow<'_, str> {
        Cow::Borrowed("null")
    }
}

fn thread_runner() -> Arc<dyn TaskRunner> {
    Arc::new(|task: Task| {
        thread::spawn(task);
    })
}

fn concurrent_add(c: &mut Criterion) {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 1_000;
    let frame = Bytes::from_static(&[0x5a; 128]);

    c.bench_function("shard_queue/4x1000_adds_then_close", |b| {
        b.iter(|| {
            let conn = Arc::new(NullConnection {
                buf: Mutex::new(LinkBuffer::new()),
                active: AtomicBool::new(true),
            });
            let queue = ShardQueue::with_shards(PRODUCERS, conn, thread_runner())
                .expect("构造队列");
            thread::scope(|scope| {
                for _ in 0..PRODUCERS {
                    scope.spawn(|| {
                        for _ in 0..PER_PRODUCER {
                            let frame = frame.clone();
                            let getter: WriterGetter =
                                Box::new(move || Some(LinkBuffer::from_bytes(frame)));
                            queue.add([getter]);
                        }
                    });
                }
            });
            black_box(queue.close()).expect("首次关闭成功");
        });
    });
}

criterion_group!(benches, concurrent_add);
criterion_main!(benches);
