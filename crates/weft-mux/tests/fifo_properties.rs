//! 排序性质：同一分片内按提交顺序求值，跨分片按触发顺序求值。
#![cfg(not(any(loom, weft_loom)))]

mod support;

use std::sync::Arc;

use proptest::prelude::*;
use weft_mux::ShardQueue;

use support::{ManualRunner, RecordingConnection, payload};

#[derive(Clone, Debug)]
enum Step {
    /// 一次 `add`，携带若干个单字节载荷。
    Add(Vec<u8>),
    /// 执行当前排队的全部排空任务。
    Drain,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => proptest::collection::vec(any::<u8>(), 1..4).prop_map(Step::Add),
        1 => Just(Step::Drain),
    ]
}

/// 参照模型：轮转选分片，由空变非空时记录触发顺序，排空时按触发顺序输出各分片内容。
struct Model {
    shards: Vec<Vec<u8>>,
    triggered: Vec<usize>,
    cursor: usize,
    wire: Vec<u8>,
}

impl Model {
    fn new(size: usize) -> Self {
        Self {
            shards: vec![Vec::new(); size],
            triggered: Vec::new(),
            cursor: 0,
            wire: Vec::new(),
        }
    }

    fn add(&mut self, items: &[u8]) {
        let shard = self.cursor % self.shards.len();
        self.cursor += 1;
        if self.shards[shard].is_empty() {
            self.triggered.push(shard);
        }
        self.shards[shard].extend_from_slice(items);
    }

    fn drain(&mut self) {
        for shard in self.triggered.drain(..) {
            self.wire.append(&mut self.shards[shard]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn drained_bytes_follow_shard_fifo_and_trigger_order(
        size in 1usize..5,
        steps in proptest::collection::vec(step(), 1..40),
    ) {
        let conn = Arc::new(RecordingConnection::new());
        let runner = Arc::new(ManualRunner::default());
        let queue = ShardQueue::with_shards(size, Arc::clone(&conn), runner.clone())
            .expect("构造队列");
        let mut model = Model::new(size);

        for step in &steps {
            match step {
                Step::Add(items) => {
                    queue.add(items.iter().map(|byte| payload(vec![*byte])));
                    model.add(items);
                }
                Step::Drain => {
                    runner.run_all();
                    model.drain();
                }
            }
            prop_assert!(runner.pending() <= 1);
        }
        runner.run_all();
        model.drain();

        prop_assert_eq!(conn.wire(), model.wire);
    }
}
