//! 端到端：多个生产者经写合并队列向真实 TCP 连接提交帧，对端完整收到每一帧。
#![cfg(not(any(loom, weft_loom)))]

use std::sync::Arc;

use tokio::{io::AsyncReadExt, net::TcpListener};
use weft_buffer::{LinkBuffer, Writer};
use weft_mux::{QueueState, ShardQueue, TokioRunner, WriterGetter};
use weft_transport::{Connection, TcpConnection};

const PRODUCERS: usize = 4;
const FRAMES: usize = 250;

fn frame(producer: usize, seq: usize) -> String {
    format!("p{producer}:{seq:04};")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn producers_frames_arrive_exactly_once() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("绑定监听端口");
    let addr = listener.local_addr().expect("读取监听地址");
    let (conn, accepted) = tokio::join!(TcpConnection::connect(addr), listener.accept());
    let conn = Arc::new(conn.expect("建立连接"));
    let (mut peer, _) = accepted.expect("接受连接");

    let reader = tokio::spawn(async move {
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.expect("读取对端数据");
        received
    });

    let runner = TokioRunner::current().expect("处于运行时内");
    let queue = ShardQueue::with_shards(3, Arc::clone(&conn), Arc::new(runner)).expect("构造队列");

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = queue.clone();
            tokio::task::spawn_blocking(move || {
                for seq in 0..FRAMES {
                    let text = frame(producer, seq);
                    let getter: WriterGetter = Box::new(move || {
                        let mut buf = LinkBuffer::new();
                        buf.write_string(text).ok()?;
                        Some(buf)
                    });
                    queue.add([getter]);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.expect("生产者不应 panic");
    }

    let closer = queue.clone();
    tokio::task::spawn_blocking(move || closer.close())
        .await
        .expect("关闭任务不应 panic")
        .expect("首次关闭成功");
    assert_eq!(queue.state(), QueueState::Closed);
    queue.connection().close().expect("关闭连接");

    let received = String::from_utf8(reader.await.expect("读任务不应 panic")).expect("帧为 UTF-8");
    let mut frames: Vec<&str> = received.split_terminator(';').collect();
    frames.sort_unstable();

    let mut expected: Vec<String> = (0..PRODUCERS)
        .flat_map(|producer| (0..FRAMES).map(move |seq| frame(producer, seq)))
        .map(|mut text| {
            text.pop();
            text
        })
        .collect();
    expected.sort_unstable();
    assert_eq!(frames, expected);
}
