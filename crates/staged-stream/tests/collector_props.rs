use bytes::Bytes;
use futures::executor::block_on;
use proptest::prelude::*;
use staged_core::{RenderStage, StageClock};
use staged_stream::{tee, CollectorOptions, StageChunkCollector, StageChunks, StreamError};

#[derive(Debug, Clone)]
enum Op {
    Write(u8),
    Advance(RenderStage),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u8>().prop_map(Op::Write),
        1 => prop_oneof![Just(RenderStage::Runtime), Just(RenderStage::Dynamic)]
            .prop_map(Op::Advance),
    ]
}

fn run(ops: &[Op]) -> ([StageChunks; 3], RenderStage, Vec<(RenderStage, Bytes)>) {
    let clock = StageClock::new();
    let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());
    let mut written = Vec::new();

    for op in ops {
        match op {
            Op::Write(byte) => {
                let chunk = Bytes::from(vec![*byte]);
                written.push((clock.current_stage(), chunk.clone()));
                sink.write(chunk);
            }
            Op::Advance(stage) => {
                clock.advance(*stage);
            }
        }
    }
    sink.close();

    let buckets = RenderStage::ALL.map(|stage| block_on(chunks.stage(stage)).unwrap());
    let finished = block_on(chunks.finished_in()).unwrap();
    (buckets, finished, written)
}

proptest! {
    #[test]
    fn prop_later_buckets_extend_earlier_ones(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let ([stat, runtime, dynamic], _, _) = run(&ops);
        prop_assert!(stat.is_prefix_of(&runtime));
        prop_assert!(runtime.is_prefix_of(&dynamic));
    }

    #[test]
    fn prop_every_chunk_lands_in_its_stage_and_later(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let (buckets, _, written) = run(&ops);

        let all: Vec<Bytes> = written.iter().map(|(_, chunk)| chunk.clone()).collect();
        prop_assert_eq!(buckets[2].as_slice(), all.as_slice());

        for stage in RenderStage::ALL {
            let expected: Vec<Bytes> = written
                .iter()
                .filter(|(at, _)| *at <= stage)
                .map(|(_, chunk)| chunk.clone())
                .collect();
            prop_assert_eq!(buckets[stage.index()].as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn prop_finished_in_matches_clock(ops in proptest::collection::vec(op_strategy(), 0..20)) {
        let expected = ops
            .iter()
            .filter_map(|op| match op {
                Op::Advance(stage) => Some(*stage),
                Op::Write(_) => None,
            })
            .max()
            .unwrap_or(RenderStage::Static);
        let (_, finished, _) = run(&ops);
        prop_assert_eq!(finished, expected);
    }
}

#[test]
fn tee_feeds_collector_and_response_alike() {
    let clock = StageClock::new();
    let upstream = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"a")),
        Ok(Bytes::from_static(b"b")),
    ]);
    let (response, collected) = tee(upstream);
    let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());

    assert_eq!(block_on(sink.consume(collected)), Ok(RenderStage::Static));
    let body: Vec<_> = block_on(futures::StreamExt::collect::<Vec<_>>(response));
    assert_eq!(body.len(), 2);
    assert_eq!(
        block_on(chunks.static_chunks()).unwrap().concat(),
        Bytes::from_static(b"ab")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collector_is_fed_from_another_thread() {
    let clock = StageClock::new();
    let (sink, chunks) = StageChunkCollector::attach(&clock, CollectorOptions::default());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();

    let writer_clock = clock.clone();
    let writer = tokio::spawn(async move {
        sink.write(Bytes::from_static(b"first"));
        rx.recv().await;
        sink.write(Bytes::from_static(b"second"));
        sink.close();
        writer_clock.current_stage()
    });

    clock.advance(RenderStage::Runtime);
    tx.send(()).unwrap();

    assert_eq!(writer.await.unwrap(), RenderStage::Runtime);
    let runtime = chunks.runtime_chunks().await.unwrap();
    assert_eq!(runtime.len(), 2);
    assert_eq!(chunks.finished_in().await, Ok::<_, StreamError>(RenderStage::Runtime));
}
