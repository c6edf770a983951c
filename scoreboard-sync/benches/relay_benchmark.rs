use criterion::{criterion_group, criterion_main, Criterion};
use scoreboard_sync::broadcast::{outbox, BroadcastGroup};
use scoreboard_sync::{
    ClientMessage, ScoreAction, ScoreSnapshot, ServerMessage, TeamId, TransportKind,
};
use std::hint::black_box;
use std::sync::Arc;

fn sample_snapshot() -> ScoreSnapshot {
    TeamId::ALL
        .iter()
        .enumerate()
        .fold(ScoreSnapshot::default(), |s, (i, id)| {
            s.apply(*id, ScoreAction::Set, Some(i as i64 * 10))
        })
}

fn bench_snapshot_apply(c: &mut Criterion) {
    let snapshot = sample_snapshot();

    c.bench_function("snapshot_apply_increment", |b| {
        b.iter(|| {
            black_box(snapshot.apply(black_box(TeamId::Water), ScoreAction::Increment, None));
        })
    });
}

fn bench_frame_encode(c: &mut Criterion) {
    let msg = ServerMessage::ScoreUpdated(sample_snapshot());

    c.bench_function("score_updated_encode", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let encoded = ClientMessage::ScoreUpdate(sample_snapshot()).encode().unwrap();

    c.bench_function("score_update_decode", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let group = BroadcastGroup::new();
    let receivers: Vec<_> = rt.block_on(async {
        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (tx, rx) = outbox();
            group.add_peer(TransportKind::WebSocket, tx).await;
            receivers.push(rx);
        }
        receivers
    });
    let frame: Arc<str> = ServerMessage::ScoreUpdated(sample_snapshot())
        .encode()
        .unwrap()
        .into();

    c.bench_function("broadcast_score_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(group.broadcast_raw(black_box(frame.clone())).await);
            });
        })
    });
    drop(receivers);
}

fn bench_broadcast_1000_updates(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_1000_updates_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new();
                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let (tx, rx) = outbox();
                    group.add_peer(TransportKind::Polling, tx).await;
                    receivers.push(rx);
                }

                let mut snapshot = ScoreSnapshot::default();
                for _ in 0..1000 {
                    snapshot = snapshot.apply(TeamId::Fire, ScoreAction::Increment, None);
                    let msg = ServerMessage::ScoreUpdated(snapshot.clone());
                    black_box(group.broadcast(&msg).await.unwrap());
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_snapshot_apply,
    bench_frame_encode,
    bench_frame_decode,
    bench_broadcast_100_peers,
    bench_broadcast_1000_updates,
);
criterion_main!(benches);
