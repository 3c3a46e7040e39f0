use criterion::{criterion_group, criterion_main, Criterion};
use geoshare_collab::broadcast::FanoutGroup;
use geoshare_collab::presence::PresenceRegistry;
use geoshare_collab::protocol::{ClientMessage, ParticipantId, Position, RelayMessage};
use geoshare_collab::reaper::StalenessReaper;
use std::hint::black_box;
use std::time::{Duration, Instant};

fn sample_position() -> Position {
    Position::new(52.5200, 13.4050).unwrap()
}

fn bench_send_location_encode(c: &mut Criterion) {
    let msg = ClientMessage::SendLocation(sample_position());

    c.bench_function("send_location_encode", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_send_location_decode(c: &mut Criterion) {
    let encoded = ClientMessage::SendLocation(sample_position()).encode().unwrap();

    c.bench_function("send_location_decode", |b| {
        b.iter(|| {
            black_box(ClientMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_receive_location_decode(c: &mut Criterion) {
    let encoded = RelayMessage::ReceiveLocation {
        identity: ParticipantId::generate(),
        position: sample_position(),
    }
    .encode()
    .unwrap();

    c.bench_function("receive_location_decode", |b| {
        b.iter(|| {
            black_box(RelayMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_registry_upsert_1000(c: &mut Criterion) {
    let ids: Vec<ParticipantId> = (0..1000).map(|i| ParticipantId::new(format!("p{i}"))).collect();
    let position = sample_position();

    c.bench_function("registry_upsert_1000_participants", |b| {
        b.iter(|| {
            let mut registry = PresenceRegistry::new();
            let now = Instant::now();
            for id in &ids {
                black_box(registry.upsert(id.clone(), position, now));
            }
            black_box(registry.len());
        })
    });
}

fn bench_reaper_sweep_1000(c: &mut Criterion) {
    let reaper = StalenessReaper::new(Duration::from_secs(30));
    let position = sample_position();
    let now = Instant::now() + Duration::from_secs(120);

    c.bench_function("reaper_sweep_1000_half_stale", |b| {
        b.iter_batched(
            || {
                let mut registry = PresenceRegistry::new();
                for i in 0..1000u64 {
                    let age = if i % 2 == 0 { 5 } else { 60 };
                    registry.upsert(
                        ParticipantId::new(format!("p{i}")),
                        position,
                        now - Duration::from_secs(age),
                    );
                }
                registry
            },
            |mut registry| black_box(reaper.sweep(&mut registry, now)),
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_fanout_1000_msgs_100_channels(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let msg = RelayMessage::ReceiveLocation {
        identity: ParticipantId::new("sender"),
        position: sample_position(),
    };

    c.bench_function("fanout_1000_msgs_100_channels", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = FanoutGroup::new(2048);

                let mut receivers = Vec::new();
                for i in 0..100 {
                    let rx = group.join(ParticipantId::new(format!("c{i}")), 100).await;
                    receivers.push(rx);
                }

                let sender = ParticipantId::new("sender");
                for _ in 0..1000 {
                    black_box(group.publish(&sender, black_box(&msg)).unwrap());
                }
            });
        })
    });
}

criterion_group!(
    benches,
    bench_send_location_encode,
    bench_send_location_decode,
    bench_receive_location_decode,
    bench_registry_upsert_1000,
    bench_reaper_sweep_1000,
    bench_fanout_1000_msgs_100_channels,
);
criterion_main!(benches);
