//! 헤더 코덱과 RTT 통계 벤치마크

use std::hint::black_box;
use std::time::{Duration, SystemTime};

use criterion::{criterion_group, criterion_main, Criterion};

use netsend::header::{NextHeader, NsHeader, RttInfo, RttProbePacket};
use netsend::RttSamples;

fn bench_header(c: &mut Criterion) {
    let header = NsHeader::for_transfer(1 << 20, true);
    let bytes = header.to_bytes();

    c.bench_function("header_encode", |b| b.iter(|| black_box(&header).to_bytes()));
    c.bench_function("header_decode", |b| {
        b.iter(|| NsHeader::decode(black_box(&bytes)))
    });
    c.bench_function("rtt_info_encode", |b| {
        b.iter(|| RttInfo::new(NextHeader::Data, black_box(Duration::from_micros(1234))).to_bytes())
    });
}

fn bench_probe_packet(c: &mut Criterion) {
    let mut packet = RttProbePacket::request(0x4242, 500).expect("probe packet");
    packet.stamp(SystemTime::now());
    let wire = packet.to_bytes().expect("probe encode");

    c.bench_function("probe_encode_500", |b| b.iter(|| black_box(&packet).to_bytes()));
    c.bench_function("probe_decode_reply_500", |b| {
        b.iter(|| {
            RttProbePacket::decode(black_box(&wire))
                .map(RttProbePacket::into_reply)
        })
    });
}

fn bench_summarize(c: &mut Criterion) {
    let mut samples = RttSamples::with_capacity(100);
    for i in 0..100 {
        samples.push(0.8 + (i % 7) as f64 * 0.05);
    }
    samples.push(40.0);

    c.bench_function("rtt_summarize_101", |b| {
        b.iter(|| black_box(&samples).summarize(4.0))
    });
}

criterion_group!(benches, bench_header, bench_probe_packet, bench_summarize);
criterion_main!(benches);
