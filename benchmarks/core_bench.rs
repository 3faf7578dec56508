use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use osd_core::image::{Segment, SegmentFlags};
use osd_core::protocol::{codec, Body, Frame, ModuleId};
use osd_core::sim::{SimulatedSoc, SocLayout};
use osd_core::{Image, Session, SessionConfig};

fn image_of(len: usize) -> Image {
    let data: Vec<u8> = (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect();
    Image::new(0x1000).with_segment(Segment::new(0x1000, data, SegmentFlags::CODE))
}

fn bench_load_image(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_image");
    for len in [4 * 1024, 64 * 1024] {
        let image = image_of(len);
        group.throughput(Throughput::Bytes(len as u64));
        for verify in [false, true] {
            let name = if verify { "verified" } else { "plain" };
            group.bench_with_input(BenchmarkId::new(name, len), &image, |b, image| {
                b.iter(|| {
                    let soc = SimulatedSoc::new(SocLayout::default());
                    let session = Session::open(soc.connect(), SessionConfig::default()).unwrap();
                    session.reset(true).unwrap();
                    let mams = session.memory_modules();
                    let mam = &mams[0];
                    if verify {
                        mam.load_image_verified(black_box(image)).unwrap();
                    } else {
                        mam.load_image(black_box(image)).unwrap();
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let frame = Frame::to_module(ModuleId(4), Body::MemWrite { address: 0x8000_0000, data: vec![0xa5; 1024] });
    let bytes = codec::encode(&frame);
    c.bench_function("encode_mem_write_1k", |b| b.iter(|| black_box(codec::encode(black_box(&frame)))));
    c.bench_function("decode_mem_write_1k", |b| b.iter(|| black_box(codec::decode(black_box(&bytes[4..])))));
}

criterion_group!(benches, bench_load_image, bench_codec);
criterion_main!(benches);
