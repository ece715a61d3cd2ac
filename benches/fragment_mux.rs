//! Benchmarks for fragmented MP4 muxing.
//!
//! Measures throughput of pushing AAC-sized samples through the container
//! writer, including fragment emission and the final index.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use recmux_mp4::{
    AudioMetadata, ContainerWriter, EncodedFrame, FrameType, IsoMediaWriter, MuxerConfig,
    TrackKind, TrackMetadata, WriteFlags,
};

const SAMPLE_SIZE: usize = 384;

fn audio_frames(count: usize) -> Vec<EncodedFrame> {
    let payload = Bytes::from(vec![0x21u8; SAMPLE_SIZE]);
    (0..count)
        .map(|i| EncodedFrame::new(payload.clone(), FrameType::AudioSample, i as u64 * 21_333))
        .collect()
}

fn mux(frames: &[EncodedFrame], batch: usize) -> usize {
    let mut writer = IsoMediaWriter::new(MuxerConfig {
        fragment_duration_secs: 2,
    })
    .unwrap();
    writer
        .set_metadata(TrackMetadata::Audio(AudioMetadata::aac_lc(48000, 2)))
        .unwrap();

    let mut total = 0;
    let chunks: Vec<&[EncodedFrame]> = frames.chunks(batch).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let flags = if i + 1 == chunks.len() {
            WriteFlags::end_of_stream(TrackKind::Audio)
        } else {
            WriteFlags::NONE
        };
        writer.write_encoded_track(chunk.to_vec(), flags).unwrap();
        total += writer
            .get_container_data()
            .unwrap()
            .iter()
            .map(Bytes::len)
            .sum::<usize>();
    }
    total += writer
        .get_container_data()
        .unwrap()
        .iter()
        .map(Bytes::len)
        .sum::<usize>();
    total
}

fn bench_audio_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_session");

    // Roughly 10 s, 1 min and 10 min of 48 kHz AAC
    for count in [469, 2813, 28125] {
        let frames = audio_frames(count);
        group.throughput(Throughput::Bytes((count * SAMPLE_SIZE) as u64));
        group.bench_function(format!("frames_{}", count), |b| {
            b.iter(|| black_box(mux(black_box(&frames), 32)))
        });
    }

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    let frames = audio_frames(2813);

    for batch in [1, 8, 64, 512] {
        group.bench_function(format!("batch_{}", batch), |b| {
            b.iter(|| black_box(mux(&frames, batch)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_audio_session, bench_batch_size);
criterion_main!(benches);
