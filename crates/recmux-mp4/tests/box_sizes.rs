//! Randomized size-consistency checks: every box writes exactly the number
//! of bytes its generate pass reported, and generate is idempotent.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recmux_mp4::boxes::fragment::{MdatBox, MfhdBox, TfhdBox, TrunBox, TrunSample};
use recmux_mp4::boxes::index::{MfroBox, RandomAccessEntry, TfraBox};
use recmux_mp4::boxes::movie::{
    Avc1Box, AvcCBox, DrefBox, EsdsBox, FtypBox, HdlrBox, MdhdBox, Mp4aBox, MvhdBox, SmhdBox,
    StcoBox, StscBox, StsdBox, StszBox, SttsBox, TkhdBox, TrexBox, UrlBox, VmhdBox,
};
use recmux_mp4::boxes::{ContainerBox, MuxBox, MuxNode};
use recmux_mp4::descriptor::EsDescriptor;
use recmux_mp4::{AudioMetadata, Compositor, FourCc, TrackKind, TrackMetadata, VideoMetadata};

const ROUNDS: usize = 64;

fn random_bytes(rng: &mut StdRng, max: usize) -> Bytes {
    let len = rng.gen_range(0..=max);
    (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<_>>().into()
}

fn random_audio(rng: &mut StdRng) -> AudioMetadata {
    let rates = [8000, 16000, 22050, 44100, 48000, 96000];
    let mut audio = AudioMetadata::aac_lc(rates[rng.gen_range(0..rates.len())], rng.gen_range(1..=6));
    audio.max_bitrate = rng.gen();
    audio.avg_bitrate = rng.gen();
    audio.frame_size = rng.gen_range(0..4096);
    audio
}

fn random_video(rng: &mut StdRng) -> VideoMetadata {
    VideoMetadata {
        width: rng.gen_range(1..=4096),
        height: rng.gen_range(1..=4096),
        clock_rate: 90000,
        frame_rate: rng.gen_range(1..=120),
    }
}

fn random_box(rng: &mut StdRng, choice: usize) -> Box<dyn MuxBox> {
    match choice {
        0 => {
            let mut ftyp = FtypBox::for_tracks(rng.gen());
            ftyp.minor_version = rng.gen();
            for _ in 0..rng.gen_range(0..8) {
                ftyp.compatible_brands.push(FourCc(rng.gen()));
            }
            Box::new(ftyp)
        }
        1 => {
            let mut mvhd = MvhdBox::new(rng.gen(), rng.gen());
            mvhd.duration = rng.gen();
            Box::new(mvhd)
        }
        2 => {
            let meta = TrackMetadata::Video(random_video(rng));
            Box::new(TkhdBox::new(rng.gen(), rng.gen(), &meta))
        }
        3 => {
            let mut mdhd = MdhdBox::new(rng.gen(), rng.gen());
            mdhd.language = [
                rng.gen_range(b'a'..=b'z'),
                rng.gen_range(b'a'..=b'z'),
                rng.gen_range(b'a'..=b'z'),
            ];
            Box::new(mdhd)
        }
        4 => {
            let kind = if rng.gen() {
                TrackKind::Audio
            } else {
                TrackKind::Video
            };
            let mut hdlr = HdlrBox::for_kind(kind);
            hdlr.name = (0..rng.gen_range(0..40))
                .map(|_| rng.gen_range('a'..='z'))
                .collect();
            Box::new(hdlr)
        }
        5 => {
            let mut smhd = SmhdBox::new();
            smhd.balance = rng.gen();
            Box::new(smhd)
        }
        6 => {
            let mut vmhd = VmhdBox::new();
            vmhd.graphics_mode = rng.gen();
            vmhd.opcolor = rng.gen();
            Box::new(vmhd)
        }
        7 => Box::new(UrlBox::self_contained()),
        8 => Box::new(DrefBox::self_contained()),
        9 => Box::new(StsdBox::new(Box::new(Mp4aBox::aac(
            &random_audio(rng),
            random_bytes(rng, 8),
        )))),
        10 => Box::new(SttsBox::new()),
        11 => Box::new(StscBox::new()),
        12 => {
            let mut stsz = StszBox::new();
            stsz.sample_size = rng.gen();
            stsz.sample_count = rng.gen();
            Box::new(stsz)
        }
        13 => Box::new(StcoBox::new()),
        14 => Box::new(Mp4aBox::aac(&random_audio(rng), random_bytes(rng, 300))),
        15 => {
            let audio = random_audio(rng);
            Box::new(EsdsBox::new(EsDescriptor::aac(&audio, random_bytes(rng, 200))))
        }
        16 => {
            let mut avc1 = Avc1Box::new(&random_video(rng), random_bytes(rng, 64));
            avc1.compressor_name = (0..rng.gen_range(0..40))
                .map(|_| rng.gen_range('A'..='Z'))
                .collect();
            Box::new(avc1)
        }
        17 => Box::new(AvcCBox::new(random_bytes(rng, 128))),
        18 => {
            let meta = if rng.gen() {
                TrackMetadata::Audio(random_audio(rng))
            } else {
                TrackMetadata::Video(random_video(rng))
            };
            Box::new(TrexBox::new(rng.gen(), &meta))
        }
        19 => Box::new(MfhdBox::new(rng.gen())),
        20 => {
            let tfhd = TfhdBox::new(rng.gen(), rng.gen());
            tfhd.base_data_offset.set(rng.gen());
            Box::new(tfhd)
        }
        21 => {
            let samples = (0..rng.gen_range(0..100))
                .map(|_| TrunSample {
                    size: rng.gen(),
                    flags: rng.gen(),
                })
                .collect();
            Box::new(TrunBox::new(samples, rng.gen()))
        }
        22 => {
            let chunks = (0..rng.gen_range(0..10))
                .map(|_| random_bytes(rng, 256))
                .collect();
            Box::new(MdatBox::new(chunks))
        }
        23 => {
            let entries = (0..rng.gen_range(0..20))
                .map(|_| RandomAccessEntry {
                    time: rng.gen_range(0..=u32::MAX as u64 * 2),
                    moof_offset: rng.gen_range(0..=u32::MAX as u64 * 2),
                })
                .collect();
            Box::new(TfraBox::new(rng.gen(), entries))
        }
        24 => {
            let mfro = MfroBox::new();
            mfro.mfra_size.set(rng.gen());
            Box::new(mfro)
        }
        _ => {
            let children = (0..rng.gen_range(0..4))
                .map(|_| {
                    let child = rng.gen_range(0..25);
                    random_box(rng, child)
                })
                .collect();
            Box::new(ContainerBox::with_children(FourCc::MOOV, children))
        }
    }
}

#[test]
fn test_written_bytes_match_generated_size() {
    let mut rng = StdRng::seed_from_u64(0x6d70_3466);
    for round in 0..ROUNDS {
        for choice in 0..=25 {
            let mut node = random_box(&mut rng, choice);
            let size = node.generate().unwrap();
            assert_eq!(node.generate().unwrap(), size, "generate is idempotent");

            let mut out = Compositor::new();
            node.write(&mut out)
                .unwrap_or_else(|e| panic!("{} (round {round}): {e}", node.tag()));
            let bytes = out.take_output();
            assert_eq!(bytes.len() as u64, size, "{} (round {round})", node.tag());

            let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            assert_eq!(declared as u64, size);
            assert_eq!(&bytes[4..8], &node.tag().0);
        }
    }
}

#[test]
fn test_descriptor_tree_sizes() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..ROUNDS {
        let audio = random_audio(&mut rng);
        let mut es = EsDescriptor::aac(&audio, random_bytes(&mut rng, 20_000));
        es.stream_priority = rng.gen_range(0..32);
        let size = es.generate().unwrap();
        let mut out = Compositor::new();
        es.write(&mut out).unwrap();
        assert_eq!(out.take_output().len() as u64, size);
    }
}
