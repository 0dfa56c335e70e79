use std::io::SeekFrom;

use tempfile::NamedTempFile;

use weave::channel::PadMode;
use weave::crypto::{derive_key, Aes256Cbc, AES_BLOCK};
use weave::stream::Compression;
use weave::{
    Channel, ContainerReader, ContainerWriter, NextPacket, Packet, Pts, Record, StreamHeader,
    Value,
};

fn audio_packet(pts: i64, payload: &[u8]) -> Packet {
    let mut p = Packet::with_data(0, Pts::new(pts), payload.to_vec());
    p.duration = 1024;
    p
}

fn video_packet(pts: i64, keyframe: bool, payload: &[u8]) -> Packet {
    let mut p = Packet::with_data(1, Pts::new(pts), payload.to_vec());
    p.set_keyframe(keyframe);
    p.duration = 1;
    p
}

fn write_demo_container(channel: Channel) -> Channel {
    let mut writer = ContainerWriter::new(channel);
    writer
        .info_mut()
        .set("title", Value::Str("integration demo".into()));

    let mut audio = StreamHeader::audio(0, 48_000, 2);
    audio.compression = Compression {
        codec: "pcm_s16le".into(),
        bitrate: 1_536_000,
        extradata: Vec::new(),
    };
    writer.add_stream(audio).unwrap();

    let mut video = StreamHeader::video(1, 1920, 1080, 25, 1);
    video.compression.codec = "h264".into();
    video.compression.extradata = vec![0, 0, 0, 1];
    video.metadata.set("language", Value::Str("und".into()));
    writer.add_stream(video).unwrap();

    writer.write_header().unwrap();
    for i in 0..5i64 {
        writer
            .write_packet(&video_packet(i, i == 0, format!("frame-{i}").as_bytes()))
            .unwrap();
        writer
            .write_packet(&audio_packet(i * 1024, format!("chunk-{i}").as_bytes()))
            .unwrap();
    }
    writer.finalize().unwrap();
    writer.into_channel()
}

#[test]
fn full_round_trip_in_memory() {
    let mut channel = write_demo_container(Channel::memory());
    channel.seek(SeekFrom::Start(0)).unwrap();

    let mut reader = ContainerReader::open(channel).unwrap();
    assert_eq!(reader.stream_count(), 2);
    assert_eq!(reader.info().get_str("title"), Some("integration demo"));
    assert_eq!(reader.info().get_uint("version"), Some(1));

    let video = reader.stream_header(1).unwrap();
    assert_eq!(video.compression.codec, "h264");
    assert_eq!(video.metadata.get_str("language"), Some("und"));
    assert_eq!(video.stats.packets, 5);

    let audio = reader.stream_header(0).unwrap();
    assert_eq!(audio.stats.packets, 5);
    assert_eq!(audio.stats.first_pts, Pts::new(0));
    assert_eq!(audio.stats.last_pts, Pts::new(4 * 1024));

    let mut frames = Vec::new();
    loop {
        match reader.read_packet(1).unwrap() {
            NextPacket::Packet(p) => frames.push(String::from_utf8(p.data.clone()).unwrap()),
            NextPacket::Eof => break,
            NextPacket::Again => unreachable!(),
        }
    }
    assert_eq!(frames, ["frame-0", "frame-1", "frame-2", "frame-3", "frame-4"]);
}

#[test]
fn round_trip_through_file() {
    let temp = NamedTempFile::new().unwrap();
    let path = temp.path().to_path_buf();

    let channel = Channel::create_file(&path).unwrap();
    write_demo_container(channel).close().unwrap();

    let mut reader = ContainerReader::open(Channel::open_file(&path).unwrap()).unwrap();
    assert!(reader.packet_index().is_some());
    assert_eq!(reader.packet_index().unwrap().len(), 10);

    let mut total = 0;
    for stream in 0..2 {
        loop {
            match reader.read_packet(stream).unwrap() {
                NextPacket::Packet(_) => total += 1,
                NextPacket::Eof => break,
                NextPacket::Again => unreachable!(),
            }
        }
    }
    assert_eq!(total, 10);
}

#[test]
fn indexed_seek_lands_on_target() {
    let mut channel = write_demo_container(Channel::memory());
    channel.seek(SeekFrom::Start(0)).unwrap();
    let mut reader = ContainerReader::open(channel).unwrap();

    reader.seek(1, Pts::new(3)).unwrap();
    match reader.read_packet(1).unwrap() {
        NextPacket::Packet(p) => {
            assert_eq!(p.stream_id, 1);
            assert_eq!(p.pts, Pts::new(3));
            assert_eq!(p.data, b"frame-3");
        }
        other => panic!("expected packet, got {other:?}"),
    }

    // seeking between timestamps picks the latest earlier packet
    reader.seek(0, Pts::new(2500)).unwrap();
    match reader.read_packet(0).unwrap() {
        NextPacket::Packet(p) => assert_eq!(p.pts, Pts::new(2048)),
        other => panic!("expected packet, got {other:?}"),
    }
}

#[test]
fn discontinuous_stream_returns_again_then_eof() {
    let mut channel = write_demo_container(Channel::memory());
    channel.seek(SeekFrom::Start(0)).unwrap();
    let mut reader = ContainerReader::open(channel).unwrap();

    reader.demuxer().stream_mut(0).unwrap().set_continuous(false);
    reader.demuxer().stream_mut(1).unwrap().set_discard(true);

    let mut audio = 0;
    loop {
        match reader.read_packet(0).unwrap() {
            NextPacket::Packet(_) => audio += 1,
            NextPacket::Again => continue,
            NextPacket::Eof => break,
        }
    }
    assert_eq!(audio, 5);
}

#[test]
fn encrypted_container_round_trip() {
    let password = "correct horse battery staple";
    let salt = [0x5Au8; 16];
    let key = derive_key(password, &salt).unwrap();
    let iv = [0x11u8; AES_BLOCK];

    let temp = NamedTempFile::new().unwrap();
    let path = temp.path().to_path_buf();
    let key2 = derive_key(password, &salt).unwrap();
    assert_eq!(key, key2);

    // cipher channels cannot seek, so the directory stays empty and
    // the container is read front to back
    let sink = Channel::encrypted(
        Channel::create_file(&path).unwrap(),
        Box::new(Aes256Cbc::new(&key, iv)),
        PadMode::Pkcs7,
    );
    let mut writer = ContainerWriter::new(sink);
    writer.add_stream(StreamHeader::audio(0, 44_100, 1)).unwrap();
    writer.write_header().unwrap();
    for i in 0..3i64 {
        writer
            .write_packet(&audio_packet(i, format!("secret-{i}").as_bytes()))
            .unwrap();
    }
    writer.finalize().unwrap();
    writer.into_channel().close().unwrap();

    let source = Channel::encrypted(
        Channel::open_file(&path).unwrap(),
        Box::new(Aes256Cbc::new(&key2, iv)),
        PadMode::Pkcs7,
    );
    let mut reader = ContainerReader::open(source).unwrap();
    assert!(reader.packet_index().is_none());

    let mut seen = Vec::new();
    loop {
        match reader.read_packet(0).unwrap() {
            NextPacket::Packet(p) => seen.push(String::from_utf8(p.data.clone()).unwrap()),
            NextPacket::Eof => break,
            NextPacket::Again => unreachable!(),
        }
    }
    assert_eq!(seen, ["secret-0", "secret-1", "secret-2"]);
}

#[test]
fn wrong_key_fails_to_open() {
    let temp = NamedTempFile::new().unwrap();
    let path = temp.path().to_path_buf();
    let iv = [0u8; AES_BLOCK];
    let key = derive_key("right", &[1u8; 16]).unwrap();

    let sink = Channel::encrypted(
        Channel::create_file(&path).unwrap(),
        Box::new(Aes256Cbc::new(&key, iv)),
        PadMode::Pkcs7,
    );
    let mut writer = ContainerWriter::new(sink);
    writer.add_stream(StreamHeader::audio(0, 8_000, 1)).unwrap();
    writer.write_header().unwrap();
    writer.finalize().unwrap();
    writer.into_channel().close().unwrap();

    let wrong = derive_key("wrong", &[1u8; 16]).unwrap();
    let source = Channel::encrypted(
        Channel::open_file(&path).unwrap(),
        Box::new(Aes256Cbc::new(&wrong, iv)),
        PadMode::Pkcs7,
    );
    assert!(ContainerReader::open(source).is_err());
}

#[test]
fn metadata_survives_nested_records() {
    let mut channel = Channel::memory();
    {
        let mut writer = ContainerWriter::new(channel);
        let mut nested = Record::new();
        nested.set("encoder", Value::Str("weave-test".into()));
        nested.set("pass", Value::UInt(2));
        writer.info_mut().set("encoding", Value::Rec(nested));
        writer.add_stream(StreamHeader::message(0)).unwrap();
        writer.write_header().unwrap();
        writer.finalize().unwrap();
        channel = writer.into_channel();
    }
    channel.seek(SeekFrom::Start(0)).unwrap();

    let reader = ContainerReader::open(channel).unwrap();
    let encoding = reader.info().get_rec("encoding").unwrap();
    assert_eq!(encoding.get_str("encoder"), Some("weave-test"));
    assert_eq!(encoding.get_uint("pass"), Some(2));
}
