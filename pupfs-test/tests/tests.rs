use std::io::SeekFrom;

use pupfs::{
    CachedRangeFile, ErrorKind, FetchConfig, PupFs, RangeStream, certfile::CertifiedFile,
};
use pupfs_test::{RangeServer, build_container, init_logging, pad_to_blocks};

fn blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn open_blocked(server: &RangeServer, blksz: u64) -> CachedRangeFile {
    CachedRangeFile::open_with_config(server.url(), &FetchConfig::default().block_size(blksz))
        .unwrap()
}

#[test]
fn probe_is_a_single_head_request() {
    init_logging();
    let server = RangeServer::serve(blob(64));
    let remote = open_blocked(&server, 16);
    assert_eq!(remote.size(), 64);
    assert_eq!(server.head_count(), 1);
    assert_eq!(server.get_count(), 0);
}

#[test]
fn server_without_ranges_is_unsupported() {
    init_logging();
    let server = RangeServer::serve_no_ranges(blob(64));
    let err = CachedRangeFile::open(server.url()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn fetches_each_block_at_most_once() {
    init_logging();
    let data = blob(160);
    let server = RangeServer::serve(data.clone());
    let mut remote = open_blocked(&server, 16);

    // [5, 37) covers blocks 0..3.
    let got = remote.read_range(5..37).unwrap();
    assert_eq!(got, data[5..37]);
    assert_eq!(server.get_count(), 3);

    // The same range again: identical bytes, zero additional fetches.
    let again = remote.read_range(5..37).unwrap();
    assert_eq!(again, got);
    assert_eq!(server.get_count(), 3);

    // A sub-range of what is already resident.
    remote.read_range(20..25).unwrap();
    assert_eq!(server.get_count(), 3);

    // A fresh block at the tail.
    let got = remote.read_range(150..160).unwrap();
    assert_eq!(got, data[150..160]);
    assert_eq!(server.get_count(), 4);
}

#[test]
fn fetch_count_equals_distinct_blocks_of_union() {
    init_logging();
    let data = blob(160);
    let server = RangeServer::serve(data.clone());
    let mut remote = open_blocked(&server, 16);

    // The union of these ranges covers blocks {0, 1, 2, 4} and nothing
    // else, so exactly four range requests must happen.
    remote.read_range(0..16).unwrap();
    remote.read_range(8..40).unwrap();
    remote.read_range(32..48).unwrap();
    remote.read_range(64..80).unwrap();
    assert_eq!(server.get_count(), 4);
}

#[test]
fn cursor_semantics_over_http() {
    init_logging();
    let data = blob(160);
    let server = RangeServer::serve(data.clone());
    let mut remote = open_blocked(&server, 16);

    assert_eq!(remote.seek(SeekFrom::End(-10)).unwrap(), 150);
    assert_eq!(remote.tell(), 150);
    assert_eq!(remote.read_remaining().unwrap(), data[150..160]);

    remote.seek(SeekFrom::Start(158)).unwrap();
    let err = remote.read_vec(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bounds);
    assert!(remote.seek(SeekFrom::Current(10)).is_err());
}

#[test]
fn short_final_block_fails_loudly() {
    init_logging();
    // 100 bytes is not a multiple of the 16-byte block size, so the final
    // block cannot come back full-sized and reads touching it must fail.
    let data = blob(100);
    let server = RangeServer::serve(data.clone());
    let mut remote = open_blocked(&server, 16);

    assert_eq!(remote.read_range(80..96).unwrap(), data[80..96]);

    let err = remote.read_range(96..100).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    let err = remote.read_range(90..100).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[test]
fn filesystem_over_http_fetches_lazily() {
    init_logging();
    let payload: Vec<u8> = (0..100).map(|i| (i ^ 0x5a) as u8).collect();
    let raw = build_container(&[(0x100, b"3.55\n".as_slice()), (0x200, &payload)]);
    // Header region: 48 + 2 * 64 + 20 = 196 bytes; segments at 196 and 201.
    let served = pad_to_blocks(raw, 32);
    let server = RangeServer::serve(served);

    let remote = open_blocked(&server, 32);
    let fs = PupFs::new(remote).unwrap();
    // Parsing touches only the header region, blocks 0..=6.
    assert_eq!(server.get_count(), 7);

    assert_eq!(fs.listdir("/").unwrap(), ["version.txt", "ps3swu.self"]);
    let info = fs.getinfo("/ps3swu.self").unwrap();
    assert_eq!(info.size, 100);
    // Pure tree queries fetch nothing.
    assert_eq!(server.get_count(), 7);

    let mut file = fs.openbin("/ps3swu.self", "rb").unwrap();
    assert_eq!(file.read_remaining().unwrap(), payload);
    // The segment spans [201, 301): blocks 6..=9, of which 6 is resident.
    assert_eq!(server.get_count(), 10);

    // Re-reading is served entirely from cache.
    file.seek(SeekFrom::Start(0)).unwrap();
    assert_eq!(file.read_remaining().unwrap(), payload);
    assert_eq!(server.get_count(), 10);

    let mut version = fs.openbin("/version.txt", "r").unwrap();
    assert_eq!(version.read_remaining().unwrap(), b"3.55\n");
    assert_eq!(server.get_count(), 10);
}

#[test]
fn filesystem_over_local_file() {
    init_logging();
    let payload = b"SCE\0\0\0\0\x02certified payload".to_vec();
    let raw = build_container(&[(0x200, payload.as_slice()), (0x300, b"tar!".as_slice())]);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fw.pup");
    std::fs::write(&path, &raw).unwrap();

    let fs = PupFs::open_path(&path).unwrap();
    assert_eq!(fs.index().header().segment_num.get(), 2);
    assert_eq!(
        fs.listdir("/").unwrap(),
        ["ps3swu.self", "update_files.tar"]
    );

    let mut file = fs.openbin("/ps3swu.self", "r").unwrap();
    let cert = CertifiedFile::parse(&mut file).unwrap();
    assert_eq!(cert.version(), 2);
    assert_eq!(file.read_remaining().unwrap(), payload);
}

/// Checks the known constants of a real firmware image. Needs the 3.55
/// retail update package on disk; run with
/// `PUPFS_SAMPLE=/path/to/ps3updat-cex-3.55.pup cargo test -- --ignored`.
#[test]
#[ignore = "needs a real firmware sample, see doc comment"]
fn golden_firmware_sample() {
    init_logging();
    let path = std::env::var_os("PUPFS_SAMPLE").expect("PUPFS_SAMPLE must point to the sample");
    let fs = PupFs::open_path(path).unwrap();

    let header = fs.index().header();
    assert_eq!(header.data_length.get(), 0xAA9_A440);
    assert_eq!(
        fs.index().header_digest().digest.to_vec(),
        hex::decode("9CBC7D85CEAF24B16BFAA360F03AA0005681EA4D").unwrap(),
    );

    let node = fs.index().lookup("/ps3swu.self").unwrap();
    assert_eq!(node.name(), "ps3swu.self");
    assert!(fs.index().lookup("/absent").is_none());

    let seg = fs
        .index()
        .segments()
        .iter()
        .find(|seg| seg.id.get() == 0x200)
        .unwrap();
    let mut file = fs.openbin("/ps3swu.self", "rb").unwrap();
    assert_eq!(file.size(), seg.size.get());
    // The installer segment is itself a certified file.
    let cert = CertifiedFile::parse(&mut file).unwrap();
    assert_eq!(cert.header().magic, *b"SCE\0");
}
