//! Uploader against the simulated badge.
//!
//! The sim executes the statements for real, so these tests check both the
//! statement sequence on the wire and the bytes that reach the loader.

use mchbadge_hal::config::ProtocolConfig;
use mchbadge_hal::sim::SimLink;
use mchbadge_repl::payload;
use mchbadge_repl::{upload, Phase, RawReplDriver, ReplState, UploadError};

fn config(chunk_size: usize) -> ProtocolConfig {
    ProtocolConfig {
        chunk_size,
        ..ProtocolConfig::default()
    }
}

fn bitstream(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 131 % 251) as u8).collect()
}

#[derive(Debug, PartialEq)]
enum Kind {
    Import,
    Init,
    Append,
    Decode,
    Load,
    Release,
}

fn classify(statement: &str) -> Kind {
    if statement.starts_with("import ") {
        Kind::Import
    } else if statement.contains("print(len(") {
        Kind::Init
    } else if statement.contains("+=") {
        Kind::Append
    } else if statement.contains("a2b_base64") {
        Kind::Decode
    } else if statement.contains("load_bitstream") {
        Kind::Load
    } else if statement.ends_with("= None") {
        Kind::Release
    } else {
        panic!("unexpected statement {statement:?}")
    }
}

#[test]
fn single_chunk_upload_issues_exact_sequence() {
    let config = config(64);
    let payload = b"0123456789".to_vec();
    let mut driver = RawReplDriver::new(SimLink::new(&config), &config);

    let report = upload(&mut driver, &payload).unwrap();
    assert_eq!(report.payload_len, 10);
    assert_eq!(report.encoded_len, 16);
    assert_eq!(report.chunks, 1);
    assert_eq!(driver.state(), ReplState::Unknown);

    let sim = driver.into_link();
    let kinds: Vec<Kind> = sim.executed().iter().map(|s| classify(s)).collect();
    assert_eq!(
        kinds,
        vec![
            Kind::Import,
            Kind::Import,
            Kind::Init,
            Kind::Append,
            Kind::Decode,
            Kind::Load,
            Kind::Release,
        ]
    );
    assert_eq!(sim.loaded(), &[payload]);
    assert_eq!(sim.variable("bitstream"), None);
    assert!(!sim.in_raw_mode());
    assert!(sim.written().ends_with(b"bitstream = None\x04\x02"));
}

#[test]
fn three_chunks_are_disjoint_ordered_slices() {
    let config = config(64);
    let payload = bitstream(120);
    let encoded = payload::encode(&payload);
    assert_eq!(encoded.len(), 160);

    let mut driver = RawReplDriver::new(SimLink::new(&config), &config);
    let report = upload(&mut driver, &payload).unwrap();
    assert_eq!(report.chunks, 3);

    let sim = driver.into_link();
    let appended: Vec<&str> = sim
        .executed()
        .iter()
        .filter_map(|s| {
            s.strip_prefix("bitstream += b'")
                .and_then(|rest| rest.strip_suffix('\''))
        })
        .collect();
    assert_eq!(appended, vec![&encoded[..64], &encoded[64..128], &encoded[128..]]);
    assert_eq!(sim.loaded(), &[payload]);
}

#[test]
fn remote_reassembly_is_byte_exact() {
    for len in [0, 1, 3, 1000, 10_000] {
        let config = config(384);
        let payload = bitstream(len);
        let mut driver = RawReplDriver::new(SimLink::new(&config), &config);
        let report = upload(&mut driver, &payload).unwrap();
        assert_eq!(report.chunks, report.encoded_len.div_ceil(384));
        assert_eq!(driver.link().loaded(), &[payload], "len {len}");
    }
}

#[test]
fn silent_badge_times_out_before_any_statement() {
    let config = ProtocolConfig {
        settle_ms: 10,
        prompt_timeout_ms: 10,
        ..ProtocolConfig::default()
    };
    let mut driver = RawReplDriver::new(SimLink::new(&config).silent(), &config);

    let err = upload(&mut driver, &bitstream(500)).unwrap_err();
    assert!(matches!(err, UploadError::SynchronizationTimeout { .. }));
    assert_eq!(err.phase(), Phase::Synchronize);

    let sim = driver.into_link();
    assert_eq!(sim.written(), b"\r\x03\r\x03");
    assert!(sim.executed().is_empty());
}

#[test]
fn leftover_accumulator_is_reset() {
    let config = ProtocolConfig::default();
    let sim = SimLink::new(&config).with_leftover("bitstream", b"stale data from last run");
    let mut driver = RawReplDriver::new(sim, &config);

    let payload = bitstream(700);
    upload(&mut driver, &payload).unwrap();
    assert_eq!(driver.link().loaded(), &[payload]);
}

#[test]
fn swallowed_init_is_a_desync_and_stops_transfer() {
    let config = ProtocolConfig::default();
    let sim = SimLink::new(&config).failing_on("print(len(", "");
    let mut driver = RawReplDriver::new(sim, &config);

    let err = upload(&mut driver, &bitstream(64)).unwrap_err();
    assert!(matches!(
        err,
        UploadError::ProtocolDesync {
            phase: Phase::Transfer,
            ..
        }
    ));
    let sim = driver.into_link();
    assert!(sim.executed().iter().all(|s| !s.contains("+=")));
    assert!(!sim.in_raw_mode(), "raw mode is left after failure");
}

#[test]
fn rejected_chunk_stops_further_chunks() {
    let config = config(8);
    let payload = bitstream(30);
    let encoded = payload::encode(&payload);
    let second = &encoded[8..16];

    let sim = SimLink::new(&config).failing_on(second, "MemoryError: memory allocation failed");
    let mut driver = RawReplDriver::new(sim, &config);

    let err = upload(&mut driver, &payload).unwrap_err();
    match &err {
        UploadError::Rejected { phase, remote, .. } => {
            assert_eq!(*phase, Phase::Transfer);
            assert!(remote.contains("MemoryError"));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(err.to_string().starts_with("transfer failed"));

    let sim = driver.into_link();
    let appends = sim.executed().iter().filter(|s| s.contains("+=")).count();
    assert_eq!(appends, 2);
    assert!(sim.loaded().is_empty());
}

#[test]
fn failed_load_still_releases_accumulator() {
    let config = ProtocolConfig::default();
    let sim = SimLink::new(&config).failing_on("load_bitstream", "OSError: [Errno 5] EIO");
    let mut driver = RawReplDriver::new(sim, &config);

    let err = upload(&mut driver, &bitstream(100)).unwrap_err();
    assert_eq!(err.phase(), Phase::Load);

    let sim = driver.into_link();
    assert_eq!(sim.executed().last().map(String::as_str), Some("bitstream = None"));
    assert_eq!(sim.variable("bitstream"), None);
    assert!(!sim.in_raw_mode());
}
