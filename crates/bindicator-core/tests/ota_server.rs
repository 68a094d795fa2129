mod common;

use bindicator_core::{
    BootOracle, OtaServer, OtaServerConfig, Partition, PartitionTable, ServerState,
    SessionError, SharedAccessWindow,
    access::DEFAULT_WINDOW,
    boot::RebootError,
    protocol::{MAX_CHUNK_SIZE, encode_chunk_header},
};
use common::{
    RecordingActivity, RecordingFlash, ScriptedBoot, ScriptedPeer, even_chunks, image,
    production_table, session_script, sha256,
};
use embassy_futures::{block_on, join::join};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Timer, with_timeout};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

type Window = SharedAccessWindow<CriticalSectionRawMutex>;

fn fast_config() -> OtaServerConfig {
    OtaServerConfig {
        handshake_timeout: Duration::from_millis(200),
        read_timeout: Duration::from_millis(200),
        done_timeout: Duration::from_millis(200),
        reboot_delay: Duration::from_millis(0),
        poll_interval: Duration::from_millis(5),
    }
}

#[test]
fn default_config_is_the_shared_constant() {
    let config = OtaServerConfig::default();
    assert_eq!(config, OtaServerConfig::DEFAULT);
    assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    assert_eq!(config.read_timeout, Duration::from_secs(30));
    assert_eq!(config.done_timeout, Duration::from_secs(2));
}

struct Harness {
    flash: RecordingFlash,
    boot: ScriptedBoot,
    window: Window,
    activity: RecordingActivity,
    table: PartitionTable,
    running: Partition,
}

impl Harness {
    fn new() -> Self {
        Self::with_table(production_table())
    }

    fn with_table(table: PartitionTable) -> Self {
        let window = Window::new(DEFAULT_WINDOW);
        window.enable(Duration::from_ticks(0));
        Self {
            flash: RecordingFlash::default(),
            boot: ScriptedBoot::default(),
            window,
            activity: RecordingActivity::default(),
            table,
            running: Partition::A,
        }
    }

    /// Run one session per peer, in order, through a single server.
    fn serve(&mut self, peers: &mut [ScriptedPeer]) -> Vec<SessionError> {
        let mut server = OtaServer::new(
            &mut self.flash,
            &mut self.boot,
            BootOracle::new(self.running),
            self.table,
            &self.window,
            &self.activity,
            fast_config(),
        );
        block_on(async {
            let mut errors = Vec::new();
            for peer in peers.iter_mut() {
                errors.push(server.handle(peer).await);
                assert_eq!(server.state(), ServerState::Idle);
            }
            errors
        })
    }
}

#[test]
fn ten_thousand_byte_image_is_acked_per_chunk() {
    let data = image(10_000);
    let script = session_script(&data, &[4096, 4096, 1808], &sha256(&data));
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::Reboot(RebootError::NoReset)]);
    assert_eq!(
        peers[0].output_text(),
        "READY 2031616\nACK 4096\nACK 8192\nACK 10000\nVERIFIED\n"
    );
    assert_eq!(harness.flash.erases(), [0x20_0000, 0x20_1000, 0x20_2000]);
    assert_eq!(harness.flash.read(0x20_0000, data.len()), &data[..]);
    assert_eq!(harness.boot.reboots, [(Partition::B, Duration::from_millis(0))]);
    assert!(!harness.window.is_enabled());
    assert_eq!(harness.activity.pauses.get(), 1);
    assert_eq!(harness.activity.resumes.get(), 1);
    assert_eq!(harness.activity.flushes.get(), 1);
}

#[test]
fn running_from_b_writes_to_a() {
    let data = image(5000);
    let script = session_script(&data, &even_chunks(5000, 4096), &sha256(&data));
    let mut harness = Harness::new();
    harness.running = Partition::B;
    let mut peers = [ScriptedPeer::new(script)];

    harness.serve(&mut peers);

    assert_eq!(harness.flash.erases(), [0x1_0000, 0x1_1000]);
    assert_eq!(harness.boot.reboots[0].0, Partition::A);
}

#[test]
fn wrong_digest_is_rejected_without_reboot() {
    let data = image(6000);
    let script = session_script(&data, &[4096, 1904], &[0u8; 32]);
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::HashMismatch]);
    assert_eq!(
        peers[0].output_text(),
        "READY 2031616\nACK 4096\nACK 6000\nERROR hash mismatch\n"
    );
    assert!(harness.boot.reboots.is_empty());
    assert!(harness.window.is_enabled());
    assert!(!harness.activity.paused.get());
    assert_eq!(harness.activity.flushes.get(), 0);
}

#[test]
fn mismatch_needs_a_fresh_handshake() {
    let data = image(3000);
    let good = session_script(&data, &[3000], &sha256(&data));
    let mut bad = session_script(&data, &[3000], &[0xAA; 32]);
    // A second DONE on the same connection must not be honoured.
    bad.extend_from_slice(bindicator_core::protocol::encode_done(&sha256(&data)).as_bytes());
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(bad), ScriptedPeer::new(good)];

    let errors = harness.serve(&mut peers);

    assert_eq!(
        errors,
        [
            SessionError::HashMismatch,
            SessionError::Reboot(RebootError::NoReset)
        ]
    );
    assert!(!peers[0].output_text().contains("VERIFIED"));
    assert!(peers[1].output_text().ends_with("VERIFIED\n"));
    // Each session erases its sector again.
    assert_eq!(harness.flash.erases(), [0x20_0000, 0x20_0000]);
}

#[test]
fn oversized_chunk_is_refused_before_its_body() {
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(MAX_CHUNK_SIZE as u32 + 1));
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::ChunkTooLarge]);
    assert_eq!(
        peers[0].output_text(),
        "READY 2031616\nERROR chunk too large\n"
    );
    assert!(harness.flash.operations.is_empty());
}

#[test]
fn cumulative_size_over_partition_is_rejected() {
    let table = PartitionTable::new(0x1_0000, 0x3_0000, 0x2000, 0).unwrap();
    let data = image(12_288);
    let mut script = b"OTA\n".to_vec();
    for chunk in data.chunks(4096) {
        script.extend_from_slice(&encode_chunk_header(chunk.len() as u32));
        script.extend_from_slice(chunk);
    }
    let mut harness = Harness::with_table(table);
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::FirmwareTooLarge]);
    assert_eq!(
        peers[0].output_text(),
        "READY 8192\nACK 4096\nACK 8192\nERROR firmware too large\n"
    );
    assert_eq!(harness.flash.writes(), [(0x3_0000, 4096), (0x3_1000, 4096)]);
}

#[test]
fn bad_handshake_gets_an_error_and_no_pause() {
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(b"HELLO\n".to_vec())];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::BadHandshake]);
    assert_eq!(peers[0].output_text(), "ERROR bad handshake\n");
    assert_eq!(harness.activity.pauses.get(), 0);
}

#[test]
fn silent_client_times_out_and_resumes_background() {
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(100));
    script.extend_from_slice(&[0u8; 40]);
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::hanging(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::Timeout]);
    assert_eq!(peers[0].output_text(), "READY 2031616\nERROR timeout\n");
    assert_eq!(harness.activity.resumes.get(), 1);
    assert!(harness.flash.operations.is_empty());
}

#[test]
fn unacknowledged_reply_times_out_and_resumes_background() {
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(16));
    script.extend_from_slice(&[0x5A; 16]);
    let mut harness = Harness::new();
    // READY drains, the ACK for the first chunk never does.
    let mut peer = ScriptedPeer::stalling_after(script, 1);
    let mut server = OtaServer::new(
        &mut harness.flash,
        &mut harness.boot,
        BootOracle::new(Partition::A),
        harness.table,
        &harness.window,
        &harness.activity,
        fast_config(),
    );

    let outcome = block_on(with_timeout(
        Duration::from_secs(3),
        server.handle(&mut peer),
    ));

    assert_eq!(outcome, Ok(SessionError::Timeout));
    assert_eq!(server.state(), ServerState::Idle);
    assert_eq!(
        peer.output_text(),
        "READY 2031616\nACK 16\nERROR timeout\n"
    );
    assert!(!harness.activity.paused.get());
    assert_eq!(harness.activity.resumes.get(), 1);
    assert!(harness.window.is_enabled());
}

#[test]
fn dropped_connection_is_not_answered() {
    let data = image(100);
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(100));
    script.extend_from_slice(&data[..50]);
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::Closed]);
    assert_eq!(peers[0].output_text(), "READY 2031616\n");
}

#[test]
fn malformed_done_digest_is_a_protocol_error() {
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(4));
    script.extend_from_slice(b"abcd");
    script.extend_from_slice(b"DONE 1234\n");
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::BadDigest]);
    assert!(peers[0].output_text().ends_with("ACK 4\nERROR bad digest\n"));
    assert!(harness.boot.reboots.is_empty());
}

#[test]
fn uppercase_digest_is_accepted() {
    let data = image(64);
    let digest = sha256(&data);
    let mut script = b"OTA\n".to_vec();
    script.extend_from_slice(&encode_chunk_header(64));
    script.extend_from_slice(&data);
    let done = bindicator_core::protocol::encode_done(&digest);
    script.extend_from_slice(done.to_uppercase().as_bytes());
    let mut harness = Harness::new();
    let mut peers = [ScriptedPeer::new(script)];

    harness.serve(&mut peers);

    assert!(peers[0].output_text().ends_with("VERIFIED\n"));
}

#[test]
fn write_failure_aborts_the_session() {
    let data = image(10);
    let script = session_script(&data, &[10], &sha256(&data));
    let mut harness = Harness::new();
    harness.flash.fail_writes = true;
    let mut peers = [ScriptedPeer::new(script)];

    let errors = harness.serve(&mut peers);

    assert_eq!(errors, [SessionError::Write]);
    assert_eq!(peers[0].output_text(), "READY 2031616\nERROR write failed\n");
    assert!(harness.window.is_enabled());
}

#[test]
fn listener_waits_for_the_access_window() {
    let window = Window::new(DEFAULT_WINDOW);
    let mut flash = RecordingFlash::default();
    let activity = RecordingActivity::default();
    let mut server = OtaServer::new(
        &mut flash,
        ScriptedBoot::default(),
        BootOracle::new(Partition::A),
        production_table(),
        &window,
        &activity,
        fast_config(),
    );
    assert_eq!(server.state(), ServerState::Idle);
    assert!(!server.window_open());

    block_on(join(server.wait_for_window(), async {
        Timer::after(Duration::from_millis(30)).await;
        window.enable(Duration::from_secs(60));
    }));
    assert_eq!(server.state(), ServerState::Listening);

    window.disable();
    block_on(server.wait_for_window_closed());
    assert!(!server.window_open());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_sector_is_erased_once_before_its_first_write(
        len in 1usize..20_000,
        sizes in prop::collection::vec(1usize..=MAX_CHUNK_SIZE, 1..64),
    ) {
        let mut chunks = Vec::new();
        let mut left = len;
        for size in sizes.iter().cycle() {
            if left == 0 {
                break;
            }
            let size = (*size).min(left);
            chunks.push(size);
            left -= size;
        }
        let data = image(len);
        let script = session_script(&data, &chunks, &sha256(&data));
        let mut harness = Harness::new();
        let mut peers = [ScriptedPeer::new(script)];

        let errors = harness.serve(&mut peers);

        prop_assert_eq!(&errors, &[SessionError::Reboot(RebootError::NoReset)]);
        let erases = harness.flash.erases();
        let expected: Vec<u32> = (0..len.div_ceil(4096) as u32)
            .map(|sector| 0x20_0000 + sector * 4096)
            .collect();
        prop_assert_eq!(erases, expected);
        prop_assert_eq!(harness.flash.read(0x20_0000, len), &data[..]);
    }
}
