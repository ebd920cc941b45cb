//! End-to-end block-transfer correctness: bridge an upload `Transfer` and a
//! download `Transfer` the way a `Session` would, and check the file that
//! comes out the other end is byte-identical, for every file size named in
//! the block-transfer testable property.

use std::io::Write;
use std::time::Duration;

use sparklink::process::{attach, detach, receive, try_receive};
use sparklink::transfer::{Direction, FileRecord, Transfer};
use sparklink::{Message, TransferConfig};

/// Relay block and state-change traffic between an upload and a download
/// transfer until the download side reports `finished`, the same role a
/// `Session` plays by forwarding wire messages between the two peers'
/// transfer actors.
fn run_transfer_for_size(size: usize) {
    let src_dir = tempfile::tempdir().unwrap();
    let dst_dir = tempfile::tempdir().unwrap();

    let src_path = src_dir.path().join("payload.bin");
    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    std::fs::File::create(&src_path).unwrap().write_all(&payload).unwrap();

    let pid = attach(Some(&format!("transfer-size-{size}"))).unwrap();

    let upload = Transfer::with_config(TransferConfig { block_size: 1024, download_dir: dst_dir.path().to_path_buf() });
    let download = Transfer::with_config(TransferConfig { block_size: 1024, download_dir: dst_dir.path().to_path_buf() });
    upload.state_changed.subscribe(Some(pid));
    download.state_changed.subscribe(Some(pid));

    let file = FileRecord {
        id: 1,
        name: "payload.bin".into(),
        size: payload.len() as u64,
        path: Some(src_path),
    };
    let recv_file = FileRecord { id: 1, name: "payload.bin".into(), size: payload.len() as u64, path: None };

    upload.init_transfer(1, Direction::Upload, file, 1, pid);
    download.init_transfer(2, Direction::Download, recv_file, 2, pid);

    // Drain the created+inactive state-change pair for each side.
    for _ in 0..4 {
        let m = receive().unwrap();
        assert!(
            m.tag() == "transfer-created" || m.tag() == "transfer-state-changed",
            "unexpected message while draining startup events: {m:?}"
        );
    }

    download.remote_state_changed("active");
    upload.start_transfer();

    let mut download_finished = false;
    let mut upload_finished = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !download_finished || !upload_finished {
        assert!(std::time::Instant::now() < deadline, "transfer of {size} bytes did not complete in time");
        let Some(m) = try_receive().unwrap() else {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        };
        match m {
            Message::Block(block) => {
                download.block_received(block);
                upload.send_idle();
            }
            Message::Event { tag, params } if tag == "transfer-state-changed" => {
                let transfer_id = match &params[0] {
                    sparklink::Value::UInt(n) => *n,
                    _ => panic!("transfer id param must be a uint"),
                };
                if matches!(&params[2], sparklink::Value::Str(state) if state == "finished") {
                    match transfer_id {
                        1 => upload_finished = true,
                        2 => download_finished = true,
                        other => panic!("unexpected transfer id {other}"),
                    }
                }
            }
            _ => {}
        }
    }

    upload.close_transfer();
    download.close_transfer();
    detach().unwrap();

    let written = std::fs::read(dst_dir.path().join("payload.bin")).unwrap();
    assert_eq!(written, payload, "size {size}: downloaded bytes differ from the source file");
}

#[test]
fn empty_file() {
    run_transfer_for_size(0);
}

#[test]
fn single_byte_file() {
    run_transfer_for_size(1);
}

#[test]
fn just_under_one_block() {
    run_transfer_for_size(1023);
}

#[test]
fn exactly_one_block() {
    run_transfer_for_size(1024);
}

#[test]
fn just_over_one_block() {
    run_transfer_for_size(1025);
}

#[test]
fn one_megabyte() {
    run_transfer_for_size(1_048_576);
}
