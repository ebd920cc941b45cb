//! One actor per file transfer: upload or download, driven by commands from
//! a session and events describing the remote peer's declared state.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::message::{message_pattern, Block, Message};
use crate::notifier::EventSender;
use crate::process::{logger, receive, send, spawn, Loop, Pid, ProcessResult};
use crate::value::{Pattern, Value};

/// Which way a transfer moves bytes relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    fn as_u64(self) -> u64 {
        match self {
            Direction::Upload => 0,
            Direction::Download => 1,
        }
    }

    fn from_u64(n: u64) -> Self {
        if n == 0 {
            Direction::Upload
        } else {
            Direction::Download
        }
    }
}

/// The file a transfer moves. `path` is the source file for an upload;
/// ignored for a download, whose destination is `name` joined onto the
/// configured download directory.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: u32,
    pub name: String,
    pub size: u64,
    pub path: Option<PathBuf>,
}

fn file_record_value(file: &FileRecord) -> Value {
    Value::Seq(vec![
        Value::UInt(file.id as u64),
        Value::from(file.name.clone()),
        Value::UInt(file.size),
        Value::from(file.path.clone().map(|p| p.display().to_string()).unwrap_or_default()),
    ])
}

fn file_record_from_value(value: &Value) -> FileRecord {
    match value {
        Value::Seq(items) => {
            let id = match &items[0] {
                Value::UInt(n) => *n as u32,
                _ => panic!("file record id must be a uint"),
            };
            let name = match &items[1] {
                Value::Str(s) => s.clone(),
                _ => panic!("file record name must be a string"),
            };
            let size = match &items[2] {
                Value::UInt(n) => *n,
                _ => panic!("file record size must be a uint"),
            };
            let path = match &items[3] {
                Value::Str(s) if !s.is_empty() => Some(PathBuf::from(s)),
                _ => None,
            };
            FileRecord { id, name, size, path }
        }
        other => panic!("expected a file record, got {other:?}"),
    }
}

/// Matches any `Message::Block`, regardless of its contents — blocks carry
/// their own identity (transfer, block id) inside the variant rather than
/// as structural params, so the pattern only needs to pin the shape down.
fn block_pattern() -> Pattern {
    message_pattern("Block", "block", vec![])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Inactive,
    Active,
    Finished,
    Closed,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Inactive => "inactive",
            Phase::Active => "active",
            Phase::Finished => "finished",
            Phase::Closed => "closed",
        }
    }
}

/// A handle to a spawned transfer process: its pid and the event stream
/// announcing its state changes.
pub struct Transfer {
    pid: Pid,
    pub state_changed: Arc<EventSender>,
}

impl Transfer {
    pub fn new() -> Self {
        Self::with_config(TransferConfig::default())
    }

    pub fn with_config(config: TransferConfig) -> Self {
        let state_changed = Arc::new(EventSender::new("transfer-state-changed", 3));
        let events = state_changed.clone();
        let pid = spawn(move || run_transfer(events, config), Some("Transfer"));
        Self { pid, state_changed }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn init_transfer(&self, transfer_id: u32, direction: Direction, file: FileRecord, req_id: u64, session_pid: Pid) {
        send(
            self.pid,
            Message::command(
                "init-transfer",
                vec![
                    Value::UInt(transfer_id as u64),
                    Value::UInt(direction.as_u64()),
                    file_record_value(&file),
                    Value::UInt(req_id),
                    Value::Pid(session_pid),
                ],
            ),
        )
        .ok();
    }

    pub fn start_transfer(&self) {
        let _ = send(self.pid, Message::command("start-transfer", vec![]));
    }

    pub fn close_transfer(&self) {
        let _ = send(self.pid, Message::command("close-transfer", vec![]));
    }

    pub fn send_idle(&self) {
        let _ = send(self.pid, Message::event("send-idle", vec![]));
    }

    pub fn remote_state_changed(&self, new_state: &str) {
        let _ = send(self.pid, Message::event("remote-state-changed", vec![Value::from(new_state)]));
    }

    pub fn block_received(&self, block: Block) {
        let _ = send(self.pid, Message::Block(block));
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}

struct TransferState {
    session_pid: Option<Pid>,
    req_id: Option<u64>,
    transfer_id: u32,
    direction: Direction,
    phase: Option<Phase>,
    file: Option<FileRecord>,
    path: Option<PathBuf>,
    stream: Option<File>,
    block_size: usize,
    total_blocks: u32,
    next_block: u32,
    received: std::collections::HashSet<u32>,
    received_blocks: u32,
    completed_size: u64,
    offset: u64,
    started: Option<Instant>,
    ended: Option<Instant>,
    stop_requested: bool,
    events: Arc<EventSender>,
    config: TransferConfig,
}

impl TransferState {
    fn new(events: Arc<EventSender>, config: TransferConfig) -> Self {
        Self {
            session_pid: None,
            req_id: None,
            transfer_id: 0,
            direction: Direction::Upload,
            phase: None,
            file: None,
            path: None,
            stream: None,
            block_size: config.block_size,
            total_blocks: 0,
            next_block: 0,
            received: std::collections::HashSet::new(),
            received_blocks: 0,
            completed_size: 0,
            offset: 0,
            started: None,
            ended: None,
            stop_requested: false,
            events,
            config,
        }
    }
}

fn run_transfer(events: Arc<EventSender>, config: TransferConfig) -> ProcessResult {
    let mut state = TransferState::new(events, config);

    let mut lp: Loop<TransferState> = Loop::new();
    lp.add_pattern(message_pattern("Command", "init-transfer", vec![Pattern::Any; 5]), |s, m| {
        do_init_transfer(s, m);
    });
    lp.add_pattern(message_pattern("Command", "start-transfer", vec![]), |s, _| do_start_transfer(s));
    lp.add_pattern(message_pattern("Command", "close-transfer", vec![]), |s, _| do_close_transfer(s));
    lp.add_pattern(message_pattern("Event", "send-idle", vec![]), |s, _| on_send_idle(s));
    lp.add_pattern(message_pattern("Event", "remote-state-changed", vec![Pattern::Any]), |s, m| {
        on_remote_state_changed(s, param_str(m, 0));
    });
    lp.add_pattern(block_pattern(), |s, m| {
        if let Message::Block(block) = m {
            on_block_received(s, block.clone());
        }
    });

    loop {
        let message = match receive() {
            Ok(m) => m,
            Err(e) => {
                finish(&mut state);
                return Err(e.into());
            }
        };
        if let Err(e) = lp.dispatch(&mut state, &message) {
            finish(&mut state);
            return Err(e.into());
        }
        if state.stop_requested {
            break;
        }
    }
    finish(&mut state);
    Ok(())
}

fn finish(state: &mut TransferState) {
    close_file(state);
    change_phase(state, Phase::Closed);
}

fn param_str(m: &Message, idx: usize) -> String {
    match &m.params()[idx] {
        Value::Str(s) => s.clone(),
        other => panic!("expected a string param, got {other:?}"),
    }
}

fn change_phase(state: &mut TransferState, phase: Phase) {
    if state.phase != Some(phase) {
        logger().info(format!("transfer state changed from '{:?}' to '{}'", state.phase, phase.as_str()));
        state.phase = Some(phase);
        state.events.send(vec![
            Value::UInt(state.transfer_id as u64),
            Value::UInt(state.direction.as_u64()),
            Value::from(phase.as_str()),
        ]);
    }
}

fn close_file(state: &mut TransferState) {
    if let Some(mut stream) = state.stream.take() {
        let _ = stream.flush();
        if let Some(path) = &state.path {
            logger().info(format!("closed file '{}'", path.display()));
        }
    }
}

fn do_init_transfer(state: &mut TransferState, m: &Message) {
    let params = m.params();
    let transfer_id = match &params[0] {
        Value::UInt(n) => *n as u32,
        _ => panic!("transfer id must be a uint"),
    };
    let direction = match &params[1] {
        Value::UInt(n) => Direction::from_u64(*n),
        _ => panic!("direction must be a uint"),
    };
    let file = file_record_from_value(&params[2]);
    let req_id = match &params[3] {
        Value::UInt(n) => *n,
        _ => panic!("request id must be a uint"),
    };
    let session_pid = match &params[4] {
        Value::Pid(pid) => *pid,
        _ => panic!("session pid must be a pid"),
    };

    logger().info(format!("initializing transfer for file '{}'", file.name));
    state.transfer_id = transfer_id;
    state.direction = direction;
    state.req_id = Some(req_id);
    state.session_pid = Some(session_pid);
    state.received_blocks = 0;
    state.completed_size = 0;
    state.total_blocks = ((file.size + state.block_size as u64 - 1) / state.block_size.max(1) as u64) as u32;

    let result: Result<(), TransferError> = (|| {
        match direction {
            Direction::Upload => {
                let path = file.path.clone().ok_or(TransferError::InvalidState)?;
                state.stream = Some(File::open(&path)?);
                state.path = Some(path);
                state.next_block = 0;
            }
            Direction::Download => {
                let path = state.config.download_dir.join(&file.name);
                state.stream = Some(File::create(&path)?);
                state.path = Some(path);
                state.received.clear();
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        logger().error(format!("failed to open file for transfer: {e}"));
        state.stop_requested = true;
        return;
    }

    logger().info(format!("opened file '{}'", state.path.as_ref().unwrap().display()));
    state.offset = 0;
    state.file = Some(file.clone());
    state.phase = Some(Phase::Created);
    let _ = send(
        session_pid,
        Message::event(
            "transfer-created",
            vec![
                Value::UInt(state.transfer_id as u64),
                Value::UInt(state.direction.as_u64()),
                Value::UInt(file.id as u64),
                Value::UInt(req_id),
            ],
        ),
    );
    change_phase(state, Phase::Inactive);
}

fn do_start_transfer(state: &mut TransferState) {
    start_transfer(state);
}

fn start_transfer(state: &mut TransferState) {
    logger().info("starting transfer");
    state.started = Some(Instant::now());
    match state.direction {
        Direction::Upload => {
            change_phase(state, Phase::Active);
            send_next_block(state);
        }
        // A download with nothing to receive (an empty file) never gets a
        // `block-received` event to drive it to `finished`; an empty file
        // is already complete the moment it becomes active.
        Direction::Download if state.total_blocks == 0 => transfer_complete(state),
        Direction::Download => {}
    }
}

fn send_next_block(state: &mut TransferState) {
    if state.phase != Some(Phase::Active) {
        return;
    }
    if state.next_block >= state.total_blocks {
        transfer_complete(state);
        return;
    }
    let Some(stream) = state.stream.as_mut() else { return };
    let mut buf = vec![0u8; state.block_size];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(e) => {
            logger().error(format!("failed to read block: {e}"));
            state.stop_requested = true;
            return;
        }
    };
    buf.truncate(n);
    state.offset += n as u64;
    let block_id = state.next_block;
    state.next_block += 1;
    state.completed_size += n as u64;
    let block = Block { transfer_id: state.transfer_id, block_id, data: buf };
    if let Some(session_pid) = state.session_pid {
        let _ = send(session_pid, Message::Block(block));
    }
}

fn on_send_idle(state: &mut TransferState) {
    if state.direction == Direction::Upload && state.started.is_some() {
        send_next_block(state);
    }
}

fn on_remote_state_changed(state: &mut TransferState, remote_state: String) {
    let phase = match remote_state.as_str() {
        "created" => Phase::Created,
        "inactive" => Phase::Inactive,
        "active" => Phase::Active,
        "finished" => Phase::Finished,
        "closed" => Phase::Closed,
        other => {
            logger().warn(format!("ignoring unknown remote transfer state '{other}'"));
            return;
        }
    };
    change_phase(state, phase);
    match phase {
        Phase::Active => start_transfer(state),
        Phase::Closed => close_transfer(state),
        _ => {}
    }
}

fn on_block_received(state: &mut TransferState, block: Block) {
    let block_id = block.block_id;
    if !state.received.contains(&block_id) && block_id < state.total_blocks {
        let file_offset = block_id as u64 * state.block_size as u64;
        if state.offset != file_offset {
            if let Some(stream) = state.stream.as_mut() {
                let _ = stream.seek(SeekFrom::Start(file_offset));
            }
        }
        if let Some(stream) = state.stream.as_mut() {
            let _ = stream.write_all(&block.data);
        }
        state.offset = file_offset + block.data.len() as u64;
        state.received.insert(block_id);
        state.received_blocks += 1;
        state.completed_size += block.data.len() as u64;
    }
    if state.received_blocks == state.total_blocks {
        transfer_complete(state);
    }
}

fn transfer_complete(state: &mut TransferState) {
    state.ended = Some(Instant::now());
    change_phase(state, Phase::Finished);
    let duration = match (state.started, state.ended) {
        (Some(start), Some(end)) => end.duration_since(start),
        _ => std::time::Duration::ZERO,
    };
    let rate = if duration.as_secs_f64() > 0.0 {
        state.completed_size as f64 / duration.as_secs_f64()
    } else {
        state.completed_size as f64
    };
    logger().info(format!(
        "transferred {} in {:.2?} ({}/s)",
        format_size(state.completed_size),
        duration,
        format_size(rate as u64)
    ));
}

fn format_size(size: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("KiB", 1024), ("MiB", 1024 * 1024), ("GiB", 1024 * 1024 * 1024)];
    for (unit, count) in UNITS.iter().rev() {
        if size >= *count {
            return format!("{:.2} {unit}", size as f64 / *count as f64);
        }
    }
    format!("{size} byte")
}

fn do_close_transfer(state: &mut TransferState) {
    close_transfer(state);
}

fn close_transfer(state: &mut TransferState) {
    logger().info("closing transfer");
    close_file(state);
    state.stop_requested = true;
}
