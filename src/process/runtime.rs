use std::cell::RefCell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use log::Level;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::message::Message;
use crate::value::Value;

use super::registry::{self, ProcessRecord};
use super::Pid;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ProcessRecord>>> = const { RefCell::new(None) };
}

/// What a process body returns when it stops.
pub type ProcessResult = Result<(), Exit>;

/// The reason a process stopped, threaded through `?` from any depth of the
/// call stack instead of unwinding via a typed panic.
#[derive(Debug)]
pub enum Exit {
    /// `runtime::exit(reason)` was called. `None` is a graceful stop.
    Reason(Option<String>),
    /// A runtime operation (`receive`, pattern dispatch, ...) failed.
    Runtime(RuntimeError),
}

impl From<RuntimeError> for Exit {
    fn from(err: RuntimeError) -> Self {
        Exit::Runtime(err)
    }
}

/// Voluntarily stop the current process. `reason = None` is graceful;
/// anything else is logged and propagated to linked peers as a failure.
///
/// Usage: `return Err(exit(Some("bad state".into())))` from anywhere in a
/// process body.
pub fn exit(reason: Option<String>) -> Exit {
    Exit::Reason(reason)
}

/// How a process's thread of execution actually ended, used to decide what
/// to tell linked peers.
#[derive(Debug, Clone)]
pub(crate) enum ExitCause {
    Graceful,
    Killed,
    NoMatch,
    Failure(String),
    Exception(String),
}

impl ExitCause {
    fn is_graceful(&self) -> bool {
        matches!(self, ExitCause::Graceful)
    }

    fn reason_value(&self) -> Option<String> {
        match self {
            ExitCause::Graceful => None,
            ExitCause::Killed => Some("killed".to_string()),
            ExitCause::NoMatch => Some("no-match".to_string()),
            ExitCause::Failure(r) => Some(r.clone()),
            ExitCause::Exception(r) => Some(r.clone()),
        }
    }
}

fn current_record() -> Option<Arc<ProcessRecord>> {
    CURRENT.with(|c| c.borrow().clone())
}

/// PID of the currently running process, if this thread is bound to one.
pub fn current() -> Option<Pid> {
    current_record().map(|r| r.pid)
}

/// A per-process logger whose messages are tagged with the `<name>-<pid>`
/// target, so log output can be traced back to the process that emitted it
/// even after it has exited.
pub struct ProcessLogger {
    target: String,
}

impl ProcessLogger {
    fn log(&self, level: Level, args: std::fmt::Arguments<'_>) {
        log::logger().log(
            &log::Record::builder()
                .args(args)
                .level(level)
                .target(&self.target)
                .build(),
        );
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(Level::Info, format_args!("{}", msg.as_ref()));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(Level::Warn, format_args!("{}", msg.as_ref()));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(Level::Error, format_args!("{}", msg.as_ref()));
    }
}

/// Logger for the currently running process (or the root logger, target
/// `"sparklink"`, if this thread isn't attached to one).
pub fn logger() -> ProcessLogger {
    match current_record() {
        Some(record) => ProcessLogger { target: record.display_name() },
        None => ProcessLogger { target: "sparklink".to_string() },
    }
}

/// Spawn a new, unlinked process running `body`. Returns its PID
/// immediately; the body runs on a dedicated OS thread.
pub fn spawn<F>(body: F, name: Option<&str>) -> Pid
where
    F: FnOnce() -> ProcessResult + Send + 'static,
{
    spawn_with_config(body, name, RuntimeConfig::default())
}

pub fn spawn_with_config<F>(body: F, name: Option<&str>, config: RuntimeConfig) -> Pid
where
    F: FnOnce() -> ProcessResult + Send + 'static,
{
    let record = registry::create(name.map(str::to_owned), config);
    let pid = record.pid;
    start_thread(record, body);
    pid
}

/// Spawn a process linked to the current one, atomically. Panics if the
/// current thread has no attached process.
pub fn spawn_link<F>(body: F, name: Option<&str>) -> Pid
where
    F: FnOnce() -> ProcessResult + Send + 'static,
{
    let caller = current().expect("spawn_link requires a current process");
    let record = registry::create_linked(name.map(str::to_owned), RuntimeConfig::default(), caller)
        .expect("current process must be registered");
    let pid = record.pid;
    start_thread(record, body);
    pid
}

fn start_thread<F>(record: Arc<ProcessRecord>, body: F)
where
    F: FnOnce() -> ProcessResult + Send + 'static,
{
    let thread_name = record.display_name();
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || run_body(record, body))
        .expect("failed to spawn process thread");
}

fn run_body<F>(record: Arc<ProcessRecord>, body: F)
where
    F: FnOnce() -> ProcessResult + Send + 'static,
{
    CURRENT.with(|c| *c.borrow_mut() = Some(Arc::clone(&record)));
    logger().info("process started");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body));
    let cause = match outcome {
        Ok(Ok(())) => ExitCause::Graceful,
        Ok(Err(Exit::Reason(None))) => ExitCause::Graceful,
        Ok(Err(Exit::Reason(Some(reason)))) => ExitCause::Failure(reason),
        Ok(Err(Exit::Runtime(RuntimeError::ProcessKilled))) => ExitCause::Killed,
        Ok(Err(Exit::Runtime(RuntimeError::NoMatch))) => ExitCause::NoMatch,
        Ok(Err(Exit::Runtime(other))) => ExitCause::Failure(other.to_string()),
        Err(panic_payload) => ExitCause::Exception(describe_panic(&panic_payload)),
    };

    terminate(&record, cause);
    CURRENT.with(|c| *c.borrow_mut() = None);
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Notify every linked peer, close our own mailbox, remove ourselves from
/// the registry.
fn terminate(record: &Arc<ProcessRecord>, cause: ExitCause) {
    let log = ProcessLogger { target: record.display_name() };
    if cause.is_graceful() {
        log.info("process stopped");
    } else {
        log.error(format!("process died: {:?}", cause));
    }

    let links = registry::remove(record.pid);
    let reason = cause.reason_value();
    for peer_pid in links {
        if let Some(peer) = registry::lookup(peer_pid) {
            // The peer's own link set still references us; drop it so a
            // later termination on their side doesn't try to notify a PID
            // that no longer exists.
            peer.links.lock().unwrap().remove(&record.pid);
            if peer.trap_exit.load(Ordering::SeqCst) {
                let event = Message::event(
                    "exit",
                    vec![Value::Pid(record.pid), reason.clone().map(Value::Str).unwrap_or(Value::Unit)],
                );
                let _ = peer.mailbox.put(event);
            } else if !cause.is_graceful() {
                peer.mailbox.close(true);
            }
        }
    }

    record.mailbox.close(true);
}

/// Bind the current OS thread to a new, unlinked process. Fails if this
/// thread is already bound to one.
pub fn attach(name: Option<&str>) -> Result<Pid, RuntimeError> {
    if current().is_some() {
        return Err(RuntimeError::AlreadyAttached);
    }
    let record = registry::create(name.map(str::to_owned), RuntimeConfig::default());
    let pid = record.pid;
    CURRENT.with(|c| *c.borrow_mut() = Some(record));
    logger().info("process attached");
    Ok(pid)
}

/// Release the current thread's binding, running the same termination
/// sequence a spawned process would on a graceful return.
pub fn detach() -> Result<(), RuntimeError> {
    let record = current_record().ok_or(RuntimeError::NotAttached)?;
    logger().info("process detached");
    terminate(&record, ExitCause::Graceful);
    CURRENT.with(|c| *c.borrow_mut() = None);
    Ok(())
}

/// Send a message to `pid`. Fails with [`RuntimeError::ProcessKilled`] if
/// the caller has been killed, [`RuntimeError::ProcessExited`] if the
/// target's mailbox is closed, or [`RuntimeError::UnknownPid`] if `pid`
/// does not name a live process.
pub fn send(pid: Pid, message: Message) -> Result<(), RuntimeError> {
    if let Some(caller) = current_record() {
        if !caller.mailbox.is_open() {
            return Err(RuntimeError::ProcessKilled);
        }
    }
    let target = registry::lookup(pid).ok_or(RuntimeError::UnknownPid(pid))?;
    target.mailbox.put(message).map_err(|_| RuntimeError::ProcessExited(pid))
}

/// Like [`send`], but treats a target that has already exited as a no-op,
/// reporting `Ok(false)` instead of an error.
pub fn try_send(pid: Pid, message: Message) -> Result<bool, RuntimeError> {
    match send(pid, message) {
        Ok(()) => Ok(true),
        Err(RuntimeError::ProcessExited(_)) => Ok(false),
        Err(other) => Err(other),
    }
}

/// Block until a message arrives in the current process' mailbox.
pub fn receive() -> Result<Message, RuntimeError> {
    let record = current_record().ok_or(RuntimeError::NotAttached)?;
    record.mailbox.get().map_err(|_| RuntimeError::ProcessKilled)
}

/// Non-blocking variant of [`receive`]: `Ok(None)` if the mailbox is
/// currently empty.
pub fn try_receive() -> Result<Option<Message>, RuntimeError> {
    let record = current_record().ok_or(RuntimeError::NotAttached)?;
    record.mailbox.get_unless_empty().map_err(|_| RuntimeError::ProcessKilled)
}

/// Close `pid`'s mailbox, killing it. Returns `false` if `pid` is unknown.
pub fn kill(pid: Pid, flush: bool) -> bool {
    match registry::lookup(pid) {
        Some(record) => {
            record.mailbox.close(flush);
            true
        }
        None => false,
    }
}

/// Mark the current process as trapping exits: a linked peer's death is
/// delivered as an `Event("exit", pid, reason)` instead of killing us.
pub fn trap_exit() -> Result<(), RuntimeError> {
    let record = current_record().ok_or(RuntimeError::NotAttached)?;
    record.trap_exit.store(true, Ordering::SeqCst);
    Ok(())
}
