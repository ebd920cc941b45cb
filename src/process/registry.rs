use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

use crate::config::RuntimeConfig;
use crate::mailbox::Mailbox;
use crate::message::Message;

use super::Pid;

/// Everything the runtime keeps about one process.
///
/// Terminated processes are removed from the registry outright rather than
/// left behind as tombstones; see DESIGN.md for the rationale.
pub(crate) struct ProcessRecord {
    pub pid: Pid,
    pub name: Option<String>,
    pub mailbox: Mailbox<Message>,
    pub links: Mutex<HashSet<Pid>>,
    pub trap_exit: AtomicBool,
}

impl ProcessRecord {
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{name}-{}", self.pid.0),
            None => format!("process-{}", self.pid.0),
        }
    }
}

struct Registry {
    next_id: u64,
    processes: HashMap<Pid, Arc<ProcessRecord>>,
}

impl Registry {
    fn new() -> Self {
        Self { next_id: 1, processes: HashMap::new() }
    }

    fn new_pid(&mut self) -> Pid {
        let pid = Pid(self.next_id);
        self.next_id += 1;
        pid
    }
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::new()));

/// Create and register a new, unlinked process record.
pub(crate) fn create(name: Option<String>, config: RuntimeConfig) -> Arc<ProcessRecord> {
    let mut registry = REGISTRY.lock().unwrap();
    let pid = registry.new_pid();
    let record = Arc::new(ProcessRecord {
        pid,
        name,
        mailbox: Mailbox::new(config.mailbox_capacity),
        links: Mutex::new(HashSet::new()),
        trap_exit: AtomicBool::new(false),
    });
    registry.processes.insert(pid, Arc::clone(&record));
    record
}

/// Create and register a new process record, linked to `linked_to`. Both
/// sides of the link are established atomically, before the new process'
/// body starts running, so a peer can never observe a half-formed link.
pub(crate) fn create_linked(
    name: Option<String>,
    config: RuntimeConfig,
    linked_to: Pid,
) -> Option<Arc<ProcessRecord>> {
    let mut registry = REGISTRY.lock().unwrap();
    let peer = registry.processes.get(&linked_to)?.clone();
    let pid = registry.new_pid();
    let record = Arc::new(ProcessRecord {
        pid,
        name,
        mailbox: Mailbox::new(config.mailbox_capacity),
        links: Mutex::new(HashSet::from([linked_to])),
        trap_exit: AtomicBool::new(false),
    });
    peer.links.lock().unwrap().insert(pid);
    registry.processes.insert(pid, Arc::clone(&record));
    Some(record)
}

pub(crate) fn lookup(pid: Pid) -> Option<Arc<ProcessRecord>> {
    REGISTRY.lock().unwrap().processes.get(&pid).cloned()
}

/// Remove a process from the registry, returning its link set so the caller
/// can notify each peer outside of the registry lock.
pub(crate) fn remove(pid: Pid) -> HashSet<Pid> {
    let mut registry = REGISTRY.lock().unwrap();
    match registry.processes.remove(&pid) {
        Some(record) => record.links.lock().unwrap().clone(),
        None => HashSet::new(),
    }
}

#[cfg(test)]
pub(crate) fn len() -> usize {
    REGISTRY.lock().unwrap().processes.len()
}
