//! Snapshots of the OS process table.
//!
//! Renderers hand frames off to worker processes that are not visible through
//! the child handle alone, so discovery, CPU sampling and termination all work
//! from a [`ProcessTree`] built by walking parent links.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use regex::Regex;
use sysinfo::{Pid, Process, ProcessesToUpdate, System};

/// CPU figures for a single process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSample {
    /// Total CPU time consumed since the process started.
    pub cpu_time: Duration,
    /// Usage since the previous refresh, in percent of one core. Zero on the
    /// first snapshot of a process.
    pub cpu_usage: f32,
}

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The kill signal was delivered.
    Killed,
    /// The process had already exited.
    Gone,
    /// The process exists but the signal could not be delivered.
    Refused,
}

/// A point-in-time view of running processes and their parent links.
pub struct ProcessTree {
    system: System,
    children: HashMap<Pid, Vec<Pid>>,
}

impl ProcessTree {
    /// Read the current process table.
    pub fn snapshot() -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in system.processes() {
            if !is_task_leader(process) {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }
        for list in children.values_mut() {
            list.sort();
        }

        Self { system, children }
    }

    /// Whether `pid` was running when the snapshot was taken.
    pub fn contains(&self, pid: Pid) -> bool {
        self.system.process(pid).is_some()
    }

    /// OS name of `pid`, if it is in the snapshot.
    pub fn name(&self, pid: Pid) -> Option<String> {
        self.system
            .process(pid)
            .map(|p| p.name().to_string_lossy().into_owned())
    }

    /// All descendants of `root`, nearest generation first. `root` itself is
    /// not included.
    pub fn descendants(&self, root: Pid) -> Vec<Pid> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(pid) = queue.pop_front() {
            if let Some(kids) = self.children.get(&pid) {
                for &kid in kids {
                    // Pid reuse can in theory produce a cycle.
                    if kid != root && !found.contains(&kid) {
                        found.push(kid);
                        queue.push_back(kid);
                    }
                }
            }
        }
        found
    }

    /// Descendants of `root` whose process name matches `pattern`.
    pub fn descendants_matching(&self, root: Pid, pattern: &Regex) -> Vec<Pid> {
        self.descendants(root)
            .into_iter()
            .filter(|pid| {
                self.system
                    .process(*pid)
                    .map(|p| pattern.is_match(&p.name().to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// CPU figures for `pid`, or `None` if it was not running.
    pub fn cpu_sample(&self, pid: Pid) -> Option<CpuSample> {
        self.system.process(pid).map(|p| CpuSample {
            cpu_time: Duration::from_millis(p.accumulated_cpu_time()),
            cpu_usage: p.cpu_usage(),
        })
    }

    /// Send a kill signal to `pid`.
    pub fn terminate(&self, pid: Pid) -> Termination {
        let Some(process) = self.system.process(pid) else {
            return Termination::Gone;
        };
        if process.kill() {
            return Termination::Killed;
        }
        // The process may have exited after the snapshot was taken.
        if still_running(pid) {
            Termination::Refused
        } else {
            Termination::Gone
        }
    }
}

impl std::fmt::Debug for ProcessTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTree")
            .field("processes", &self.system.processes().len())
            .finish()
    }
}

/// Linux reports threads as processes too; only real processes have children
/// worth following.
fn is_task_leader(process: &Process) -> bool {
    process.thread_kind().is_none()
}

fn still_running(pid: Pid) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Renderer worker processes seen so far during one stage run.
///
/// Insertion ordered and free of duplicates.
#[derive(Debug, Clone, Default)]
pub struct ChildProcessSet {
    pids: Vec<Pid>,
}

impl ChildProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `pids`, returning the ones not already tracked.
    pub fn track(&mut self, pids: impl IntoIterator<Item = Pid>) -> Vec<Pid> {
        let mut added = Vec::new();
        for pid in pids {
            if !self.pids.contains(&pid) {
                self.pids.push(pid);
                added.push(pid);
            }
        }
        added
    }

    /// Stop tracking `pid`.
    pub fn prune(&mut self, pid: Pid) -> bool {
        let before = self.pids.len();
        self.pids.retain(|p| *p != pid);
        self.pids.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = Pid> + '_ {
        self.pids.iter().copied()
    }

    pub fn as_slice(&self) -> &[Pid] {
        &self.pids
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn clear(&mut self) {
        self.pids.clear();
    }
}
