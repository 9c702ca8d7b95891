//! Bookkeeping of every process a single execution starts.
//!
//! Membership is found through `/proc`: the process group of the leader,
//! anything whose parent is already a member, and, when killing, anything
//! still carrying the run tag in its environment. The tag catches processes
//! that left the group with `setsid` and were orphaned before a sample saw
//! them.

use std::{
    collections::BTreeMap,
    fs, process,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

use log::warn;

/// Environment variable carrying the tag of the run a process belongs to.
pub const RUN_TAG: &str = "IRON_JUDGE_RUN";

const KILL_ROUNDS: usize = 20;

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

/// A tag no other run of this judge process shares.
pub fn next_run_tag() -> String {
    format!("{}-{}", process::id(), NEXT_RUN.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug, Clone, Copy)]
struct Stat {
    zombie: bool,
    ppid: u32,
    pgrp: u32,
    start_time: u64,
    rss_pages: u64,
}

/// Parses `/proc/<pid>/stat`. The command name may hold spaces and
/// parentheses, so fields are counted from the last `)`.
fn read_stat(pid: u32) -> Option<Stat> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(Stat {
        zombie: *fields.first()? == "Z",
        ppid: fields.get(1)?.parse().ok()?,
        pgrp: fields.get(2)?.parse().ok()?,
        start_time: fields.get(19)?.parse().ok()?,
        rss_pages: fields.get(21)?.parse().ok()?,
    })
}

fn list_processes() -> Vec<(u32, Stat)> {
    let entries = match fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter_map(|pid| Some((pid, read_stat(pid)?)))
        .collect()
}

fn has_tag(pid: u32, needle: &[u8]) -> bool {
    match fs::read(format!("/proc/{}/environ", pid)) {
        Ok(environ) => environ.split(|b| *b == 0).any(|pair| pair == needle),
        Err(_) => false,
    }
}

fn page_kb() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64 / 1024
    } else {
        4
    }
}

/// Live members of one run, keyed by pid with their start time so a reused
/// pid is never mistaken for a member.
pub struct ProcessTree {
    leader: u32,
    tag: Vec<u8>,
    members: BTreeMap<u32, u64>,
    page_kb: u64,
}

impl ProcessTree {
    /// The leader must be the head of its own process group.
    pub fn new(leader: u32, tag: &str) -> Self {
        Self {
            leader,
            tag: format!("{}={}", RUN_TAG, tag).into_bytes(),
            members: BTreeMap::new(),
            page_kb: page_kb(),
        }
    }

    /// Refreshes the membership and returns the resident memory of all live
    /// members, in KB.
    pub fn sample(&mut self) -> u64 {
        let processes = self.refresh();
        processes
            .iter()
            .filter(|(pid, stat)| !stat.zombie && self.is_member(*pid, stat))
            .map(|(_, stat)| stat.rss_pages * self.page_kb)
            .sum()
    }

    /// SIGKILLs every member until none is left alive. Only safe while the
    /// leader is not reaped, since the leader pid names the group.
    pub fn kill(&mut self) {
        for round in 0..KILL_ROUNDS {
            let processes = self.refresh();
            let mut alive = 0;
            for (pid, stat) in &processes {
                if stat.zombie || *pid == process::id() {
                    continue;
                }
                if self.is_member(*pid, stat) || has_tag(*pid, &self.tag) {
                    alive += 1;
                    unsafe {
                        libc::kill(*pid as libc::pid_t, libc::SIGKILL);
                    }
                }
            }
            unsafe {
                libc::kill(-(self.leader as libc::pid_t), libc::SIGKILL);
            }
            if alive == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(1 << round.min(4)));
        }
        warn!("processes of group {} are still alive after killing", self.leader);
    }

    fn is_member(&self, pid: u32, stat: &Stat) -> bool {
        self.members.get(&pid) == Some(&stat.start_time)
    }

    fn refresh(&mut self) -> Vec<(u32, Stat)> {
        let processes = list_processes();
        self.members.retain(|pid, start_time| {
            processes
                .iter()
                .any(|(other, stat)| other == pid && stat.start_time == *start_time)
        });
        loop {
            let mut grew = false;
            for (pid, stat) in &processes {
                if self.members.contains_key(pid) {
                    continue;
                }
                if stat.pgrp == self.leader || self.members.contains_key(&stat.ppid) {
                    self.members.insert(*pid, stat.start_time);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        os::unix::process::CommandExt,
        process::{Command, Stdio},
    };

    #[test]
    fn stat_of_self() {
        let stat = read_stat(process::id()).unwrap();

        assert!(!stat.zombie);
        assert!(stat.rss_pages > 0);
    }

    #[test]
    fn tags_are_unique() {
        assert_ne!(next_run_tag(), next_run_tag());
    }

    #[test]
    fn kill_whole_tree() -> std::io::Result<()> {
        let tag = next_run_tag();
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30 & (setsid sleep 30 &); sleep 30"])
            .env(RUN_TAG, &tag)
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()?;
        thread::sleep(Duration::from_millis(200));

        let mut tree = ProcessTree::new(child.id(), &tag);
        assert!(tree.sample() > 0);
        tree.kill();
        child.wait()?;

        let needle = format!("{}={}", RUN_TAG, tag).into_bytes();
        let survivors: Vec<u32> = list_processes()
            .into_iter()
            .filter(|(pid, stat)| !stat.zombie && has_tag(*pid, &needle))
            .map(|(pid, _)| pid)
            .collect();
        assert!(survivors.is_empty(), "survivors: {:?}", survivors);
        Ok(())
    }
}
