use std::{io, mem, path::Path};

use crate::error::Result;

pub struct ProcessProbe {
    pid: u32,
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Result<Self> {
        let proc_path = format!("/proc/{}", pid);
        if !Path::new(&proc_path).exists() {
            let err = io::Error::new(io::ErrorKind::NotFound, "process does not exists");
            return Err(err.into());
        }
        Ok(Self { pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the process exits, leaving it unreaped so its pid and
    /// process group stay valid until [`watching`](Self::watching).
    pub fn wait_exit(&self) -> Result<()> {
        // all-zero is a valid siginfo
        let mut info: libc::siginfo_t = unsafe { mem::zeroed() };
        loop {
            let ret = unsafe {
                libc::waitid(
                    libc::P_PID,
                    self.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
    }

    /// Wait the process to stop and get whole usage status.
    ///
    /// The rusage reported by `wait4` covers the process and every descendant
    /// it waited for, so forked helpers are charged to the submission.
    pub fn watching(&self) -> Result<ProcessBio> {
        let mut status: libc::c_int = 0;
        // all-zero is a valid rusage
        let mut ru: libc::rusage = unsafe { mem::zeroed() };
        loop {
            let ret = unsafe { libc::wait4(self.pid as libc::pid_t, &mut status, 0, &mut ru) };
            if ret >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err.into());
            }
        }
        Ok(ProcessBio {
            status,
            utime: (ru.ru_utime.tv_sec * 1000 + ru.ru_utime.tv_usec / 1000) as u64,
            stime: (ru.ru_stime.tv_sec * 1000 + ru.ru_stime.tv_usec / 1000) as u64,
            maxrss: ru.ru_maxrss as u64,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProcessBio {
    status: i32,
    utime: u64,
    stime: u64,
    maxrss: u64,
}

impl ProcessBio {
    /// Get time usage(ms), user and system.
    pub fn get_time_usage(&self) -> u64 {
        self.utime + self.stime
    }

    /// Peak resident set size in KB.
    pub fn get_peak_memory(&self) -> u64 {
        self.maxrss
    }

    pub fn exit_code(&self) -> Option<i32> {
        if libc::WIFEXITED(self.status) {
            Some(libc::WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    pub fn signal(&self) -> Option<i32> {
        if libc::WIFSIGNALED(self.status) {
            Some(libc::WTERMSIG(self.status))
        } else {
            None
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code() == Some(0)
    }
}
