//! Listening-socket handoff between a running backend and its reload successor.
//!
//! The successor is the same executable started with the listening socket duplicated onto
//! [`INHERITED_LISTENER_FD`] and [`SUCCESSOR_ENV`] set. Both processes then share one socket,
//! so the port never goes unbound while the old process drains.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, dup2, getppid};
use tracing::info;

use super::error::HandoffError;

/// Descriptor slot the successor finds its listening socket at (after stdin, stdout, stderr).
pub const INHERITED_LISTENER_FD: RawFd = 3;

/// Environment marker telling a process it was started as a reload successor.
pub const SUCCESSOR_ENV: &str = "GATEWAY_BACKEND_CHILD";

pub fn is_successor() -> bool {
    std::env::var_os(SUCCESSOR_ENV).is_some_and(|value| !value.is_empty())
}

/// Take the inherited listener when running as a successor, otherwise bind `addr`.
///
/// The returned listener is non-blocking and ready for `tokio::net::TcpListener::from_std`.
pub fn take_listener(addr: SocketAddr) -> Result<TcpListener, HandoffError> {
    let listener = if is_successor() {
        // SAFETY: a successor is spawned with the parent's listening socket placed on this slot
        // and nothing else in this process claims it.
        let listener = unsafe { TcpListener::from_raw_fd(INHERITED_LISTENER_FD) };
        let local = listener.local_addr().map_err(HandoffError::Inherit)?;
        info!(address = %local, fd = INHERITED_LISTENER_FD, "Using inherited listener");
        listener
    } else {
        TcpListener::bind(addr).map_err(HandoffError::Bind)?
    };

    listener.set_nonblocking(true).map_err(HandoffError::Bind)?;
    Ok(listener)
}

/// Tell the process that spawned us that we are serving, so it can start draining.
pub fn notify_parent() -> Result<Pid, HandoffError> {
    let parent = getppid();
    kill(parent, Signal::SIGTERM).map_err(|source| HandoffError::NotifyParent {
        pid: parent.as_raw(),
        source,
    })?;
    Ok(parent)
}

/// Holds a duplicate of the listening socket so it can be passed to a successor.
#[derive(Debug)]
pub struct ListenerHandoff {
    listener: TcpListener,
}

impl ListenerHandoff {
    pub fn new(listener: &TcpListener) -> io::Result<Self> {
        Ok(Self {
            listener: listener.try_clone()?,
        })
    }

    /// Start this executable again, with the same arguments, as the successor.
    pub fn spawn_successor(&self) -> Result<Child, HandoffError> {
        let exe = std::env::current_exe().map_err(HandoffError::Spawn)?;
        let mut command = Command::new(exe);
        command.args(std::env::args_os().skip(1));
        self.spawn(command)
    }

    /// Spawn `command` with the listener on the inherited slot, the successor marker set and
    /// this process's standard streams attached.
    pub fn spawn(&self, mut command: Command) -> Result<Child, HandoffError> {
        let fd = self.listener.as_raw_fd();

        command
            .env(SUCCESSOR_ENV, "1")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // SAFETY: the hook runs between fork and exec and only calls dup2/fcntl, both
        // async-signal-safe.
        unsafe {
            command.pre_exec(move || place_on_inherited_slot(fd).map_err(io::Error::from));
        }

        let child = command.spawn().map_err(HandoffError::Spawn)?;
        info!(pid = child.id(), "Spawned successor process");
        Ok(child)
    }
}

fn place_on_inherited_slot(fd: RawFd) -> nix::Result<()> {
    if fd == INHERITED_LISTENER_FD {
        // dup2 onto itself would leave close-on-exec set
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(fd, INHERITED_LISTENER_FD)?;
    }
    Ok(())
}
