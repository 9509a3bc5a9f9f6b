//! Pipe-pair transport between an agent and its child process.
//!
//! Two anonymous pipes carry one direction each. All four ends are created
//! close-on-exec; only the two child ends are made inheritable, and only inside
//! the forked child right before `exec`, so concurrent spawns never leak each
//! other's endpoints. The child learns its endpoints from its two positional
//! arguments (inbound first, outbound second).

use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::str::FromStr;

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;
use tracing::debug;

use crate::error::{OutprocError, Result};
use crate::protocol::{read_message, write_message, Message};

/// Identifier of one inherited channel endpoint, as passed on the child's command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEndpoint(RawFd);

impl ChannelEndpoint {
    pub fn raw(&self) -> RawFd {
        self.0
    }

    /// Take ownership of the inherited descriptor.
    ///
    /// Fails with `InvalidEndpoint` if the descriptor is not open in this process.
    fn into_owned_fd(self) -> Result<OwnedFd> {
        fcntl(self.0, FcntlArg::F_GETFD)
            .map_err(|e| OutprocError::InvalidEndpoint(format!("fd {}: {}", self.0, e)))?;

        // SAFETY: the launch contract hands this process exclusive ownership of
        // the descriptor, F_GETFD just confirmed it is open, and `attach`
        // consumes each endpoint exactly once.
        #[allow(unsafe_code)]
        let fd = unsafe { OwnedFd::from_raw_fd(self.0) };
        Ok(fd)
    }
}

impl FromStr for ChannelEndpoint {
    type Err = OutprocError;

    fn from_str(s: &str) -> Result<Self> {
        let fd: RawFd = s
            .trim()
            .parse()
            .map_err(|_| OutprocError::InvalidEndpoint(s.to_string()))?;
        if fd < 0 {
            return Err(OutprocError::InvalidEndpoint(s.to_string()));
        }
        Ok(Self(fd))
    }
}

impl fmt::Display for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending half of a channel.
#[derive(Debug)]
pub struct MessageSender<W = pipe::Sender> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        debug!("send {}", message);
        write_message(&mut self.writer, message).await
    }
}

/// Receiving half of a channel.
#[derive(Debug)]
pub struct MessageReceiver<R = pipe::Receiver> {
    reader: R,
}

impl<R: AsyncRead + Unpin> MessageReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Wait for the next message. `None` means the peer closed its end.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        let message = read_message(&mut self.reader).await?;
        if let Some(ref m) = message {
            debug!("recv {}", m);
        }
        Ok(message)
    }
}

/// The child's ends of a freshly created pipe pair, still owned by the parent.
///
/// Dropping this after the child has been spawned closes the parent's copies,
/// so each side sees EOF once the other side lets go.
#[derive(Debug)]
pub(crate) struct ChildEnds {
    inbound: OwnedFd,
    outbound: OwnedFd,
}

impl ChildEnds {
    /// Endpoints to pass as the child's two positional arguments.
    pub(crate) fn endpoints(&self) -> (ChannelEndpoint, ChannelEndpoint) {
        (
            ChannelEndpoint(self.inbound.as_raw_fd()),
            ChannelEndpoint(self.outbound.as_raw_fd()),
        )
    }

    /// Arrange for both child ends to survive `exec` in the spawned process only.
    pub(crate) fn inherit_into(&self, cmd: &mut tokio::process::Command) {
        let fds = [self.inbound.as_raw_fd(), self.outbound.as_raw_fd()];

        // SAFETY: the closure runs in the forked child before exec and only
        // calls fcntl(F_SETFD), which is async-signal-safe. It touches no
        // allocator state and captures plain integers.
        #[allow(unsafe_code)]
        unsafe {
            cmd.pre_exec(move || {
                for fd in fds {
                    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))
                        .map_err(std::io::Error::from)?;
                }
                Ok(())
            });
        }
    }
}

/// Create the pipe pair for a new agent.
///
/// Returns the parent's sender (parent → child), the parent's receiver
/// (child → parent) and the child's ends. Must be called inside a tokio runtime.
pub(crate) fn open_pipes() -> Result<(MessageSender, MessageReceiver, ChildEnds)> {
    let (down_read, down_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    let (up_read, up_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;

    let sender = MessageSender::new(pipe::Sender::from_owned_fd(down_write)?);
    let receiver = MessageReceiver::new(pipe::Receiver::from_owned_fd(up_read)?);

    Ok((
        sender,
        receiver,
        ChildEnds {
            inbound: down_read,
            outbound: up_write,
        },
    ))
}

/// Open the endpoints inherited through the launch contract (child side).
///
/// Must be called inside a tokio runtime.
pub fn attach(
    inbound: ChannelEndpoint,
    outbound: ChannelEndpoint,
) -> Result<(MessageReceiver, MessageSender)> {
    if inbound == outbound {
        return Err(OutprocError::InvalidEndpoint(format!(
            "inbound and outbound are both fd {}",
            inbound
        )));
    }

    let receiver = pipe::Receiver::from_owned_fd(inbound.into_owned_fd()?)?;
    let sender = pipe::Sender::from_owned_fd(outbound.into_owned_fd()?)?;

    Ok((MessageReceiver::new(receiver), MessageSender::new(sender)))
}
