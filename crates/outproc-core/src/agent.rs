//! Parent-side agent: owner of one child process and its channel pair.
//!
//! An [`Agent`] launches the child with both pipe endpoints already wired,
//! then drives it with strict request/reply exchanges. Only one request is
//! ever in flight: the channel session sits behind an async mutex, and every
//! `call` holds it from send until the reply is read.
//!
//! # Thread Safety
//!
//! Agents are shared as [`AgentRef`] (`Arc<Agent>`). The child process handle
//! lives behind its own mutex so a [`DisposeMode::Kill`] never waits behind a
//! call blocked on a hung child; killing the child closes its end of the
//! pipe, which releases the blocked call with `ChannelClosed`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::channel::{self, MessageReceiver, MessageSender};
use crate::config::AgentConfig;
use crate::error::{OutprocError, Result};
use crate::protocol::{Message, MethodDescriptor, TypeDescriptor};
use crate::value::Value;

/// Shared handle to an agent.
pub type AgentRef = Arc<Agent>;

/// How to tear down an agent's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeMode {
    /// Send `Exit`, close both endpoints, let the child exit on its own.
    Polite,
    /// Terminate the child immediately and close both endpoints, skipping `Exit`.
    Kill,
}

/// What to launch for a new agent.
///
/// The program receives exactly two positional arguments: the inbound and
/// outbound channel endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    program: PathBuf,
}

impl ProcessDescriptor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

/// Per-call bounds for [`Agent::call_with`].
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: AgentConfig::DEFAULT_CALL_TIMEOUT,
            cancel: None,
        }
    }
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Channel endpoints plus the exchange state that must stay in sync with them.
struct Session {
    sender: MessageSender,
    receiver: MessageReceiver,
    init_sent: bool,
    ack_pending: bool,
    construction_fault: Option<String>,
    /// A request was sent (or a reply partially read) and its reply not yet consumed.
    in_flight: bool,
    broken: bool,
}

impl Session {
    fn is_usable(&self) -> bool {
        !self.broken && !self.in_flight
    }

    fn fail(&mut self, err: OutprocError) -> OutprocError {
        if err.is_channel_failure() {
            self.broken = true;
        }
        err
    }

    async fn receive_reply(&mut self) -> Result<Message> {
        match self.receiver.recv().await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(self.fail(OutprocError::ChannelClosed)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// One request/reply exchange.
    async fn request(&mut self, message: &Message) -> Result<Message> {
        self.in_flight = true;
        if let Err(e) = self.sender.send(message).await {
            return Err(self.fail(e));
        }
        let reply = self.receive_reply().await?;
        self.in_flight = false;
        Ok(reply)
    }

    /// Consume the acknowledgment of an earlier `Init`, if one is outstanding.
    async fn settle_construction(&mut self) -> Result<()> {
        if self.ack_pending {
            self.in_flight = true;
            let reply = self.receive_reply().await?;
            self.in_flight = false;
            self.ack_pending = false;

            match reply {
                Message::Constructed => {}
                Message::Fault { description } => {
                    warn!("Remote construction failed: {}", description);
                    self.construction_fault = Some(description);
                }
                other => {
                    self.broken = true;
                    return Err(OutprocError::ProtocolViolation {
                        expected: "Constructed or Fault",
                        received: other.kind().as_str(),
                    });
                }
            }
        }

        match &self.construction_fault {
            Some(description) => Err(OutprocError::ConstructionFault {
                description: description.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Owner of one child process and its two channel endpoints.
pub struct Agent {
    program: PathBuf,
    pid: Option<u32>,
    session: Mutex<Option<Session>>,
    child: Mutex<Child>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Agent {
    /// Launch the child with its channel pair already established.
    ///
    /// Returns once the channels are open; the child's readiness is only
    /// established by the first completed exchange. Must be called inside a
    /// tokio runtime.
    pub fn spawn(descriptor: &ProcessDescriptor) -> Result<Self> {
        let (sender, receiver, child_ends) = channel::open_pipes()?;
        let (inbound, outbound) = child_ends.endpoints();

        let mut cmd = Command::new(descriptor.program());
        cmd.arg(inbound.to_string())
            .arg(outbound.to_string())
            .stdin(Stdio::null());
        child_ends.inherit_into(&mut cmd);

        let child = cmd.spawn().map_err(|e| OutprocError::Spawn {
            program: descriptor.program().display().to_string(),
            message: e.to_string(),
        })?;

        // Close the parent's copies of the child ends so EOF propagates.
        drop(child_ends);

        let pid = child.id();
        info!(
            "Spawned {} (PID {:?}) on endpoints {} / {}",
            descriptor.program().display(),
            pid,
            inbound,
            outbound
        );

        Ok(Self {
            program: descriptor.program().to_path_buf(),
            pid,
            session: Mutex::new(Some(Session {
                sender,
                receiver,
                init_sent: false,
                ack_pending: false,
                construction_fault: None,
                in_flight: false,
                broken: false,
            })),
            child: Mutex::new(child),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn usable(slot: &mut Option<Session>) -> Result<&mut Session> {
        match slot.as_mut() {
            Some(session) if session.is_usable() => Ok(session),
            Some(session) => {
                // An abandoned exchange left a reply (or half of one) on the wire.
                session.broken = true;
                Err(OutprocError::ChannelClosed)
            }
            None => Err(OutprocError::ChannelClosed),
        }
    }

    /// Ask the child to construct its hosted instance.
    ///
    /// Does not wait: a construction failure surfaces as `ConstructionFault`
    /// on the next [`call`](Self::call) or [`await_constructed`](Self::await_constructed).
    pub async fn construct(
        &self,
        type_descriptor: impl Into<TypeDescriptor>,
        args: Vec<Value>,
    ) -> Result<()> {
        let type_descriptor = type_descriptor.into();
        let mut slot = self.session.lock().await;
        let session = Self::usable(&mut slot)?;

        if session.ack_pending {
            match session.settle_construction().await {
                Ok(()) | Err(OutprocError::ConstructionFault { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if session.init_sent && session.construction_fault.is_none() {
            return Err(OutprocError::AlreadyInitialized);
        }

        debug!("Constructing remote {} (PID {:?})", type_descriptor, self.pid);
        session.in_flight = true;
        let sent = session
            .sender
            .send(&Message::Init {
                type_descriptor,
                args,
            })
            .await;
        if let Err(e) = sent {
            return Err(session.fail(e));
        }
        session.in_flight = false;
        session.init_sent = true;
        session.ack_pending = true;
        session.construction_fault = None;
        Ok(())
    }

    /// Wait for the child to acknowledge the last `construct`.
    pub async fn await_constructed(&self) -> Result<()> {
        self.await_constructed_with(CallOptions::default()).await
    }

    /// [`await_constructed`](Self::await_constructed) with a timeout and/or cancellation.
    pub async fn await_constructed_with(&self, options: CallOptions) -> Result<()> {
        bounded(
            async {
                let mut slot = self.session.lock().await;
                let session = Self::usable(&mut slot)?;
                if !session.init_sent {
                    return Err(OutprocError::Other(
                        "await_constructed called before construct".to_string(),
                    ));
                }
                session.settle_construction().await
            },
            &options,
        )
        .await
    }

    /// Invoke a method on the hosted instance and wait for its reply.
    pub async fn call(&self, method: impl Into<MethodDescriptor>, args: Vec<Value>) -> Result<Value> {
        self.call_with(method, args, CallOptions::default()).await
    }

    /// [`call`](Self::call) bounded by a timeout and/or a cancellation token.
    ///
    /// A call abandoned after its request was sent leaves the reply on the
    /// wire, so the agent stops accepting calls (`ChannelClosed`) from then on.
    pub async fn call_with(
        &self,
        method: impl Into<MethodDescriptor>,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        let method = method.into();
        bounded(self.exchange_call(method, args), &options).await
    }

    async fn exchange_call(&self, method: MethodDescriptor, args: Vec<Value>) -> Result<Value> {
        let mut slot = self.session.lock().await;
        let session = Self::usable(&mut slot)?;
        session.settle_construction().await?;

        debug!("Calling {} (PID {:?})", method, self.pid);
        match session.request(&Message::Call { method, args }).await? {
            Message::Return { value } => Ok(value),
            Message::Fault { description } => Err(OutprocError::InvocationFault { description }),
            other => {
                session.broken = true;
                Err(OutprocError::ProtocolViolation {
                    expected: "Return or Fault",
                    received: other.kind().as_str(),
                })
            }
        }
    }

    /// Release the child and both endpoints. Later calls are no-ops.
    pub async fn dispose(&self, mode: DisposeMode) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match mode {
            DisposeMode::Polite => {
                let mut slot = self.session.lock().await;
                let result = match slot.as_mut() {
                    Some(session) if session.is_usable() => session.sender.send(&Message::Exit).await,
                    _ => Err(OutprocError::ChannelClosed),
                };
                // Dropping the session closes both endpoints.
                slot.take();
                info!("Politely disposed agent (PID {:?})", self.pid);
                if let Err(ref e) = result {
                    warn!("Exit not delivered to PID {:?}: {}", self.pid, e);
                }
                result
            }
            DisposeMode::Kill => {
                {
                    let mut child = self.child.lock().await;
                    if let Err(e) = child.start_kill() {
                        debug!("Kill of PID {:?} skipped: {}", self.pid, e);
                    }
                }
                self.session.lock().await.take();
                warn!("Killed agent child (PID {:?})", self.pid);
                Ok(())
            }
        }
    }

    /// Wait, bounded, for the child to exit and reap it.
    ///
    /// Polls instead of holding the child handle for the whole wait, so a
    /// concurrent [`DisposeMode::Kill`] is never held up.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Result<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.lock().await.try_wait()? {
                debug!("PID {:?} exited with {}", self.pid, status);
                return Ok(status);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(OutprocError::Timeout(timeout));
            }
            tokio::time::sleep(AgentConfig::EXIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if !self.is_disposed() {
            warn!("Agent (PID {:?}) dropped without dispose, killing child", self.pid);
            let _ = self.child.get_mut().start_kill();
        }
    }
}

/// Apply a timeout and/or cancellation to an agent operation.
async fn bounded<T, F>(work: F, options: &CallOptions) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let timed = async {
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| OutprocError::Timeout(limit))?,
            None => work.await,
        }
    };

    match &options.cancel {
        Some(token) => {
            token.check()?;
            tokio::select! {
                result = timed => result,
                _ = token.cancelled() => Err(OutprocError::Cancelled),
            }
        }
        None => timed.await,
    }
}
