//! Child-side message loop.
//!
//! The handler hosts at most one instance for the lifetime of the process. It
//! receives one message at a time, dispatches it, and replies where the
//! protocol expects a reply. Failures inside the hosted instance (errors and
//! panics alike) are turned into `Fault` replies; they never end the loop.
//!
//! # Outcomes
//!
//! - `Exit` received: the loop stops after the current dispatch ([`HandlerExit::Exited`]).
//! - Channel closed while waiting: ungraceful end, not an error ([`HandlerExit::ChannelClosed`]).
//! - Second `Init` or a reply-kind message from the parent: fatal, returned as `Err`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::ExitCode;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::pipe;
use tracing::{debug, error, info, warn};

use crate::channel::{attach, ChannelEndpoint, MessageReceiver, MessageSender};
use crate::config::HostConfig;
use crate::error::{OutprocError, Result};
use crate::hosted::{HostedObject, InvocationError, TypeRegistry};
use crate::protocol::{Message, MethodDescriptor, TypeDescriptor};
use crate::value::Value;

/// How the handler loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// The parent sent `Exit`.
    Exited,
    /// The parent closed the channel without `Exit`.
    ChannelClosed,
}

/// Single-instance message loop.
pub struct Handler<'r, R = pipe::Receiver, W = pipe::Sender> {
    registry: &'r TypeRegistry,
    receiver: MessageReceiver<R>,
    sender: MessageSender<W>,
    instance: Option<Box<dyn HostedObject>>,
    running: bool,
}

impl<'r, R, W> Handler<'r, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        registry: &'r TypeRegistry,
        receiver: MessageReceiver<R>,
        sender: MessageSender<W>,
    ) -> Self {
        Self {
            registry,
            receiver,
            sender,
            instance: None,
            running: true,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.instance.is_some()
    }

    /// Run until `Exit`, channel closure, or a fatal protocol violation.
    pub async fn run(&mut self) -> Result<HandlerExit> {
        while self.running {
            let message = match self.receiver.recv().await {
                Ok(Some(message)) => message,
                Ok(None) | Err(OutprocError::ChannelClosed) => {
                    debug!("Channel closed by parent, leaving handler loop");
                    return Ok(HandlerExit::ChannelClosed);
                }
                Err(e) => return Err(e),
            };

            match self.dispatch(message).await {
                Ok(()) => {}
                Err(OutprocError::ChannelClosed) => {
                    debug!("Parent went away before the reply was written");
                    return Ok(HandlerExit::ChannelClosed);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Exit received, leaving handler loop");
        Ok(HandlerExit::Exited)
    }

    async fn dispatch(&mut self, message: Message) -> Result<()> {
        match message {
            Message::Init {
                type_descriptor,
                args,
            } => self.on_init(type_descriptor, args).await,
            Message::Call { method, args } => self.on_call(method, args).await,
            Message::Exit => {
                self.running = false;
                Ok(())
            }
            other => Err(OutprocError::ProtocolViolation {
                expected: "Init, Call or Exit",
                received: other.kind().as_str(),
            }),
        }
    }

    async fn on_init(&mut self, type_descriptor: TypeDescriptor, args: Vec<Value>) -> Result<()> {
        if self.instance.is_some() {
            error!("Second Init for {} on an initialized handler", type_descriptor);
            return Err(OutprocError::AlreadyInitialized);
        }

        let registry = self.registry;
        let reply = match guarded(|| registry.construct(&type_descriptor, args)) {
            Ok(instance) => {
                info!("Constructed hosted {}", instance.type_name());
                self.instance = Some(instance);
                Message::Constructed
            }
            Err(e) => {
                warn!("Construction of {} failed: {}", type_descriptor, e);
                Message::fault(e.to_string())
            }
        };
        self.sender.send(&reply).await
    }

    async fn on_call(&mut self, method: MethodDescriptor, args: Vec<Value>) -> Result<()> {
        let reply = match self.instance.as_mut() {
            None => {
                warn!("Call {} before any successful Init", method);
                Message::fault(format!("no hosted instance: {} called before Init", method))
            }
            Some(instance) => match guarded(|| instance.invoke(&method, args)) {
                Ok(value) => Message::Return { value },
                Err(e) => {
                    debug!("Invocation of {} faulted: {}", method, e);
                    Message::fault(e.to_string())
                }
            },
        };
        self.sender.send(&reply).await
    }
}

/// Run hosted code, turning a panic into an invocation error.
fn guarded<T>(
    f: impl FnOnce() -> std::result::Result<T, InvocationError>,
) -> std::result::Result<T, InvocationError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Err(InvocationError::Failed(format!("panicked: {}", message)))
        }
    }
}

/// Child process entry point: honour the launch contract and run the handler.
///
/// Opens the two inherited endpoints, runs the loop on a single-threaded
/// runtime and maps the outcome to the process exit code: `0` after `Exit` or
/// when the parent disappears, non-zero for protocol violations.
pub fn serve(
    registry: &TypeRegistry,
    inbound: ChannelEndpoint,
    outbound: ChannelEndpoint,
) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start handler runtime: {}", e);
            return ExitCode::from(HostConfig::BOOTSTRAP_FAILURE_EXIT_CODE);
        }
    };

    runtime.block_on(async {
        let (receiver, sender) = match attach(inbound, outbound) {
            Ok(pair) => pair,
            Err(e) => {
                error!(
                    "Failed to open channel endpoints {} / {}: {}",
                    inbound, outbound, e
                );
                return ExitCode::from(HostConfig::BOOTSTRAP_FAILURE_EXIT_CODE);
            }
        };

        let mut handler = Handler::new(registry, receiver, sender);
        match handler.run().await {
            Ok(exit) => {
                debug!("Handler finished: {:?}", exit);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Handler aborted: {}", e);
                ExitCode::from(HostConfig::PROTOCOL_VIOLATION_EXIT_CODE)
            }
        }
    })
}
