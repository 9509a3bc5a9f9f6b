//! Outproc - host a single object in its own child process.
//!
//! A parent process keeps a local proxy; the real instance lives in a
//! dedicated child, reached over a pair of anonymous pipes. The parent side
//! is the [`Directory`] of [`Agent`]s, one per proxy. The child side is a
//! [`handler::Handler`] loop that hosts exactly one instance of a type from
//! its [`hosted::TypeRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use outproc::{Directory, DisposeMode, ProcessDescriptor, RemoteObject, Value};
//!
//! #[tokio::main]
//! async fn main() -> outproc::Result<()> {
//!     let directory = Arc::new(Directory::new(ProcessDescriptor::new("outproc-host")));
//!
//!     let counter = RemoteObject::create(directory.clone(), "Counter", vec![]).await?;
//!     assert_eq!(counter.call("increment", vec![]).await?, Value::Int(1));
//!
//!     counter.dispose(DisposeMode::Polite).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod hosted;
pub mod protocol;
pub mod proxy;
pub mod value;

// Re-export commonly used types
pub use agent::{Agent, AgentRef, CallOptions, DisposeMode, ProcessDescriptor};
pub use cancel::CancellationToken;
pub use channel::ChannelEndpoint;
pub use config::{AgentConfig, ChannelConfig, HostConfig};
pub use directory::{Directory, ObjectHandle};
pub use error::{OutprocError, Result};
pub use hosted::{Args, Hosted, InvocationError, MethodThunk, TypeRegistry};
pub use protocol::{Message, MessageKind, MethodDescriptor, TypeDescriptor};
pub use proxy::RemoteObject;
pub use value::Value;
