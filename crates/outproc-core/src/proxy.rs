//! Local proxies for remote instances.
//!
//! A [`RemoteObject`] owns a handle in a [`Directory`] and forwards every
//! call through the agent registered under it. Typed proxies wrap a
//! `RemoteObject` and convert arguments and results to concrete types.

use std::sync::Arc;

use tracing::warn;

use crate::agent::{AgentRef, CallOptions, DisposeMode};
use crate::directory::{Directory, ObjectHandle};
use crate::error::Result;
use crate::protocol::{MethodDescriptor, TypeDescriptor};
use crate::value::Value;

/// Untyped proxy for one instance hosted in its own child process.
#[derive(Debug)]
pub struct RemoteObject {
    directory: Arc<Directory>,
    handle: ObjectHandle,
    type_descriptor: TypeDescriptor,
}

impl RemoteObject {
    /// Register a new agent and construct `type_descriptor` in it.
    ///
    /// Construction is acknowledged before this returns; on failure the agent
    /// is killed and removed again.
    pub async fn create(
        directory: Arc<Directory>,
        type_descriptor: impl Into<TypeDescriptor>,
        args: Vec<Value>,
    ) -> Result<Self> {
        let type_descriptor = type_descriptor.into();
        let handle = ObjectHandle::new();
        let agent = directory.register(handle)?;

        let constructed = async {
            agent.construct(type_descriptor.clone(), args).await?;
            agent.await_constructed().await
        }
        .await;

        if let Err(e) = constructed {
            if let Err(cleanup) = directory.release(&handle, DisposeMode::Kill).await {
                warn!("Cleanup after failed construction of {}: {}", type_descriptor, cleanup);
            }
            return Err(e);
        }

        Ok(Self {
            directory,
            handle,
            type_descriptor,
        })
    }

    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    pub fn type_descriptor(&self) -> &TypeDescriptor {
        &self.type_descriptor
    }

    /// The agent currently registered for this proxy.
    pub fn agent(&self) -> Result<AgentRef> {
        self.directory.lookup(&self.handle)
    }

    pub async fn call(&self, method: impl Into<MethodDescriptor>, args: Vec<Value>) -> Result<Value> {
        self.agent()?.call(method, args).await
    }

    pub async fn call_with(
        &self,
        method: impl Into<MethodDescriptor>,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value> {
        self.agent()?.call_with(method, args, options).await
    }

    /// Release the remote instance and its process.
    pub async fn dispose(self, mode: DisposeMode) -> Result<()> {
        self.directory.release(&self.handle, mode).await
    }
}
