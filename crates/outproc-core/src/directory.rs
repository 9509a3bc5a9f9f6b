//! Process-wide registry of live agents, keyed by the local proxy's handle.
//!
//! Registration spawns the agent while holding the write lock, so two
//! concurrent registrations for the same handle can never both spawn.
//! Lookups take the read lock and never block behind a call in progress:
//! the directory only hands out [`AgentRef`]s, it never talks to a child.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentRef, DisposeMode, ProcessDescriptor};
use crate::error::{OutprocError, Result};

/// Opaque identity of a local proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(Uuid);

impl ObjectHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ObjectHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn poisoned<T>(_: T) -> OutprocError {
    OutprocError::Other("agent directory lock poisoned".to_string())
}

/// Mapping from proxy handle to the agent hosting its remote instance.
#[derive(Debug)]
pub struct Directory {
    descriptor: ProcessDescriptor,
    agents: RwLock<HashMap<ObjectHandle, AgentRef>>,
}

impl Directory {
    /// Create a directory whose agents all launch `descriptor`.
    pub fn new(descriptor: ProcessDescriptor) -> Self {
        Self {
            descriptor,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    /// Spawn a fresh agent for `handle` and record it.
    pub fn register(&self, handle: ObjectHandle) -> Result<AgentRef> {
        self.register_with(handle, &self.descriptor)
    }

    /// [`register`](Self::register) with an explicit child program.
    pub fn register_with(
        &self,
        handle: ObjectHandle,
        descriptor: &ProcessDescriptor,
    ) -> Result<AgentRef> {
        let mut agents = self.agents.write().map_err(poisoned)?;
        if agents.contains_key(&handle) {
            return Err(OutprocError::DuplicateRegistration { handle });
        }

        let agent = Arc::new(Agent::spawn(descriptor)?);
        agents.insert(handle, Arc::clone(&agent));
        info!("Registered agent {:?} for {}", agent.pid(), handle);
        Ok(agent)
    }

    pub fn lookup(&self, handle: &ObjectHandle) -> Result<AgentRef> {
        let agents = self.agents.read().map_err(poisoned)?;
        agents
            .get(handle)
            .cloned()
            .ok_or(OutprocError::UnknownObject { handle: *handle })
    }

    /// Remove the mapping without disposing the agent. Idempotent.
    pub fn remove(&self, handle: &ObjectHandle) -> Result<Option<AgentRef>> {
        let mut agents = self.agents.write().map_err(poisoned)?;
        Ok(agents.remove(handle))
    }

    /// Remove the mapping and dispose the agent. Idempotent.
    ///
    /// The mapping is gone even if disposal reports an error.
    pub async fn release(&self, handle: &ObjectHandle, mode: DisposeMode) -> Result<()> {
        match self.remove(handle)? {
            Some(agent) => agent.dispose(mode).await,
            None => Ok(()),
        }
    }

    /// Dispose every registered agent and empty the directory.
    ///
    /// Disposal errors are logged; the first one is returned after all
    /// agents have been handled.
    pub async fn shutdown(&self, mode: DisposeMode) -> Result<()> {
        let drained: Vec<(ObjectHandle, AgentRef)> = {
            let mut agents = self.agents.write().map_err(poisoned)?;
            agents.drain().collect()
        };

        let mut first_error = None;
        for (handle, agent) in drained {
            if let Err(e) = agent.dispose(mode).await {
                warn!("Failed to dispose agent for {}: {}", handle, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn contains(&self, handle: &ObjectHandle) -> bool {
        self.agents
            .read()
            .map(|agents| agents.contains_key(handle))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.agents.read().map(|agents| agents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Directory {
        Directory::new(ProcessDescriptor::new("true"))
    }

    #[test]
    fn test_handles_are_unique() {
        let a = ObjectHandle::new();
        let b = ObjectHandle::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[tokio::test]
    async fn test_register_lookup_remove() {
        let dir = directory();
        let handle = ObjectHandle::new();

        let agent = dir.register(handle).unwrap();
        assert!(dir.contains(&handle));
        assert_eq!(dir.len(), 1);
        assert!(Arc::ptr_eq(&agent, &dir.lookup(&handle).unwrap()));

        let removed = dir.remove(&handle).unwrap().unwrap();
        assert!(Arc::ptr_eq(&agent, &removed));
        assert!(dir.remove(&handle).unwrap().is_none());
        assert!(dir.is_empty());
        assert!(matches!(
            dir.lookup(&handle),
            Err(OutprocError::UnknownObject { .. })
        ));

        agent.dispose(DisposeMode::Kill).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let dir = directory();
        let handle = ObjectHandle::new();
        let first = dir.register(handle).unwrap();

        match dir.register(handle) {
            Err(OutprocError::DuplicateRegistration { handle: h }) => assert_eq!(h, handle),
            other => panic!("Expected DuplicateRegistration, got: {:?}", other),
        }
        assert!(Arc::ptr_eq(&first, &dir.lookup(&handle).unwrap()));

        dir.shutdown(DisposeMode::Kill).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_handle_operations() {
        let dir = directory();
        let handle = ObjectHandle::new();

        assert!(matches!(dir.lookup(&handle), Err(OutprocError::UnknownObject { .. })));
        assert!(dir.remove(&handle).unwrap().is_none());
        dir.release(&handle, DisposeMode::Polite).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_spawn_leaves_no_entry() {
        let dir = Directory::new(ProcessDescriptor::new("/nonexistent/outproc-child"));
        let handle = ObjectHandle::new();

        assert!(matches!(dir.register(handle), Err(OutprocError::Spawn { .. })));
        assert!(!dir.contains(&handle));
    }

    #[tokio::test]
    async fn test_release_and_shutdown() {
        let dir = directory();
        let a = ObjectHandle::new();
        let b = ObjectHandle::new();
        let c = ObjectHandle::new();
        let agent_a = dir.register(a).unwrap();
        dir.register(b).unwrap();
        let agent_c = dir.register(c).unwrap();

        dir.release(&a, DisposeMode::Kill).await.unwrap();
        assert!(agent_a.is_disposed());
        assert!(!dir.contains(&a));
        assert_eq!(dir.len(), 2);

        dir.shutdown(DisposeMode::Kill).await.unwrap();
        assert!(dir.is_empty());
        assert!(agent_c.is_disposed());
    }
}
