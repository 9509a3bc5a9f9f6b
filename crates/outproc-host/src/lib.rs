//! Hostable demo types for outproc child processes.
//!
//! The `outproc-host` binary serves every type in [`registry`]. Applications
//! hosting their own types build the same kind of binary: a registry plus a
//! call to [`outproc::handler::serve`].

pub mod accumulator;
pub mod counter;
pub mod sleeper;

pub use accumulator::Accumulator;
pub use counter::{Counter, CounterProxy};
pub use sleeper::Sleeper;

use outproc::{Result, TypeRegistry};

/// Registry of every type the `outproc-host` binary can host.
pub fn registry() -> Result<TypeRegistry> {
    TypeRegistry::new()
        .with::<Counter>()?
        .with::<Accumulator>()?
        .with::<Sleeper>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use outproc::TypeDescriptor;

    #[test]
    fn test_registry_lists_demo_types() {
        let registry = registry().unwrap();
        for name in ["Counter", "Accumulator", "Sleeper"] {
            assert!(registry.contains(&TypeDescriptor::new(name)), "{} missing", name);
        }
        assert_eq!(registry.methods(&"Counter".into()).unwrap().len(), 3);
    }
}
