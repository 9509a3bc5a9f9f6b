//! Hosted types and the per-type dispatch registry.
//!
//! Instead of resolving methods by name at runtime through reflection, each
//! hostable type declares a static method table. The [`TypeRegistry`] built at
//! child startup maps `(type, method)` to those thunks; every thunk accepts and
//! returns protocol [`Value`]s.
//!
//! # Example
//!
//! ```
//! use outproc::hosted::{Args, Hosted, InvocationError, MethodThunk};
//! use outproc::Value;
//!
//! struct Counter(i64);
//!
//! impl Counter {
//!     fn increment(&mut self, args: Vec<Value>) -> Result<Value, InvocationError> {
//!         Args::new(args).finish()?;
//!         self.0 += 1;
//!         Ok(Value::Int(self.0))
//!     }
//! }
//!
//! impl Hosted for Counter {
//!     const TYPE_NAME: &'static str = "Counter";
//!     const METHODS: &'static [(&'static str, MethodThunk<Self>)] =
//!         &[("increment", Counter::increment)];
//!
//!     fn construct(args: Vec<Value>) -> Result<Self, InvocationError> {
//!         Args::new(args).finish()?;
//!         Ok(Counter(0))
//!     }
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::error::{OutprocError, Result};
use crate::protocol::{MethodDescriptor, TypeDescriptor};
use crate::value::Value;

/// Failure raised inside the child while constructing or invoking.
///
/// Never crosses the channel as an error: the handler turns it into a
/// `Fault` whose description is this error's display text.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("unknown type {0}")]
    UnknownType(String),

    #[error("{type_name} has no method {method}")]
    UnknownMethod {
        type_name: &'static str,
        method: String,
    },

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("{0}")]
    Failed(String),
}

impl InvocationError {
    pub fn failed(message: impl Into<String>) -> Self {
        InvocationError::Failed(message.into())
    }
}

impl From<OutprocError> for InvocationError {
    fn from(err: OutprocError) -> Self {
        InvocationError::BadArguments(err.to_string())
    }
}

/// Invocation thunk for one method of a hosted type.
pub type MethodThunk<T> = fn(&mut T, Vec<Value>) -> std::result::Result<Value, InvocationError>;

/// A type that can live inside a child process.
pub trait Hosted: Sized + 'static {
    /// Stable name used as the type descriptor on the wire.
    const TYPE_NAME: &'static str;

    /// Method table: name and thunk for every remotely callable operation.
    const METHODS: &'static [(&'static str, MethodThunk<Self>)];

    /// Build an instance from `Init` arguments.
    fn construct(args: Vec<Value>) -> std::result::Result<Self, InvocationError>;
}

/// Type-erased hosted instance.
pub trait HostedObject {
    fn type_name(&self) -> &'static str;

    fn invoke(
        &mut self,
        method: &MethodDescriptor,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvocationError>;
}

impl<T: Hosted> HostedObject for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn invoke(
        &mut self,
        method: &MethodDescriptor,
        args: Vec<Value>,
    ) -> std::result::Result<Value, InvocationError> {
        let thunk = T::METHODS
            .iter()
            .find(|(name, _)| *name == method.as_str())
            .map(|(_, thunk)| *thunk)
            .ok_or_else(|| InvocationError::UnknownMethod {
                type_name: T::TYPE_NAME,
                method: method.to_string(),
            })?;
        thunk(self, args)
    }
}

type Constructor = fn(Vec<Value>) -> std::result::Result<Box<dyn HostedObject>, InvocationError>;

fn construct_boxed<T: Hosted>(
    args: Vec<Value>,
) -> std::result::Result<Box<dyn HostedObject>, InvocationError> {
    let instance: Box<dyn HostedObject> = Box::new(T::construct(args)?);
    Ok(instance)
}

struct TypeEntry {
    constructor: Constructor,
    methods: Vec<MethodDescriptor>,
}

/// Registry of the types a child process can host.
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<TypeDescriptor, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hostable type. Fails if the type name is already taken.
    pub fn register<T: Hosted>(&mut self) -> Result<()> {
        let descriptor = TypeDescriptor::new(T::TYPE_NAME);
        if self.types.contains_key(&descriptor) {
            return Err(OutprocError::Other(format!(
                "type {} registered twice",
                descriptor
            )));
        }

        let methods = T::METHODS
            .iter()
            .map(|(name, _)| MethodDescriptor::new(*name))
            .collect();
        self.types.insert(
            descriptor,
            TypeEntry {
                constructor: construct_boxed::<T>,
                methods,
            },
        );
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: Hosted>(mut self) -> Result<Self> {
        self.register::<T>()?;
        Ok(self)
    }

    pub fn contains(&self, type_descriptor: &TypeDescriptor) -> bool {
        self.types.contains_key(type_descriptor)
    }

    /// Method descriptors exposed by a registered type.
    pub fn methods(&self, type_descriptor: &TypeDescriptor) -> Option<&[MethodDescriptor]> {
        self.types
            .get(type_descriptor)
            .map(|entry| entry.methods.as_slice())
    }

    /// Construct an instance of a registered type.
    pub fn construct(
        &self,
        type_descriptor: &TypeDescriptor,
        args: Vec<Value>,
    ) -> std::result::Result<Box<dyn HostedObject>, InvocationError> {
        let entry = self
            .types
            .get(type_descriptor)
            .ok_or_else(|| InvocationError::UnknownType(type_descriptor.to_string()))?;
        (entry.constructor)(args)
    }
}

/// Positional argument reader for method thunks.
pub struct Args {
    values: VecDeque<Value>,
    position: usize,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into(),
            position: 0,
        }
    }

    /// Take the next argument, converted to `T`.
    pub fn next<T>(&mut self) -> std::result::Result<T, InvocationError>
    where
        T: TryFrom<Value, Error = OutprocError>,
    {
        let position = self.position;
        let value = self.values.pop_front().ok_or_else(|| {
            InvocationError::BadArguments(format!("missing argument {}", position))
        })?;
        self.position += 1;
        T::try_from(value).map_err(|e| {
            InvocationError::BadArguments(format!("argument {}: {}", position, e))
        })
    }

    /// Take the next argument if present.
    pub fn next_opt<T>(&mut self) -> std::result::Result<Option<T>, InvocationError>
    where
        T: TryFrom<Value, Error = OutprocError>,
    {
        if self.values.is_empty() {
            Ok(None)
        } else {
            self.next().map(Some)
        }
    }

    /// Fail if arguments remain unconsumed.
    pub fn finish(self) -> std::result::Result<(), InvocationError> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(InvocationError::BadArguments(format!(
                "expected {} arguments, got {}",
                self.position,
                self.position + self.values.len()
            )))
        }
    }
}
