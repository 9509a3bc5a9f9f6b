//! `Counter`: the smallest useful hosted type, and its typed proxy.

use std::sync::Arc;

use outproc::hosted::{Args, Hosted, InvocationError, MethodThunk};
use outproc::{CallOptions, Directory, DisposeMode, ObjectHandle, RemoteObject, Result, Value};

/// Monotonic counter with an optional starting value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    count: i64,
}

impl Counter {
    pub fn new(start: i64) -> Self {
        Self { count: start }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    fn increment(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        self.bump(1)
    }

    fn get(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        Ok(Value::Int(self.count))
    }

    fn add(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let amount: i64 = args.next()?;
        args.finish()?;
        self.bump(amount)
    }

    fn bump(&mut self, amount: i64) -> std::result::Result<Value, InvocationError> {
        self.count = self
            .count
            .checked_add(amount)
            .ok_or_else(|| InvocationError::failed("counter overflow"))?;
        Ok(Value::Int(self.count))
    }
}

impl Hosted for Counter {
    const TYPE_NAME: &'static str = "Counter";
    const METHODS: &'static [(&'static str, MethodThunk<Self>)] = &[
        ("increment", Counter::increment),
        ("get", Counter::get),
        ("add", Counter::add),
    ];

    fn construct(args: Vec<Value>) -> std::result::Result<Self, InvocationError> {
        let mut args = Args::new(args);
        let start = args.next_opt::<i64>()?.unwrap_or(0);
        args.finish()?;
        Ok(Counter::new(start))
    }
}

/// Parent-side proxy for a remote [`Counter`].
#[derive(Debug)]
pub struct CounterProxy {
    remote: RemoteObject,
}

impl CounterProxy {
    pub async fn create(directory: Arc<Directory>, start: Option<i64>) -> Result<Self> {
        let args = start.map(Value::Int).into_iter().collect();
        let remote = RemoteObject::create(directory, Counter::TYPE_NAME, args).await?;
        Ok(Self { remote })
    }

    pub fn handle(&self) -> ObjectHandle {
        self.remote.handle()
    }

    pub async fn increment(&self) -> Result<i64> {
        self.remote.call("increment", vec![]).await?.try_into()
    }

    pub async fn get(&self) -> Result<i64> {
        self.remote.call("get", vec![]).await?.try_into()
    }

    pub async fn add(&self, amount: i64) -> Result<i64> {
        self.remote.call("add", vec![Value::Int(amount)]).await?.try_into()
    }

    /// [`add`](Self::add) bounded by `options`.
    pub async fn add_with(&self, amount: i64, options: CallOptions) -> Result<i64> {
        self.remote
            .call_with("add", vec![Value::Int(amount)], options)
            .await?
            .try_into()
    }

    pub async fn dispose(self, mode: DisposeMode) -> Result<()> {
        self.remote.dispose(mode).await
    }
}
