//! `Sleeper`: misbehaving on purpose.
//!
//! Blocks the child's only thread, panics, or ends the process mid-call, so
//! the parent's timeout, kill and closed-channel paths can be driven against
//! a real child.

use std::time::Duration;

use outproc::hosted::{Args, Hosted, InvocationError, MethodThunk};
use outproc::Value;

/// Upper bound on a single `hang`, so a forgotten child eventually returns.
const HANG_DURATION: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
pub struct Sleeper {
    naps: u64,
}

impl Sleeper {
    /// Sleep for the given number of milliseconds, then report it.
    fn nap(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let millis: u64 = args.next()?;
        args.finish()?;
        std::thread::sleep(Duration::from_millis(millis));
        self.naps += 1;
        Ok(Value::UInt(millis))
    }

    fn naps(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        Ok(Value::UInt(self.naps))
    }

    fn hang(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        std::thread::sleep(HANG_DURATION);
        Ok(Value::Unit)
    }

    fn crash(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let message: String = args.next_opt()?.unwrap_or_else(|| "crash requested".to_string());
        args.finish()?;
        panic!("{}", message);
    }

    fn exit(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let code: i32 = args.next()?;
        args.finish()?;
        std::process::exit(code);
    }
}

impl Hosted for Sleeper {
    const TYPE_NAME: &'static str = "Sleeper";
    const METHODS: &'static [(&'static str, MethodThunk<Self>)] = &[
        ("nap", Sleeper::nap),
        ("naps", Sleeper::naps),
        ("hang", Sleeper::hang),
        ("crash", Sleeper::crash),
        ("exit", Sleeper::exit),
    ];

    fn construct(args: Vec<Value>) -> std::result::Result<Self, InvocationError> {
        Args::new(args).finish()?;
        Ok(Sleeper::default())
    }
}
