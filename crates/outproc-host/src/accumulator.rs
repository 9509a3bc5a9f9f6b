//! `Accumulator`: a labelled running tally of floating-point samples.

use std::collections::BTreeMap;

use outproc::hosted::{Args, Hosted, InvocationError, MethodThunk};
use outproc::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Accumulator {
    label: String,
    samples: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let sample: f64 = args.next()?;
        args.finish()?;
        if !sample.is_finite() {
            return Err(InvocationError::BadArguments(format!(
                "sample must be finite, got {}",
                sample
            )));
        }
        self.samples.push(sample);
        Ok(Value::UInt(self.samples.len() as u64))
    }

    fn extend(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        let mut args = Args::new(args);
        let items: Vec<Value> = args.next()?;
        args.finish()?;
        for item in items {
            self.push(vec![item])?;
        }
        Ok(Value::UInt(self.samples.len() as u64))
    }

    fn sum(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        Ok(Value::Float(self.samples.iter().sum()))
    }

    fn mean(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        if self.samples.is_empty() {
            return Err(InvocationError::failed("mean of no samples"));
        }
        let total: f64 = self.samples.iter().sum();
        Ok(Value::Float(total / self.samples.len() as f64))
    }

    fn summary(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        let mut record = BTreeMap::new();
        record.insert("label".to_string(), Value::from(self.label.as_str()));
        record.insert("count".to_string(), Value::UInt(self.samples.len() as u64));
        record.insert("sum".to_string(), Value::Float(self.samples.iter().sum()));
        record.insert(
            "max".to_string(),
            self.samples
                .iter()
                .copied()
                .reduce(f64::max)
                .map(Value::Float)
                .unwrap_or(Value::Unit),
        );
        Ok(Value::Record(record))
    }

    fn reset(&mut self, args: Vec<Value>) -> std::result::Result<Value, InvocationError> {
        Args::new(args).finish()?;
        self.samples.clear();
        Ok(Value::Unit)
    }
}

impl Hosted for Accumulator {
    const TYPE_NAME: &'static str = "Accumulator";
    const METHODS: &'static [(&'static str, MethodThunk<Self>)] = &[
        ("push", Accumulator::push),
        ("extend", Accumulator::extend),
        ("sum", Accumulator::sum),
        ("mean", Accumulator::mean),
        ("summary", Accumulator::summary),
        ("reset", Accumulator::reset),
    ];

    fn construct(args: Vec<Value>) -> std::result::Result<Self, InvocationError> {
        let mut args = Args::new(args);
        let label: String = args.next()?;
        args.finish()?;
        Ok(Accumulator {
            label,
            samples: Vec::new(),
        })
    }
}
