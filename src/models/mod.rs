pub mod counter;

pub use counter::{
    CounterRecord, CounterSummary, CounterTarget, DailyBucket, TargetError, ViewLogEntry,
};
