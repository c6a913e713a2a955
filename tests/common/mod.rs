#![allow(dead_code)]
use promise_chain::Error;
use std::sync::Once;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, registry};

#[derive(Debug, Clone, PartialEq)]
pub enum TestError {
    Test,
    Timeout,
    Stopped,
}

impl From<Error> for TestError {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout => TestError::Timeout,
            _ => TestError::Stopped,
        }
    }
}

pub fn init() {
    static TRACING: Once = Once::new();
    TRACING.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        filter = filter.add_directive(LevelFilter::WARN.into());
        let print = fmt::layer().compact().with_test_writer();
        let _ = registry().with(filter).with(print).try_init();
    });
}
