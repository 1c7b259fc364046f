use std::time::Duration;

use async_trait::async_trait;

use crate::dispatch::{Handler, HandlerContext, HandlerError};

/// Sleeps for `args[0]` milliseconds, then passes.
#[derive(Debug, Default)]
pub struct SleepHandler;

#[async_trait]
impl Handler for SleepHandler {
    async fn run(&mut self, args: &[String], _ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
        let ms: u64 = args
            .first()
            .ok_or_else(|| HandlerError::InvalidArgs("missing duration".to_string()))?
            .parse()
            .map_err(|e| HandlerError::InvalidArgs(format!("duration in ms: {e}")))?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(true)
    }
}

/// Always reports a failed check.
#[derive(Debug, Default)]
pub struct FailHandler;

#[async_trait]
impl Handler for FailHandler {
    async fn run(&mut self, _args: &[String], _ctx: &mut HandlerContext) -> Result<bool, HandlerError> {
        Ok(false)
    }
}
