//! Delivers object-creation events to the worker.
//!
//! Each event gets its own task; the worker bounds itself by its budget.
//! Nothing is retried here. A failed invocation has already been recorded on
//! the job and is only logged.

use log::{error, info};
use strum::IntoEnumIterator;
use tokio::task::JoinHandle;

use super::worker::{self, Outcome, WorkerError};
use crate::{
    conversion::ConversionKind,
    objects::{keys, ObjectCreated},
    state::AppContext,
};

/// Subscribes to every conversion kind's trigger and feeds events to the
/// worker for the life of the process.
pub fn spawn(ctx: AppContext) -> JoinHandle<()> {
    let rules = ConversionKind::iter().map(keys::notification_rule).collect();
    let mut events = ctx.objects.subscribe(rules);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _ = invoke(&ctx, &event).await;
            });
        }
        info!("event stream closed, dispatcher stopping");
    })
}

/// One worker invocation.
pub async fn invoke(ctx: &AppContext, event: &ObjectCreated) -> Result<Outcome, WorkerError> {
    let result = worker::handle_event(ctx, event).await;

    match &result {
        Ok(Outcome::Completed { output_key }) => info!("{} -> {}", event.key, output_key),
        Ok(Outcome::Skipped(status)) => info!("{} skipped, job already {}", event.key, status),
        Err(e) => error!("worker invocation for {} failed: {}", event.key, e),
    }
    result
}
