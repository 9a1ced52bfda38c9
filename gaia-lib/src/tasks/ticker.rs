use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::model::account::RoleSet;
use crate::values::config_object;
use crate::vm::Engine;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// One sweep: every resident object whose own attribute map contains
/// `on_tick` gets a fresh invocation with its own budget. Inherited
/// `on_tick` does not auto-schedule, so tick cost stays proportional to the
/// objects that asked for it. Failures are logged and never abort the sweep.
pub async fn run_tick(engine: &Engine) {
    for id in engine.cache.resident_with_own_attr("on_tick") {
        let mut ctx = engine
            .context_for(id.clone(), id.clone(), RoleSet::new(), None)
            .await;
        if let Err(e) = engine.run_attribute(&mut ctx, &id, "on_tick", vec![]).await {
            warn!(object = %id, error = %e, "on_tick failed");
        }
    }
}

async fn tick_interval(engine: &Engine) -> Duration {
    match engine
        .cache
        .get_attribute(&config_object(), "tick_interval_ms")
        .await
    {
        Ok(Some(v)) if v.coerce_num() >= 1.0 => Duration::from_millis(v.coerce_num() as u64),
        _ => DEFAULT_TICK_INTERVAL,
    }
}

/// The periodic tick driver. Runs until the handle is aborted.
pub fn spawn_ticker(engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tick_interval(&engine).await).await;
            run_tick(&engine).await;
        }
    })
}
