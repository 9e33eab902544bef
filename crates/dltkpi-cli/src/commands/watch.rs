//! Watch command - print matching records in real time

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dltkpi_core::FilterPair;
use dltkpi_engine::config::SubscriptionConfig;
use dltkpi_engine::matcher::PatternMatcher;
use dltkpi_engine::subscription::{StreamSubscription, SubscriptionError, WaitOptions};
use dltkpi_engine::transport::DltTransport;

use crate::output::{OutputContext, RecordRow};

const POLL_WINDOW: Duration = Duration::from_millis(200);

/// Print records of `filters` whose payload matches `pattern` until Ctrl+C
pub async fn watch(
    transport: Arc<dyn DltTransport>,
    filters: Vec<FilterPair>,
    pattern: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let matchers = filters
        .iter()
        .map(|f| PatternMatcher::regex(&f.app_id, &f.context_id, pattern.unwrap_or("")))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid payload pattern")?;

    let subscription = StreamSubscription::open(
        transport,
        filters.clone(),
        SubscriptionConfig {
            history_capacity: 0,
            ..Default::default()
        },
    )
    .await?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let handle = subscription.close_handle();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        handle.close();
    })?;

    ctx.info(&format!(
        "Watching {}, press Ctrl+C to stop",
        filters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    ));

    let mut first = true;
    while running.load(Ordering::SeqCst) {
        match subscription
            .wait_for(|_| true, &WaitOptions::collect(POLL_WINDOW))
            .await
        {
            Ok(records) => {
                let rows: Vec<RecordRow> = records
                    .iter()
                    .filter(|r| matchers.iter().any(|m| m.matches(r).is_some()))
                    .map(|r| RecordRow::from(&**r))
                    .collect();
                if !rows.is_empty() {
                    ctx.print_stream(&rows, first);
                    first = false;
                }
            }
            Err(SubscriptionError::Cancelled) => break,
            Err(e) => {
                ctx.error(&format!("Stream error: {}", e));
                break;
            }
        }
    }

    subscription.close();
    ctx.success("Stopped");
    Ok(())
}
