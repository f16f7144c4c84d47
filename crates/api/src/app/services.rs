use std::{convert::Infallible, sync::Arc, time::Duration};

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use branchstock_events::{EventBus, EventEnvelope, InMemoryEventBus};
use branchstock_infra::{
    InMemoryLedgerBackend, InMemoryProductCatalog, LedgerBackend, LedgerConfig, LedgerContext, MovementJournal,
    PostgresLedgerBackend, SaleStockIntegrator, StockLedger, TransferWorkflow,
};

use crate::config::AppConfig;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Everything the handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: StockLedger,
    pub journal: MovementJournal,
    pub transfers: TransferWorkflow,
    pub sales: SaleStockIntegrator,
    pub catalog: Arc<InMemoryProductCatalog>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }
}

/// Pick the ledger backend from `storage` and wire every service on it.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    if !config.storage.persistent {
        return Ok(build_in_memory_services(&config.ledger));
    }

    let database_url = config
        .storage
        .database_url()
        .context("storage.persistent is set but no database url is configured")?;
    let backend = PostgresLedgerBackend::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    tracing::info!("ledger backed by Postgres");
    Ok(wire_services(Arc::new(backend), &config.ledger))
}

/// In-memory wiring for tests and dev.
pub fn build_in_memory_services(config: &LedgerConfig) -> AppServices {
    wire_services(Arc::new(InMemoryLedgerBackend::new()), config)
}

/// Backend + bus + catalog, all services on one context.
fn wire_services(backend: Arc<dyn LedgerBackend>, config: &LedgerConfig) -> AppServices {
    let bus: Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>> = Arc::new(InMemoryEventBus::new());
    let catalog = Arc::new(InMemoryProductCatalog::new());

    let ctx = LedgerContext::new(backend, bus.clone(), catalog.clone(), config.clone());

    // Realtime channel (SSE): lossy broadcast of committed ledger changes.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    // Background subscriber: bus -> SSE. Ends once the bus is dropped.
    {
        let sub = bus.subscribe();
        let realtime_tx = realtime_tx.clone();
        std::thread::spawn(move || {
            while let Ok(env) = sub.recv() {
                let _ = realtime_tx.send(RealtimeMessage {
                    topic: env.event_type().to_string(),
                    payload: serde_json::json!({
                        "aggregate_type": env.aggregate_type(),
                        "aggregate_id": env.aggregate_id().to_string(),
                        "sequence_number": env.sequence_number(),
                        "occurred_at": env.occurred_at().to_rfc3339(),
                        "data": env.payload(),
                    }),
                });
            }
            tracing::debug!("event bus closed; realtime forwarder stopped");
        });
    }

    AppServices {
        ledger: StockLedger::new(ctx.clone()),
        journal: MovementJournal::new(ctx.clone()),
        transfers: TransferWorkflow::new(ctx.clone()),
        sales: SaleStockIntegrator::new(ctx),
        catalog,
        realtime_tx,
    }
}

pub fn realtime_sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
