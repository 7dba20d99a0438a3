//! Infrastructure wiring: stores, bus, processors.
//!
//! Five processors share one process here: the three engines, the saga
//! coordinator (three status consumers + four command producers), and the
//! notifications writer. Each runs as a consumer/producer task pair over
//! the bus; the HTTP layer only keeps the handles it needs.

use std::sync::Arc;

use tokio::task::JoinHandle;

use mercato_billing::{store::PaymentStore, PaymentEngine};
use mercato_core::{shutdown_channel, ShutdownHandle};
use mercato_delivery::{store::ReservationStore, CourierSlotEngine};
use mercato_infra::{config::ProcessorConfig, Config, InMemoryDatabase, PostgresDatabase, RedisStreamsBus};
use mercato_messaging::{
    outbound_queue, spawn_consumer, spawn_producer, topic, InMemoryBus, MessageBus, Outbound,
    StockChangeMessage,
};
use mercato_notify::{NotificationStore, NotificationWriter, Notifier};
use mercato_orders::{
    store::SagaStore, Coordinator, PaymentStatusHandler, ReserveStatusHandler, StockStatusHandler,
};
use mercato_stock::{store::CatalogStore, StockEngine};

/// What the HTTP handlers work with.
pub struct AppServices {
    pub saga: Arc<dyn SagaStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub billing: Arc<dyn PaymentStore>,
    pub delivery: Arc<dyn ReservationStore>,
    pub notifications: Arc<dyn NotificationStore>,
    /// Order intake publishes stock(remove, pending) here.
    pub stock_commands: Outbound<StockChangeMessage>,
    pub notifier: Notifier,
}

/// A wired process: services for HTTP plus the background task set.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub shutdown: ShutdownHandle,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Flip the shutdown signal and wait for every processor to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// In-memory bus and stores: dev runs and deterministic tests.
pub fn build_in_memory(cfg: &ProcessorConfig) -> (Runtime, Arc<InMemoryDatabase>) {
    let db = Arc::new(InMemoryDatabase::new());
    let bus = Arc::new(InMemoryBus::new());
    let runtime = build_runtime(db.clone(), bus, cfg);
    (runtime, db)
}

/// Postgres + Redis Streams: production.
pub async fn build_persistent(config: &Config) -> anyhow::Result<Runtime> {
    let db = PostgresDatabase::connect(&config.db_config.url())
        .await
        .map_err(|e| anyhow::anyhow!("database unreachable: {e}"))?;
    db.migrate()
        .await
        .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;

    let bus = RedisStreamsBus::new(config.redis_config.url())
        .map_err(|e| anyhow::anyhow!("bad redis config: {e}"))?;
    bus.ping()
        .map_err(|e| anyhow::anyhow!("bus unreachable: {e}"))?;

    Ok(build_runtime(
        Arc::new(db),
        Arc::new(bus),
        &config.processor_config,
    ))
}

fn build_runtime<D, B>(db: Arc<D>, bus: Arc<B>, cfg: &ProcessorConfig) -> Runtime
where
    D: SagaStore
        + CatalogStore
        + mercato_stock::store::StockStore
        + PaymentStore
        + ReservationStore
        + NotificationStore,
    B: MessageBus,
{
    let (shutdown_handle, shutdown) = shutdown_channel();
    let policy = cfg.retry_policy();
    let capacity = cfg.queue_capacity;
    let mut tasks = Vec::new();

    // Engines: one consumer + one status producer each.
    let (stock_status_out, stock_status_rx) = outbound_queue(capacity);
    tasks.push(spawn_producer(
        "stock-engine",
        bus.clone(),
        topic::STOCK_CHANGES_STATUS,
        stock_status_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        "stock-engine",
        bus.clone(),
        topic::STOCK_CHANGES,
        "stock-engine",
        StockEngine::new(db.clone(), policy, shutdown.clone(), stock_status_out),
        shutdown.clone(),
    ));

    let (payment_status_out, payment_status_rx) = outbound_queue(capacity);
    tasks.push(spawn_producer(
        "payment-engine",
        bus.clone(),
        topic::PAYMENTS_STATUS,
        payment_status_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        "payment-engine",
        bus.clone(),
        topic::PAYMENTS,
        "payment-engine",
        PaymentEngine::new(db.clone(), policy, shutdown.clone(), payment_status_out),
        shutdown.clone(),
    ));

    let (reserve_status_out, reserve_status_rx) = outbound_queue(capacity);
    tasks.push(spawn_producer(
        "cour-reserve-engine",
        bus.clone(),
        topic::COUR_RESERVE_STATUS,
        reserve_status_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        "cour-reserve-engine",
        bus.clone(),
        topic::COUR_RESERVE,
        "cour-reserve-engine",
        CourierSlotEngine::new(db.clone(), policy, shutdown.clone(), reserve_status_out),
        shutdown.clone(),
    ));

    // Coordinator: command producers for each engine plus notifications.
    let (stock_cmd_out, stock_cmd_rx) = outbound_queue(capacity);
    let (payment_cmd_out, payment_cmd_rx) = outbound_queue(capacity);
    let (reserve_cmd_out, reserve_cmd_rx) = outbound_queue(capacity);
    let (notify_out, notify_rx) = outbound_queue(capacity);

    tasks.push(spawn_producer(
        "saga-coordinator",
        bus.clone(),
        topic::STOCK_CHANGES,
        stock_cmd_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_producer(
        "saga-coordinator",
        bus.clone(),
        topic::PAYMENTS,
        payment_cmd_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_producer(
        "saga-coordinator",
        bus.clone(),
        topic::COUR_RESERVE,
        reserve_cmd_rx,
        shutdown.clone(),
    ));
    tasks.push(spawn_producer(
        "notifications",
        bus.clone(),
        topic::NOTIFICATIONS,
        notify_rx,
        shutdown.clone(),
    ));

    let notifier = Notifier::new(notify_out);
    let coordinator = Arc::new(Coordinator::new(
        db.clone(),
        stock_cmd_out.clone(),
        payment_cmd_out,
        reserve_cmd_out,
        notifier.clone(),
        cfg.cour_reserve_retry_count,
    ));

    tasks.push(spawn_consumer(
        "saga-coordinator",
        bus.clone(),
        topic::STOCK_CHANGES_STATUS,
        "saga-coordinator",
        StockStatusHandler(coordinator.clone()),
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        "saga-coordinator",
        bus.clone(),
        topic::PAYMENTS_STATUS,
        "saga-coordinator",
        PaymentStatusHandler(coordinator.clone()),
        shutdown.clone(),
    ));
    tasks.push(spawn_consumer(
        "saga-coordinator",
        bus.clone(),
        topic::COUR_RESERVE_STATUS,
        "saga-coordinator",
        ReserveStatusHandler(coordinator.clone()),
        shutdown.clone(),
    ));

    // Notifications writer: persists what the coordinator fans out.
    tasks.push(spawn_consumer(
        "notifications-writer",
        bus.clone(),
        topic::NOTIFICATIONS,
        "notifications-writer",
        NotificationWriter::new(db.clone()),
        shutdown.clone(),
    ));

    let services = Arc::new(AppServices {
        saga: db.clone(),
        catalog: db.clone(),
        billing: db.clone(),
        delivery: db.clone(),
        notifications: db,
        stock_commands: stock_cmd_out,
        notifier,
    });

    Runtime {
        services,
        shutdown: shutdown_handle,
        tasks,
    }
}

/// Retry knobs with short delays, for tests.
pub fn test_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        retry_count: 3,
        retry_delay_ms: 10,
        cour_reserve_retry_count: 2,
        queue_capacity: 256,
    }
}
