//! Checkout host binary
//!
//! Boots the order coordinator and the payment ledger in one process,
//! wires them over the embedded broker, and serves each service's HTTP API
//! on its own port. Ctrl-C shuts everything down gracefully.

use anyhow::Context;
use broker::Broker;
use checkout::{BackgroundTasks, TaskKind, init_logger};
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logger();
    tracing::info!("checkout starting");

    let orders_config = orders_service::Config::from_env();
    let payments_config = payments_service::Config::from_env();

    let broker = Broker::from_settings(&orders_config.broker);

    let order_storage =
        orders_service::OrderStorage::open(&orders_config.db_path).context("open orders store")?;
    let ledger_storage = payments_service::LedgerStorage::open(&payments_config.db_path)
        .context("open payments store")?;

    let notifier = orders_service::OrderNotifier::new();
    let order_service =
        orders_service::OrderService::new(order_storage.clone(), notifier.clone());
    let account_service = payments_service::AccountService::new(ledger_storage.clone());

    let mut tasks = BackgroundTasks::new();
    let shutdown = tasks.shutdown_token();

    tasks.spawn(
        "orders_outbox",
        TaskKind::Periodic,
        orders_service::OutboxPublisher::new(order_storage, broker.clone(), &orders_config)
            .run(shutdown.clone()),
    );
    tasks.spawn(
        "payments_outbox",
        TaskKind::Periodic,
        payments_service::OutboxPublisher::new(
            ledger_storage,
            broker.clone(),
            &payments_config,
        )
        .run(shutdown.clone()),
    );
    tasks.spawn(
        "payments_consumer",
        TaskKind::Worker,
        payments_service::CommandConsumer::new(
            account_service.clone(),
            broker.clone(),
            payments_config.broker.clone(),
        )
        .run(shutdown.clone()),
    );
    tasks.spawn(
        "orders_consumer",
        TaskKind::Worker,
        orders_service::ResultConsumer::new(
            order_service.clone(),
            broker,
            orders_config.broker.clone(),
        )
        .run(shutdown.clone()),
    );

    // Order updates reach external subscribers here; for now that is the
    // process log.
    let mut updates = notifier.subscribe();
    let updates_shutdown = shutdown.clone();
    tasks.spawn("order_updates", TaskKind::Listener, async move {
        loop {
            tokio::select! {
                _ = updates_shutdown.cancelled() => return,
                update = updates.recv() => match update {
                    Ok(order) => tracing::info!(
                        order_id = %order.id,
                        user_id = %order.user_id,
                        status = ?order.status,
                        "order update pushed"
                    ),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "order update stream lagged");
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    });

    let orders_app = orders_service::api::router(order_service).layer(TraceLayer::new_for_http());
    let payments_app =
        payments_service::api::router(account_service).layer(TraceLayer::new_for_http());

    let orders_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", orders_config.http_port))
            .await
            .context("bind orders port")?;
    let payments_listener =
        tokio::net::TcpListener::bind(("0.0.0.0", payments_config.http_port))
            .await
            .context("bind payments port")?;
    tracing::info!(
        orders_port = orders_config.http_port,
        payments_port = payments_config.http_port,
        "http listeners bound"
    );

    let orders_shutdown = shutdown.clone();
    tasks.spawn("orders_http", TaskKind::Listener, async move {
        if let Err(e) = axum::serve(orders_listener, orders_app)
            .with_graceful_shutdown(orders_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "orders http server failed");
        }
    });
    let payments_shutdown = shutdown.clone();
    tasks.spawn("payments_http", TaskKind::Listener, async move {
        if let Err(e) = axum::serve(payments_listener, payments_app)
            .with_graceful_shutdown(payments_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "payments http server failed");
        }
    });

    tasks.log_summary();

    tokio::signal::ctrl_c()
        .await
        .context("listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    tasks.shutdown().await;
    Ok(())
}
