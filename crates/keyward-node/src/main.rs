//! keyward-node — the subscription-key management core's composition root.
//!
//! Startup sequence:
//!   1. Open (or initialise) the state database
//!   2. Wire the messaging sink, key/payment/notification services
//!   3. Start the periodic job table (scheduler)
//!   4. Start the JSON-RPC facade
//!   5. Wait for ctrl-c, then shut both down

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use keyward_api::server::RpcServerState;
use keyward_api::RpcServer;
use keyward_core::Settings;
use keyward_keys::KeyService;
use keyward_messaging::{MessagingSink, TelegramSink};
use keyward_notify::NotificationEngine;
use keyward_payments::{PaymentProviderClient, PaymentService};
use keyward_scheduler::SchedulerHost;
use keyward_store::KeywardStore;

#[derive(Parser, Debug)]
#[command(
    name = "keyward-node",
    version,
    about = "Subscription-key management core — RPC facade, panel provisioning, payments, notifications"
)]
struct Args {
    #[command(flatten)]
    settings: Settings,

    /// JSON-RPC listen address.
    #[arg(long, env = "KEYWARD_RPC_ADDR", default_value = "127.0.0.1:8899")]
    rpc_addr: SocketAddr,

    /// Telegram bot token used to deliver messages to users and operators.
    #[arg(long, env = "KEYWARD_BOT_TOKEN")]
    bot_token: String,

    /// Telegram Bot API root, overridable in tests to point at a mock server.
    #[arg(long, env = "KEYWARD_TELEGRAM_API_BASE_URL", default_value = "https://api.telegram.org")]
    telegram_api_base_url: String,

    /// Base URL of the payment provider's create-intent/check-status API.
    #[arg(long, env = "KEYWARD_PAYMENT_PROVIDER_BASE_URL")]
    payment_provider_base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keyward=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("keyward node starting");

    std::fs::create_dir_all(&args.settings.data_dir)
        .with_context(|| format!("creating data dir {}", args.settings.data_dir.display()))?;
    let store = Arc::new(
        KeywardStore::open(&args.settings.data_dir)
            .with_context(|| format!("opening state database at {}", args.settings.data_dir.display()))?,
    );
    store
        .ensure_notification_type_variants()
        .context("running notification-type enum migration")?;

    let sink: Arc<dyn MessagingSink> = Arc::new(
        TelegramSink::new(
            format!("{}/bot{}", args.telegram_api_base_url, args.bot_token),
            args.settings.admin_ids.clone(),
        )
        .context("building telegram sink")?,
    );

    let notify = Arc::new(NotificationEngine::new(store.clone(), sink.clone()));
    let keys = Arc::new(KeyService::new(
        store.clone(),
        notify.clone(),
        sink.clone(),
        args.settings.panel_prefix.clone(),
    ));

    let provider = Arc::new(
        PaymentProviderClient::new(
            args.payment_provider_base_url.clone(),
            args.settings.payment_provider_token.clone(),
        )
        .context("building payment provider client")?,
    );
    let payments = Arc::new(PaymentService::new(
        store.clone(),
        keys.clone(),
        provider,
        sink.clone(),
    ));

    let mut scheduler = SchedulerHost::new(keys.clone(), payments.clone(), notify.clone())
        .await
        .context("initializing scheduler")?;
    scheduler.start().await.context("starting scheduler")?;

    let rpc_state = Arc::new(RpcServerState {
        store,
        keys,
        payments,
        notify,
        admin_ids: args.settings.admin_ids,
    });
    let rpc_handle = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");

    rpc_handle.stop().ok();
    scheduler.shutdown().await.context("shutting down scheduler")?;

    Ok(())
}
