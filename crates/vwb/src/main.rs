use std::sync::Arc;

use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio_util::sync::CancellationToken;

use vwb_core::{
    config::Config,
    conversation::{Conversation, ConversationSettings},
    feed::EndOfLifeClient,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    pipeline::{PipelineSettings, ReleasePipeline},
    scheduler::PipelineScheduler,
    store::SqliteStore,
};
use vwb_telegram::{router::AppState, TelegramMessenger};

#[derive(Parser)]
#[command(name = "vwb", version)]
#[command(about = "Telegram bot that announces new product releases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot: scheduled pipeline plus Telegram long polling
    Start,
    /// Sync the catalog and snapshot watched products once, without notifying
    PopulateProducts,
    /// Run the full pipeline once and notify subscribers
    NotifyUsers,
}

#[tokio::main]
async fn main() -> Result<(), vwb_core::Error> {
    let cli = Cli::parse();
    vwb_core::logging::init("vwb")?;

    let cfg = Config::load()?;
    tracing::info!(env = ?cfg.app_env, db = %cfg.database_path.display(), "configuration loaded");

    let store = Arc::new(SqliteStore::open(&cfg.database_path)?);
    let feed = Arc::new(EndOfLifeClient::new(
        cfg.catalog_url.clone(),
        cfg.upstream_timeout,
    )?);

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    // Keep the adapter's 429 retry, but space calls out so fan-out rarely hits it.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let pipeline = Arc::new(ReleasePipeline::new(
        store.clone(),
        feed,
        messenger.clone(),
        PipelineSettings::from_config(&cfg),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Start => {
            let scheduler = Arc::new(PipelineScheduler::new(pipeline, cfg.pipeline_interval));
            let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

            let conversation = Arc::new(Conversation::new(
                store,
                ConversationSettings::from_config(&cfg),
            ));
            let state = Arc::new(AppState::new(conversation, messenger));

            let polled = vwb_telegram::router::run_polling(bot, state, cancel.clone()).await;
            cancel.cancel();
            if let Err(e) = scheduler_task.await {
                tracing::warn!(error = %e, "scheduler task ended abnormally");
            }
            polled.map_err(|e| vwb_core::Error::External(format!("telegram bot failed: {e}")))?;
        }
        Command::PopulateProducts => {
            let (run_ts, commit) = pipeline.populate(&cancel).await?;
            tracing::info!(
                run_ts = %run_ts,
                upserted = commit.products_upserted,
                unchanged = commit.products_unchanged,
                versions = commit.versions_inserted,
                "products populated"
            );
        }
        Command::NotifyUsers => {
            let report = pipeline.run(&cancel).await?;
            tracing::info!(
                changed = report.changed_products,
                subscribers = report.notify.subscribers_notified,
                messages = report.notify.messages_sent,
                failures = report.notify.delivery_failures,
                "notification run finished"
            );
        }
    }

    Ok(())
}
