use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dptree;
use teloxide::prelude::*;
use tg_showwatch::actions::ActionRegistry;
use tg_showwatch::collector::HttpCollector;
use tg_showwatch::messenger::TelegramMessenger;
use tg_showwatch::watch::Watcher;
use tg_showwatch::{config, db, handlers};
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/showwatch.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let registry = Arc::new(Mutex::new(ActionRegistry::new(Duration::from_secs(
        cfg.app.action_ttl_secs,
    ))));

    let collector = Arc::new(HttpCollector::from_config(&cfg.collector));
    let messenger = Arc::new(TelegramMessenger::new(bot.clone(), cfg.telegram.channel_id));
    let watcher = Watcher::new(
        pool.clone(),
        collector,
        messenger,
        Arc::clone(&registry),
        &cfg,
    )?;
    tokio::spawn(watcher.run());

    info!("starting telegram bot");
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_endpoint))
        .branch(Update::filter_callback_query().endpoint(callback_endpoint));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pool, registry])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn message_endpoint(bot: Bot, msg: Message, pool: db::Pool) -> ResponseResult<()> {
    if let Err(err) = handlers::handle_message(&bot, &pool, &msg).await {
        error!(?err, "failed to handle message");
    }
    Ok(())
}

async fn callback_endpoint(
    bot: Bot,
    query: CallbackQuery,
    pool: db::Pool,
    registry: Arc<Mutex<ActionRegistry>>,
) -> ResponseResult<()> {
    if let Err(err) = handlers::handle_callback(&bot, &pool, &registry, &query).await {
        error!(?err, "failed to handle callback");
    }
    Ok(())
}
