use anyhow::Result;
use dotenvy::dotenv;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::signal;
use tokio::sync::watch;

use telesync::cli::{Cli, Commands};
use telesync::core::web_server::{start_web_server, WebState};
use telesync::core::{config, init_logger, log_startup_configuration, metrics, Settings};
use telesync::mtproto::MtProtoClient;
use telesync::remote;
use telesync::session::{start_sync_scheduler, LocalSessionStore, SessionManager};
use telesync::storage::FileStore;
use telesync::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps};

/// Main entry point
///
/// Parses CLI arguments and dispatches to the matching subcommand.
/// Without a subcommand the service runs.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load .env first so LOG_FILE_PATH from it is honored
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;
    metrics::init_metrics();

    let settings = Arc::new(Settings::from_env());

    match cli.command.unwrap_or(Commands::Run { no_bot: false }) {
        Commands::Run { no_bot } => run_service(settings, !no_bot).await,
        Commands::Push => run_push(&settings).await,
        Commands::Pull => run_pull(&settings).await,
        Commands::Status { sync } => run_status(&settings, sync).await,
        Commands::Logout { yes } => run_logout(&settings, yes).await,
    }
}

fn build_manager(settings: &Settings) -> Result<Arc<SessionManager>> {
    let remote = remote::from_settings(settings)?;
    Ok(Arc::new(SessionManager::new(
        LocalSessionStore::new(&settings.session_path),
        remote,
        settings.remote_session_path.clone(),
    )))
}

/// Runs the web server, background sync and (optionally) the bot until a shutdown signal.
async fn run_service(settings: Arc<Settings>, with_bot: bool) -> Result<()> {
    log_startup_configuration(&settings);

    let manager = build_manager(&settings)?;
    let status = manager.init().await?;
    log::info!("Session state at startup: {}", status.state);

    let files = FileStore::new(&settings.upload_dir, settings.max_upload_bytes);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = start_sync_scheduler(manager.clone(), settings.sync_interval, shutdown_rx.clone());

    let web_state = WebState::new(manager.clone(), files.clone(), settings.clone());
    let mut web_shutdown = shutdown_rx.clone();
    let web = tokio::spawn(async move {
        let shutdown = async move {
            let _ = web_shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = start_web_server(web_state, shutdown).await {
            log::error!("Web server failed: {}", e);
        }
    });

    let (mtproto_stop_tx, mtproto_stop_rx) = watch::channel(false);
    let mut mtproto = None;

    let bot_token = config::BOT_TOKEN.clone();
    let dispatcher = if with_bot && !bot_token.is_empty() {
        let bot = create_bot(&bot_token)?;
        if let Err(e) = setup_bot_commands(&bot).await {
            log::warn!("Failed to publish bot commands: {}", e);
        }

        if settings.telegram_api_id.is_some() {
            let settings = settings.clone();
            let manager = manager.clone();
            let token = bot_token.clone();
            let stop = mtproto_stop_rx.clone();
            mtproto = Some(tokio::spawn(async move { run_mtproto(&settings, &token, &manager, stop).await }));
        }

        let handler = schema(HandlerDeps::new(manager.clone(), files, settings.clone()));
        let mut dispatcher = Dispatcher::builder(bot, handler)
            .dependencies(DependencyMap::new())
            .error_handler(LoggingErrorHandler::with_custom_text("An error from the update handler"))
            .build();
        let token = dispatcher.shutdown_token();
        let handle = tokio::spawn(async move { dispatcher.dispatch().await });
        log::info!("Bot dispatcher started");
        Some((token, handle))
    } else {
        if with_bot {
            log::warn!("BOT_TOKEN not set, running without the Telegram bot");
        }
        None
    };

    shutdown_signal().await;
    log::info!("Shutdown signal received");

    if let Some((token, handle)) = dispatcher {
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => log::warn!("Dispatcher was not running: {}", e),
        }
        let _ = handle.await;
    }

    // Hand the client's final auth state over before the scheduler's last flush.
    let _ = mtproto_stop_tx.send(true);
    if let Some(handle) = mtproto {
        if let Err(e) = handle.await {
            log::error!("MTProto task failed: {}", e);
        }
    }

    let _ = shutdown_tx.send(true);
    // The scheduler flushes a dirty session before it returns.
    if let Err(e) = scheduler.await {
        log::error!("Sync scheduler task failed: {}", e);
    }
    let _ = web.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Brings up the MTProto client so its auth key lands in the managed session,
/// then keeps handing key changes back to the manager until stopped.
async fn run_mtproto(settings: &Settings, bot_token: &str, manager: &SessionManager, mut stop: watch::Receiver<bool>) {
    let client = match MtProtoClient::connect(settings, bot_token, manager).await {
        Ok(client) => client,
        Err(e) => {
            log::error!("MTProto client failed to start: {}", e);
            return;
        }
    };
    match client.get_me().await {
        Ok(me) => log::info!("MTProto client signed in as {}", me.username().unwrap_or("(no username)")),
        Err(e) => log::warn!("MTProto client connected, get_me failed: {}", e),
    }

    let mut ticker = tokio::time::interval(settings.sync_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => persist_mtproto(&client, manager).await,
            _ = async { let _ = stop.wait_for(|stop| *stop).await; } => break,
        }
    }
    persist_mtproto(&client, manager).await;
}

async fn persist_mtproto(client: &MtProtoClient, manager: &SessionManager) {
    match client.persist(manager).await {
        Ok(true) => log::info!("MTProto session changed, stored"),
        Ok(false) => {}
        Err(e) => log::warn!("Failed to store MTProto session: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_push(settings: &Settings) -> Result<()> {
    let manager = build_manager(settings)?;
    if manager.remote_name().is_none() {
        anyhow::bail!("No remote configured (set DROPBOX_* or REMOTE_DIR)");
    }
    manager.load_local().await?;
    let outcome = manager.push().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_pull(settings: &Settings) -> Result<()> {
    let manager = build_manager(settings)?;
    if manager.remote_name().is_none() {
        anyhow::bail!("No remote configured (set DROPBOX_* or REMOTE_DIR)");
    }
    manager.load_local().await?;
    let outcome = manager.pull().await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_status(settings: &Settings, sync: bool) -> Result<()> {
    let manager = build_manager(settings)?;
    let status = if sync {
        manager.init().await?
    } else {
        manager.load_local().await?
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_logout(settings: &Settings, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete the local and remote session copies?")? {
        println!("Aborted");
        return Ok(());
    }
    let manager = build_manager(settings)?;
    manager.load_local().await?;
    manager.logout().await?;
    println!("Logged out");
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
