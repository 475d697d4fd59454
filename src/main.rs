use campaignserver::api_router::api_router;
use campaignserver::config::AppConfig;
use campaignserver::delivery::smtp::SmtpMailer;
use campaignserver::delivery::Transport;
use campaignserver::queue::{JobQueue, QueueWorker};
use campaignserver::scheduler::SchedulerService;
use campaignserver::shared::clock::{Clock, SystemClock};
use campaignserver::shared::state::AppState;
use campaignserver::store::pg::{create_pool, PgStore};
use campaignserver::store::Store;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::load()?;

    let pool = create_pool(&config)?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let transport: Arc<dyn Transport> = Arc::new(SmtpMailer::new(&config.smtp)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (queue, rx) = JobQueue::channel();

    let state = Arc::new(AppState::new(config, store, transport, clock, queue));

    tokio::spawn(QueueWorker::new(Arc::clone(&state), rx).run());
    tokio::spawn(SchedulerService::new(Arc::clone(&state)).spawn());

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("campaignserver listening on {addr}");
    axum::serve(listener, api_router(state)).await?;
    Ok(())
}
