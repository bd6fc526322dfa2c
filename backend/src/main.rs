use axum::extract::Request;
use axum::ServiceExt;
use std::net::SocketAddr;
use std::sync::Arc;

use campus_marketplace::app::{build_service, AppState};
use campus_marketplace::config::AppConfig;
use campus_marketplace::db;
use campus_marketplace::extraction::{GeminiExtractor, ListingAnalyzer};
use campus_marketplace::notifications::{LogNotifier, MatchDispatcher, MatchQueue, PgMatchStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = AppConfig::load()?;
    log::info!("Loaded config: {:?}", config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let pool = db::establish_pool(&config.database_url, config.database_pool_size)?;
    let test_query = db::run(&pool, |conn| db::ping(conn).map_err(db::DbError::from)).await?;
    log::info!("Database test query result: {}", test_query);

    let analyzer: Option<Arc<dyn ListingAnalyzer>> = match config.gemini_config() {
        Some(gemini) => {
            log::info!("Image analysis enabled with model {}", gemini.model);
            Some(Arc::new(GeminiExtractor::new(gemini)?))
        }
        None => {
            log::warn!("GEMINI_API_KEY is not set; /api/analyze-image will respond with a configuration error");
            None
        }
    };

    let (matches, receiver) = MatchQueue::channel();
    let dispatcher = MatchDispatcher::new(
        Arc::new(PgMatchStore::new(pool.clone())),
        Arc::new(LogNotifier),
        config.match_retry_interval(),
    );
    tokio::spawn(dispatcher.run(receiver));

    log::info!("Starting server on {}", addr);

    let state = AppState {
        config: Arc::new(config),
        pool,
        analyzer,
        matches,
    };
    let app = build_service(state);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        ServiceExt::<Request>::into_make_service(app),
    )
    .await?;

    Ok(())
}
