use pubsub_lens::config::load_config;
use pubsub_lens::server::run_server;
use pubsub_lens::utils::logging;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.log.level);

    if let Err(e) = run_server(settings).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}
