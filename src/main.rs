use std::sync::Arc;

use tracing::info;
use warequery::config::ServiceConfig;
use warequery::db::Db;
use warequery::llm::OpenAiChatClient;
use warequery::pipeline::App;
use warequery::schema::{declared_tables, SchemaRegistry};
use warequery::web::start_server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    let port = config.server.port;

    let db = Db::connect(&config.database).await?;

    // startup fails on any declared table or column missing from the live DB
    let registry = SchemaRegistry::from_declaration(declared_tables());
    registry.verify(db.pool()).await?;
    info!(tables = registry.tables().len(), "schema verified");

    let llm = Arc::new(OpenAiChatClient::new(&config.llm)?);
    let app = App::new(config, registry, db, llm);

    start_server(app, port).await?;
    Ok(())
}
