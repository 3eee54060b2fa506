//! Example server: loads the schema from SCHEMA_PATH or by introspecting the database,
//! infers relations, and mounts generic CRUD routes for every exposed entity.

use relcrud::schema::{load_api_config_from_file, load_models_from_file, load_models_from_pool, EnglishInflector};
use relcrud::{build, entity_routes, infer, AppState, CrudService, FacadeRegistry, PgBackend, Settings};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relcrud=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;

    let models = match &settings.schema_path {
        Some(path) => load_models_from_file(path).await?,
        None => load_models_from_pool(&pool, &settings.db_schema, &EnglishInflector).await?,
    };
    let mut model = build(&models);
    infer(&mut model);
    for entity in model.iter() {
        tracing::info!(entity = %entity.name, relations = entity.relations.len(), "entity loaded");
    }
    let model = Arc::new(model);

    let configs = match &settings.api_config_path {
        Some(path) => load_api_config_from_file(path).await?,
        None => Vec::new(),
    };
    let backend = PgBackend::new(pool, model.clone(), settings.db_schema.clone());
    let service = CrudService::new(Arc::new(backend), model);
    let registry = FacadeRegistry::from_config(&service, &configs)?;
    let state = AppState::new(registry);

    let app = Router::new().nest("/api/v1", entity_routes(state, settings.body_limit_bytes));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
