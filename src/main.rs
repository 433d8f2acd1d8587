use catalog_orders::config::Settings;
use catalog_orders::{build_server, build_state, StartupError};
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> Result<(), StartupError> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let settings = Settings::from_env()?;
    let state = build_state(&settings)?;

    log::info!("Starting server at http://{}:{}", settings.host, settings.port);

    build_server(state, &settings.host, settings.port)?.await?;
    Ok(())
}
