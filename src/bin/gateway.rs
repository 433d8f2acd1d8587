use catalog_orders::config::GatewaySettings;
use catalog_orders::gateway::build_gateway;
use dotenvy::dotenv;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let settings = GatewaySettings::from_env()?;

    log::info!(
        "Starting API gateway at http://{}:{} (inventory: {}, orders: {})",
        settings.host,
        settings.port,
        settings.inventory_service_url,
        settings.order_service_url
    );

    build_gateway(&settings)?.await?;
    Ok(())
}
