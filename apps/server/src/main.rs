#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use pulse_service::config::Config;
use pulse_service::database::Database;

mod error;
mod routes;

use error::AppError;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();
    logger::init();

    let config = Config::from_config(std::env::var_os("PULSE_CONFIG"))?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let database = pulse_service::connect_store(&config).await?;

    run_server(addr, database).await
}

async fn run_server(addr: SocketAddr, database: Arc<dyn Database>) -> Result<(), AppError> {
    let database = web::Data::from(database);
    tracing::info!(%addr, "Starting HTTP server");

    HttpServer::new(move || App::new().app_data(database.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
