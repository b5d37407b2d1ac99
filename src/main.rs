use std::io;

use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use log::info;

use branch_admin::config::Config;
use branch_admin::handlers;
use branch_admin::state::AppState;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let bind_addr = config.bind_addr.clone();

    let state = AppState::from_config(config)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    info!("Persistence backend: {}", state.store.client().backend_name());
    let state = web::Data::new(state);

    info!("Starting server at {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
