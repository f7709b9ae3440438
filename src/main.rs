use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use taskhub::config::Config;
use taskhub::mail::LogMailer;
use taskhub::routes;
use taskhub::state::AppState;
use taskhub::store::{MemoryUserStore, PgUserStore, UserStore};

fn cors(frontend_url: Option<&str>) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION])
        .supports_credentials()
        .max_age(3600);
    match frontend_url {
        Some(origin) => cors.allowed_origin(origin),
        None => cors,
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env().map_err(|e| {
        log::error!("invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    let users: Arc<dyn UserStore> = match &config.database_url {
        Some(url) => {
            let store = PgUserStore::connect(url)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            store
                .migrate()
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            log::info!("DB connected successfully");
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set, users are kept in memory");
            Arc::new(MemoryUserStore::new())
        }
    };

    let frontend_url = config.frontend_url.clone();
    let mailer = Arc::new(LogMailer::new(
        frontend_url.clone().unwrap_or_else(|| config.server_url()),
    ));
    let state = web::Data::new(AppState::new(&config, users, mailer));

    log::info!("Starting TaskHub server at {}", config.server_url());
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors(frontend_url.as_deref()))
            .wrap(Logger::default())
            .configure(routes::app)
    })
    .bind((config.server_host.as_str(), config.server_port))?
    .run()
    .await
}
