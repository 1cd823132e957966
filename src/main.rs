use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::io;
use tracing_subscriber::EnvFilter;

mod aggregation;
mod config;
mod database;
mod error;
mod export;
mod models;
mod routes;
mod storage;

use models::profile::UserAuthenticationMiddlewareFactory;

fn startup_error(error: error::AppError) -> io::Error {
    tracing::error!(error = %error, "startup failed");
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::Config::from_env().map_err(startup_error)?;

    database::connect(&config.mongodb_uri, &config.database_name)
        .await
        .map_err(startup_error)?;
    models::profile::load_keys(&config.api_key, config.session_ttl_secs).map_err(startup_error)?;

    let store = web::Data::new(storage::BucketStore::new(
        config.storage_root.clone(),
        &config.public_url,
        &config.api_key,
    ));
    let client = web::Data::new(reqwest::Client::new());
    let bind = (config.bind_address.clone(), config.port);
    let config = web::Data::new(config);

    tracing::info!(address = %bind.0, port = bind.1, "starting server");

    HttpServer::new(move || {
        App::new()
            .wrap(UserAuthenticationMiddlewareFactory)
            .wrap(Cors::permissive())
            .app_data(store.clone())
            .app_data(client.clone())
            .app_data(config.clone())
            .service(routes::health)
            .service(routes::user::login)
            .service(routes::user::get_me)
            .service(routes::user::get_users)
            .service(routes::user::bootstrap_user)
            .service(routes::user::create_user)
            .service(routes::user::toggle_user_role)
            .service(routes::user::delete_user)
            .service(routes::project::get_projects)
            .service(routes::project::get_admin_projects)
            .service(routes::project::create_project)
            .service(routes::project::update_project)
            .service(routes::project::delete_project)
            .service(routes::company::get_companies)
            .service(routes::company::get_admin_companies)
            .service(routes::company::create_company)
            .service(routes::company::update_company)
            .service(routes::company::delete_company)
            .service(routes::category::get_categories)
            .service(routes::report::create_report)
            .service(routes::report::get_reports)
            .service(routes::report::get_my_reports)
            .service(routes::report::export_reports)
            .service(routes::report::search_reports)
            .service(routes::report::get_report)
            .service(routes::report::update_report)
            .service(routes::report::patch_report)
            .service(routes::report::delete_report)
            .service(routes::report::get_report_images)
            .service(routes::report::export_report)
            .service(routes::action_plan::create_action_plan)
            .service(routes::action_plan::update_action_plan)
            .service(routes::action_plan::delete_action_plan)
            .service(routes::stats::get_weekly_stats)
            .service(routes::stats::export_weekly_stats)
            .service(routes::stats::get_monthly_stats)
            .service(routes::stats::get_monthly_breakdown)
            .service(routes::stats::export_monthly_stats)
            .service(routes::storage::upload_file)
            .service(routes::storage::get_file)
    })
    .bind(bind)?
    .run()
    .await
}
