use actix_cors::Cors;
use actix_web::{error::InternalError, web, App, HttpResponse, HttpServer};
use log::info;
use response::ErrorBody;
use services::{
    convert::convert, download::download, jobs::jobs, objects::object, progress::progress,
    version::version,
};

use crate::state::AppContext;

pub mod response;
mod services;

/// Registers every route. Shared by the server and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    // a path segment that doesn't parse (a malformed job id) names nothing
    let path_config = web::PathConfig::default().error_handler(|err, _req| {
        let body = ErrorBody::new(err.to_string());
        InternalError::from_response(err, HttpResponse::NotFound().json(body)).into()
    });

    cfg.app_data(path_config)
        .service(convert)
        .service(progress)
        .service(download)
        .service(jobs)
        .service(object)
        .service(version);
}

pub async fn start_http(ctx: AppContext) -> anyhow::Result<()> {
    let port = ctx.config.port;
    let data = web::Data::new(ctx);
    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(data.clone())
            .configure(configure)
    });
    let ip = format!("0.0.0.0:{}", port);
    info!("http server listening on {}", ip);
    server.bind(ip)?.run().await?;
    Ok(())
}
