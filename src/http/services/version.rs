use actix_web::{get, Responder};
use rbtag::BuildInfo;
use serde::Serialize;

use crate::http::response::ApiResponse;

#[derive(BuildInfo)]
struct BuildTag;

#[derive(Serialize)]
struct Version {
    commit: &'static str,
}

#[get("/version")]
pub async fn version() -> impl Responder {
    ApiResponse::Ok(Version {
        commit: BuildTag {}.get_build_commit(),
    })
}
