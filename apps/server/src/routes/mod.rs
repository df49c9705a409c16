use actix_web::web::ServiceConfig;

mod health;
mod heartbeat;

pub fn routes(cfg: &mut ServiceConfig) {
    health::routes(cfg);
    heartbeat::routes(cfg);
}
