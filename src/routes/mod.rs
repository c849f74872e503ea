pub mod auth;
pub mod health;
pub mod recovery;
pub mod tasks;

use actix_web::web;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .service(auth::register)
            .service(auth::login)
            .service(auth::logout)
            .service(auth::security_activity)
            .service(auth::backup_code_challenge)
            .service(auth::regenerate_backup_codes)
            .service(recovery::request_recovery)
            .service(recovery::verify_recovery)
            .service(recovery::emergency_login)
            .service(recovery::self_service_challenge)
            .service(recovery::self_service_regenerate),
    )
    .service(
        web::scope("/tasks")
            .service(tasks::get_tasks)
            .service(tasks::create_task)
            .service(tasks::get_task),
    );
}
