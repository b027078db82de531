use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type Handler = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const HANDLERS: &[Handler] = &[
    handlers::core::try_handle,
    handlers::setup::try_handle,
    handlers::universities::try_handle,
    handlers::programs::try_handle,
    handlers::modules::try_handle,
    handlers::students::try_handle,
    handlers::student_records::try_handle,
    handlers::grades::try_handle,
    handlers::classification::try_handle,
    handlers::certificates::try_handle,
    handlers::verifications::try_handle,
    handlers::dashboard::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    log::debug!("dispatch {} (id {})", req.method, req.id);
    for handle in HANDLERS {
        if let Some(resp) = handle(state, &req) {
            return resp;
        }
    }

    log::warn!("unknown method: {}", req.method);
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
