//! One handler module per Admin API resource; each exposes plain
//! `async fn(&AppState, ...) -> Response<Full<Bytes>>` functions the
//! router in `admin_api::route` dispatches to by path and method.

pub mod ca;
pub mod fuzz;
pub mod intercept;
pub mod matchreplace;
pub mod oob;
pub mod replay;
pub mod requests;
pub mod rules;
pub mod scope;
