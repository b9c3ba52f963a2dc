//! HTTP middleware

pub mod gateway_key;
pub mod request_id;

pub use gateway_key::{GATEWAY_KEY_HEADER, require_gateway_key};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
