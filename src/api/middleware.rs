//! Request-id tagging for request correlation across logs.

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Attach a fresh request id to the request and echo it on the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let rid = Uuid::new_v4().to_string();
    let value = HeaderValue::from_str(&rid).unwrap_or(HeaderValue::from_static("invalid"));

    req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    let mut res = next.run(req).await;
    res.headers_mut().insert(REQUEST_ID_HEADER, value);
    res
}
