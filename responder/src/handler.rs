use std::convert::Infallible;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};

pub const BODY: &str = "<h1>Hello, World!</h1>";
pub const HTML: &str = "text/html";

/// The one and only handler. Method, path and headers of the request are never looked at.
///
/// The request body is read and thrown away first: hyper only reuses a keep-alive connection
/// once the body of the previous request has been consumed.
pub async fn hello_world<B>(request: Request<B>) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body + Unpin,
    B::Error: std::fmt::Display,
{
    let mut body = request.into_body();

    while let Some(frame) = body.frame().await {
        if let Err(e) = frame {
            // hyper closes the connection after this response
            log::debug!("failed to read request body: {e}");
            break;
        }
    }

    Ok(fixed_response())
}

pub fn fixed_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(BODY.as_bytes())));

    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(HTML));

    response
}
