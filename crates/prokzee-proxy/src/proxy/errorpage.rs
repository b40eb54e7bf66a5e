//! The branded HTML error page returned to the client in place of an
//! upstream response: dropped requests, approval timeouts, and
//! upstream/TLS failures all render through here so the operator always
//! sees the original URL and a plain-English cause.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

pub fn render(status: StatusCode, url: &str, message: &str) -> Response<Full<Bytes>> {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>ProKZee — {status}</title></head>
<body style="font-family: sans-serif; margin: 2rem;">
<h1>ProKZee</h1>
<p>{message}</p>
<p><code>{url}</code></p>
</body>
</html>"#,
        status = status.as_u16(),
        message = html_escape(message),
        url = html_escape(url),
    );

    Response::builder()
        .status(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Content-Length", body.len().to_string())
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"ProKZee error")))
                .expect("static fallback response is always valid")
        })
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_status_and_url_into_the_body() {
        let resp = render(StatusCode::FORBIDDEN, "https://example.com/a", "Request was dropped");
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn escapes_html_in_the_url() {
        let escaped = html_escape("<script>alert(1)</script>");
        assert!(!escaped.contains("<script>"));
    }
}
