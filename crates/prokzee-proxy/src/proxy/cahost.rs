//! The `prokzee` CA-download surface. This host is never
//! proxied: it's recognized before the normal scope/rule/approval
//! pipeline even runs and answered directly out of the CA manager.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};

use crate::ca::CaManager;

const INSTALL_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>ProKZee Root CA</title></head>
<body style="font-family: sans-serif; margin: 2rem;">
<h1>ProKZee Root CA</h1>
<p>Install this certificate as a trusted root to intercept HTTPS traffic through ProKZee.</p>
<ul>
<li><a href="/rootCA.pem">rootCA.pem</a></li>
<li><a href="/rootCA.crt">rootCA.crt</a></li>
<li><a href="/rootCA.cer">rootCA.cer</a></li>
</ul>
</body>
</html>"#;

/// Whether `req` targets the distinguished `prokzee` host (by `Host`
/// header on a plain-HTTP proxy request, or by CONNECT authority).
pub fn is_cahost_request(host: &str) -> bool {
    let host = host.split(':').next().unwrap_or(host);
    host.eq_ignore_ascii_case("prokzee")
}

/// Serve one of the fixed `prokzee` routes, or a 404 for anything else.
pub fn serve(ca: &CaManager, req: &Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/" => html_response(INSTALL_PAGE),
        "/rootCA.pem" | "/rootCA.crt" | "/rootCA.cer" => cert_response(ca),
        "/appicon.png" => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"")))
            .expect("static response is always valid"),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from_static(b"not found")))
            .expect("static response is always valid"),
    }
}

fn html_response(html: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(html.to_string())))
        .expect("static response is always valid")
}

fn cert_response(ca: &CaManager) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/x-x509-ca-cert")
        .body(Full::new(Bytes::from(ca.root_cert_pem())))
        .expect("static response is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_cahost_with_and_without_a_port() {
        assert!(is_cahost_request("prokzee"));
        assert!(is_cahost_request("prokzee:80"));
        assert!(!is_cahost_request("example.com"));
    }
}
