//! Multipart request re-encoding.
//!
//! When an operator-edited request carries `Content-Type:
//! multipart/form-data`, the edited body is decoded field-by-field and
//! re-encoded under a freshly generated boundary rather than trusted
//! verbatim, so `Content-Type` and `Content-Length` always describe the
//! bytes that are actually forwarded.

use std::collections::HashMap;

use hyper::body::Bytes as HyperBytes;

/// If `headers` declares a `multipart/form-data` content type, re-encode
/// `body` under a new boundary and update `Content-Type`/`Content-Length`
/// to match. Any other content type is left untouched. Malformed
/// multipart bodies are passed through unchanged rather than dropped.
pub async fn reencode_if_multipart(headers: &mut HashMap<String, String>, body: &mut Vec<u8>) {
    let Some((key, content_type)) = headers
        .iter()
        .find(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .map(|(k, v)| (k.clone(), v.clone()))
    else {
        return;
    };

    let Some(boundary) = extract_boundary(&content_type) else {
        return;
    };

    let Ok(fields) = decode_fields(body.clone(), boundary).await else {
        return;
    };

    let new_boundary = format!("----ProKZeeBoundary{}", uuid::Uuid::new_v4().simple());
    let new_body = encode_fields(&fields, &new_boundary);
    let new_content_type = format!("multipart/form-data; boundary={new_boundary}");

    headers.remove(&key);
    headers.insert("Content-Type".to_string(), new_content_type);
    sync_content_length(headers, new_body.len());
    *body = new_body;
}

struct Field {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    data: Vec<u8>,
}

fn extract_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| param.trim().strip_prefix("boundary=").map(|b| b.trim_matches('"').to_string()))
}

async fn decode_fields(body: Vec<u8>, boundary: String) -> Result<Vec<Field>, multer::Error> {
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(HyperBytes::from(body)) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|m| m.to_string());
        let data = field.bytes().await?.to_vec();
        fields.push(Field { name, filename, content_type, data });
    }
    Ok(fields)
}

fn encode_fields(fields: &[Field], boundary: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for field in fields {
        out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", field.name);
        if let Some(filename) = &field.filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        out.extend_from_slice(disposition.as_bytes());
        out.extend_from_slice(b"\r\n");
        if let Some(content_type) = &field.content_type {
            out.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&field.data);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    out
}

fn sync_content_length(headers: &mut HashMap<String, String>, new_len: usize) {
    let key = headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("content-length")).map(|(k, _)| k.clone());
    if let Some(key) = key {
        headers.insert(key, new_len.to_string());
    } else {
        headers.insert("Content-Length".to_string(), new_len.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body(boundary: &str) -> Vec<u8> {
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"x.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--{boundary}--\r\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn reencodes_multipart_body_under_fresh_boundary_and_fixes_content_length() {
        let boundary = "origBoundary";
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            format!("multipart/form-data; boundary={boundary}"),
        );
        let mut body = sample_body(boundary);

        reencode_if_multipart(&mut headers, &mut body).await;

        let content_type = headers.get("Content-Type").unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));
        assert!(!content_type.contains(boundary));
        let text = String::from_utf8(body.clone()).unwrap();
        assert!(text.contains("name=\"a\""));
        assert!(text.contains("hello"));
        assert_eq!(headers.get("Content-Length").unwrap(), &body.len().to_string());
    }

    #[tokio::test]
    async fn non_multipart_content_type_is_left_untouched() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let mut body = b"{}".to_vec();
        let before = body.clone();
        reencode_if_multipart(&mut headers, &mut body).await;
        assert_eq!(body, before);
    }
}
