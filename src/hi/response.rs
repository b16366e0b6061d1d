use super::super::error::{Error, Result};
use super::super::lowlevel::EndRequest;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use http::{StatusCode, Version};
use once_cell::sync::Lazy;
use regex::Regex;
use regex::bytes::Regex as BytesRegex;

use std::io::Read;

const MAX_HEADERS: usize = 100;

/// Prepended to CGI output that doesn't start with a status line.
const DEFAULT_STATUS_LINE: &[u8] = b"HTTP/1.0 200 OK\r\n";

static STATUS_LINE: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"^HTTP/[.\d]+ \d+").expect("status line pattern")
});

static STATUS_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)(?:\s|$)").expect("Status header pattern")
});

/// An HTTP response recovered from an application's stdout.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: StatusCode,
    status_line: String,
    headers: HeaderMap,
    body: Bytes,
    end_request: Option<EndRequest>,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status code and reason, e.g. "404 Not Found", as the application wrote them.
    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_reader(&self) -> impl Read + '_ {
        &self.body[..]
    }

    /// The application's exit status, if the EndRequest record carried one.
    pub fn end_request(&self) -> Option<&EndRequest> {
        self.end_request.as_ref()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }

    pub(crate) fn set_end_request(&mut self, end_request: Option<EndRequest>) {
        self.end_request = end_request;
    }
}

fn first_line(stdout: &[u8]) -> &[u8] {
    match stdout.iter().position(|&b| b == b'\n' || b == b'\r') {
        Some(end) => &stdout[..end],
        None => stdout,
    }
}

/// Parse the complete stdout stream of a Responder into an HTTP response.
///
/// Output that starts with an HTTP status line is parsed as is. Anything else is CGI output: it
/// gets a `HTTP/1.0 200 OK` status line, and a `Status` header, if present, then sets the status.
pub fn parse_response(stdout: &[u8]) -> Result<Response> {
    if STATUS_LINE.is_match(first_line(stdout)) {
        parse_http(stdout)
    } else {
        let mut message = Vec::with_capacity(DEFAULT_STATUS_LINE.len() + stdout.len());
        message.extend_from_slice(DEFAULT_STATUS_LINE);
        message.extend_from_slice(stdout);
        let mut response = parse_http(&message)?;
        apply_status_header(&mut response);
        Ok(response)
    }
}

fn apply_status_header(response: &mut Response) {
    let status = match response.headers.get("Status").and_then(|v| v.to_str().ok()) {
        Some(status) => status.trim().to_owned(),
        None => return,
    };
    let code = match STATUS_HEADER.captures(&status) {
        Some(caps) => caps[1].parse::<u16>().ok(),
        None => {
            debug!("ignoring Status header {:?}", status);
            return;
        }
    };
    response.status = code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    response.status_line = status;
}

fn parse_http(message: &[u8]) -> Result<Response> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(message) {
        Err(httparse::Error::TooManyHeaders) => {
            // No header can be shorter than a line.
            let lines = message.iter().filter(|&&b| b == b'\n').count();
            debug!("more than {} headers, parsing again with room for {}", MAX_HEADERS, lines);
            let mut headers = vec![httparse::EMPTY_HEADER; lines];
            let mut parsed = httparse::Response::new(&mut headers);
            let status = parsed.parse(message);
            build_response(message, &parsed, status)
        },
        status => build_response(message, &parsed, status),
    }
}

fn build_response(
    message: &[u8],
    parsed: &httparse::Response<'_, '_>,
    status: httparse::Result<usize>,
) -> Result<Response> {
    let body_start = match status {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            return Err(Error::malformed("header section is not terminated"));
        },
        Err(e) => return Err(Error::malformed(format!("invalid HTTP message: {}", e))),
    };

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let code = parsed.code.unwrap_or(200);
    let status = StatusCode::from_u16(code)
        .map_err(|_| Error::malformed(format!("invalid status code {}", code)))?;
    let status_line = match parsed.reason {
        Some(reason) if !reason.is_empty() => format!("{} {}", code, reason),
        _ => code.to_string(),
    };

    let mut header_map = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| Error::malformed(format!("invalid header name {:?}", header.name)))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| Error::malformed(format!("invalid value for header {}", header.name)))?;
        header_map.append(name, value);
    }

    let mut body = &message[body_start..];
    if let Some(len) = header_map.get(CONTENT_LENGTH) {
        let len = len.to_str().ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| Error::malformed("invalid Content-Length"))?;
        if len > body.len() {
            return Err(Error::malformed(format!(
                "Content-Length is {} but only {} body bytes were sent", len, body.len())));
        }
        body = &body[..len];
    }

    Ok(Response {
        version,
        status,
        status_line,
        headers: header_map,
        body: Bytes::from(body),
        end_request: None,
    })
}
