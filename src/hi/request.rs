use super::super::connection::{Connection, Deadline};
use super::super::error::{Error, Result};
use super::decoder::{ResponseDecoder, DEFAULT_MAX_STRAY_RECORDS};
use super::encoder::{resolve_content_length, RequestEncoder};
use super::response::Response;
use super::super::id::RequestIdAllocator;
use super::super::s11n::MAX_CONTENT_LENGTH;

use url::form_urlencoded;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::time::Duration;

/// CGI environment passed to the application. Iterates in name order.
pub type Params = BTreeMap<String, String>;

pub const DEFAULT_STDIN_CHUNK_SIZE: usize = 32 * 1024;

/// A request body: something to read from, and its length if known up front.
pub struct Body<'a> {
    reader: Box<dyn Read + 'a>,
    len: Option<u64>,
}

impl<'a> Body<'a> {
    pub fn new<R: Read + 'a>(reader: R, len: Option<u64>) -> Body<'a> {
        Body {
            reader: Box::new(reader),
            len,
        }
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }
}

impl<'a> Read for Body<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<'a> fmt::Debug for Body<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").field("len", &self.len).finish()
    }
}

/// One call to a FastCGI Responder.
///
/// The request id is allocated when the request is created. `call_on` consumes the request.
#[derive(Debug)]
pub struct Request<'a> {
    id: u16,
    keep_alive: bool,
    timeout: Option<Duration>,
    params: Params,
    body: Option<Body<'a>>,
    stdin_chunk_size: usize,
    max_stray_records: usize,
}

impl<'a> Request<'a> {
    pub fn new() -> Request<'a> {
        Request::with_allocator(RequestIdAllocator::shared())
    }

    pub fn with_allocator(ids: &RequestIdAllocator) -> Request<'a> {
        Request {
            id: ids.next_id(),
            keep_alive: false,
            timeout: None,
            params: Params::new(),
            body: None,
            stdin_chunk_size: DEFAULT_STDIN_CHUNK_SIZE,
            max_stray_records: DEFAULT_MAX_STRAY_RECORDS,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Ask the application to leave the connection open after this request.
    pub fn keep_alive(&mut self) {
        self.keep_alive = true;
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn set_params(&mut self, params: Params) {
        self.params = params;
    }

    pub fn set_param<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.params.insert(name.into(), value.into());
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// `len` may be `None` if the `CONTENT_LENGTH` param is set instead.
    pub fn set_body<R: Read + 'a>(&mut self, body: R, len: Option<u64>) {
        self.body = Some(Body::new(body, len));
    }

    pub fn set_body_bytes<B: Into<Vec<u8>>>(&mut self, body: B) {
        let body = body.into();
        let len = body.len() as u64;
        self.set_body(Cursor::new(body), Some(len));
    }

    /// Send `pairs` as an urlencoded POST form.
    pub fn set_form<I, K, V>(&mut self, pairs: I)
        where I: IntoIterator,
              I::Item: std::borrow::Borrow<(K, V)>,
              K: AsRef<str>,
              V: AsRef<str>,
    {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.set_param("REQUEST_METHOD", "POST");
        self.set_param("CONTENT_TYPE", "application/x-www-form-urlencoded");
        self.params.remove("CONTENT_LENGTH");
        self.set_body_bytes(encoded);
    }

    /// Body bytes per Stdin record; limited to what one record can hold.
    pub fn set_stdin_chunk_size(&mut self, size: usize) {
        self.stdin_chunk_size = size.max(1).min(MAX_CONTENT_LENGTH);
    }

    /// How many records for other request ids to skip before giving up on the connection.
    pub fn set_max_stray_records(&mut self, max: usize) {
        self.max_stray_records = max;
    }

    /// Send the request over `conn` and read back the response and the application's stderr.
    ///
    /// The connection is borrowed for the whole exchange and never closed. If the result is an
    /// error for which `Error::is_disconnect` is true, the connection must not be reused.
    pub fn call_on<C: Connection + ?Sized>(self, conn: &mut C) -> Result<(Response, Vec<u8>)> {
        let Request {
            id,
            keep_alive,
            timeout,
            mut params,
            mut body,
            stdin_chunk_size,
            max_stray_records,
        } = self;

        // Rejected before anything goes on the wire.
        resolve_content_length(&mut params, body.as_ref())?;

        info!("request {}: {} {}", id,
              params.get("REQUEST_METHOD").map(|s| s.as_str()).unwrap_or("GET"),
              params.get("SCRIPT_FILENAME").map(|s| s.as_str()).unwrap_or("<no SCRIPT_FILENAME>"));

        let mut conn = Deadline::new(conn, timeout);
        {
            let mut encoder = RequestEncoder::new(&mut conn, id);
            encoder.write_begin_request(keep_alive)?;
            encoder.write_params(&mut params, body.as_ref())?;
            encoder.write_stdin(body.as_mut(), stdin_chunk_size)?;
        }
        conn.flush().map_err(Error::PeerDisconnected)?;

        ResponseDecoder::new(id)
            .max_stray_records(max_stray_records)
            .read_from(&mut conn)
    }
}

impl<'a> Default for Request<'a> {
    fn default() -> Request<'a> {
        Request::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_from_injected_allocator() {
        let ids = RequestIdAllocator::new();
        assert_eq!(1, Request::with_allocator(&ids).id());
        assert_eq!(2, Request::with_allocator(&ids).id());
    }

    #[test]
    fn form_body() {
        let ids = RequestIdAllocator::new();
        let mut req = Request::with_allocator(&ids);
        req.set_param("CONTENT_LENGTH", "999");
        req.set_form(&[("name", "lu"), ("age", "20")]);

        assert_eq!("POST", req.params()["REQUEST_METHOD"]);
        assert_eq!("application/x-www-form-urlencoded", req.params()["CONTENT_TYPE"]);
        assert!(req.params().get("CONTENT_LENGTH").is_none());

        let body = req.body.as_mut().unwrap();
        assert_eq!(Some(14), body.len());
        let mut text = String::new();
        body.read_to_string(&mut text).unwrap();
        assert_eq!("name=lu&age=20", text);
    }

    #[test]
    fn chunk_size_clamped() {
        let ids = RequestIdAllocator::new();
        let mut req = Request::with_allocator(&ids);
        req.set_stdin_chunk_size(0);
        assert_eq!(1, req.stdin_chunk_size);
        req.set_stdin_chunk_size(1 << 20);
        assert_eq!(MAX_CONTENT_LENGTH, req.stdin_chunk_size);
    }
}
