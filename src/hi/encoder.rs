use super::super::error::{Error, Result};
use super::request::{Body, Params};
use super::super::lowlevel::{write_param, write_record, BeginRequest, FastcgiRecord, FastcgiRecordBody};
use super::super::s11n::{Role, MAX_CONTENT_LENGTH};

use bytes::BytesMut;
use once_cell::sync::Lazy;
use regex::Regex;

use std::io::{ErrorKind, Read, Write};

pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";

static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("numeric pattern"));

/// Make sure a request with a body declares its length.
///
/// A numeric `CONTENT_LENGTH` param is kept if it agrees with the body's known length. Without one,
/// it is filled in from the known length; if the length isn't known either, the request is
/// rejected.
pub fn resolve_content_length(params: &mut Params, body: Option<&Body<'_>>) -> Result<()> {
    let body = match body {
        Some(body) => body,
        None => return Ok(()),
    };

    let declared = params.get(CONTENT_LENGTH)
        .filter(|value| NUMERIC.is_match(value))
        .map(|value| value.parse::<u64>().ok());

    match (declared, body.len()) {
        (Some(declared), Some(len)) => {
            if declared != Some(len) {
                return Err(Error::Config(format!(
                    "CONTENT_LENGTH is {} but the body is {} bytes",
                    params[CONTENT_LENGTH], len)));
            }
        },
        (Some(_), None) => (),
        (None, Some(len)) => {
            params.insert(CONTENT_LENGTH.to_owned(), len.to_string());
        },
        (None, None) => {
            return Err(Error::Config(
                "CONTENT_LENGTH must be set for a body of unknown length".to_owned()));
        },
    }
    Ok(())
}

/// Writes the records of one request to a connection, in order: BeginRequest, Params, Stdin.
///
/// Any write failure is `Error::PeerDisconnected`; records already written stay written, and the
/// connection should be thrown away.
pub struct RequestEncoder<'a, W: Write + ?Sized> {
    conn: &'a mut W,
    request_id: u16,
}

impl<'a, W: Write + ?Sized> RequestEncoder<'a, W> {
    pub fn new(conn: &'a mut W, request_id: u16) -> RequestEncoder<'a, W> {
        RequestEncoder {
            conn,
            request_id,
        }
    }

    fn write(&mut self, body: FastcgiRecordBody) -> Result<()> {
        write_record(self.conn, FastcgiRecord {
            request_id: self.request_id,
            body,
        })
    }

    pub fn write_begin_request(&mut self, keep_alive: bool) -> Result<()> {
        debug!("request {}: BeginRequest keep_alive={}", self.request_id, keep_alive);
        self.write(FastcgiRecordBody::BeginRequest(BeginRequest {
            role: Role::Responder,
            keep_connection: keep_alive,
        }))
    }

    /// One Params record per parameter (several, if a single pair is too big for one), then the
    /// empty Params record.
    pub fn write_params(&mut self, params: &mut Params, body: Option<&Body<'_>>) -> Result<()> {
        resolve_content_length(params, body)?;

        for (name, value) in params.iter() {
            let mut pair = BytesMut::new();
            write_param(&mut pair, name.as_bytes(), value.as_bytes())
                .map_err(|e| Error::Config(format!("param {}: {}", name, e)))?;
            while !pair.is_empty() {
                let n = pair.len().min(MAX_CONTENT_LENGTH);
                self.write(FastcgiRecordBody::Params(pair.split_to(n)))?;
            }
        }

        debug!("request {}: wrote {} params", self.request_id, params.len());
        self.write(FastcgiRecordBody::Params(BytesMut::new()))
    }

    /// Copy the body, if any, into Stdin records of at most `chunk_size` bytes, then write the
    /// empty Stdin record. Returns the number of body bytes sent.
    pub fn write_stdin(&mut self, body: Option<&mut Body<'_>>, chunk_size: usize) -> Result<u64> {
        let mut sent = 0u64;
        if let Some(body) = body {
            let mut chunk = vec![0u8; chunk_size.max(1).min(MAX_CONTENT_LENGTH)];
            loop {
                let n = match body.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        error!("request {}: reading body: {}", self.request_id, e);
                        return Err(Error::Body(e));
                    },
                };
                self.write(FastcgiRecordBody::Stdin(BytesMut::from(&chunk[..n])))?;
                sent += n as u64;
            }

            if let Some(len) = body.len() {
                if len != sent {
                    warn!("request {}: body declared {} bytes but produced {}",
                          self.request_id, len, sent);
                }
            }
        }

        debug!("request {}: wrote {} bytes of stdin", self.request_id, sent);
        self.write(FastcgiRecordBody::Stdin(BytesMut::new()))?;
        Ok(sent)
    }
}
