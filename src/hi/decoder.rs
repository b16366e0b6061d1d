use super::super::error::{Error, Result};
use super::response::{parse_response, Response};
use super::super::lowlevel::{read_record, EndRequest, FastcgiRecord, FastcgiRecordBody};

use bytes::BytesMut;

use std::io::Read;

pub const DEFAULT_MAX_STRAY_RECORDS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Reading,
    Done,
}

/// Collects the records answering one request until its EndRequest arrives.
///
/// Stdout and Stderr content is accumulated separately. Records for other request ids are skipped,
/// up to a limit.
#[derive(Debug)]
pub struct ResponseDecoder {
    request_id: u16,
    state: State,
    stdout: BytesMut,
    stderr: BytesMut,
    end_request: Option<EndRequest>,
    stray_records: usize,
    max_stray_records: usize,
}

impl ResponseDecoder {
    pub fn new(request_id: u16) -> ResponseDecoder {
        ResponseDecoder {
            request_id,
            state: State::Reading,
            stdout: BytesMut::new(),
            stderr: BytesMut::new(),
            end_request: None,
            stray_records: 0,
            max_stray_records: DEFAULT_MAX_STRAY_RECORDS,
        }
    }

    pub fn max_stray_records(mut self, max: usize) -> ResponseDecoder {
        self.max_stray_records = max;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Take one record. Returns the state after it.
    pub fn feed(&mut self, record: FastcgiRecord) -> Result<State> {
        if self.state == State::Done {
            debug!("request {}: ignoring record after EndRequest", self.request_id);
            return Ok(self.state);
        }

        if record.request_id != self.request_id {
            self.stray_records += 1;
            debug!("request {}: discarding record type {} for request {}",
                   self.request_id, record.body.record_type(), record.request_id);
            if self.stray_records > self.max_stray_records {
                let msg = format!("more than {} records for other requests", self.max_stray_records);
                error!("request {}: {}", self.request_id, msg);
                return Err(Error::Protocol(msg));
            }
            return Ok(self.state);
        }

        match record.body {
            FastcgiRecordBody::Stdout(data) => self.stdout.extend_from_slice(&data),
            FastcgiRecordBody::Stderr(data) => self.stderr.extend_from_slice(&data),
            FastcgiRecordBody::EndRequest(end) => {
                debug!("request {}: EndRequest {:?}", self.request_id, end);
                self.end_request = end;
                self.state = State::Done;
            },
            other => {
                debug!("request {}: ignoring record type {}", self.request_id, other.record_type());
            },
        }
        Ok(self.state)
    }

    /// Read records from the connection until this request's EndRequest, then build the response.
    pub fn read_from<R: Read + ?Sized>(mut self, conn: &mut R) -> Result<(Response, Vec<u8>)> {
        while self.state == State::Reading {
            let record = read_record(conn)?;
            self.feed(record)?;
        }
        self.finish()
    }

    /// Turn what was collected into the response and the stderr bytes.
    pub fn finish(self) -> Result<(Response, Vec<u8>)> {
        let stderr = self.stderr.to_vec();
        if self.stdout.is_empty() {
            if stderr.is_empty() {
                error!("request {}: no output from application", self.request_id);
                return Err(Error::NoResponse);
            }
            return Err(Error::Backend(String::from_utf8_lossy(&stderr).into_owned()));
        }

        let mut response = parse_response(&self.stdout).map_err(|e| e.with_stderr(&stderr))?;
        response.set_end_request(self.end_request);
        if !stderr.is_empty() {
            warn!("request {}: application stderr: {}",
                  self.request_id, String::from_utf8_lossy(&stderr));
        }
        Ok((response, stderr))
    }
}

/// Read the response to `request_id` from `conn`.
pub fn read_response<R: Read + ?Sized>(conn: &mut R, request_id: u16)
    -> Result<(Response, Vec<u8>)>
{
    ResponseDecoder::new(request_id).read_from(conn)
}
