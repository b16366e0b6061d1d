use super::endian::*;
use super::error::{Error, Result};
use super::rawstruct::*;
use super::s11n::*;

use byteorder::{ByteOrder, NetworkEndian};
use bytes::BytesMut;
use enum_primitive::FromPrimitive;
use tokio_codec::{Decoder, Encoder};

use std::io::{self, Read, Write};
use std::mem::size_of;

pub const HEADER_LEN: usize = 8;

/// Largest name or value the name/value encoding can express.
pub const MAX_PARAM_LEN: usize = 0x7FFF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub struct FastcgiRecord {
    pub request_id: u16,
    pub body: FastcgiRecordBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FastcgiRecordBody {
    BeginRequest(BeginRequest),
    /// A chunk of the encoded name/value stream. Empty means "no more parameters".
    Params(BytesMut),
    Stdin(BytesMut),
    Stdout(BytesMut),
    Stderr(BytesMut),
    /// `None` if the application sent a truncated body.
    EndRequest(Option<EndRequest>),
    /// Any record type this client has no use for. Kept so it can be skipped intact.
    Other(u8, BytesMut),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeginRequest {
    pub role: Role,
    pub keep_connection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndRequest {
    pub app_status: u32,
    /// `None` for a status byte outside the known set.
    pub protocol_status: Option<ProtocolStatus>,
}

impl FastcgiRecordBody {
    pub fn record_type(&self) -> u8 {
        match *self {
            FastcgiRecordBody::BeginRequest(_) => RecordType::BeginRequest as u8,
            FastcgiRecordBody::Params(_) => RecordType::Params as u8,
            FastcgiRecordBody::Stdin(_) => RecordType::Stdin as u8,
            FastcgiRecordBody::Stdout(_) => RecordType::Stdout as u8,
            FastcgiRecordBody::Stderr(_) => RecordType::Stderr as u8,
            FastcgiRecordBody::EndRequest(_) => RecordType::EndRequest as u8,
            FastcgiRecordBody::Other(typ, _) => typ,
        }
    }
}

/// Number of zero bytes that follow `content_len` bytes of content so the record ends on an
/// 8-byte boundary.
pub fn padding_len(content_len: usize) -> u8 {
    ((8 - content_len % 8) % 8) as u8
}

fn invalid_data<T: Into<String>>(msg: T) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, Default)]
pub struct FastcgiLowlevelCodec;

impl FastcgiLowlevelCodec {
    /// How many bytes of content plus padding follow the given header bytes.
    pub fn body_len(header_bytes: &[u8]) -> Option<usize> {
        from_bytes::<FastcgiRecordHeader>(header_bytes).map(|header| {
            header.content_length.get() as usize + header.padding_length as usize
        })
    }
}

fn read_begin_request_body(buf: &[u8]) -> io::Result<BeginRequest> {
    let raw: BeginRequestBody = from_bytes(buf)
        .ok_or_else(|| invalid_data(format!("BeginRequest body too short: {} bytes", buf.len())))?;
    let role = match Role::from_u16(raw.role.get()) {
        Some(role) => role,
        None => {
            let msg = format!("unknown role {}", raw.role.get());
            error!("{}", msg);
            return Err(invalid_data(msg));
        }
    };
    Ok(BeginRequest {
        role,
        keep_connection: (raw.flags & FCGI_KEEP_CONN) == FCGI_KEEP_CONN,
    })
}

fn read_end_request_body(buf: &[u8]) -> Option<EndRequest> {
    let raw: EndRequestBody = from_bytes(buf)?;
    Some(EndRequest {
        app_status: raw.app_status.get(),
        protocol_status: ProtocolStatus::from_u8(raw.protocol_status),
    })
}

impl Decoder for FastcgiLowlevelCodec {
    type Item = FastcgiRecord;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<FastcgiRecord>> {
        let header: FastcgiRecordHeader = match from_bytes(&buf[..]) {
            Some(header) => header,
            None => {
                debug!("insufficient buffer for header");
                return Ok(None);
            }
        };

        if header.version != FASTCGI_VERSION {
            let msg = format!("unexpected FCGI version {}", header.version);
            error!("{}", msg);
            return Err(invalid_data(msg));
        }

        let content_len = header.content_length.get() as usize;
        let padding_len = header.padding_length as usize;
        if buf.len() < HEADER_LEN + content_len + padding_len {
            debug!("insufficient buffer for message");
            return Ok(None);
        }

        buf.split_to(HEADER_LEN);
        let content = buf.split_to(content_len);
        buf.split_to(padding_len);

        let request_id = header.request_id.get();
        let body = match RecordType::from_u8(header.record_type) {
            Some(RecordType::BeginRequest) => {
                // Clients never receive these; an unreadable one must not break the stream.
                let begin = read_begin_request_body(&content);
                match begin {
                    Ok(begin) => FastcgiRecordBody::BeginRequest(begin),
                    Err(e) => {
                        warn!("keeping unreadable BeginRequest as raw content: {}", e);
                        FastcgiRecordBody::Other(header.record_type, content)
                    },
                }
            },
            Some(RecordType::Params) => FastcgiRecordBody::Params(content),
            Some(RecordType::Stdin) => FastcgiRecordBody::Stdin(content),
            Some(RecordType::Stdout) => FastcgiRecordBody::Stdout(content),
            Some(RecordType::Stderr) => FastcgiRecordBody::Stderr(content),
            Some(RecordType::EndRequest) => {
                let end = read_end_request_body(&content);
                if end.is_none() {
                    warn!("EndRequest body too short: {} bytes", content_len);
                }
                FastcgiRecordBody::EndRequest(end)
            },
            Some(_) => FastcgiRecordBody::Other(header.record_type, content),
            None => {
                warn!("unknown record type {}", header.record_type);
                FastcgiRecordBody::Other(header.record_type, content)
            },
        };

        debug!("read record: request id {}, type {}, {} bytes of content",
               request_id, header.record_type, content_len);

        Ok(Some(FastcgiRecord {
            request_id,
            body,
        }))
    }
}

impl Encoder for FastcgiLowlevelCodec {
    type Item = FastcgiRecord;
    type Error = io::Error;

    fn encode(&mut self, msg: FastcgiRecord, buf: &mut BytesMut) -> io::Result<()> {
        let record_type = msg.body.record_type();
        let data: BytesMut = match msg.body {
            FastcgiRecordBody::BeginRequest(begin) => {
                let raw = BeginRequestBody {
                    role: NetworkU16::new(begin.role as u16),
                    flags: if begin.keep_connection { FCGI_KEEP_CONN } else { 0 },
                    reserved: [0u8; 5],
                };
                BytesMut::from(as_bytes(&raw))
            },
            FastcgiRecordBody::EndRequest(None) => BytesMut::new(),
            FastcgiRecordBody::EndRequest(Some(end)) => {
                let raw = EndRequestBody {
                    app_status: NetworkU32::new(end.app_status),
                    protocol_status: end.protocol_status
                        .unwrap_or(ProtocolStatus::RequestComplete) as u8,
                    reserved: [0u8; 3],
                };
                BytesMut::from(as_bytes(&raw))
            },
            FastcgiRecordBody::Params(data)
                | FastcgiRecordBody::Stdin(data)
                | FastcgiRecordBody::Stdout(data)
                | FastcgiRecordBody::Stderr(data)
                | FastcgiRecordBody::Other(_, data) => data,
        };

        if data.len() > MAX_CONTENT_LENGTH {
            let msg = format!("record type {} is too long: {}", record_type, data.len());
            error!("{}", msg);
            return Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
        }

        let padding = padding_len(data.len());
        let header = FastcgiRecordHeader {
            version: FASTCGI_VERSION,
            record_type,
            request_id: NetworkU16::new(msg.request_id),
            content_length: NetworkU16::new(data.len() as u16),
            padding_length: padding,
            reserved: 0,
        };
        buf.reserve(size_of::<FastcgiRecordHeader>() + data.len() + padding as usize);
        buf.extend_from_slice(as_bytes(&header));
        buf.extend_from_slice(&data);
        buf.extend_from_slice(&[0u8; 8][..padding as usize]);

        debug!("encoded record: request id {}, type {}, {} bytes of content",
               msg.request_id, record_type, data.len());
        Ok(())
    }
}

/// Frame one record and write it in full.
///
/// Every I/O failure comes back as `Error::PeerDisconnected`, whichever part of the record was
/// being written.
pub fn write_record<W: Write + ?Sized>(conn: &mut W, record: FastcgiRecord) -> Result<()> {
    let mut buf = BytesMut::new();
    FastcgiLowlevelCodec.encode(record, &mut buf)
        .map_err(|e| Error::Protocol(e.to_string()))?;
    conn.write_all(&buf).map_err(Error::PeerDisconnected)
}

/// Read exactly one record: the header, then its content and padding. Never reads past the end of
/// the record. The returned record has its padding stripped.
pub fn read_record<R: Read + ?Sized>(conn: &mut R) -> Result<FastcgiRecord> {
    let mut header = [0u8; HEADER_LEN];
    conn.read_exact(&mut header).map_err(Error::PeerDisconnected)?;
    let body_len = FastcgiLowlevelCodec::body_len(&header).unwrap_or(0);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
    buf.extend_from_slice(&header);
    if body_len > 0 {
        let mut body = vec![0u8; body_len];
        conn.read_exact(&mut body).map_err(Error::PeerDisconnected)?;
        buf.extend_from_slice(&body);
    }

    match FastcgiLowlevelCodec.decode(&mut buf) {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(Error::Protocol("incomplete record".to_owned())),
        Err(e) => Err(Error::Protocol(e.to_string())),
    }
}

fn read_len(buf: &mut BytesMut) -> io::Result<usize> {
    let first_byte = match buf.first() {
        Some(b) => *b,
        None => return Err(invalid_data("truncated name/value length")),
    };
    if first_byte < 0x80 {
        Ok(buf.split_to(1)[0] as usize)
    } else if buf.len() < 4 {
        Err(invalid_data("truncated 4-byte name/value length"))
    } else {
        Ok(NetworkEndian::read_u32(&buf.split_to(4)) as usize & MAX_PARAM_LEN)
    }
}

fn write_len(buf: &mut BytesMut, len: usize) -> io::Result<()> {
    if len < 0x80 {
        buf.extend_from_slice(&[len as u8]);
    } else if len <= MAX_PARAM_LEN {
        let mut bytes = [0u8; 4];
        NetworkEndian::write_u32(&mut bytes, len as u32 | 0x8000_0000);
        buf.extend_from_slice(&bytes);
    } else {
        let msg = format!("un-encodable name-value pair length: {:#x}", len);
        error!("{}", msg);
        return Err(io::Error::new(io::ErrorKind::InvalidInput, msg));
    }
    Ok(())
}

/// Append one name/value pair: name length, value length, name bytes, value bytes.
pub fn write_param(buf: &mut BytesMut, name: &[u8], value: &[u8]) -> io::Result<()> {
    write_len(buf, name.len())?;
    write_len(buf, value.len())?;
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(())
}

/// Decode a complete name/value stream.
pub fn read_params(buf: &mut BytesMut) -> io::Result<Vec<(BytesMut, BytesMut)>> {
    let mut params = vec![];
    while !buf.is_empty() {
        let name_len = read_len(buf)?;
        let value_len = read_len(buf)?;
        if buf.len() < name_len + value_len {
            return Err(invalid_data(format!(
                "name/value pair wants {} bytes, {} left", name_len + value_len, buf.len())));
        }
        let name = buf.split_to(name_len);
        let value = buf.split_to(value_len);
        debug!("param ({}, {})",
               String::from_utf8_lossy(&name),
               String::from_utf8_lossy(&value));
        params.push((name, value));
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn stdout(request_id: u16, data: &[u8]) -> FastcgiRecord {
        FastcgiRecord {
            request_id,
            body: FastcgiRecordBody::Stdout(BytesMut::from(data)),
        }
    }

    #[test]
    fn encode_header_and_padding() {
        let mut buf = BytesMut::new();
        FastcgiLowlevelCodec.encode(stdout(0x0102, b"hello"), &mut buf).unwrap();
        assert_eq!(&[1, 6, 1, 2, 0, 5, 3, 0][..], &buf[..8]);
        assert_eq!(b"hello", &buf[8..13]);
        assert_eq!(&[0, 0, 0][..], &buf[13..]);
    }

    #[test]
    fn begin_request_layout() {
        let mut buf = BytesMut::new();
        let record = FastcgiRecord {
            request_id: 7,
            body: FastcgiRecordBody::BeginRequest(BeginRequest {
                role: Role::Responder,
                keep_connection: true,
            }),
        };
        FastcgiLowlevelCodec.encode(record, &mut buf).unwrap();
        assert_eq!(&[1, 1, 0, 7, 0, 8, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0][..], &buf[..]);
    }

    #[test]
    fn oversized_content_rejected() {
        let mut buf = BytesMut::new();
        let big = vec![0u8; MAX_CONTENT_LENGTH + 1];
        let err = FastcgiLowlevelCodec.encode(stdout(1, &big), &mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, err.kind());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_padding() {
        let mut full = BytesMut::new();
        FastcgiLowlevelCodec.encode(stdout(3, b"abc"), &mut full).unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(None, FastcgiLowlevelCodec.decode(&mut partial).unwrap());
        assert_eq!(full.len() - 1, partial.len());

        let record = FastcgiLowlevelCodec.decode(&mut full).unwrap().unwrap();
        assert_eq!(stdout(3, b"abc"), record);
        assert!(full.is_empty());
    }

    #[test]
    fn decode_rejects_bad_version() {
        let mut buf = BytesMut::from(&[2u8, 6, 0, 1, 0, 0, 0, 0][..]);
        let err = FastcgiLowlevelCodec.decode(&mut buf).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
    }

    #[test]
    fn decode_end_request() {
        let mut buf = BytesMut::from(
            &[1u8, 3, 0, 9, 0, 8, 0, 0, 0, 0, 0, 42, 0, 0, 0, 0][..]);
        let record = FastcgiLowlevelCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(9, record.request_id);
        assert_eq!(FastcgiRecordBody::EndRequest(Some(EndRequest {
            app_status: 42,
            protocol_status: Some(ProtocolStatus::RequestComplete),
        })), record.body);

        let mut short = BytesMut::from(&[1u8, 3, 0, 9, 0, 0, 0, 0][..]);
        let record = FastcgiLowlevelCodec.decode(&mut short).unwrap().unwrap();
        assert_eq!(FastcgiRecordBody::EndRequest(None), record.body);
    }

    #[test]
    fn unknown_type_kept() {
        let mut buf = BytesMut::from(&[1u8, 42, 0, 1, 0, 1, 7, 0, 9, 0, 0, 0, 0, 0, 0, 0][..]);
        let record = FastcgiLowlevelCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(FastcgiRecordBody::Other(42, BytesMut::from(&[9u8][..])), record.body);
    }

    #[test]
    fn short_begin_request_kept_raw() {
        let mut conn = Cursor::new(vec![1u8, 1, 0, 9, 0, 3, 5, 0, 0, 1, 0, 0, 0, 0, 0, 0]);
        let record = read_record(&mut conn).unwrap();
        assert_eq!(9, record.request_id);
        assert_eq!(FastcgiRecordBody::Other(1, BytesMut::from(&[0u8, 1, 0][..])), record.body);
        assert_eq!(16, conn.position());
    }

    #[test]
    fn read_record_stops_at_boundary() {
        let mut wire = Vec::new();
        write_record(&mut wire, stdout(1, b"first")).unwrap();
        write_record(&mut wire, stdout(2, b"second!!")).unwrap();
        let mut conn = Cursor::new(wire);

        assert_eq!(stdout(1, b"first"), read_record(&mut conn).unwrap());
        assert_eq!(16, conn.position());
        assert_eq!(stdout(2, b"second!!"), read_record(&mut conn).unwrap());
        match read_record(&mut conn) {
            Err(Error::PeerDisconnected(_)) => (),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[test]
    fn short_read_is_disconnect() {
        let mut conn = Cursor::new(vec![1u8, 6, 0, 1, 0, 10, 6, 0, b'x', b'y']);
        match read_record(&mut conn) {
            Err(Error::PeerDisconnected(_)) => (),
            other => panic!("expected disconnect, got {:?}", other),
        }
    }

    #[test]
    fn length_prefix_widths() {
        let mut buf = BytesMut::new();
        write_param(&mut buf, b"A", &[b'x'; 127]).unwrap();
        assert_eq!(&[1, 127][..], &buf[..2]);

        let mut buf = BytesMut::new();
        write_param(&mut buf, b"A", &[b'x'; 128]).unwrap();
        assert_eq!(&[1, 0x80, 0, 0, 128][..], &buf[..5]);
    }

    #[test]
    fn truncated_params_rejected() {
        let mut buf = BytesMut::from(&[4u8, 4, b'N', b'A'][..]);
        assert!(read_params(&mut buf).is_err());
        let mut buf = BytesMut::from(&[0x80u8, 0][..]);
        assert!(read_params(&mut buf).is_err());
    }

    proptest! {
        #[test]
        fn padding_aligns(len in 0usize..=MAX_CONTENT_LENGTH) {
            let padding = padding_len(len) as usize;
            prop_assert!(padding <= 7);
            prop_assert_eq!(0, (len + padding) % 8);
        }

        #[test]
        fn params_round_trip(
            pairs in proptest::collection::vec(
                (proptest::collection::vec(any::<u8>(), 0..300),
                 proptest::collection::vec(any::<u8>(), 0..300)),
                0..8)
        ) {
            let mut buf = BytesMut::new();
            for &(ref name, ref value) in &pairs {
                write_param(&mut buf, name, value).unwrap();
            }
            let decoded: Vec<(Vec<u8>, Vec<u8>)> = read_params(&mut buf).unwrap()
                .into_iter()
                .map(|(n, v)| (n.to_vec(), v.to_vec()))
                .collect();
            prop_assert_eq!(pairs, decoded);
        }
    }

    #[test]
    fn padding_small_lengths() {
        for len in 0..=8 {
            let padding = padding_len(len) as usize;
            assert!(padding <= 7);
            assert_eq!(0, (len + padding) % 8);
        }
        assert_eq!(0, padding_len(0));
        assert_eq!(7, padding_len(1));
        assert_eq!(0, padding_len(8));
    }
}
