//! s11n == serialization. Structs that match the bytes that make up FastCGI messages.

use super::endian::*;
use super::rawstruct::RawStruct;

pub const FASTCGI_VERSION: u8 = 1;

/// Flag in `BeginRequestBody::flags` asking the application to leave the connection open.
pub const FCGI_KEEP_CONN: u8 = 1;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LENGTH: usize = 0xFFFF;

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum RecordType {
        BeginRequest = 1,
        AbortRequest = 2,
        EndRequest = 3,
        Params = 4,
        Stdin = 5,
        Stdout = 6,
        Stderr = 7,
        Data = 8,
        GetValues = 9,
        GetValuesResult = 10,
        UnknownType = 11
    }
}

enum_from_primitive! {
    #[repr(u16)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Role {
        Responder = 1,
        Authorizer = 2,
        Filter = 3
    }
}

enum_from_primitive! {
    #[repr(u8)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ProtocolStatus {
        RequestComplete = 0,
        CantMultiplexConnections = 1,
        Overloaded = 2,
        UnknownRole = 3
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct FastcgiRecordHeader {
    pub version: u8,
    pub record_type: u8,
    pub request_id: NetworkU16,
    pub content_length: NetworkU16,
    pub padding_length: u8,
    pub reserved: u8,
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BeginRequestBody {
    pub role: NetworkU16,
    pub flags: u8,
    pub reserved: [u8; 5],
}

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct EndRequestBody {
    pub app_status: NetworkU32,
    pub protocol_status: u8,
    pub reserved: [u8; 3],
}

unsafe impl RawStruct for FastcgiRecordHeader {}
unsafe impl RawStruct for BeginRequestBody {}
unsafe impl RawStruct for EndRequestBody {}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::rawstruct::{as_bytes, from_bytes};
    use enum_primitive::FromPrimitive;
    use std::mem::{align_of, size_of};

    #[test]
    fn layout_sizes() {
        assert_eq!(8, size_of::<FastcgiRecordHeader>());
        assert_eq!(8, size_of::<BeginRequestBody>());
        assert_eq!(8, size_of::<EndRequestBody>());
        assert_eq!(1, align_of::<FastcgiRecordHeader>());
    }

    #[test]
    fn header_bytes() {
        let header = FastcgiRecordHeader {
            version: FASTCGI_VERSION,
            record_type: RecordType::Stdin as u8,
            request_id: NetworkU16::new(0x0102),
            content_length: NetworkU16::new(0x0304),
            padding_length: 4,
            reserved: 0,
        };
        assert_eq!(&[1, 5, 1, 2, 3, 4, 4, 0][..], as_bytes(&header));

        let back: FastcgiRecordHeader = from_bytes(as_bytes(&header)).unwrap();
        assert_eq!(0x0102, back.request_id.get());
        assert_eq!(0x0304, back.content_length.get());
        assert!(from_bytes::<FastcgiRecordHeader>(&[1, 2, 3]).is_none());
    }

    #[test]
    fn enum_conversions() {
        assert_eq!(Some(RecordType::EndRequest), RecordType::from_u8(3));
        assert_eq!(None, RecordType::from_u8(12));
        assert_eq!(Some(Role::Responder), Role::from_u16(1));
        assert_eq!(Some(ProtocolStatus::Overloaded), ProtocolStatus::from_u8(2));
    }
}
