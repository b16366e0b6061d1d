//! Client side of FastCGI: send a Responder request to an application (e.g. PHP-FPM) over an
//! already-connected stream and read back the HTTP response it produces.

extern crate byteorder;
extern crate bytes;
#[macro_use] extern crate enum_primitive;
extern crate http;
extern crate httparse;
#[macro_use] extern crate log;
extern crate once_cell;
extern crate parking_lot;
extern crate regex;
extern crate thiserror;
extern crate tokio_codec;
extern crate url;

mod connection;
mod endian;
mod error;
mod hi;
mod id;
mod lowlevel;
mod rawstruct;
mod s11n;

pub use connection::{Connection, Deadline};
pub use error::{Error, Result};
pub use hi::decoder::{read_response, ResponseDecoder, State};
pub use hi::encoder::{resolve_content_length, RequestEncoder};
pub use hi::request::{Body, Params, Request};
pub use hi::response::{parse_response, Response};
pub use id::RequestIdAllocator;
pub use lowlevel::{padding_len, read_params, read_record, write_param, write_record,
                   BeginRequest, EndRequest, FastcgiLowlevelCodec, FastcgiRecord,
                   FastcgiRecordBody};
pub use s11n::{ProtocolStatus, RecordType, Role, FASTCGI_VERSION, MAX_CONTENT_LENGTH};
