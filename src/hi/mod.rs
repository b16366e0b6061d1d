//! Request/response level: one call is BeginRequest, Params and Stdin out, then Stdout and Stderr
//! in until EndRequest.

pub mod decoder;
pub mod encoder;
pub mod request;
pub mod response;
