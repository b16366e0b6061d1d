//! These types prevent accidentally interpreting a network byte order integer as host byte order.

use byteorder::{ByteOrder, NetworkEndian};

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkU16 {
    data: [u8; 2],
}

impl NetworkU16 {
    pub fn new(input: u16) -> NetworkU16 {
        let mut data = [0u8; 2];
        NetworkEndian::write_u16(&mut data, input);
        NetworkU16 { data }
    }

    pub fn get(&self) -> u16 {
        NetworkEndian::read_u16(&self.data)
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkU32 {
    data: [u8; 4],
}

impl NetworkU32 {
    pub fn new(input: u32) -> NetworkU32 {
        let mut data = [0u8; 4];
        NetworkEndian::write_u32(&mut data, input);
        NetworkU32 { data }
    }

    pub fn get(&self) -> u32 {
        NetworkEndian::read_u32(&self.data)
    }
}
