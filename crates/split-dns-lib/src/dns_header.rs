use anyhow::Context;

use crate::{ByteBuf, EncodeToBuf, FromBuf};

/// Size of an encoded header in bytes
pub const HEADER_SIZE: usize = 12;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum QueryOpcode {
    /// Standard query
    #[default]
    Query,
    /// Inverse query
    InverseQuery,
    /// Status request
    Status,
    Notify,
    Update,
    /// Reserved opcodes are kept as-is
    Reserved(#[cfg_attr(test, proptest(strategy = "6u8..=15"))] u8),
}

impl From<u8> for QueryOpcode {
    fn from(value: u8) -> Self {
        match value & 0xf {
            0 => QueryOpcode::Query,
            1 => QueryOpcode::InverseQuery,
            2 => QueryOpcode::Status,
            4 => QueryOpcode::Notify,
            5 => QueryOpcode::Update,
            other => QueryOpcode::Reserved(other),
        }
    }
}

impl From<QueryOpcode> for u8 {
    fn from(value: QueryOpcode) -> Self {
        match value {
            QueryOpcode::Query => 0,
            QueryOpcode::InverseQuery => 1,
            QueryOpcode::Status => 2,
            QueryOpcode::Notify => 4,
            QueryOpcode::Update => 5,
            QueryOpcode::Reserved(opcode) => opcode & 0xf,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ResponseCode {
    #[default]
    Success,
    /// Server was unable to interpret the query
    FormatError,
    /// Server was unable to process the query due to an internal error
    ServerFailure,
    /// Domain name referenced in the query doesn't exist
    NameError,
    /// Requested type of query is not supported by the server
    NotImplemented,
    /// Server refuses to complete the specified operation
    Refused,
    /// 6-15 codes
    Other(#[cfg_attr(test, proptest(strategy = "6u8..=15"))] u8),
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value & 0xf {
            0 => ResponseCode::Success,
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NameError,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            other => ResponseCode::Other(other),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(value: ResponseCode) -> Self {
        match value {
            ResponseCode::Success => 0,
            ResponseCode::FormatError => 1,
            ResponseCode::ServerFailure => 2,
            ResponseCode::NameError => 3,
            ResponseCode::NotImplemented => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Other(code) => code & 0xf,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Default, Clone)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct DnsHeader {
    /// Unique ID of this request.
    /// A query and its response **must have the same ID**.
    pub id: u16,
    /// Query/Response
    pub is_response: bool,
    /// Kind of query
    pub opcode: QueryOpcode,
    /// Set by the server. Indicates whether a server is authoritative
    pub is_authoritative: bool,
    /// Set if the message didn't fit into the transport's size limit
    pub truncation: bool,
    /// Set by the sender. Enables recursive resolution
    pub recursion_desired: bool,
    /// Set by the server. Indicates whether recursion is available
    pub recursion_available: bool,
    pub reserved: bool,
    pub authentic_data: bool,
    pub checking_disabled: bool,
    pub response_code: ResponseCode,
    pub question_count: u16,
    pub answer_rr_count: u16,
    pub authority_rr_count: u16,
    pub additional_rr_count: u16,
}

impl DnsHeader {
    pub fn get_flags(&self) -> u16 {
        let opcode: u8 = self.opcode.into();
        let rcode: u8 = self.response_code.into();

        (self.is_response as u16) << 15
            | (opcode as u16) << 11
            | (self.is_authoritative as u16) << 10
            | (self.truncation as u16) << 9
            | (self.recursion_desired as u16) << 8
            | (self.recursion_available as u16) << 7
            | (self.reserved as u16) << 6
            | (self.authentic_data as u16) << 5
            | (self.checking_disabled as u16) << 4
            | rcode as u16
    }

    fn set_flags(&mut self, flags: u16) {
        let bit = |n: u16| flags & (1 << n) != 0;

        self.is_response = bit(15);
        self.opcode = (((flags >> 11) & 0xf) as u8).into();
        self.is_authoritative = bit(10);
        self.truncation = bit(9);
        self.recursion_desired = bit(8);
        self.recursion_available = bit(7);
        self.reserved = bit(6);
        self.authentic_data = bit(5);
        self.checking_disabled = bit(4);
        self.response_code = ((flags & 0xf) as u8).into();
    }
}

impl FromBuf for DnsHeader {
    fn from_buf(buf: &mut ByteBuf<'_>) -> anyhow::Result<Self> {
        let mut header = DnsHeader {
            id: buf.read_u16().context("id is missing")?,
            ..Default::default()
        };
        header.set_flags(buf.read_u16().context("flags are missing")?);
        header.question_count = buf.read_u16().context("question count is missing")?;
        header.answer_rr_count = buf.read_u16().context("answer RR count is missing")?;
        header.authority_rr_count = buf.read_u16().context("authority RR count is missing")?;
        header.additional_rr_count = buf.read_u16().context("additional RR count is missing")?;

        Ok(header)
    }
}

impl EncodeToBuf for DnsHeader {
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()> {
        buf.write_u16(self.id);
        buf.write_u16(self.get_flags());
        buf.write_u16(self.question_count);
        buf.write_u16(self.answer_rr_count);
        buf.write_u16(self.authority_rr_count);
        buf.write_u16(self.additional_rr_count);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dns_header_parsing() {
        let stub_header: [u8; 12] = [0x0, 0xff, 0x95, 0xa4, 0x0, 0x6, 0x0, 0x7, 0x0, 0x8, 0x0, 0x9];
        let mut buf = ByteBuf::new(&stub_header);
        let header = DnsHeader::from_buf(&mut buf).expect("shouldn't have failed");

        assert_eq!(header.id, 255);
        assert!(header.is_response);
        assert_eq!(header.opcode, QueryOpcode::Status);
        assert!(header.is_authoritative);
        assert!(!header.truncation);
        assert!(header.recursion_desired);
        assert!(header.recursion_available);
        assert!(!header.reserved);
        assert!(header.authentic_data);
        assert!(!header.checking_disabled);
        assert_eq!(header.response_code, ResponseCode::NotImplemented);
        assert_eq!(header.question_count, 6);
        assert_eq!(header.answer_rr_count, 7);
        assert_eq!(header.authority_rr_count, 8);
        assert_eq!(header.additional_rr_count, 9);
        assert_eq!(buf.position(), HEADER_SIZE);
    }

    #[test]
    fn truncated_header() {
        let mut buf = ByteBuf::new(&[0x0, 0x1, 0x0]);
        let err = DnsHeader::from_buf(&mut buf).expect_err("should have failed");
        assert_eq!(err.to_string(), "flags are missing");
    }

    proptest! {
        #[test]
        fn dns_header_roundtrip(dns_header: DnsHeader) {
            let mut buf = ByteBuf::new_empty(None);
            dns_header.encode_to_buf(&mut buf).expect("shouldn't have failed");
            let roundtripped_header = DnsHeader::from_buf(&mut buf).expect("shouldn't have failed");
            prop_assert_eq!(dns_header, roundtripped_header, "DnsHeader roundtrip test failed");
        }
    }
}
