use anyhow::Context;

use crate::{ByteBuf, EncodeToBuf, FromBuf, IN_CLASS};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum QueryType {
    UNKNOWN(u16),
    A,
    NS,
    CNAME,
    AAAA,
    OPT,
    ANY,
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            28 => QueryType::AAAA,
            41 => QueryType::OPT,
            255 => QueryType::ANY,
            _ => QueryType::UNKNOWN(value),
        }
    }
}

impl From<QueryType> for u16 {
    fn from(val: QueryType) -> Self {
        match val {
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::AAAA => 28,
            QueryType::OPT => 41,
            QueryType::ANY => 255,
            QueryType::UNKNOWN(qtype) => qtype,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Question {
    /// Name as it appeared on the wire, without the trailing root dot
    pub qname: String,
    pub query_type: QueryType,
    pub qclass: u16,
}

impl Question {
    pub fn new(qname: impl Into<String>, query_type: QueryType) -> Self {
        Question {
            qname: qname.into(),
            query_type,
            qclass: IN_CLASS,
        }
    }
}

impl FromBuf for Question {
    fn from_buf(buf: &mut ByteBuf<'_>) -> anyhow::Result<Question> {
        let qname = buf.read_qname().context("QNAME is missing")?;
        let query_type = buf.read_u16().context("QTYPE is missing")?.into();
        let qclass = buf.read_u16().context("QCLASS is missing")?;

        Ok(Question {
            qname,
            query_type,
            qclass,
        })
    }
}

impl EncodeToBuf for Question {
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()> {
        buf.write_qname(&self.qname).context("writing QNAME")?;
        buf.write_u16(self.query_type.into());
        buf.write_u16(self.qclass);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_conversion() {
        assert_eq!(QueryType::from(28), QueryType::AAAA);
        assert_eq!(QueryType::from(16), QueryType::UNKNOWN(16));
        assert_eq!(u16::from(QueryType::UNKNOWN(16)), 16);
        assert_eq!(u16::from(QueryType::A), 1);
    }

    #[test]
    fn parse_question() {
        let data: [u8; 17] = [
            0x7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0x3, b'o', b'r', b'g', 0x0, 0x0, 0x1c, 0x0, 0x1,
        ];
        let mut buf = ByteBuf::new(&data);
        let question = Question::from_buf(&mut buf).expect("shouldn't have failed");
        assert_eq!(question, Question::new("example.org", QueryType::AAAA));
    }
}
