#[cfg(test)]
pub(crate) mod test_utils;

mod buf;
mod dns_header;
mod question;
mod resource_record;

pub use buf::{ByteBuf, EncodeToBuf, FromBuf};
pub use dns_header::{DnsHeader, QueryOpcode, ResponseCode, HEADER_SIZE};
pub use question::{QueryType, Question};
pub use resource_record::{ResourceData, ResourceRecord};

use anyhow::Context;

/// The Internet class
pub const IN_CLASS: u16 = 1;

#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl DnsPacket {
    pub fn new() -> Self {
        DnsPacket::default()
    }

    /// Creates an empty response to `query`: same ID, opcode and RD bit, with the questions copied.
    pub fn reply_to(query: &DnsPacket) -> Self {
        let mut response = DnsPacket::new();
        response.header.id = query.header.id;
        response.header.opcode = query.header.opcode;
        response.header.recursion_desired = query.header.recursion_desired;
        response.header.is_response = true;
        response.header.recursion_available = true;
        response.questions = query.questions.clone();
        response
    }

    pub fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        DnsPacket::from_buf(&mut ByteBuf::new(data))
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = ByteBuf::new_empty(None);
        self.encode_to_buf(&mut buf)?;
        Ok(buf.into_inner())
    }
}

fn read_records(buf: &mut ByteBuf<'_>, count: u16, section: &str) -> anyhow::Result<Vec<ResourceRecord>> {
    (0..count)
        .map(|idx| {
            ResourceRecord::from_buf(buf).with_context(|| format!("{} RR parsing error at idx {}", section, idx))
        })
        .collect()
}

fn write_records(buf: &mut ByteBuf<'_>, records: &[ResourceRecord], section: &str) -> anyhow::Result<()> {
    records.iter().enumerate().try_for_each(|(idx, rr)| {
        rr.encode_to_buf(buf)
            .with_context(|| format!("writing {} RR at idx {}", section, idx))
    })
}

fn section_count(len: usize, section: &str) -> anyhow::Result<u16> {
    u16::try_from(len).with_context(|| format!("too many entries in the {} section: {}", section, len))
}

impl FromBuf for DnsPacket {
    fn from_buf(buf: &mut ByteBuf<'_>) -> anyhow::Result<DnsPacket> {
        let header = DnsHeader::from_buf(buf).context("header parsing error")?;

        let questions = (0..header.question_count)
            .map(|idx| Question::from_buf(buf).with_context(|| format!("question parsing error at idx {}", idx)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let answers = read_records(buf, header.answer_rr_count, "answer")?;
        let authorities = read_records(buf, header.authority_rr_count, "authority")?;
        let additionals = read_records(buf, header.additional_rr_count, "additional")?;

        Ok(DnsPacket {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }
}

impl EncodeToBuf for DnsPacket {
    /// Section counts are taken from the sections themselves, not from the header.
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()> {
        let header = DnsHeader {
            question_count: section_count(self.questions.len(), "question")?,
            answer_rr_count: section_count(self.answers.len(), "answer")?,
            authority_rr_count: section_count(self.authorities.len(), "authority")?,
            additional_rr_count: section_count(self.additionals.len(), "additional")?,
            ..self.header.clone()
        };
        header.encode_to_buf(buf).context("writing header")?;

        self.questions.iter().enumerate().try_for_each(|(idx, question)| {
            question
                .encode_to_buf(buf)
                .with_context(|| format!("writing question at idx {}", idx))
        })?;
        write_records(buf, &self.answers, "answer")?;
        write_records(buf, &self.authorities, "authority")?;
        write_records(buf, &self.additionals, "additional")?;

        Ok(())
    }
}
