use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::Context;

use crate::{ByteBuf, EncodeToBuf, FromBuf, QueryType, IN_CLASS};

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ResourceRecord {
    pub name: String,
    pub class: u16,
    pub ttl: u32,
    pub resource_data: ResourceData,
}

impl ResourceRecord {
    pub fn new(name: impl Into<String>, resource_data: ResourceData, ttl: u32) -> Self {
        ResourceRecord {
            name: name.into(),
            class: IN_CLASS,
            ttl,
            resource_data,
        }
    }
}

impl FromBuf for ResourceRecord {
    fn from_buf(buf: &mut ByteBuf<'_>) -> anyhow::Result<ResourceRecord> {
        let name = buf.read_qname().context("NAME is missing")?;
        let query_type: QueryType = buf.read_u16().context("TYPE is missing")?.into();
        let class = buf.read_u16().context("CLASS is missing")?;
        let ttl = buf.read_u32().context("TTL is missing")?;
        let resource_data = ResourceData::from_buf_with_type(buf, query_type).context("can't decode RDATA")?;

        Ok(ResourceRecord {
            name,
            class,
            ttl,
            resource_data,
        })
    }
}

impl EncodeToBuf for ResourceRecord {
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()> {
        buf.write_qname(&self.name).context("writing NAME")?;
        buf.write_u16(self.resource_data.get_query_type().into());
        buf.write_u16(self.class);
        buf.write_u32(self.ttl);

        self.resource_data.encode_to_buf(buf).context("writing RDATA")
    }
}

/// RDATA of a resource record.
///
/// Only the address records and CNAME are interpreted. Everything else is carried as opaque
/// bytes, which means that names compressed inside such RDATA are only meaningful within the
/// message they were read from.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ResourceData {
    UNKNOWN { qtype: u16, rdata: Vec<u8> },
    A { address: Ipv4Addr },
    CNAME { cname: String },
    AAAA { address: Ipv6Addr },
}

impl ResourceData {
    pub fn from_buf_with_type(buf: &mut ByteBuf<'_>, query_type: QueryType) -> anyhow::Result<ResourceData> {
        let rd_length = buf.read_u16().context("RDLENGTH is missing")? as usize;
        let rdata_start = buf.position();

        Ok(match query_type {
            QueryType::A => {
                if rd_length != 4 {
                    anyhow::bail!("A record: unexpected RDLENGTH {}", rd_length);
                }
                let address = buf.read_array::<4>().context("A record: ADDRESS is missing")?;
                ResourceData::A {
                    address: Ipv4Addr::from(address),
                }
            }
            QueryType::AAAA => {
                if rd_length != 16 {
                    anyhow::bail!("AAAA record: unexpected RDLENGTH {}", rd_length);
                }
                let address = buf.read_array::<16>().context("AAAA record: ADDRESS is missing")?;
                ResourceData::AAAA {
                    address: Ipv6Addr::from(address),
                }
            }
            QueryType::CNAME => {
                let cname = buf.read_qname().context("CNAME record: CNAME is missing")?;
                // Skip to the end of RDATA regardless of how the name was encoded
                buf.set_position(rdata_start + rd_length)
                    .context("CNAME record: RDLENGTH exceeds the message")?;
                ResourceData::CNAME { cname }
            }
            other => {
                let rdata = buf
                    .read_bytes(rd_length)
                    .with_context(|| format!("{:?} record: RDATA is missing", other))?;
                ResourceData::UNKNOWN {
                    qtype: other.into(),
                    rdata: rdata.to_vec(),
                }
            }
        })
    }

    pub fn get_query_type(&self) -> QueryType {
        match self {
            ResourceData::UNKNOWN { qtype, .. } => QueryType::from(*qtype),
            ResourceData::A { .. } => QueryType::A,
            ResourceData::CNAME { .. } => QueryType::CNAME,
            ResourceData::AAAA { .. } => QueryType::AAAA,
        }
    }
}

impl EncodeToBuf for ResourceData {
    fn encode_to_buf(&self, buf: &mut ByteBuf<'_>) -> anyhow::Result<()> {
        match self {
            ResourceData::UNKNOWN { rdata, .. } => {
                let rd_length = u16::try_from(rdata.len()).context("RDATA is too long")?;
                buf.write_u16(rd_length);
                buf.write_bytes(rdata);
            }
            ResourceData::A { address } => {
                buf.write_u16(4);
                buf.write_bytes(&address.octets());
            }
            ResourceData::AAAA { address } => {
                buf.write_u16(16);
                buf.write_bytes(&address.octets());
            }
            ResourceData::CNAME { cname } => {
                let rdata_pos = buf.len();
                // The encoded size is only known after writing the name
                buf.write_u16(0);
                buf.write_qname(cname).context("CNAME record: writing CNAME")?;
                let rd_length = buf.len() - rdata_pos - 2;
                buf.set_u16(rdata_pos, rd_length as u16)
                    .context("CNAME record: writing RDLENGTH")?;
            }
        };

        Ok(())
    }
}
