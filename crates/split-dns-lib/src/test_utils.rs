use std::net::{Ipv4Addr, Ipv6Addr};

use prop::strategy::Union;
use proptest::collection::vec;
use proptest::prelude::*;

use crate::{QueryType, Question, ResourceData, ResourceRecord};

prop_compose! {
    pub fn arb_question()(qname in arb_qname(), qtype: u16, qclass: u16) -> Question {
        Question { qname, query_type: QueryType::from(qtype), qclass }
    }
}

prop_compose! {
    pub fn arb_resource_record()(name in arb_qname(), resource_data in arb_resource_data(), class: u16, ttl: u32) -> ResourceRecord {
        ResourceRecord { name, class, ttl, resource_data }
    }
}

pub fn arb_resource_data() -> impl Strategy<Value = ResourceData> {
    let variants = vec![
        // Private use range, so that the type never collides with an interpreted one
        (65280..=65534u16, vec(any::<u8>(), 0..100))
            .prop_map(|(qtype, rdata)| ResourceData::UNKNOWN { qtype, rdata })
            .boxed(),
        any::<Ipv4Addr>().prop_map(|address| ResourceData::A { address }).boxed(),
        any::<Ipv6Addr>().prop_map(|address| ResourceData::AAAA { address }).boxed(),
        arb_qname().prop_map(|cname| ResourceData::CNAME { cname }).boxed(),
    ];

    Union::new(variants)
}

pub fn arb_qname() -> impl Strategy<Value = String> {
    proptest::string::string_regex(r"(([a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?\.){1,4}[a-z]{2,10})|")
        .expect("regex should be valid")
}
