//! mDNS/DNS-SD message codec: name compression, the two-pass
//! size-then-serialize builder, and the parser.
//!
//! Grounded in `cwMdns.cpp`'s `calc_msg_buf_byte_count` /
//! `format_*_rsrc` / `parse_*_recd` family. The builder here never emits
//! compression pointers (every name is written out in full), which keeps
//! serialization a single straightforward pass; the parser still follows
//! pointers on the way in, since a response may need to decode a message
//! this responder didn't itself construct.

use std::net::Ipv4Addr;

use crate::error::{Result, RtError};

pub const DNS_A: u16 = 1;
pub const DNS_PTR: u16 = 12;
pub const DNS_TXT: u16 = 16;
pub const DNS_SRV: u16 = 33;
pub const DNS_OPT: u16 = 41;
pub const DNS_NSEC: u16 = 47;
pub const DNS_ANY: u16 = 255;

const HDR_BYTES: usize = 12;
const QUESTION_BODY_BYTES: usize = 4;
const RSRC_BODY_BYTES: usize = 10;
const A_BODY_BYTES: usize = 4;
const SRV_BODY_BYTES: usize = 6;

const FLUSH_CLASS: u16 = 0x8000;
const IN_CLASS: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    Ptr(String),
    Txt(Vec<String>),
    Srv { priority: u16, weight: u16, port: u16, target: String },
    Opt(Vec<u8>),
    Nsec(Vec<u8>),
}

impl RData {
    pub fn type_id(&self) -> u16 {
        match self {
            RData::A(_) => DNS_A,
            RData::Ptr(_) => DNS_PTR,
            RData::Txt(_) => DNS_TXT,
            RData::Srv { .. } => DNS_SRV,
            RData::Opt(_) => DNS_OPT,
            RData::Nsec(_) => DNS_NSEC,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub name: String,
    pub dns_type: u16,
    pub class: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    pub class: u16,
    pub ttl: u32,
    pub rdata: RData,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub transaction_id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub name_servers: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Message {
    pub fn reply(transaction_id: u16) -> Self {
        Self {
            transaction_id,
            flags: 0x8400, // reply + authoritative, matching kReplyHdrFl|kAuthoritativeHdrFl
            ..Default::default()
        }
    }

    fn name_wire_len(name: &str) -> usize {
        if name.is_empty() {
            1
        } else {
            name.split('.').map(|l| l.len() + 1).sum::<usize>() + 1
        }
    }

    fn rdata_len(rdata: &RData) -> usize {
        match rdata {
            RData::A(_) => A_BODY_BYTES,
            RData::Ptr(target) => Self::name_wire_len(target),
            RData::Txt(fields) => fields.iter().map(|f| f.len() + 1).sum(),
            RData::Srv { target, .. } => SRV_BODY_BYTES + Self::name_wire_len(target),
            RData::Opt(data) | RData::Nsec(data) => data.len(),
        }
    }

    /// `calc_msg_buf_byte_count`: sum the header, then every
    /// question/record's name plus its type-specific body.
    pub fn computed_size(&self) -> usize {
        let mut n = HDR_BYTES;
        for q in &self.questions {
            n += Self::name_wire_len(&q.name) + QUESTION_BODY_BYTES;
        }
        for r in self.answers.iter().chain(&self.name_servers).chain(&self.additionals) {
            n += Self::name_wire_len(&r.name) + RSRC_BODY_BYTES + Self::rdata_len(&r.rdata);
        }
        n
    }

    fn write_name(out: &mut Vec<u8>, name: &str) {
        if !name.is_empty() {
            for label in name.split('.') {
                out.push(label.len() as u8);
                out.extend_from_slice(label.as_bytes());
            }
        }
        out.push(0);
    }

    /// Two-pass builder: compute the size first, serialize in one pass,
    /// then assert the two agree (the restored Open Question resolution).
    pub fn serialize(&self) -> Vec<u8> {
        let computed = self.computed_size();
        let mut out = Vec::with_capacity(computed);

        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.name_servers.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.additionals.len() as u16).to_be_bytes());

        for q in &self.questions {
            Self::write_name(&mut out, &q.name);
            out.extend_from_slice(&q.dns_type.to_be_bytes());
            out.extend_from_slice(&q.class.to_be_bytes());
        }
        for r in self.answers.iter().chain(&self.name_servers).chain(&self.additionals) {
            Self::write_name(&mut out, &r.name);
            out.extend_from_slice(&r.rdata.type_id().to_be_bytes());
            out.extend_from_slice(&r.class.to_be_bytes());
            out.extend_from_slice(&r.ttl.to_be_bytes());
            let rdata_len = Self::rdata_len(&r.rdata) as u16;
            out.extend_from_slice(&rdata_len.to_be_bytes());
            match &r.rdata {
                RData::A(addr) => out.extend_from_slice(&addr.octets()),
                RData::Ptr(target) => Self::write_name(&mut out, target),
                RData::Txt(fields) => {
                    for f in fields {
                        out.push(f.len() as u8);
                        out.extend_from_slice(f.as_bytes());
                    }
                }
                RData::Srv { priority, weight, port, target } => {
                    out.extend_from_slice(&priority.to_be_bytes());
                    out.extend_from_slice(&weight.to_be_bytes());
                    out.extend_from_slice(&port.to_be_bytes());
                    Self::write_name(&mut out, target);
                }
                RData::Opt(data) | RData::Nsec(data) => out.extend_from_slice(data),
            }
        }

        debug_assert_eq!(out.len(), computed, "serialized length must match computed_size");
        out
    }

    /// Walks the header then each section, following compression
    /// pointers when decoding names.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HDR_BYTES {
            return Err(RtError::BufTooSmall { needed: HDR_BYTES, got: buf.len() });
        }
        let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
        let flags = u16::from_be_bytes([buf[2], buf[3]]);
        let question_n = u16::from_be_bytes([buf[4], buf[5]]);
        let answer_n = u16::from_be_bytes([buf[6], buf[7]]);
        let ns_n = u16::from_be_bytes([buf[8], buf[9]]);
        let additional_n = u16::from_be_bytes([buf[10], buf[11]]);

        let mut cursor = HDR_BYTES;
        let mut questions = Vec::with_capacity(question_n as usize);
        for _ in 0..question_n {
            let (name, next) = read_name(buf, cursor)?;
            cursor = next;
            if cursor + QUESTION_BODY_BYTES > buf.len() {
                return Err(RtError::BufTooSmall { needed: cursor + QUESTION_BODY_BYTES, got: buf.len() });
            }
            let dns_type = u16::from_be_bytes([buf[cursor], buf[cursor + 1]]);
            let class = u16::from_be_bytes([buf[cursor + 2], buf[cursor + 3]]);
            cursor += QUESTION_BODY_BYTES;
            questions.push(Question { name, dns_type, class });
        }

        let mut read_records = |cursor: &mut usize, count: u16| -> Result<Vec<ResourceRecord>> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (name, next) = read_name(buf, *cursor)?;
                *cursor = next;
                if *cursor + RSRC_BODY_BYTES > buf.len() {
                    return Err(RtError::BufTooSmall { needed: *cursor + RSRC_BODY_BYTES, got: buf.len() });
                }
                let dns_type = u16::from_be_bytes([buf[*cursor], buf[*cursor + 1]]);
                let class = u16::from_be_bytes([buf[*cursor + 2], buf[*cursor + 3]]);
                let ttl = u32::from_be_bytes([buf[*cursor + 4], buf[*cursor + 5], buf[*cursor + 6], buf[*cursor + 7]]);
                let rdlen = u16::from_be_bytes([buf[*cursor + 8], buf[*cursor + 9]]) as usize;
                *cursor += RSRC_BODY_BYTES;
                if *cursor + rdlen > buf.len() {
                    return Err(RtError::BufTooSmall { needed: *cursor + rdlen, got: buf.len() });
                }
                let rdata_buf = &buf[*cursor..*cursor + rdlen];
                let rdata = parse_rdata(dns_type, buf, *cursor, rdlen, rdata_buf)?;
                *cursor += rdlen;
                records.push(ResourceRecord { name, class: class & !FLUSH_CLASS, ttl, rdata });
            }
            Ok(records)
        };

        let answers = read_records(&mut cursor, answer_n)?;
        let name_servers = read_records(&mut cursor, ns_n)?;
        let additionals = read_records(&mut cursor, additional_n)?;

        Ok(Message {
            transaction_id,
            flags,
            questions,
            answers,
            name_servers,
            additionals,
        })
    }
}

fn parse_rdata(dns_type: u16, buf: &[u8], offset: usize, rdlen: usize, rdata_buf: &[u8]) -> Result<RData> {
    match dns_type {
        DNS_A => {
            if rdlen < 4 {
                return Err(RtError::BufTooSmall { needed: 4, got: rdlen });
            }
            Ok(RData::A(Ipv4Addr::new(rdata_buf[0], rdata_buf[1], rdata_buf[2], rdata_buf[3])))
        }
        DNS_PTR => {
            let (name, _) = read_name(buf, offset)?;
            Ok(RData::Ptr(name))
        }
        DNS_TXT => {
            let mut fields = Vec::new();
            let mut i = 0;
            while i < rdata_buf.len() {
                let len = rdata_buf[i] as usize;
                i += 1;
                if i + len > rdata_buf.len() {
                    break;
                }
                fields.push(String::from_utf8_lossy(&rdata_buf[i..i + len]).into_owned());
                i += len;
            }
            Ok(RData::Txt(fields))
        }
        DNS_SRV => {
            if rdlen < SRV_BODY_BYTES {
                return Err(RtError::BufTooSmall { needed: SRV_BODY_BYTES, got: rdlen });
            }
            let priority = u16::from_be_bytes([rdata_buf[0], rdata_buf[1]]);
            let weight = u16::from_be_bytes([rdata_buf[2], rdata_buf[3]]);
            let port = u16::from_be_bytes([rdata_buf[4], rdata_buf[5]]);
            let (target, _) = read_name(buf, offset + SRV_BODY_BYTES)?;
            Ok(RData::Srv { priority, weight, port, target })
        }
        DNS_OPT => Ok(RData::Opt(rdata_buf.to_vec())),
        DNS_NSEC => Ok(RData::Nsec(rdata_buf.to_vec())),
        _ => Ok(RData::Opt(rdata_buf.to_vec())),
    }
}

/// Decode a name at `offset`, following at most one compression pointer
/// hop (mDNS responses this crate builds never nest pointers further).
/// Returns the dotted name and the cursor position just past the name
/// (or just past the 2-byte pointer, per DNS semantics).
fn read_name(buf: &[u8], offset: usize) -> Result<(String, usize)> {
    let mut labels = Vec::new();
    let mut cursor = offset;
    let mut end_cursor = None;
    let mut hops = 0;

    loop {
        if cursor >= buf.len() {
            return Err(RtError::BufTooSmall { needed: cursor + 1, got: buf.len() });
        }
        let len_byte = buf[cursor];
        if len_byte == 0 {
            cursor += 1;
            if end_cursor.is_none() {
                end_cursor = Some(cursor);
            }
            break;
        }
        if len_byte & 0xc0 == 0xc0 {
            if cursor + 1 >= buf.len() {
                return Err(RtError::BufTooSmall { needed: cursor + 2, got: buf.len() });
            }
            if end_cursor.is_none() {
                end_cursor = Some(cursor + 2);
            }
            let target = (((len_byte & 0x3f) as usize) << 8) | buf[cursor + 1] as usize;
            hops += 1;
            if hops > 16 {
                return Err(RtError::invalid_arg("mdns name compression pointer loop"));
            }
            cursor = target;
            continue;
        }
        let len = len_byte as usize;
        let start = cursor + 1;
        if start + len > buf.len() {
            return Err(RtError::BufTooSmall { needed: start + len, got: buf.len() });
        }
        labels.push(String::from_utf8_lossy(&buf[start..start + len]).into_owned());
        cursor = start + len;
    }

    Ok((labels.join("."), end_cursor.unwrap_or(cursor)))
}

/// Service descriptor fields needed to build a reply to an `_EuConProxy`
/// style query (S3): a PTR pointing at the instance, a matching SRV, and
/// a TXT record carrying the key/value pairs.
pub fn build_service_reply(
    transaction_id: u16,
    instance_name: &str,
    service_type: &str,
    domain: &str,
    host_name: &str,
    port: u16,
    txt_fields: &[String],
) -> Message {
    let service_fqdn = format!("{service_type}.{domain}");
    let instance_fqdn = format!("{instance_name}.{service_fqdn}");
    let target_fqdn = format!("{host_name}.{domain}");

    let mut msg = Message::reply(transaction_id);
    msg.answers.push(ResourceRecord {
        name: instance_fqdn.clone(),
        class: IN_CLASS,
        ttl: 120,
        rdata: RData::Srv {
            priority: 0,
            weight: 0,
            port,
            target: target_fqdn,
        },
    });
    msg.answers.push(ResourceRecord {
        name: instance_fqdn,
        class: IN_CLASS | FLUSH_CLASS,
        ttl: 4500,
        rdata: RData::Txt(txt_fields.to_vec()),
    });
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_length_matches_computed_size() {
        let msg = build_service_reply(
            0,
            "MC Mix - 1",
            "_EuConProxy._tcp",
            "local",
            "mc-mix",
            49168,
            &["lmac=001122334455".to_string(), "dummy=0".to_string()],
        );
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), msg.computed_size());
    }

    /// S3: parsing the built reply yields exactly one SRV and one TXT answer.
    #[test]
    fn scenario_s3_round_trips_through_parse() {
        let msg = build_service_reply(
            0,
            "MC Mix - 1",
            "_EuConProxy._tcp",
            "local",
            "mc-mix",
            49168,
            &["lmac=001122334455".to_string(), "dummy=0".to_string()],
        );
        let bytes = msg.serialize();
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.answers.len(), 2);
        assert!(matches!(parsed.answers[0].rdata, RData::Srv { port: 49168, .. }));
        match &parsed.answers[1].rdata {
            RData::Txt(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0], "lmac=001122334455");
            }
            other => panic!("expected TXT, got {other:?}"),
        }
    }

    #[test]
    fn a_record_round_trips() {
        let mut msg = Message::reply(1);
        msg.answers.push(ResourceRecord {
            name: "host.local".to_string(),
            class: IN_CLASS,
            ttl: 120,
            rdata: RData::A(Ipv4Addr::new(192, 168, 1, 42)),
        });
        let bytes = msg.serialize();
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed.answers[0].rdata, RData::A(Ipv4Addr::new(192, 168, 1, 42)));
        assert_eq!(parsed.answers[0].name, "host.local");
    }

    #[test]
    fn name_with_compression_pointer_resolves() {
        // "a" then a pointer back to offset 0, embedded after a header-sized prefix.
        let mut buf = vec![0u8; HDR_BYTES];
        let name_offset = buf.len();
        buf.push(1);
        buf.push(b'a');
        buf.push(0);
        let pointer_offset = buf.len();
        buf.push(0xc0);
        buf.push(name_offset as u8);

        let (name, next) = read_name(&buf, pointer_offset).unwrap();
        assert_eq!(name, "a");
        assert_eq!(next, pointer_offset + 2);
    }
}
