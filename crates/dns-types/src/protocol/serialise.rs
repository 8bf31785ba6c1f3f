//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn to_octets(&self) -> Result<BytesMut, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        WireHeader {
            header: self.header,
            qdcount: usize_to_u16(self.questions.len())?,
            ancount: usize_to_u16(self.answers.len())?,
            nscount: usize_to_u16(self.authority.len())?,
            arcount: usize_to_u16(self.additional.len())?,
        }
        .serialise(buffer);

        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl WireHeader {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.header.serialise(buffer);
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Header {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        let flag = |set: bool, mask: u8| if set { mask } else { 0 };

        // octet 1
        let flag_qr = flag(self.is_response, HEADER_MASK_QR);
        let field_opcode = HEADER_MASK_OPCODE & (u8::from(self.opcode) << HEADER_OFFSET_OPCODE);
        let flag_aa = flag(self.is_authoritative, HEADER_MASK_AA);
        let flag_tc = flag(self.is_truncated, HEADER_MASK_TC);
        let flag_rd = flag(self.recursion_desired, HEADER_MASK_RD);
        // octet 2
        let flag_ra = flag(self.recursion_available, HEADER_MASK_RA);
        let field_rcode = HEADER_MASK_RCODE & (u8::from(self.rcode) << HEADER_OFFSET_RCODE);

        buffer.write_u16(self.id);
        buffer.write_u8(flag_qr | field_opcode | flag_aa | flag_tc | flag_rd);
        buffer.write_u8(flag_ra | field_rcode);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer, true);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        self.name.serialise(buffer, true);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        // filled in below
        let rdlength_index = buffer.index();
        buffer.write_u16(0);

        // names in RDATA are compressed for the well-known types of
        // RFC 1035 only (RFC 3597 section 4)
        match &self.rtype_with_data {
            RecordTypeWithData::A { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::NS { nsdname } => nsdname.serialise(buffer, true),
            RecordTypeWithData::CNAME { cname } => cname.serialise(buffer, true),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.serialise(buffer, true);
                rname.serialise(buffer, true);
                buffer.write_u32(*serial);
                buffer.write_u32(*refresh);
                buffer.write_u32(*retry);
                buffer.write_u32(*expire);
                buffer.write_u32(*minimum);
            }
            RecordTypeWithData::PTR { ptrdname } => ptrdname.serialise(buffer, true),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                buffer.write_u16(*preference);
                exchange.serialise(buffer, true);
            }
            RecordTypeWithData::TXT { octets } => buffer.write_octets(octets),
            RecordTypeWithData::AAAA { address } => buffer.write_octets(&address.octets()),
            RecordTypeWithData::Unknown { octets, .. } => buffer.write_octets(octets),
        };

        // -2 so we don't also include the 2 octets for the rdlength
        let rdlength = usize_to_u16(buffer.index() - rdlength_index - 2)?;
        let [hi, lo] = rdlength.to_be_bytes();
        buffer.octets[rdlength_index] = hi;
        buffer.octets[rdlength_index + 1] = lo;

        Ok(())
    }
}

impl DomainName {
    /// Write the name out.  With `compress`, the longest suffix which
    /// has already been written to the buffer becomes a pointer.
    pub fn serialise(&self, buffer: &mut WritableBuffer, compress: bool) {
        for (i, label) in self.labels.iter().enumerate() {
            if let Some(suffix) = DomainName::from_labels(self.labels[i..].to_vec()) {
                if compress {
                    if let Some(ptr) = buffer.name_pointer(&suffix) {
                        buffer.write_u16(ptr);
                        return;
                    }
                }
                buffer.memoise_name(&suffix);
            }

            buffer.write_u8(label.len());
            buffer.write_octets(label.octets());
        }
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: BytesMut,
    name_pointers: HashMap<DomainName, u16>,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: BytesMut::with_capacity(512),
            name_pointers: HashMap::new(),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    /// Pointers are 14 bits, so names past that offset are never
    /// memoised.
    pub fn memoise_name(&mut self, name: &DomainName) {
        if !name.is_root() && !self.name_pointers.contains_key(name) {
            if let Ok(index) = u16::try_from(self.index()) {
                if index <= 0b0011_1111_1111_1111 {
                    self.name_pointers.insert(name.clone(), index | 0b1100_0000_0000_0000);
                }
            }
        }
    }

    pub fn name_pointer(&self, name: &DomainName) -> Option<u16> {
        self.name_pointers.get(name).copied()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.put_u8(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.put_u32(value);
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.put_slice(octets);
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    u16::try_from(counter).map_err(|_| Error::CounterTooLarge {
        counter,
        bits: u16::BITS,
    })
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    #[rustfmt::skip]
    fn header_sets_aa_and_rcode() {
        let mut buf = WritableBuffer::default();
        let mut response = Message::from_question(
            0x1234,
            Question {
                name: domain("example.com."),
                qtype: QueryType::AXFR,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        )
        .make_response();
        response.header.rcode = Rcode::Refused;
        response.header.serialise(&mut buf);

        assert_eq!(
            vec![
                0x12, 0x34,
                0b1000_0100, // QR, AA
                0b0000_0101, // REFUSED
            ],
            buf.octets,
        );
    }

    #[test]
    #[rustfmt::skip]
    fn mx_rdata_is_compressed_against_owner() {
        let mut buf = WritableBuffer::default();
        let _ = mx_record("example.com.", 10, "mx1.example.com.").serialise(&mut buf);

        assert_eq!(
            vec![
                // NAME
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // TYPE
                0, 15, // MX
                // CLASS
                0, 1, // IN
                // TTL
                0, 0, 0x0e, 0x10, // 3600
                // RDLENGTH
                0, 8,
                // RDATA
                0, 10, // preference
                3, 109, 120, 49, // "mx1"
                0b1100_0000, 0b0000_0000, // pointer to "example.com"
            ],
            buf.octets,
        );
    }

    #[test]
    #[rustfmt::skip]
    fn a_record_has_four_octets_of_rdata() {
        let mut buf = WritableBuffer::default();
        let _ = a_record("a.", Ipv4Addr::new(10, 0, 0, 5)).serialise(&mut buf);

        assert_eq!(
            vec![
                1, 97, 0, // "a"
                0, 1, // A
                0, 1, // IN
                0, 0, 0x0e, 0x10, // 3600
                0, 4,
                10, 0, 0, 5,
            ],
            buf.octets,
        );
    }
}
