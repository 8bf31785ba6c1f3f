//! The RFC 1035 section 5.1 presentation format of a resource record,
//! one record per line:
//!
//! ```text
//! <owner> <ttl> <class> <type> <rdata>
//! ```
//!
//! Names are written fully qualified.  Types this crate does not
//! understand use the generic `\# <len> <hex>` encoding of RFC 3597.

use std::fmt;

use crate::protocol::types::*;

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.name,
            self.ttl,
            self.rclass,
            self.rtype_with_data.rtype(),
            self.rtype_with_data
        )
    }
}

/// Just the RDATA part.
impl fmt::Display for RecordTypeWithData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordTypeWithData::A { address } => write!(f, "{address}"),
            RecordTypeWithData::NS { nsdname } => write!(f, "{nsdname}"),
            RecordTypeWithData::CNAME { cname } => write!(f, "{cname}"),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"
            ),
            RecordTypeWithData::PTR { ptrdname } => write!(f, "{ptrdname}"),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => write!(f, "{preference} {exchange}"),
            RecordTypeWithData::TXT { octets } => write_character_strings(f, octets),
            RecordTypeWithData::AAAA { address } => write!(f, "{address}"),
            RecordTypeWithData::Unknown { octets, .. } => {
                write!(f, "\\# {}", octets.len())?;
                if !octets.is_empty() {
                    write!(f, " ")?;
                    for octet in octets {
                        write!(f, "{octet:02x}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Write out length-prefixed character-strings as a space-separated
/// list of quoted strings.
fn write_character_strings(f: &mut fmt::Formatter, octets: &[u8]) -> fmt::Result {
    let mut rest = octets;
    let mut first = true;
    while let Some((&len, tail)) = rest.split_first() {
        let (chunk, tail) = tail.split_at(usize::from(len).min(tail.len()));
        rest = tail;

        if !first {
            write!(f, " ")?;
        }
        first = false;

        write!(f, "\"")?;
        for &octet in chunk {
            match octet {
                b'"' | b'\\' => write!(f, "\\{}", octet as char)?,
                0x20..=0x7e => write!(f, "{}", octet as char)?,
                _ => write!(f, "\\{octet:03}")?,
            }
        }
        write!(f, "\"")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    fn mx_presentation() {
        assert_eq!(
            "example.com. 3600 IN MX 10 mx1.example.com.",
            mx_record("example.com.", 10, "mx1.example.com.").to_string()
        );
    }

    #[test]
    fn a_presentation() {
        assert_eq!(
            "ns1.example.com. 3600 IN A 10.0.0.5",
            a_record("ns1.example.com.", Ipv4Addr::new(10, 0, 0, 5)).to_string()
        );
    }

    #[test]
    fn soa_presentation() {
        let rr = ResourceRecord {
            name: domain("example.com."),
            rtype_with_data: RecordTypeWithData::SOA {
                mname: domain("ns1.example.com."),
                rname: domain("hostmaster.example.com."),
                serial: 20_150_801,
                refresh: 1000,
                retry: 800,
                expire: 7200,
                minimum: 3600,
            },
            rclass: RecordClass::IN,
            ttl: 3600,
        };

        assert_eq!(
            "example.com. 3600 IN SOA ns1.example.com. hostmaster.example.com. 20150801 1000 800 7200 3600",
            rr.to_string()
        );
    }

    #[test]
    fn txt_presentation_escapes() {
        let rdata = RecordTypeWithData::txt("say \"hi\"\n");
        assert_eq!("\"say \\\"hi\\\"\\010\"", rdata.to_string());
    }
}
