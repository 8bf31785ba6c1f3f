use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use dns_types::protocol::types::*;

/// A single question, as the synthesiser sees it.
///
/// The name is kept as text (minus the trailing root dot) for
/// validation, since names too long to ever be encoded still need an
/// answer.  `owner` is the name records are given: the wire name the
/// client asked about, octet for octet, or `None` if the text cannot
/// be encoded.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Query {
    pub name: String,
    pub owner: Option<DomainName>,
    pub qtype: QueryType,
    pub qclass: QueryClass,
    pub peer: SocketAddr,
}

impl Query {
    pub fn new(name: &str, qtype: QueryType, qclass: QueryClass) -> Self {
        Self {
            name: name.to_string(),
            owner: name.parse().ok(),
            qtype,
            qclass,
            peer: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        }
    }

    pub fn from_question(question: &Question, peer: SocketAddr) -> Self {
        let dotted = question.name.to_dotted_string();
        Self {
            name: dotted.trim_end_matches('.').to_string(),
            owner: Some(question.name.clone()),
            qtype: question.qtype,
            qclass: question.qclass,
            peer,
        }
    }

    pub fn kind(&self) -> QueryKind {
        QueryKind::from(self.qtype)
    }

    /// The class synthesised records carry.  Only IN and CH get this
    /// far.
    pub fn rclass(&self) -> RecordClass {
        match self.qclass {
            QueryClass::Record(rclass) => rclass,
            QueryClass::Wildcard => RecordClass::IN,
        }
    }

    pub fn is_chaos(&self) -> bool {
        self.qclass == QueryClass::Record(RecordClass::CH)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.qtype, self.qclass, self.name)
    }
}

/// The query types which get their own handler.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum QueryKind {
    A,
    SOA,
    PTR,
    TXT,
    MX,
    NS,
    ANY,
    CNAME,
    AXFR,
    AAAA,
    Other,
}

impl From<QueryType> for QueryKind {
    fn from(qtype: QueryType) -> Self {
        match qtype {
            QueryType::Record(RecordType::A) => QueryKind::A,
            QueryType::Record(RecordType::SOA) => QueryKind::SOA,
            QueryType::Record(RecordType::PTR) => QueryKind::PTR,
            QueryType::Record(RecordType::TXT) => QueryKind::TXT,
            QueryType::Record(RecordType::MX) => QueryKind::MX,
            QueryType::Record(RecordType::NS) => QueryKind::NS,
            QueryType::Record(RecordType::CNAME) => QueryKind::CNAME,
            QueryType::Record(RecordType::AAAA) => QueryKind::AAAA,
            QueryType::Wildcard => QueryKind::ANY,
            QueryType::AXFR => QueryKind::AXFR,
            _ => QueryKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;

    use super::*;

    #[test]
    fn from_question_drops_root_dot() {
        let question = Question {
            name: domain("Example.COM."),
            qtype: QueryType::Record(RecordType::MX),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        let peer = SocketAddr::from((Ipv4Addr::new(10, 0, 0, 9), 4242));
        let query = Query::from_question(&question, peer);

        assert_eq!("example.com", query.name);
        assert_eq!(Some(domain("example.com.")), query.owner);
        assert_eq!(QueryKind::MX, query.kind());
        assert_eq!(peer, query.peer);
    }

    #[test]
    fn root_question_has_empty_name() {
        let question = Question {
            name: DomainName::root_domain(),
            qtype: QueryType::Record(RecordType::NS),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        let query = Query::from_question(&question, SocketAddr::from((Ipv4Addr::LOCALHOST, 53)));

        assert_eq!("", query.name);
    }

    #[test]
    fn owner_keeps_wire_octets() {
        let label = Label::try_from(&[0xc3][..]).unwrap();
        let name = DomainName::from_labels(vec![label, Label::new()]).unwrap();
        let question = Question {
            name: name.prepend_label("wpad").unwrap(),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };
        let query = Query::from_question(&question, SocketAddr::from((Ipv4Addr::LOCALHOST, 53)));

        assert_eq!(Some(question.name), query.owner);
    }

    #[test]
    fn unencodable_name_has_no_owner() {
        let name = format!("{}.com", "a".repeat(64));
        let query = Query::new(
            &name,
            QueryType::Record(RecordType::A),
            QueryClass::Record(RecordClass::IN),
        );

        assert_eq!(None, query.owner);
    }

    #[test]
    fn unhandled_types_are_other() {
        assert_eq!(QueryKind::Other, QueryKind::from(QueryType::from(33)));
        assert_eq!(QueryKind::Other, QueryKind::from(QueryType::MAILA));
        assert_eq!(QueryKind::ANY, QueryKind::from(QueryType::from(255)));
        assert_eq!(QueryKind::AXFR, QueryKind::from(QueryType::from(252)));
    }
}
