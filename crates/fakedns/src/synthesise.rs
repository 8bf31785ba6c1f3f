//! Turning a query into a made-up, but plausible, authoritative
//! answer.
//!
//! Every name exists.  Each has an SOA, two nameservers, two mail
//! exchangers, a CNAME, a TXT record and an IPv4 address, all derived
//! from the name itself, with the addresses coming from the
//! `AddressCache`.

use std::net::Ipv4Addr;

use dns_types::protocol::types::*;

use crate::addresses::AddressCache;
use crate::query::{Query, QueryKind};
use crate::settings::Settings;
use crate::store;
use crate::validation::{check_name, validate, ValidationError};

/// TTL of every synthesised record.
pub const TTL: u32 = 3600;

pub const SOA_SERIAL: u32 = 20_150_801;
pub const SOA_REFRESH: u32 = 1000;
pub const SOA_RETRY: u32 = 800;
pub const SOA_EXPIRE: u32 = 7200;
pub const SOA_MINIMUM: u32 = 3600;

pub const TXT_PLACEHOLDER: &str = "this is a txt record";

/// CHAOS-class TXT names which ask about the server itself.  Matched
/// as prefixes.
pub const CHAOS_NAMES: &[&str] = &["version.bind", "hostname.bind", "id.server", "version.server"];

/// The answer to one query, before it becomes a `Message`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Response {
    pub rcode: Rcode,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
    pub authoritative: bool,
}

impl Response {
    pub fn with_rcode(rcode: Rcode) -> Self {
        Self {
            rcode,
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
            authoritative: true,
        }
    }

    fn answered(answers: Vec<ResourceRecord>) -> Self {
        Self {
            answers,
            ..Self::with_rcode(Rcode::NoError)
        }
    }

    /// Everything but NXDOMAIN, REFUSED, NOTIMP, and SERVFAIL counts
    /// as a success.
    pub fn is_success(&self) -> bool {
        !matches!(
            self.rcode,
            Rcode::NameError | Rcode::Refused | Rcode::NotImplemented | Rcode::ServerFailure
        )
    }

    /// All the records, in the order they go on the wire.
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
    }

    /// Fill in the rcode and sections of a response message.
    pub fn apply_to(self, message: &mut Message) {
        message.header.rcode = self.rcode;
        message.header.is_authoritative = self.authoritative;
        message.answers = self.answers;
        message.authority = self.authority;
        message.additional = self.additional;
    }
}

/// Something which stops a query getting a normal answer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("name {0:?} cannot be encoded")]
    Unencodable(String),

    #[error(transparent)]
    Store(#[from] store::Error),
}

impl Error {
    pub fn rcode(&self) -> Rcode {
        match self {
            Error::Invalid(err) => err.rcode(),
            Error::Unencodable(_) | Error::Store(_) => Rcode::ServerFailure,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Synthesiser {
    bind_address: Ipv4Addr,
    version: String,
    addresses: AddressCache,
}

impl Synthesiser {
    pub fn new(settings: &Settings, addresses: AddressCache) -> Self {
        Self {
            bind_address: settings.bind_address,
            version: settings.version.clone(),
            addresses,
        }
    }

    pub fn addresses(&self) -> &AddressCache {
        &self.addresses
    }

    /// Answer a query.  A message with no question gets SERVFAIL.
    /// Failures are never propagated: they become the rcode.
    pub fn respond(&self, query: Option<&Query>) -> Response {
        let Some(query) = query else {
            return Response::with_rcode(Rcode::ServerFailure);
        };

        match self.synthesise(query) {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    Error::Invalid(_) => tracing::debug!(%query, %err, "rejected query"),
                    _ => tracing::warn!(%query, %err, "could not answer query"),
                }
                Response::with_rcode(err.rcode())
            }
        }
    }

    /// # Errors
    ///
    /// If the query is invalid, or the answer cannot be built.
    pub fn synthesise(&self, query: &Query) -> Result<Response, Error> {
        validate(query)?;

        match query.kind() {
            QueryKind::A => self.a(query),
            QueryKind::SOA => self.soa(query),
            QueryKind::PTR => self.ptr(query),
            QueryKind::TXT => self.txt(query),
            QueryKind::MX => self.mx(query),
            QueryKind::NS => self.ns(query),
            QueryKind::ANY => self.any(query),
            QueryKind::CNAME => self.cname(query),
            QueryKind::AXFR => Ok(Response::with_rcode(Rcode::Refused)),
            // no IPv6 here: an empty NOERROR sends the client back to A
            QueryKind::AAAA => Ok(Response::with_rcode(Rcode::NoError)),
            QueryKind::Other => Ok(Response::with_rcode(Rcode::NotImplemented)),
        }
    }

    fn a(&self, query: &Query) -> Result<Response, Error> {
        if !is_wpad(&query.name) {
            check_name(&query.name)?;
        }
        let owner = Owner::new(query)?;

        Ok(Response::answered(vec![self.address_record(&owner, query)?]))
    }

    fn soa(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let nameservers = owner.derive_all(&["ns1", "ns2"])?;

        Ok(Response {
            authority: owner.ns_records(&nameservers),
            additional: self.glue(&owner, &nameservers)?,
            ..Response::answered(vec![owner.soa_record()?])
        })
    }

    fn ptr(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let hostname = self.addresses.resolve_hostname(&query.name);
        let ptrdname = parse_name(&hostname)?;

        Ok(Response::answered(vec![
            owner.record(RecordTypeWithData::PTR { ptrdname })
        ]))
    }

    fn txt(&self, query: &Query) -> Result<Response, Error> {
        if query.is_chaos() && is_chaos_name(&query.name) {
            // the version string is worked out but never sent: the
            // answer stays empty and the rcode stays REFUSED
            let version = RecordTypeWithData::txt(&self.version);
            tracing::debug!(%query, %version, "not answering server information query");
            return Ok(Response::with_rcode(Rcode::Refused));
        }

        check_name(&query.name)?;
        let owner = Owner::new(query)?;

        Ok(Response::answered(vec![
            owner.record(RecordTypeWithData::txt(TXT_PLACEHOLDER))
        ]))
    }

    fn mx(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let exchanges = owner.derive_all(&["mx1", "mx2"])?;

        Ok(Response {
            additional: self.glue(&owner, &exchanges)?,
            ..Response::answered(owner.mx_records(&exchanges))
        })
    }

    fn ns(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let nameservers = owner.derive_all(&["ns1", "ns2"])?;

        Ok(Response {
            additional: self.glue(&owner, &nameservers)?,
            ..Response::answered(owner.ns_records(&nameservers))
        })
    }

    fn any(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let nameservers = owner.derive_all(&["ns1", "ns2"])?;
        let exchanges = owner.derive_all(&["mx1", "mx2"])?;

        let mut answers = vec![owner.soa_record()?];
        answers.append(&mut owner.ns_records(&nameservers));
        answers.append(&mut owner.mx_records(&exchanges));
        answers.push(self.address_record(&owner, query)?);

        let mut additional = self.glue(&owner, &nameservers)?;
        additional.append(&mut self.glue(&owner, &exchanges)?);

        Ok(Response {
            additional,
            ..Response::answered(answers)
        })
    }

    fn cname(&self, query: &Query) -> Result<Response, Error> {
        check_name(&query.name)?;
        let owner = Owner::new(query)?;
        let cname = owner.derive("host")?;

        Ok(Response::answered(vec![
            owner.record(RecordTypeWithData::CNAME { cname })
        ]))
    }

    /// The A record for the queried name itself.  `wpad` names always
    /// point at this server.
    fn address_record(&self, owner: &Owner, query: &Query) -> Result<ResourceRecord, Error> {
        let address = if is_wpad(&query.name) {
            self.bind_address
        } else {
            self.addresses.resolve_address(&query.name)?
        };

        Ok(owner.record(RecordTypeWithData::A { address }))
    }

    /// A records for names mentioned in NS or MX records.
    fn glue(&self, owner: &Owner, names: &[DomainName]) -> Result<Vec<ResourceRecord>, Error> {
        let mut rrs = Vec::with_capacity(names.len());
        for name in names {
            let hostname = name.to_dotted_string();
            let address = self
                .addresses
                .resolve_address(hostname.trim_end_matches('.'))?;
            rrs.push(owner.record_for(name.clone(), RecordTypeWithData::A { address }));
        }
        Ok(rrs)
    }
}

/// The queried name, and the class its records are in.
struct Owner {
    name: DomainName,
    rclass: RecordClass,
}

impl Owner {
    fn new(query: &Query) -> Result<Self, Error> {
        let name = query
            .owner
            .clone()
            .ok_or_else(|| Error::Unencodable(query.name.clone()))?;

        Ok(Self {
            name,
            rclass: query.rclass(),
        })
    }

    /// `<label>.<owner>`
    fn derive(&self, label: &str) -> Result<DomainName, Error> {
        self.name
            .prepend_label(label)
            .ok_or_else(|| Error::Unencodable(format!("{label}.{}", self.name)))
    }

    fn derive_all(&self, labels: &[&str]) -> Result<Vec<DomainName>, Error> {
        labels.iter().map(|label| self.derive(label)).collect()
    }

    fn record(&self, rtype_with_data: RecordTypeWithData) -> ResourceRecord {
        self.record_for(self.name.clone(), rtype_with_data)
    }

    fn record_for(&self, name: DomainName, rtype_with_data: RecordTypeWithData) -> ResourceRecord {
        ResourceRecord {
            name,
            rtype_with_data,
            rclass: self.rclass,
            ttl: TTL,
        }
    }

    fn soa_record(&self) -> Result<ResourceRecord, Error> {
        Ok(self.record(RecordTypeWithData::SOA {
            mname: self.derive("ns1")?,
            rname: self.derive("hostmaster")?,
            serial: SOA_SERIAL,
            refresh: SOA_REFRESH,
            retry: SOA_RETRY,
            expire: SOA_EXPIRE,
            minimum: SOA_MINIMUM,
        }))
    }

    fn ns_records(&self, nameservers: &[DomainName]) -> Vec<ResourceRecord> {
        nameservers
            .iter()
            .map(|nsdname| {
                self.record(RecordTypeWithData::NS {
                    nsdname: nsdname.clone(),
                })
            })
            .collect()
    }

    fn mx_records(&self, exchanges: &[DomainName]) -> Vec<ResourceRecord> {
        exchanges
            .iter()
            .zip([10, 20])
            .map(|(exchange, preference)| {
                self.record(RecordTypeWithData::MX {
                    preference,
                    exchange: exchange.clone(),
                })
            })
            .collect()
    }
}

fn parse_name(name: &str) -> Result<DomainName, Error> {
    name.parse()
        .map_err(|_| Error::Unencodable(name.to_string()))
}

fn is_wpad(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "wpad" || name.starts_with("wpad.")
}

fn is_chaos_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    CHAOS_NAMES.iter().any(|prefix| name.starts_with(prefix))
}
