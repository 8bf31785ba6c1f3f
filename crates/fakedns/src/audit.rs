//! Per-query audit trail.  Each request produces, in order:
//!
//! - a `connect` line,
//! - a `received query` line (if there was a question),
//! - one line per record sent,
//! - an `error` line (if the rcode is not NOERROR),
//! - a `disconnect` line,
//! - a `stat` line.
//!
//! All of them go to the `fakedns::audit` target, tagged with the
//! service name and the peer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use dns_types::protocol::types::Rcode;

use crate::metrics::*;
use crate::query::Query;
use crate::synthesise::Response;

pub const AUDIT_TARGET: &str = "fakedns::audit";

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    service: Arc<str>,
    peer: SocketAddr,
    protocol: Protocol,
}

impl AuditLog {
    pub fn new(service: Arc<str>, peer: SocketAddr, protocol: Protocol) -> Self {
        Self {
            service,
            peer,
            protocol,
        }
    }

    pub fn connect(&self) {
        DNS_REQUESTS_TOTAL
            .with_label_values(&[self.protocol.as_str()])
            .inc();
        tracing::info!(
            target: AUDIT_TARGET,
            service = %self.service,
            peer = %self.peer,
            protocol = %self.protocol,
            "connect"
        );
    }

    pub fn received(&self, query: &Query) {
        tracing::info!(
            target: AUDIT_TARGET,
            service = %self.service,
            peer = %self.peer,
            qtype = %query.qtype,
            qclass = %query.qclass,
            qname = %query.name,
            "received query"
        );
    }

    /// Log everything from the records onwards, and count the answer.
    pub fn finish(&self, query: Option<&Query>, response: &Response) {
        for rr in response.records() {
            tracing::info!(
                target: AUDIT_TARGET,
                service = %self.service,
                peer = %self.peer,
                record = %rr,
                "sent record"
            );
        }

        if response.rcode != Rcode::NoError {
            tracing::info!(
                target: AUDIT_TARGET,
                service = %self.service,
                peer = %self.peer,
                rcode = %response.rcode,
                "error"
            );
        }

        tracing::info!(
            target: AUDIT_TARGET,
            service = %self.service,
            peer = %self.peer,
            "disconnect"
        );

        let success = response.is_success();
        let (qtype, qclass, qname) = match query {
            Some(query) => (
                query.qtype.to_string(),
                query.qclass.to_string(),
                query.name.clone(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        tracing::info!(
            target: AUDIT_TARGET,
            service = %self.service,
            success,
            %qtype,
            %qclass,
            %qname,
            "stat"
        );

        let success_label = if success { "true" } else { "false" };
        DNS_QUERIES_TOTAL
            .with_label_values(&[qtype.as_str(), qclass.as_str(), success_label])
            .inc();
        DNS_RESPONSES_TOTAL
            .with_label_values(&[response.rcode.to_string().as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    use dns_types::protocol::types::test_util::*;
    use dns_types::protocol::types::*;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;
    use crate::addresses::AddressCache;
    use crate::server::Responder;
    use crate::settings::Settings;
    use crate::synthesise::Synthesiser;

    #[derive(Debug, Default, Clone, Eq, PartialEq)]
    struct Line {
        message: String,
        success: Option<bool>,
    }

    impl Visit for Line {
        fn record_bool(&mut self, field: &Field, value: bool) {
            if field.name() == "success" {
                self.success = Some(value);
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct Capture {
        lines: Arc<Mutex<Vec<Line>>>,
    }

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().target() != AUDIT_TARGET {
                return;
            }
            let mut line = Line::default();
            event.record(&mut line);
            self.lines.lock().unwrap().push(line);
        }
    }

    fn audit_lines(query: &Message) -> Vec<Line> {
        let settings = Settings::default();
        let responder = Responder::new(
            Synthesiser::new(&settings, AddressCache::new(&settings)),
            &settings.service_name,
        );
        let octets = query.to_octets().unwrap();
        let peer = SocketAddr::from((Ipv4Addr::new(10, 0, 0, 9), 5353));

        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, || {
            responder.handle_raw_message(&octets, peer, Protocol::Udp);
        });

        let lines = capture.lines.lock().unwrap().clone();
        lines
    }

    fn messages(lines: &[Line]) -> Vec<&str> {
        lines.iter().map(|line| line.message.as_str()).collect()
    }

    fn stat_success(lines: &[Line]) -> Option<bool> {
        lines.last().and_then(|line| line.success)
    }

    fn question(qtype: QueryType) -> Message {
        Message::from_question(
            42,
            Question {
                name: domain("example.com."),
                qtype,
                qclass: QueryClass::Record(RecordClass::IN),
            },
        )
    }

    #[test]
    fn noerror_lines_in_order() {
        let lines = audit_lines(&question(QueryType::Record(RecordType::MX)));

        assert_eq!(
            vec![
                "connect",
                "received query",
                "sent record",
                "sent record",
                "sent record",
                "sent record",
                "disconnect",
                "stat",
            ],
            messages(&lines)
        );
        assert_eq!(Some(true), stat_success(&lines));
    }

    #[test]
    fn refused_lines_in_order() {
        let lines = audit_lines(&question(QueryType::AXFR));

        assert_eq!(
            vec!["connect", "received query", "error", "disconnect", "stat"],
            messages(&lines)
        );
        assert_eq!(Some(false), stat_success(&lines));
    }

    #[test]
    fn formerr_counts_as_success() {
        let mut query = question(QueryType::Record(RecordType::A));
        query.header.is_response = true;
        let lines = audit_lines(&query);

        assert_eq!(
            vec!["connect", "error", "disconnect", "stat"],
            messages(&lines)
        );
        assert_eq!(Some(true), stat_success(&lines));
    }
}
