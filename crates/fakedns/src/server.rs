use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use dns_types::protocol::types::*;

use crate::audit::{AuditLog, Protocol};
use crate::metrics::*;
use crate::net_util::*;
use crate::query::Query;
use crate::synthesise::{Response, Synthesiser};

/// Everything a listener needs to answer a request.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct Responder {
    synthesiser: Arc<Synthesiser>,
    service_name: Arc<str>,
}

impl Responder {
    pub fn new(synthesiser: Synthesiser, service_name: &str) -> Self {
        Self {
            synthesiser: Arc::new(synthesiser),
            service_name: Arc::from(service_name),
        }
    }

    /// Parse a request and build the reply, logging the exchange.
    /// Returns `None` if there is nothing to reply to: the message
    /// was too short to even have an ID.
    pub fn handle_raw_message(
        &self,
        buf: &[u8],
        peer: SocketAddr,
        protocol: Protocol,
    ) -> Option<Message> {
        let audit = AuditLog::new(self.service_name.clone(), peer, protocol);
        audit.connect();

        let msg = match Message::from_octets(buf) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::debug!(%peer, %err, "could not parse message");
                audit.finish(None, &Response::with_rcode(Rcode::FormatError));
                return err.id().map(Message::make_format_error_response);
            }
        };

        if msg.header.is_response {
            audit.finish(None, &Response::with_rcode(Rcode::FormatError));
            return Some(Message::make_format_error_response(msg.header.id));
        }

        let query = msg.questions.first().map(|q| Query::from_question(q, peer));
        if let Some(query) = &query {
            audit.received(query);
        }

        let response = if msg.header.opcode == Opcode::Standard {
            self.synthesiser.respond(query.as_ref())
        } else {
            Response::with_rcode(Rcode::NotImplemented)
        };
        audit.finish(query.as_ref(), &response);

        let mut reply = msg.make_response();
        reply.questions.truncate(1);
        response.apply_to(&mut reply);
        Some(reply)
    }
}

pub async fn listen_tcp(responder: Responder, socket: TcpListener) {
    loop {
        match socket.accept().await {
            Ok((mut stream, peer)) => {
                let responder = responder.clone();
                tokio::spawn(async move {
                    let start = Instant::now();
                    let response = match read_tcp_bytes(&mut stream).await {
                        Ok(bytes) => {
                            responder.handle_raw_message(bytes.as_ref(), peer, Protocol::Tcp)
                        }
                        Err(err) => {
                            tracing::debug!(%peer, %err, "tcp read error");
                            err.id().map(Message::make_format_error_response)
                        }
                    };
                    if let Some(message) = response {
                        match message.to_octets() {
                            Ok(mut serialised) => {
                                if let Err(err) = send_tcp_bytes(&mut stream, &mut serialised).await
                                {
                                    tracing::debug!(%peer, ?err, "tcp send error");
                                }
                            }
                            Err(err) => {
                                tracing::error!(?message, %err, "could not serialise message");
                            }
                        }
                    }
                    DNS_RESPONSE_TIME_SECONDS
                        .with_label_values(&[Protocol::Tcp.as_str()])
                        .observe(start.elapsed().as_secs_f64());
                });
            }
            Err(err) => tracing::debug!(?err, "tcp accept error"),
        }
    }
}

pub async fn listen_udp(responder: Responder, socket: UdpSocket) {
    let (tx, mut rx) = mpsc::channel(32);
    let mut buf = vec![0u8; UDP_MAX_LEN];

    loop {
        tokio::select! {
            Ok((size, peer)) = socket.recv_from(&mut buf) => {
                let start = Instant::now();
                let bytes = BytesMut::from(&buf[..size]);
                let reply = tx.clone();
                let responder = responder.clone();
                tokio::spawn(async move {
                    let response = responder.handle_raw_message(bytes.as_ref(), peer, Protocol::Udp);
                    if let Some(message) = response {
                        if let Err(err) = reply.send((message, peer, start)).await {
                            tracing::debug!(%peer, ?err, "udp reply error");
                        }
                    }
                });
            }

            Some((message, peer, start)) = rx.recv() => {
                match message.to_octets() {
                    Ok(mut serialised) => {
                        if let Err(err) = send_udp_bytes_to(&socket, peer, &mut serialised).await {
                            tracing::debug!(%peer, ?err, "udp send error");
                        }
                    }
                    Err(err) => {
                        tracing::error!(?message, %err, "could not serialise message");
                    }
                }
                DNS_RESPONSE_TIME_SECONDS
                    .with_label_values(&[Protocol::Udp.as_str()])
                    .observe(start.elapsed().as_secs_f64());
            }
        }
    }
}
