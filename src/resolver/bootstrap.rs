use crate::protocol::{fully_qualified, MAX_PACKET_SIZE};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use parking_lot::Mutex;
use rand::prelude::*;
use reqwest::dns::{Addrs, Name as HostName, Resolve, Resolving};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap lookup of {host} failed: {reason}")]
    Lookup { host: String, reason: String },
    #[error("expected host:port, found {0:?}")]
    MalformedAddress(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Resolves host names with direct A queries to fixed nameservers, never
/// touching the system resolver. Used to find the DoH API itself.
///
/// Cheap to clone, clones share the address cache.
#[derive(Clone)]
pub struct BootstrapResolver(Arc<Inner>);

struct Inner {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    cache: Mutex<HashMap<String, CachedLookup>>,
}

struct CachedLookup {
    address: Ipv4Addr,
    expires_at: Instant,
}

impl BootstrapResolver {
    /// `servers` are tried in order until one answers with an A record.
    /// `timeout` bounds each individual exchange.
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        BootstrapResolver(Arc::new(Inner {
            servers,
            timeout,
            cache: Mutex::new(HashMap::new()),
        }))
    }

    /// Returns the IPv4 address of `host`, from cache while the upstream TTL
    /// lasts, otherwise from a fresh query.
    pub async fn lookup(&self, host: &str) -> Result<Ipv4Addr, BootstrapError> {
        let host = fully_qualified(host);

        if let Some(address) = self.0.cached(&host) {
            trace!(%host, %address, "Bootstrap cache hit");
            return Ok(address);
        }

        let mut reason = String::from("no bootstrap servers configured");
        for &server in &self.0.servers {
            match self.0.exchange(&host, server).await {
                Ok(Some((address, ttl))) => {
                    info!(%host, %address, ttl, %server, "Bootstrap lookup");
                    self.0.store(host, address, ttl);
                    return Ok(address);
                }
                Ok(None) => {
                    debug!(%host, %server, "No A record in bootstrap answer");
                    reason = format!("no A record from {}", server);
                }
                Err(err) => {
                    warn!(%host, %server, %err, "Bootstrap exchange failed");
                    reason = format!("{}: {}", server, err);
                }
            }
        }

        Err(BootstrapError::Lookup { host, reason })
    }

    /// Connects over TCP to `address`, given as `host:port`, resolving the host
    /// through [`BootstrapResolver::lookup`].
    pub async fn dial(&self, address: &str) -> Result<TcpStream, BootstrapError> {
        if let Ok(socket_addr) = address.parse::<SocketAddr>() {
            return Ok(TcpStream::connect(socket_addr).await?);
        }

        let (host, port) = split_host_port(address)?;
        let ip = self.resolve_host(host).await?;
        debug!(%address, %ip, "Dialing");
        Ok(TcpStream::connect(SocketAddr::new(ip, port)).await?)
    }

    async fn resolve_host(&self, host: &str) -> Result<IpAddr, BootstrapError> {
        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(ip),
            Err(_) => Ok(IpAddr::V4(self.lookup(host).await?)),
        }
    }
}

impl Inner {
    fn cached(&self, host: &str) -> Option<Ipv4Addr> {
        let mut cache = self.cache.lock();
        match cache.entry(host.to_owned()) {
            Entry::Occupied(o) if o.get().expires_at <= Instant::now() => {
                o.remove();
                None
            }
            Entry::Occupied(o) => Some(o.get().address),
            Entry::Vacant(_) => None,
        }
    }

    fn store(&self, host: String, address: Ipv4Addr, ttl: u32) {
        let expires_at = Instant::now() + Duration::from_secs(ttl.into());
        self.cache.lock().insert(
            host,
            CachedLookup {
                address,
                expires_at,
            },
        );
    }

    /// Single request/response exchange, returning the first A record and its TTL
    async fn exchange(
        &self,
        host: &str,
        server: SocketAddr,
    ) -> Result<Option<(Ipv4Addr, u32)>, BootstrapError> {
        let name = Name::from_ascii(host).map_err(|err| BootstrapError::Lookup {
            host: host.to_owned(),
            reason: err.to_string(),
        })?;

        let id: u16 = {
            let mut rng = rand::thread_rng();
            rng.gen()
        };

        let mut request = Message::new();
        request
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        let query = Query::query(name, RecordType::A);
        request.add_query(query.clone());
        let bytes = request
            .to_vec()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let local: SocketAddr = match server {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        trace!(?request, %server, "Sending bootstrap query");
        socket.send(&bytes).await?;

        let response = tokio::time::timeout(self.timeout, read_response(&socket, id, &query))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response"))??;

        Ok(response
            .answers()
            .iter()
            .find_map(|record| match record.data() {
                Some(RData::A(a)) => Some((a.0, record.ttl())),
                _ => None,
            }))
    }
}

/// Waits for the reply to our query, skipping anything else sent to the socket
async fn read_response(socket: &UdpSocket, id: u16, query: &Query) -> io::Result<Message> {
    let mut buf = [0u8; MAX_PACKET_SIZE];
    loop {
        let size = socket.recv(&mut buf).await?;
        match Message::from_vec(&buf[..size]) {
            Ok(message) if is_reply_to(&message, id, query) => return Ok(message),
            Ok(message) => debug!(id = message.id(), "Ignoring unrelated message"),
            Err(err) => debug!(%err, "Ignoring undecodable reply"),
        }
    }
}

fn is_reply_to(message: &Message, id: u16, query: &Query) -> bool {
    message.id() == id
        && message.message_type() == MessageType::Response
        && message.queries() == std::slice::from_ref(query)
}

fn split_host_port(address: &str) -> Result<(&str, u16), BootstrapError> {
    let malformed = || BootstrapError::MalformedAddress(address.to_owned());

    let (host, port) = address.split_once(':').ok_or_else(malformed)?;
    if host.is_empty() || port.contains(':') {
        return Err(malformed());
    }
    let port = port.parse().map_err(|_| malformed())?;
    Ok((host, port))
}

/// Lets reqwest address every connection through the bootstrap lookup. The
/// port is filled in by reqwest from the request URL.
impl Resolve for BootstrapResolver {
    fn resolve(&self, name: HostName) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let ip = resolver.resolve_host(name.as_str()).await?;
            let addrs: Addrs = Box::new(std::iter::once(SocketAddr::new(ip, 0)));
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::Record;
    use tokio::net::TcpListener;

    fn unanswered_resolver(server: SocketAddr) -> BootstrapResolver {
        BootstrapResolver::new(vec![server], Duration::from_millis(100))
    }

    #[test]
    fn host_port_is_split() {
        assert_eq!(
            split_host_port("dns.google.com:443").unwrap(),
            ("dns.google.com", 443)
        );
    }

    #[test]
    fn address_without_port_is_malformed() {
        assert!(matches!(
            split_host_port("dns.google.com"),
            Err(BootstrapError::MalformedAddress(_))
        ));
    }

    #[test]
    fn address_with_extra_colon_is_malformed() {
        assert!(matches!(
            split_host_port("dns.google.com:443:1"),
            Err(BootstrapError::MalformedAddress(_))
        ));
    }

    #[test]
    fn address_with_bad_port_is_malformed() {
        assert!(matches!(
            split_host_port("dns.google.com:https"),
            Err(BootstrapError::MalformedAddress(_))
        ));
        assert!(matches!(
            split_host_port(":443"),
            Err(BootstrapError::MalformedAddress(_))
        ));
    }

    #[tokio::test]
    async fn dial_rejects_malformed_address() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver = unanswered_resolver(silent.local_addr().unwrap());

        let result = resolver.dial("dns.google.com").await;

        assert!(matches!(result, Err(BootstrapError::MalformedAddress(_))));
    }

    #[tokio::test]
    async fn dial_ip_literal_skips_lookup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver = unanswered_resolver(silent.local_addr().unwrap());

        let target = format!("127.0.0.1:{}", port);

        let (dialed, accepted) = tokio::join!(resolver.dial(&target), listener.accept());

        dialed.unwrap();
        accepted.unwrap();
    }

    #[tokio::test]
    async fn lookup_fails_when_no_server_answers() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver = unanswered_resolver(silent.local_addr().unwrap());

        let result = resolver.lookup("dns.google.com").await;

        match result {
            Err(BootstrapError::Lookup { host, .. }) => assert_eq!(host, "dns.google.com."),
            other => panic!("Expected lookup error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unrelated_replies_are_skipped() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let resolver =
            BootstrapResolver::new(vec![server.local_addr().unwrap()], DEFAULT_EXCHANGE_TIMEOUT);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            let (size, origin) = server.recv_from(&mut buf).await.unwrap();
            let request = Message::from_vec(&buf[..size]).unwrap();

            let reply = |message_type: MessageType, domain: &str, octets: [u8; 4]| {
                let name = Name::from_ascii(domain).unwrap();
                let mut reply = Message::new();
                reply
                    .set_id(request.id())
                    .set_message_type(message_type)
                    .set_op_code(OpCode::Query);
                reply.add_query(Query::query(name.clone(), RecordType::A));
                reply.add_answer(Record::from_rdata(name, 300, RData::A(A(octets.into()))));
                reply.to_vec().unwrap()
            };

            let echoed_query = reply(MessageType::Query, "dns.google.com.", [10, 0, 0, 1]);
            let other_question = reply(MessageType::Response, "other.example.", [10, 0, 0, 2]);
            let answer = reply(MessageType::Response, "dns.google.com.", [10, 0, 0, 3]);
            for bytes in [echoed_query, other_question, answer] {
                server.send_to(&bytes, origin).await.unwrap();
            }
        });

        let address = resolver.lookup("dns.google.com").await.unwrap();

        assert_eq!(address, Ipv4Addr::new(10, 0, 0, 3));
    }

    #[tokio::test]
    async fn lookup_without_servers_fails() {
        let resolver = BootstrapResolver::new(vec![], DEFAULT_EXCHANGE_TIMEOUT);

        assert!(matches!(
            resolver.lookup("dns.google.com").await,
            Err(BootstrapError::Lookup { .. })
        ));
    }
}
