use crate::handler::ProxyHandler;
use crate::protocol::MAX_PACKET_SIZE;
use crate::resolver::Resolver;
use hickory_proto::op::{Message, MessageType};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::net::UdpSocket;
use tracing::{info, trace, warn};

pub struct Server<R>(Arc<Inner<R>>);

impl<R> Server<R>
where
    R: Resolver + Send + Sync + 'static,
{
    pub fn new(socket: UdpSocket, handler: ProxyHandler<R>) -> Server<R> {
        Server(Arc::new(Inner { socket, handler }))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.socket.local_addr()
    }

    /// Receives queries forever, handling each one on its own task
    pub async fn run(&self) -> io::Result<()> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        loop {
            let (size, origin) = self.0.socket.recv_from(&mut buf).await?;
            let bytes = &buf[0..size];

            match Message::from_vec(bytes) {
                Ok(message) if message.message_type() == MessageType::Query => {
                    self.handle_request(message, origin)
                }
                Ok(_) => info!(%origin, "Ignoring response packet"),
                Err(err) => info!(%err, %origin, "Error parsing packet"),
            }
        }
    }

    fn handle_request(&self, message: Message, origin: SocketAddr) {
        trace!(?message, ?origin, "Received query packet");

        let inner = Arc::clone(&self.0);

        tokio::spawn(async move {
            inner.handle_request(message, origin).await;
        });
    }
}

struct Inner<R> {
    socket: UdpSocket,
    handler: ProxyHandler<R>,
}

impl<R> Inner<R>
where
    R: Resolver,
{
    async fn handle_request(self: &Arc<Self>, request: Message, origin: SocketAddr) {
        for query in request.queries() {
            info!(
                "Query {} {} from {}",
                query.name(),
                query.query_type(),
                origin.ip()
            );
        }

        let reply = self.handler.handle(&request).await;
        for answer in reply.answers() {
            info!(
                "Answer {} {} {}",
                answer.name(),
                answer.ttl(),
                answer.record_type(),
            );
        }

        let bytes = match reply.to_vec() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, id = reply.id(), "Error encoding reply");
                return;
            }
        };
        trace!(?reply, ?origin, "Send response");
        if let Err(err) = self.socket.send_to(&bytes, origin).await {
            warn!(%err, %origin, "Error sending reply");
        }
    }
}
