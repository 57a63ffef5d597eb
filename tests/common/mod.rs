#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, CNAME};
use hickory_proto::rr::{Name, RData, Record};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};

pub fn a_record(domain: &str, ttl: u32, address: Ipv4Addr) -> Record {
    Record::from_rdata(Name::from_ascii(domain).unwrap(), ttl, RData::A(A(address)))
}

pub fn cname_record(domain: &str, ttl: u32, target: &str) -> Record {
    Record::from_rdata(
        Name::from_ascii(domain).unwrap(),
        ttl,
        RData::CNAME(CNAME(Name::from_ascii(target).unwrap())),
    )
}

/// Authoritative-looking UDP nameserver answering from a fixed table
pub struct MockNameserver {
    pub addr: SocketAddr,
    queries: Arc<AtomicUsize>,
}

impl MockNameserver {
    pub async fn start(zone: Vec<(&str, Vec<Record>)>) -> Self {
        let zone: HashMap<String, Vec<Record>> = zone
            .into_iter()
            .map(|(domain, records)| (domain.to_string(), records))
            .collect();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let queries = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&queries);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let (size, origin) = socket.recv_from(&mut buf).await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let request = Message::from_vec(&buf[..size]).unwrap();

                let mut response = Message::new();
                response
                    .set_id(request.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_recursion_desired(request.recursion_desired())
                    .set_recursion_available(true);
                response.add_queries(request.queries().iter().cloned());

                let domain = request.queries()[0].name().to_ascii().to_ascii_lowercase();
                match zone.get(&domain) {
                    Some(records) => {
                        response.add_answers(records.iter().cloned());
                    }
                    None => {
                        response.set_response_code(ResponseCode::NXDomain);
                    }
                }

                socket
                    .send_to(&response.to_vec().unwrap(), origin)
                    .await
                    .unwrap();
            }
        });

        Self { addr, queries }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

/// A UDP socket that swallows everything, standing in for a dead nameserver
pub async fn silent_nameserver() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

type Respond = dyn Fn(&str) -> (u16, String) + Send + Sync;

#[derive(Clone)]
struct ApiState {
    respond: Arc<Respond>,
    requests: Arc<AtomicUsize>,
}

/// HTTP server standing in for the DoH JSON API. `respond` maps the `name`
/// query parameter to a status code and body.
pub struct MockApi {
    pub port: u16,
    requests: Arc<AtomicUsize>,
}

impl MockApi {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));

        let state = ApiState {
            respond: Arc::new(respond),
            requests: Arc::clone(&requests),
        };
        let app = Router::new()
            .route("/resolve", get(resolve))
            .with_state(state);
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self { port, requests }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn resolve(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let name = params.get("name").map(String::as_str).unwrap_or_default();
    let (status, body) = (state.respond)(name);
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

/// JSON body with a single answer
pub fn json_answer(name: &str, rtype: u16, ttl: u32, data: &str) -> String {
    format!(
        r#"{{"Status":0,"TC":false,"RD":true,"RA":true,"AD":false,"CD":false,"Question":[{{"name":"{name}","type":{rtype}}}],"Answer":[{{"name":"{name}","type":{rtype},"TTL":{ttl},"data":"{data}"}}]}}"#,
        name = name,
        rtype = rtype,
        ttl = ttl,
        data = data
    )
}
