use crate::protocol::QueryKey;
use crate::resolver::response_cache::ResponseCache;
use crate::resolver::Resolver;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use tracing::{debug, warn};

/// Answers every question of a query message from the cache, falling through
/// to the resolver on a miss.
///
/// A question that fails to resolve is logged and left unanswered. The reply
/// still carries the answers of the other questions and a NOERROR code.
pub struct ProxyHandler<R> {
    resolver: R,
    cache: ResponseCache,
}

impl<R> ProxyHandler<R>
where
    R: Resolver,
{
    pub fn new(resolver: R, cache: ResponseCache) -> Self {
        Self { resolver, cache }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn handle(&self, request: &Message) -> Message {
        let mut reply = reply_to(request);

        for query in request.queries() {
            let key = QueryKey::new(query);

            if let Some(records) = self.cache.get(&key) {
                debug!(%key, answers = records.len(), "Cached answer");
                reply.add_answers(records);
                continue;
            }

            match self.resolver.query(query).await {
                Ok(mut records) => {
                    debug!(%key, answers = records.len(), "Resolved");
                    self.cache.put(key, &mut records);
                    reply.add_answers(records);
                }
                Err(err) => {
                    warn!(%key, %err, "Error resolving question");
                }
            }
        }

        reply
    }
}

/// Starts a reply to `request`: same ID, opcode and questions, recursion
/// available, NOERROR, empty answer section.
pub fn reply_to(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_checking_disabled(request.checking_disabled())
        .set_response_code(ResponseCode::NoError);
    reply.add_queries(request.queries().iter().cloned());
    reply
}
