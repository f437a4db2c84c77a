use std::pin::Pin;

use futures::Stream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::rpc_proto::backend_server::Backend;
use crate::rpc_proto::{Request as RpcRequest, Response as RpcResponse};

use super::registry::SessionRegistry;

const REPLY_PREFIX: &[u8] = b"Resp ";

/// Stand-in business logic: answers every request with `"Resp "` plus its payload.
#[derive(Debug, Clone)]
pub struct EchoService {
    sessions: SessionRegistry,
}

impl EchoService {
    pub fn new(sessions: SessionRegistry) -> Self {
        Self { sessions }
    }
}

fn reply(request: &RpcRequest) -> RpcResponse {
    RpcResponse {
        r#type: 0,
        payload: [REPLY_PREFIX, request.payload.as_slice()].concat(),
    }
}

#[tonic::async_trait]
impl Backend for EchoService {
    type SessionStream = Pin<Box<dyn Stream<Item = Result<RpcResponse, Status>> + Send>>;

    async fn session(
        &self,
        request: Request<Streaming<RpcRequest>>,
    ) -> Result<Response<Self::SessionStream>, Status> {
        let peer = request.remote_addr();
        let mut inbound = request.into_inner();
        let ticket = self.sessions.enter();

        debug!(peer = ?peer, active = self.sessions.active(), "RPC session opened");

        let output = async_stream::stream! {
            let _ticket = ticket;
            loop {
                match inbound.message().await {
                    Ok(Some(request)) => yield Ok(reply(&request)),
                    Ok(None) => break,
                    Err(status) => {
                        warn!(peer = ?peer, error = %status, "RPC session stream error");
                        yield Err(status);
                        break;
                    }
                }
            }
            debug!(peer = ?peer, "RPC session finished");
        };

        Ok(Response::new(Box::pin(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_prefixes_payload() {
        let response = reply(&RpcRequest {
            r#type: 1,
            payload: b"ping".to_vec(),
        });
        assert_eq!(response.r#type, 0);
        assert_eq!(response.payload, b"Resp ping");
    }

    #[test]
    fn test_reply_to_empty_payload() {
        let response = reply(&RpcRequest::default());
        assert_eq!(response.payload, b"Resp ");
    }
}
