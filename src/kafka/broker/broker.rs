use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::OnceCell;

use super::capabilities::{BrokerCapabilities, RequestFactory};
use super::connection::{TcpConnection, Transport};
use super::types::BrokerAddress;
use crate::error::{Error, Result};
use crate::kafka::messages::{
    ApiVersionsRequest, OffsetCommitRequest, OffsetCommitResponse, ProduceRequest,
    ProduceResponse, RequestKind, ResponseKind,
};

/// One node of the cluster.
///
/// The ApiVersions handshake runs lazily on first use and its outcome is
/// shared by every later call. A failed handshake leaves the cell empty, so
/// the next caller tries again.
pub struct KafkaBroker {
    address: BrokerAddress,
    node_id: i32,
    connection: Arc<dyn Transport>,
    request_factory: OnceCell<RequestFactory>,
}

impl KafkaBroker {
    pub async fn connect(
        address: BrokerAddress,
        node_id: i32,
        client_id: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let connection = TcpConnection::connect(address.clone(), client_id, request_timeout).await?;
        Ok(Self::with_transport(address, node_id, Arc::new(connection)))
    }

    pub fn with_transport(address: BrokerAddress, node_id: i32, connection: Arc<dyn Transport>) -> Self {
        Self {
            address,
            node_id,
            connection,
            request_factory: OnceCell::new(),
        }
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    pub async fn request_factory(&self) -> Result<&RequestFactory> {
        self.request_factory.get_or_try_init(|| self.negotiate()).await
    }

    async fn negotiate(&self) -> Result<RequestFactory> {
        debug!("Negotiating api versions with broker {} ({})", self.node_id, self.address);

        let response = match self.connection.send(ApiVersionsRequest::new().into()).await? {
            Some(ResponseKind::ApiVersions(response)) => response,
            _ => return Err(Error::UnexpectedResponse),
        };

        if !response.error_code.is_none() {
            error!(
                "Broker {} rejected api versions request: {}",
                self.address, response.error_code
            );
            return Err(Error::Negotiation(response.error_code));
        }

        let capabilities = BrokerCapabilities::from_response(&response);
        info!(
            "Broker {} ({}) supports {} api keys",
            self.node_id,
            self.address,
            capabilities.len()
        );
        Ok(RequestFactory::new(capabilities))
    }

    pub async fn send(&self, request: RequestKind) -> Result<Option<ResponseKind>> {
        self.connection.send(request).await
    }

    /// `None` when the request was sent with acks = 0.
    pub async fn produce(&self, request: ProduceRequest) -> Result<Option<ProduceResponse>> {
        match self.send(request.into()).await? {
            Some(ResponseKind::Produce(response)) => Ok(Some(response)),
            Some(_) => Err(Error::UnexpectedResponse),
            None => Ok(None),
        }
    }

    pub async fn commit_offsets(&self, request: OffsetCommitRequest) -> Result<OffsetCommitResponse> {
        match self.send(request.into()).await? {
            Some(ResponseKind::OffsetCommit(response)) => Ok(response),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn close(&self) {
        debug!("Closing connection to broker {}", self.address);
        self.connection.close().await;
    }
}
