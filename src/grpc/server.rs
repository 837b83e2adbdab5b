//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::turnstile::admission::v1::admission_service_server::AdmissionServiceServer;
use super::service::AdmissionServiceImpl;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::PolicyRegistry;

/// gRPC server for the admission service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The policies requests are evaluated against
    registry: Arc<PolicyRegistry>,
}

impl GrpcServer {
    /// Create a new gRPC server.
    pub fn new(addr: SocketAddr, registry: Arc<PolicyRegistry>) -> Self {
        Self { addr, registry }
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Bind the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_with_listener(listener, signal).await
    }

    /// Serve on an already-bound listener until `signal` resolves.
    pub async fn serve_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = AdmissionServiceImpl::new(self.registry);
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            "Starting gRPC server for AdmissionService"
        );

        Server::builder()
            .add_service(AdmissionServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TurnstileError::Grpc(e)
            })
    }
}
