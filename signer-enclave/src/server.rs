use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use aide::openapi::OpenApi;
use attestation_verifier::AttestationVerifier;
use axum::{serve::Listener, Extension, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_vsock::{VsockAddr, VsockListener, VsockStream, VMADDR_CID_ANY};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::custody::Custody;
use crate::routes;
use crate::types::Environment;

/// Builds the application router with its dependencies attached
pub fn router(
    environment: Environment,
    custody: Arc<Custody>,
    verifier: Arc<dyn AttestationVerifier>,
) -> Router {
    let mut openapi = OpenApi::default();

    routes::handler(&environment)
        .finish_api(&mut openapi)
        .layer(Extension(openapi))
        .layer(Extension(environment))
        .layer(Extension(custody))
        .layer(Extension(verifier))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
}

/// Listeners the server binds, `None` disables one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listeners {
    pub tcp: Option<SocketAddr>,
    pub vsock: Option<u32>,
}

impl Listeners {
    /// TCP on `0.0.0.0:PORT` unless disabled, vsock on `VSOCK_PORT` when set
    #[must_use]
    pub fn from_environment(environment: &Environment) -> Self {
        Self {
            tcp: environment
                .tcp_listener_enabled()
                .then(|| SocketAddr::from(([0, 0, 0, 0], environment.port()))),
            vsock: environment.vsock_port(),
        }
    }
}

/// Starts the server with the given environment and dependencies.
///
/// The same router is served on every enabled listener. All listeners stop
/// when `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if no listener is enabled, a listener fails to bind or a
/// server fails
pub async fn start(
    listeners: Listeners,
    environment: Environment,
    custody: Arc<Custody>,
    verifier: Arc<dyn AttestationVerifier>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if listeners.tcp.is_none() && listeners.vsock.is_none() {
        anyhow::bail!("No listener enabled, set VSOCK_PORT or enable the TCP listener");
    }

    let router = router(environment, custody, verifier);

    let tcp = match listeners.tcp {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!(
                "🔄 Attestation signer started on http://{}",
                listener.local_addr()?
            );
            Some(
                axum::serve(listener, router.clone().into_make_service())
                    .with_graceful_shutdown(shutdown.clone().cancelled_owned()),
            )
        }
        None => None,
    };

    let vsock = match listeners.vsock {
        Some(port) => {
            let listener =
                VsockIncoming(VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, port))?);
            tracing::info!("🔄 Attestation signer started on vsock port {port}");
            Some(
                axum::serve(listener, router.into_make_service())
                    .with_graceful_shutdown(shutdown.cancelled_owned()),
            )
        }
        None => None,
    };

    let tcp = async move {
        match tcp {
            Some(server) => server.await,
            None => Ok(()),
        }
    };
    let vsock = async move {
        match vsock {
            Some(server) => server.await,
            None => Ok(()),
        }
    };

    tokio::try_join!(tcp, vsock)?;
    Ok(())
}

/// vsock listener for the host proxy
pub struct VsockIncoming(VsockListener);

impl Listener for VsockIncoming {
    type Io = VsockStream;
    type Addr = VsockAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.0.accept().await {
                Ok(connection) => return connection,
                Err(e) => {
                    tracing::warn!("Failed to accept vsock connection: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.0.local_addr()
    }
}
