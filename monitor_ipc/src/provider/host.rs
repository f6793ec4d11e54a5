use super::{StopReason, TunnelProvider};
use crate::error::ProviderError;
use crate::router::Router;
use crate::transport::ProviderListener;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Run `provider` behind `listener` until `shutdown` is cancelled.
///
/// The provider registers its handlers, is configured with
/// `user_configuration` and started before the first connection is
/// accepted, and is stopped once the listener shuts down.
pub async fn serve_provider(
    provider: Arc<dyn TunnelProvider>,
    listener: ProviderListener,
    user_configuration: Option<Vec<u8>>,
    shutdown: CancellationToken,
) -> Result<(), ProviderError> {
    let router = Arc::new(Router::new());
    provider.register_handlers(&router);

    info!("Configuring tunnel provider...");
    if let Err(e) = provider.configure(user_configuration.as_deref()).await {
        error!("Tunnel provider configuration failed: {}", e);
        return Err(e.into());
    }
    if let Err(e) = provider.start(None).await {
        error!("Tunnel provider failed to start: {}", e);
        return Err(e);
    }
    info!("Tunnel provider started");

    match listener.serve(router, shutdown).await {
        Ok(()) => {
            provider.stop(StopReason::UserInitiated).await;
            info!("Tunnel provider stopped");
            Ok(())
        }
        Err(e) => {
            error!("Tunnel provider listener failed: {}", e);
            provider.stop(StopReason::ProviderFailed).await;
            Err(e.into())
        }
    }
}
