use es_provisioner::{config::Settings, es::EsProvisioner, index_controller as idx, shutdown};
use futures::StreamExt;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("es-provisioner starting up");

    let settings = Settings::from_env()?;
    info!(
        addresses = ?settings.es_addresses,
        retries = settings.retries,
        namespace = settings.watch_namespace.as_deref().unwrap_or("all namespaces"),
        "configuration loaded"
    );

    // In-flight sagas stop at their next step once this fires
    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());
    let es = EsProvisioner::connect(settings.es_options(), cancel.clone()).await?;

    let client = Client::try_default().await?;
    let ctx = Arc::new(idx::Ctx {
        client: client.clone(),
        es: Arc::new(es),
    });

    idx::controller(client, settings.watch_namespace.as_deref())
        .run(idx::reconcile, idx::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                tracing::warn!(error=?e, "index reconcile error");
            }
        })
        .await;

    info!("es-provisioner stopped");
    Ok(())
}
