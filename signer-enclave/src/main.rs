use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use attestation_verifier::{AttestationVerifier, NitroAttestationVerifier};
use aws_sdk_kms::Client as KmsClient;
use aws_sdk_sts::Client as StsClient;
use signer_enclave::{
    custody::{AttestedArtifacts, Custody, FileArtifactStore, KeyCustodian},
    identity::StsIdentityResolver,
    kms::AttestedKmsClient,
    nsm::{NitroSecureModule, SecureModule},
    server::{self, Listeners},
    types::Environment,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let env = Environment::from_env();
    init_tracing(&env);

    info!("Starting Attestation Signer in {:?} environment", env);

    let verifier: Arc<dyn AttestationVerifier> = match env.nitro_root_certificate_override() {
        Some(path) => {
            let root_certificate = tokio::fs::read(&path)
                .await
                .context("Failed to read the Nitro root certificate override")?;
            warn!("Trusting root certificate override at {}", path.display());
            Arc::new(NitroAttestationVerifier::new(&root_certificate)?)
        }
        None => Arc::new(NitroAttestationVerifier::aws()?),
    };

    info!("✅ Loaded Nitro root certificate");

    let secure_module: Arc<dyn SecureModule> = Arc::new(NitroSecureModule::open()?);
    let pcr0 = secure_module.describe_pcr(0)?;

    info!(
        pcr0 = %hex::encode(&pcr0.value),
        locked = pcr0.locked,
        "✅ Opened secure module"
    );

    let aws_config = env.aws_config().await;
    let kms = Arc::new(AttestedKmsClient::new(
        KmsClient::new(&aws_config),
        secure_module.as_ref(),
    )?);
    let identity = Arc::new(StsIdentityResolver::new(StsClient::new(&aws_config)));

    info!("✅ Initialized attested KMS channel");

    let store = Arc::new(FileArtifactStore::open(env.attestations_directory()).await?);
    let artifacts = AttestedArtifacts::new(store, secure_module, verifier.clone());
    let custody = Arc::new(Custody::new(KeyCustodian::new(artifacts, kms, identity)));

    // No requests are served with a partially resolved identity
    let signer = custody
        .signer()
        .await
        .map_err(|e| anyhow!("Custody bootstrap failed: {e}"))?;

    info!("✅ Custody key ready, signing as {}", signer.address());

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down Attestation Signer...");
        signal_token.cancel();
    });

    if let Err(e) = server::start(
        Listeners::from_environment(&env),
        env,
        custody,
        verifier,
        shutdown_token,
    )
    .await
    {
        error!("Server error: {e}");
        return Err(e);
    }

    info!("✅ Attestation Signer shutdown complete");
    Ok(())
}

fn init_tracing(environment: &Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match environment {
        Environment::Production | Environment::Staging => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        Environment::Development => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
