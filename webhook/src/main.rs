use anyhow::Context as _;
use capacity_webhook::{cluster::KubeCluster, server, tls::SelfSigned};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};

#[derive(Parser, Debug)]
#[command(about = "Mutating admission webhook for spot / on-demand placement hints")]
struct Args {
    /// File containing the x509 certificate for HTTPS (CA cert, if any,
    /// concatenated after the server cert)
    #[arg(long, env = "TLS_CERT_FILE", requires = "tls_private_key_file")]
    tls_cert_file: Option<PathBuf>,
    /// File containing the x509 private key matching --tls-cert-file
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE", requires = "tls_cert_file")]
    tls_private_key_file: Option<PathBuf>,
    /// Extra subject alt names for the self-signed certificate
    #[arg(long)]
    tls_san: Vec<String>,
    #[arg(long, env = "WEBHOOK_ADDRESS", default_value = "0.0.0.0")]
    address: String,
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = 443)]
    port: u16,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut figment = rocket::Config::figment()
        .merge(("address", args.address.as_str()))
        .merge(("port", args.port));

    let self_signed = match (&args.tls_cert_file, &args.tls_private_key_file) {
        (Some(cert), Some(key)) => {
            tracing::info!(cert = %cert.display(), key = %key.display(), "using provided certificate");
            figment = figment.merge(("tls.certs", cert)).merge(("tls.key", key));
            None
        }
        _ => {
            tracing::info!("no cert/key files provided, generating self-signed certificate");
            let tls = SelfSigned::generate(&args.tls_san)?;
            figment = figment
                .merge(("tls.certs", &tls.cert_path))
                .merge(("tls.key", &tls.key_path));
            Some(tls)
        }
    };

    let cluster = KubeCluster::try_default().await?;
    let rocket = server::rocket(figment, Arc::new(cluster)).context("failed to build server")?;
    rocket
        .launch()
        .await
        .map_err(|e| anyhow::anyhow!("webhook server failed: {}", e))?;
    drop(self_signed);
    Ok(())
}
