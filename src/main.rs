use anyhow::Context as _;
use capacity_webhook::{
    admit::PodReviewer,
    cluster::{KubeCluster, NodeInventory},
    patch,
};
use clap::Parser;
use k8s_openapi::{
    api::{
        admissionregistration::v1::{
            MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
            WebhookClientConfig,
        },
        core::v1::Pod,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ByteString,
};
use std::{path::PathBuf, time::Duration};

const WEBHOOK_NAME: &str = "capacity-webhook";

#[derive(clap::Args, Debug)]
struct ArgsExplain {
    /// Pod name
    pod: String,
    #[arg(short, long, default_value = "default")]
    namespace: String,
    /// Abandon cluster lookups after this many milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct ArgsManifest {
    /// Service the webhook is exposed through
    #[arg(long, default_value = WEBHOOK_NAME)]
    service: String,
    #[arg(long, default_value = "kube-system")]
    namespace: String,
    #[arg(long, default_value_t = 443)]
    port: i32,
    /// PEM bundle the API server should trust when calling the webhook
    #[arg(long)]
    ca_file: Option<PathBuf>,
    #[arg(long, default_value = "Ignore", value_parser = ["Ignore", "Fail"])]
    failure_policy: String,
}

#[derive(Parser, Debug)]
#[command(name = "capacity-ctl", about = "Operator tooling for the capacity webhook")]
enum Args {
    /// Count spot and on-demand nodes
    Census,
    /// Show the placement the webhook would give to an existing Pod
    Explain(ArgsExplain),
    /// Print the MutatingWebhookConfiguration registering the webhook
    Manifest(ArgsManifest),
}

async fn census() -> anyhow::Result<()> {
    let cluster = KubeCluster::try_default().await?;
    let census = cluster.census().await?;
    println!("spot:      {}", census.spot);
    println!("on-demand: {}", census.on_demand);
    Ok(())
}

async fn explain(args: ArgsExplain) -> anyhow::Result<()> {
    let cluster = KubeCluster::try_default().await?;
    let pods = kube::Api::<Pod>::namespaced(cluster.client().clone(), &args.namespace);
    let pod = pods
        .get(&args.pod)
        .await
        .with_context(|| format!("failed to get pod {}/{}", args.namespace, args.pod))?;

    let deadline = tokio::time::Instant::now() + Duration::from_millis(args.timeout_ms);
    let assessment = PodReviewer::new(&cluster, deadline)
        .assess(&pod, &args.namespace)
        .await;

    let workload = &assessment.workload;
    println!(
        "workload:  {:?} {}",
        workload.kind,
        workload.name.as_deref().unwrap_or("-")
    );
    println!("replicas:  {}", workload.replicas);
    match assessment.census {
        Some(c) => println!("nodes:     spot={} on-demand={}", c.spot, c.on_demand),
        None => println!("nodes:     not consulted"),
    }
    let placement = &assessment.placement;
    println!("class:     {}", placement.class);
    println!("maxSkew:   {}", placement.max_skew);
    println!("selector:  {}", serde_json::to_string(&placement.selector)?);

    let patch = patch::build(placement)?;
    println!("{}", serde_json::to_string_pretty(&patch)?);
    Ok(())
}

fn manifest(args: ArgsManifest) -> anyhow::Result<()> {
    let ca_bundle = match &args.ca_file {
        Some(path) => {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Some(ByteString(pem))
        }
        None => None,
    };
    let config = MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(WEBHOOK_NAME.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: format!("pods.{}.{}.svc", args.service, args.namespace),
            admission_review_versions: vec!["v1".to_string()],
            client_config: WebhookClientConfig {
                ca_bundle,
                service: Some(ServiceReference {
                    name: args.service.clone(),
                    namespace: args.namespace.clone(),
                    path: Some("/pods".to_string()),
                    port: Some(args.port),
                }),
                url: None,
            },
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec!["".to_string()]),
                api_versions: Some(vec!["v1".to_string()]),
                operations: Some(vec!["CREATE".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                scope: Some("Namespaced".to_string()),
            }]),
            failure_policy: Some(args.failure_policy.clone()),
            side_effects: "None".to_string(),
            timeout_seconds: Some(10),
            ..Default::default()
        }]),
    };
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    tracing::debug!(?args, "starting");
    match args {
        Args::Census => census().await,
        Args::Explain(args) => explain(args).await,
        Args::Manifest(args) => manifest(args),
    }
}
