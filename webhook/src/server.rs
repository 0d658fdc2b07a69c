use crate::{
    admit::{self, PodReviewer},
    cluster::Cluster,
    config::WebhookConfig,
    telemetry::{self, ReplicaSink},
    typings::{AdmissionReviewRequest, AdmissionReviewResponse, Decision, Scheme},
};
use anyhow::Context as _;
use rocket::{
    data::{Data, ToByteUnit},
    fairing::AdHoc,
    figment::Figment,
    http::Status,
    request::{self, FromRequest, Request},
    response::Responder,
    serde::json::Json,
    Build, Rocket, State,
};
use std::sync::Arc;
use tracing::Instrument as _;

/// State shared by all admission handlers. Nothing in it is mutated after
/// startup apart from the replica sink's channel.
pub struct Webhook {
    scheme: Scheme,
    cluster: Arc<dyn Cluster>,
    config: WebhookConfig,
    replicas: ReplicaSink,
}

impl Webhook {
    async fn decode(&self, body: Data<'_>) -> anyhow::Result<AdmissionReviewRequest> {
        let body = body
            .open(self.config.body_limit_kib.kibibytes())
            .into_bytes()
            .await
            .context("failed to read request body")?;
        anyhow::ensure!(body.is_complete(), "request body exceeds size limit");
        self.scheme.decode(&body.into_inner())
    }

    fn deadline(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.config.lookup_timeout()
    }
}

struct AnyhowResponder(anyhow::Error);

impl From<anyhow::Error> for AnyhowResponder {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for AnyhowResponder {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        tracing::error!("{:#}", self.0);
        (Status::BadRequest, format!("{:#}", self.0)).respond_to(request)
    }
}

type Resp<T> = Result<Json<T>, AnyhowResponder>;

/// Request guard admitting only `application/json` bodies.
struct JsonBody;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for JsonBody {
    type Error = String;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.content_type() {
            Some(ct) if ct.is_json() => request::Outcome::Success(JsonBody),
            other => {
                let got = other.map(|ct| ct.to_string()).unwrap_or_default();
                tracing::error!("contentType={}, expect application/json", got);
                request::Outcome::Error((Status::UnsupportedMediaType, got))
            }
        }
    }
}

#[rocket::get("/")]
fn health() -> &'static str {
    "OK"
}

#[rocket::post("/pods", data = "<body>")]
async fn pods(
    _json: JsonBody,
    body: Data<'_>,
    webhook: &State<Webhook>,
) -> Resp<AdmissionReviewResponse> {
    let review = webhook.decode(body).await?;
    let span = tracing::info_span!(
        "admit_pod",
        uid = review.request.uid.as_str(),
        namespace = review.request.namespace.as_deref().unwrap_or_default(),
        name = review.request.name.as_deref().unwrap_or_default()
    );
    let decision = async {
        let reviewer = PodReviewer::new(webhook.cluster.as_ref(), webhook.deadline());
        Decision::from(reviewer.review(&review.request).await)
    }
    .instrument(span)
    .await;
    Ok(Json(review.respond(decision)))
}

#[rocket::post("/deployments", data = "<body>")]
async fn deployments(
    _json: JsonBody,
    body: Data<'_>,
    webhook: &State<Webhook>,
) -> Resp<AdmissionReviewResponse> {
    let review = webhook.decode(body).await?;
    let _span = tracing::info_span!(
        "admit_deployment",
        uid = review.request.uid.as_str(),
        name = review.request.name.as_deref().unwrap_or_default()
    )
    .entered();
    let decision = Decision::from(admit::review_deployment(&review.request, &webhook.replicas));
    Ok(Json(review.respond(decision)))
}

/// Builds the webhook server. Tunables are read from `figment`.
pub fn rocket(figment: Figment, cluster: Arc<dyn Cluster>) -> anyhow::Result<Rocket<Build>> {
    let config: WebhookConfig = figment
        .extract()
        .context("invalid webhook configuration")?;
    tracing::info!(?config, "webhook configuration");
    let (replicas, samples) = ReplicaSink::new(config.replica_sink_capacity);
    let webhook = Webhook {
        scheme: Scheme::new(),
        cluster,
        config,
        replicas,
    };
    Ok(rocket::custom(figment)
        .manage(webhook)
        .mount("/", rocket::routes![health, pods, deployments])
        .attach(AdHoc::on_liftoff("Replica sink", move |_| {
            Box::pin(async move {
                tokio::spawn(telemetry::drain(samples));
            })
        })))
}
