use crate::{
    admission::{Admission, Decision, Mode, NamespaceLookup, Request as AdmitRequest},
    k8s::{Api, Namespace},
};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Serves the mutating and validating webhooks.
pub struct AdmissionService<L = Api<Namespace>> {
    admission: Arc<Admission<L>>,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    requests: Family<Labels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    kind: String,
    mode: String,
    result: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl AdmissionService ===

impl<L> Clone for AdmissionService<L> {
    fn clone(&self) -> Self {
        Self {
            admission: self.admission.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<L> tower::Service<Request<hyper::body::Incoming>> for AdmissionService<L>
where
    L: NamespaceLookup + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let mode = match route(req.method(), req.uri().path()) {
            Some(mode) => mode,
            None => return Box::pin(future::ok(not_found())),
        };

        let svc = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: AdmissionReview = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    svc.admit(req, mode).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<L: NamespaceLookup> AdmissionService<L> {
    pub fn new(admission: Arc<Admission<L>>, metrics: AdmissionMetrics) -> Self {
        Self { admission, metrics }
    }

    async fn admit(&self, req: AdmissionRequest, mode: Mode) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let request = match AdmitRequest::try_from(&req) {
            Ok(request) => request,
            Err(error) => {
                info!(%error, "Failed to decode admission request");
                return rsp.deny(error);
            }
        };

        let decision = self.admission.admit(&request, mode).await;
        self.metrics.record(&request, mode, &decision);

        match decision {
            Decision::Allow => rsp,
            Decision::Deny(reason) => rsp.deny(reason),
            Decision::Patch(patch) => match rsp.clone().with_patch(patch) {
                Ok(rsp) => rsp,
                Err(error) => {
                    warn!(%error, "Failed to encode patch");
                    rsp.deny(error)
                }
            },
        }
    }
}

fn route(method: &http::Method, path: &str) -> Option<Mode> {
    if method != http::Method::POST {
        return None;
    }
    match path {
        "/mutate" => Some(Mode::Mutate),
        "/validate" => Some(Mode::Validate),
        _ => None,
    }
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body(Body::default())
        .expect("not found response must be valid")
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let requests = Family::default();
        prom.register(
            "requests",
            "Count of admission requests by resource kind, webhook, and result",
            requests.clone(),
        );
        Self { requests }
    }

    fn record(&self, req: &AdmitRequest, mode: Mode, decision: &Decision) {
        self.requests
            .get_or_create(&Labels {
                kind: req.kind.as_str().to_string(),
                mode: mode.as_str().to_string(),
                result: decision.as_str().to_string(),
            })
            .inc();
    }
}
