use crate::decoder::{JsonPodDecoder, PodDecoder};
use crate::error::{Error, Result};
use crate::gateway::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use crate::policy::{EnvVarPolicy, Verdict};
use crate::review::{AdmissionResponse, AdmissionReview, GroupVersionResource};

use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Answers Pod admission reviews delivered through the API gateway.
///
/// Holds no per-request state, so a single instance can serve concurrent invocations.
#[derive(Clone, Debug, Default)]
pub struct AdmissionWebhookHandler<D = JsonPodDecoder> {
    decoder: D,
    policy: EnvVarPolicy,
}

impl<D: PodDecoder> AdmissionWebhookHandler<D> {
    pub fn new(decoder: D, policy: EnvVarPolicy) -> Self {
        Self { decoder, policy }
    }

    pub fn policy(&self) -> &EnvVarPolicy {
        &self.policy
    }

    pub fn handle(&self, event: &ApiGatewayProxyRequest) -> Result<ApiGatewayProxyResponse> {
        info!(request_id = event.request_id(), "processing admission request");
        let body = event.decoded_body()?;

        let review = self.review(&body).inspect_err(|e| {
            warn!(
                request_id = event.request_id(),
                error_type = e.error_type(),
                error = %e,
                "rejecting admission request"
            );
        })?;

        let body = serde_json::to_string(&review).map_err(|e| {
            Error::SerializationError("failed to serialize admission review".to_string(), e)
        })?;
        Ok(ApiGatewayProxyResponse::json(200, body))
    }

    /// Decode `body`, evaluate the Pod it carries and return the review to send back.
    pub fn review(&self, body: &str) -> Result<AdmissionReview> {
        debug!(body, "received admission review");
        if body.is_empty() {
            return Err(Error::EmptyBody);
        }

        let review: AdmissionReview = serde_json::from_str(body).map_err(Error::DecodeEnvelope)?;
        let request = review.request.as_ref().ok_or(Error::MissingRequest)?;

        if request.resource != GroupVersionResource::pods() {
            return Err(Error::UnsupportedResource(request.resource.clone()));
        }

        let pod = self
            .decoder
            .decode_extension(request.object.as_ref())
            .map_err(Error::DecodeObject)?;
        debug!(pod = %pod.name_any(), "decoded pod");

        let uid = request.uid.clone();
        let response = match self.policy.evaluate(&pod) {
            Verdict::Allowed => {
                debug!(uid = %uid, pod = %pod.name_any(), "pod allowed");
                AdmissionResponse::allow(uid)
            }
            Verdict::Denied {
                container,
                env_vars,
            } => {
                info!(
                    uid = %uid,
                    pod = %pod.name_any(),
                    container = %container,
                    env_vars,
                    "pod denied"
                );
                AdmissionResponse::deny(uid)
            }
        };

        Ok(review.respond(response))
    }
}
