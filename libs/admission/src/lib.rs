pub mod decoder;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod policy;
pub mod review;
pub mod telemetry;

pub use decoder::{DecodeError, JsonPodDecoder, PodDecoder};
pub use error::{Error, Result};
pub use gateway::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
pub use handler::AdmissionWebhookHandler;
pub use policy::{EnvVarPolicy, Verdict};
