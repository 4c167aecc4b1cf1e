use k8s_openapi::Resource as _;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::runtime::RawExtension;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("object is missing")]
    MissingObject,

    #[error("object has no {0}")]
    MissingTypeMeta(&'static str),

    #[error("unexpected object type {api_version}/{kind}, expected {expected}")]
    UnexpectedType {
        api_version: String,
        kind: String,
        expected: String,
    },

    #[error("invalid object: {0}")]
    InvalidObject(#[source] serde_json::Error),
}

/// Turns the raw object carried in an admission request into a typed Pod.
pub trait PodDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Pod, DecodeError>;

    fn decode_extension(&self, object: Option<&RawExtension>) -> Result<Pod, DecodeError> {
        match object {
            None | Some(RawExtension(serde_json::Value::Null)) => Err(DecodeError::MissingObject),
            Some(RawExtension(value)) => {
                let raw = serde_json::to_vec(value).map_err(DecodeError::InvalidObject)?;
                self.decode(&raw)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMeta {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

/// Decodes JSON encoded `v1/Pod` objects, rejecting any other `apiVersion`/`kind`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonPodDecoder;

impl PodDecoder for JsonPodDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Pod, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::MissingObject);
        }
        let type_meta: TypeMeta = serde_json::from_slice(raw).map_err(DecodeError::InvalidObject)?;
        let api_version = type_meta
            .api_version
            .filter(|v| !v.is_empty())
            .ok_or(DecodeError::MissingTypeMeta("apiVersion"))?;
        let kind = type_meta
            .kind
            .filter(|k| !k.is_empty())
            .ok_or(DecodeError::MissingTypeMeta("kind"))?;

        if api_version != Pod::API_VERSION || kind != Pod::KIND {
            return Err(DecodeError::UnexpectedType {
                api_version,
                kind,
                expected: format!("{}/{}", Pod::API_VERSION, Pod::KIND),
            });
        }

        serde_json::from_slice(raw).map_err(DecodeError::InvalidObject)
    }
}
