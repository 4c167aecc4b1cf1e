use k8s_openapi::api::core::v1::{Container, Pod};
use tracing::{debug, info};

pub const DEFAULT_MAX_ENV_VARS: usize = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied { container: String, env_vars: usize },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Rejects Pods where a container declares more than `max_env_vars` environment variables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvVarPolicy {
    pub max_env_vars: usize,
}

impl Default for EnvVarPolicy {
    fn default() -> Self {
        Self {
            max_env_vars: DEFAULT_MAX_ENV_VARS,
        }
    }
}

impl EnvVarPolicy {
    pub fn new(max_env_vars: usize) -> Self {
        Self { max_env_vars }
    }

    /// Containers are checked in declaration order and the first offender decides.
    pub fn evaluate(&self, pod: &Pod) -> Verdict {
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        containers
            .iter()
            .find_map(|container| {
                debug!(container = %container.name, "checking container");
                let env_vars = env_var_count(container);
                (env_vars > self.max_env_vars).then(|| {
                    info!(
                        container = %container.name,
                        env_vars,
                        max_env_vars = self.max_env_vars,
                        "container has environment variables"
                    );
                    Verdict::Denied {
                        container: container.name.clone(),
                        env_vars,
                    }
                })
            })
            .unwrap_or(Verdict::Allowed)
    }
}

fn env_var_count(container: &Container) -> usize {
    container.env.as_ref().map_or(0, Vec::len)
}
