#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod binding;
pub mod labels;
pub mod pod;

pub use self::{
    binding::{BindingStatus, Connector, ConnectorSpec, Listener, ListenerSpec},
    labels::{Labels, Selector},
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::Deployment,
        core::v1::{ConfigMap, Pod, PodSpec, PodStatus, Secret, Service, ServicePort, ServiceSpec},
    },
    apimachinery::pkg::{apis::meta::v1::Time, util::intstr::IntOrString},
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

/// Returns true if the error is the API server rejecting a write against a stale resource
/// version.
pub fn is_conflict(error: &Error) -> bool {
    matches!(error, Error::Api(response) if response.code == 409)
}

/// Returns true if the error is the API server reporting that the resource doesn't exist.
pub fn is_not_found(error: &Error) -> bool {
    matches!(error, Error::Api(response) if response.code == 404)
}
