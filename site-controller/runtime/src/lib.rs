#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use site_controller_core as core;
pub use site_controller_k8s_api as k8s;
pub use site_controller_k8s_index as index;
pub use site_controller_k8s_status as status;

mod args;
mod client;
pub mod connector_remove;
mod context;
pub mod expose;
mod retry;
pub mod router;

pub use self::{
    args::Args,
    client::KubeSiteClient,
    connector_remove::{remove_connector, KubeRouterDeployment, RemoveOptions},
    context::KubeContext,
    retry::retry_on_conflict,
};
