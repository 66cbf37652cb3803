//! Thin Kubernetes client layer used by the applier and the reaper.
//!
//! Consumers get create-or-update (`apply`) semantics with server-side
//! resource versions preserved, and listing scoped to the operator's label
//! selector. Custom resources go through [`custom::CustomResourceClient`]
//! since their kind is only known at runtime.

pub mod custom;

use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::labels;

/// Errors emitted by the Kubernetes client layer.
#[derive(Debug, Error)]
pub enum K8sError {
    /// An error returned by the [`kube`] client when talking to the API
    /// server.
    #[error("an error occurred with kube when talking to the cluster: {0}")]
    Kube(#[from] kube::Error),

    /// A serialization error while building or parsing a resource.
    #[error("an error occurred in serde when building a resource: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Namespaced client for one typed resource kind.
///
/// One generic implementation covers every kind the operator manages;
/// [`kube::Api`] carries the type information.
pub struct ResourceClient<K> {
    api: Api<K>,
}

impl<K> ResourceClient<K>
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + std::fmt::Debug,
    K::DynamicType: Default,
{
    pub fn namespaced(client: Client, namespace: &str) -> ResourceClient<K> {
        ResourceClient {
            api: Api::namespaced(client, namespace),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<K>, K8sError> {
        Ok(self.api.get_opt(name).await?)
    }

    pub async fn exists(&self, name: &str) -> Result<bool, K8sError> {
        Ok(self.api.get_opt(name).await?.is_some())
    }

    /// Creates the resource, or updates it in place when it already exists.
    ///
    /// On update the observed `resourceVersion` is copied onto the new
    /// object so the write is an optimistic-concurrency replace; a 409 is
    /// surfaced to the caller and retried on the next tick.
    pub async fn apply(&self, resource: &K) -> Result<(), K8sError> {
        let name = resource.name_any();
        match self.api.get_opt(&name).await? {
            Some(current) => {
                let mut desired = resource.clone();
                desired.meta_mut().resource_version = current.resource_version();
                self.api
                    .replace(&name, &PostParams::default(), &desired)
                    .await?;
            }
            None => {
                self.api.create(&PostParams::default(), resource).await?;
            }
        }
        Ok(())
    }

    /// Deletes the named resource. Deleting an object that is already gone
    /// is not an error.
    pub async fn destroy(&self, name: &str) -> Result<(), K8sError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists the objects of this kind owned by the operator.
    pub async fn list(&self) -> Result<Vec<K>, K8sError> {
        let params = ListParams::default().labels(&labels::selector());
        Ok(self.api.list(&params).await?.items)
    }
}
