use kube::api::{DeleteParams, ListParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, ResourceExt};

use crate::k8s::K8sError;
use crate::labels;

/// API group serving every registered custom resource kind.
pub const CUSTOM_GROUP: &str = "prsn.io";
/// API version of the custom resource kinds.
pub const CUSTOM_VERSION: &str = "v1";

/// Namespaced client for one custom resource kind registered at
/// `prsn.io/v1`.
///
/// Kinds are only known at runtime (they come from configuration), so this
/// speaks [`DynamicObject`] instead of a typed resource.
pub struct CustomResourceClient {
    api: Api<DynamicObject>,
    resource: ApiResource,
}

impl CustomResourceClient {
    /// Builds a client for `kind` (manifest notation, lowercase).
    pub fn namespaced(client: Client, namespace: &str, kind: &str) -> CustomResourceClient {
        let gvk = GroupVersionKind::gvk(CUSTOM_GROUP, CUSTOM_VERSION, &title_case(kind));
        let resource = ApiResource::from_gvk(&gvk);
        CustomResourceClient {
            api: Api::namespaced_with(client, namespace, &resource),
            resource,
        }
    }

    /// The Kubernetes kind this client addresses.
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// Creates or replaces the resource.
    ///
    /// Unlike the typed client, the `resourceVersion` carried by `resource`
    /// is written as-is: updates rely on the version the reader observed so
    /// a concurrent change is rejected by the server, and a brand-new object
    /// carries none at all.
    pub async fn apply(&self, resource: &DynamicObject) -> Result<(), K8sError> {
        let name = resource.name_any();
        if self.api.get_opt(&name).await?.is_some() {
            self.api
                .replace(&name, &PostParams::default(), resource)
                .await?;
        } else {
            self.api.create(&PostParams::default(), resource).await?;
        }
        Ok(())
    }

    pub async fn destroy(&self, name: &str) -> Result<(), K8sError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<DynamicObject>, K8sError> {
        let params = ListParams::default().labels(&labels::selector());
        Ok(self.api.list(&params).await?.items)
    }
}

/// Uppercases the first character, mapping manifest notation (`mongo`) onto
/// the Kubernetes kind (`Mongo`).
pub fn title_case(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
