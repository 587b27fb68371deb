//! Typed wrappers over [`ClusterClient`]

use crate::client::ClusterClient;
use crate::error::Result;
use hnc_types::{DynamicObject, Resource};

pub async fn get<K: Resource, C: ClusterClient + ?Sized>(
    client: &C,
    namespace: Option<&str>,
    name: &str,
) -> Result<K> {
    let obj = client.get(&K::api_resource(), namespace, name).await?;
    Ok(obj.into_typed()?)
}

pub async fn get_opt<K: Resource, C: ClusterClient + ?Sized>(
    client: &C,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<K>> {
    match client.get_opt(&K::api_resource(), namespace, name).await? {
        Some(obj) => Ok(Some(obj.into_typed()?)),
        None => Ok(None),
    }
}

pub async fn list<K: Resource, C: ClusterClient + ?Sized>(
    client: &C,
    namespace: Option<&str>,
) -> Result<Vec<K>> {
    client
        .list(&K::api_resource(), namespace)
        .await?
        .into_iter()
        .map(|obj| obj.into_typed().map_err(Into::into))
        .collect()
}

pub async fn create<K: Resource, C: ClusterClient + ?Sized>(client: &C, object: &K) -> Result<K> {
    let created = client
        .create(&K::api_resource(), DynamicObject::from_typed(object)?)
        .await?;
    Ok(created.into_typed()?)
}

pub async fn update<K: Resource, C: ClusterClient + ?Sized>(client: &C, object: &K) -> Result<K> {
    let updated = client
        .update(&K::api_resource(), DynamicObject::from_typed(object)?)
        .await?;
    Ok(updated.into_typed()?)
}

pub async fn delete<K: Resource, C: ClusterClient + ?Sized>(
    client: &C,
    namespace: Option<&str>,
    name: &str,
) -> Result<()> {
    client.delete(&K::api_resource(), namespace, name).await
}
