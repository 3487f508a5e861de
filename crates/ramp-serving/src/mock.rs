//! In-memory service store for tests.
//!
//! Records every replace so tests can assert on what the rollout wrote,
//! and supports one-shot error injection for the failure paths.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::service::Service;
use crate::store::{ServiceStore, StoreError};

/// A [`ServiceStore`] backed by a map.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// `(project, name)` → `(region, service)`.
    services: BTreeMap<(String, String), (String, Service)>,
    regions: Vec<String>,
    replaced: Vec<Service>,
    fail_get: Option<StoreError>,
    fail_replace: Option<StoreError>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the regions reported by [`ServiceStore::list_regions`].
    pub fn with_regions(self, regions: &[&str]) -> Self {
        self.inner.lock().unwrap().regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Add a service to the store.
    pub fn insert(&self, project: &str, region: &str, service: Service) {
        let key = (project.to_string(), service.metadata.name.clone());
        self.inner
            .lock()
            .unwrap()
            .services
            .insert(key, (region.to_string(), service));
    }

    /// Make the next `get_service` fail with `err`.
    pub fn fail_next_get(&self, err: StoreError) {
        self.inner.lock().unwrap().fail_get = Some(err);
    }

    /// Make the next `replace_service` fail with `err`.
    pub fn fail_next_replace(&self, err: StoreError) {
        self.inner.lock().unwrap().fail_replace = Some(err);
    }

    /// Every service passed to `replace_service`, oldest first.
    pub fn replaced(&self) -> Vec<Service> {
        self.inner.lock().unwrap().replaced.clone()
    }

    /// Number of successful replaces.
    pub fn replace_count(&self) -> usize {
        self.inner.lock().unwrap().replaced.len()
    }
}

/// Check whether a service's labels match a `key=value` selector.
///
/// A selector without `=` matches on key presence alone.
fn matches_selector(service: &Service, selector: &str) -> bool {
    match selector.split_once('=') {
        Some((key, value)) => service.metadata.labels.get(key).map(String::as_str) == Some(value),
        None => service.metadata.labels.contains_key(selector),
    }
}

#[async_trait]
impl ServiceStore for InMemoryStore {
    async fn get_service(&self, project: &str, name: &str) -> Result<Service, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_get.take() {
            return Err(err);
        }
        inner
            .services
            .get(&(project.to_string(), name.to_string()))
            .map(|(_, svc)| svc.clone())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn replace_service(
        &self,
        project: &str,
        name: &str,
        service: &Service,
    ) -> Result<Service, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_replace.take() {
            return Err(err);
        }
        let key = (project.to_string(), name.to_string());
        match inner.services.get_mut(&key) {
            Some((_, stored)) => {
                *stored = service.clone();
            }
            None => return Err(StoreError::NotFound(name.to_string())),
        }
        inner.replaced.push(service.clone());
        Ok(service.clone())
    }

    async fn list_services(
        &self,
        project: &str,
        region: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .services
            .iter()
            .filter(|((p, _), (r, svc))| {
                p == project && r == region && matches_selector(svc, label_selector)
            })
            .map(|(_, (_, svc))| svc.clone())
            .collect())
    }

    async fn list_regions(&self, _project: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().unwrap().regions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeled_service(name: &str, key: &str, value: &str) -> Service {
        let mut svc = Service::default();
        svc.metadata.name = name.to_string();
        svc.metadata.labels.insert(key.to_string(), value.to_string());
        svc
    }

    #[tokio::test]
    async fn get_and_replace() {
        let store = InMemoryStore::new();
        store.insert("proj", "us-east1", labeled_service("svc", "team", "backend"));

        let mut svc = store.get_service("proj", "svc").await.unwrap();
        svc.set_annotation("k", "v");
        store.replace_service("proj", "svc", &svc).await.unwrap();

        assert_eq!(store.replace_count(), 1);
        let fetched = store.get_service("proj", "svc").await.unwrap();
        assert_eq!(fetched.annotation("k"), Some("v"));
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_service("proj", "nope").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_region_and_selector() {
        let store = InMemoryStore::new();
        store.insert("proj", "us-east1", labeled_service("a", "rollout", "gradual"));
        store.insert("proj", "us-east1", labeled_service("b", "rollout", "off"));
        store.insert("proj", "europe-west1", labeled_service("c", "rollout", "gradual"));

        let matched = store
            .list_services("proj", "us-east1", "rollout=gradual")
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].metadata.name, "a");
    }

    #[tokio::test]
    async fn error_injection_is_one_shot() {
        let store = InMemoryStore::new();
        store.insert("proj", "us-east1", labeled_service("svc", "k", "v"));
        store.fail_next_get(StoreError::Transient("boom".to_string()));

        assert!(store.get_service("proj", "svc").await.is_err());
        assert!(store.get_service("proj", "svc").await.is_ok());
    }
}
