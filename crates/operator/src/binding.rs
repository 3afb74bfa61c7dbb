//! Binding an Application to a ManagedService: the app gets the service's
//! credentials injected, the service records the app so it cannot be deleted
//! from under it.
use tracing::info;

use crate::{
    crd::{Application, ManagedService},
    error::{Error, Result},
    store::ObjectStore,
};

/// Idempotent. The service side is recorded first so the deletion guard is in
/// place before the application starts depending on the credentials. A service
/// that is already being deleted accepts no new bindings.
pub async fn bind<S: ObjectStore>(store: &S, namespace: &str, service: &str, app: &str) -> Result<()> {
    let mut svc = store
        .get::<ManagedService>(namespace, service)
        .await?
        .ok_or_else(|| Error::not_found("ManagedService", namespace, service))?;
    if svc.metadata.deletion_timestamp.is_some() {
        return Err(Error::ServiceDeleting(service.to_string()));
    }
    let mut application = store
        .get::<Application>(namespace, app)
        .await?
        .ok_or_else(|| Error::not_found("Application", namespace, app))?;

    let status = svc.status.get_or_insert_with(Default::default);
    if !status.bound_apps.iter().any(|a| a == app) {
        status.bound_apps.push(app.to_string());
        store.update_status(&svc).await?;
    }
    if !application.spec.services.iter().any(|s| s == service) {
        application.spec.services.push(service.to_string());
        store.replace(&application).await?;
    }
    info!(%namespace, %service, %app, "binding.bound");
    Ok(())
}

/// Idempotent; a missing application or service is treated as already unbound.
pub async fn unbind<S: ObjectStore>(store: &S, namespace: &str, service: &str, app: &str) -> Result<()> {
    if let Some(mut application) = store.get::<Application>(namespace, app).await? {
        let before = application.spec.services.len();
        application.spec.services.retain(|s| s != service);
        if application.spec.services.len() != before {
            store.replace(&application).await?;
        }
    }
    if let Some(mut svc) = store.get::<ManagedService>(namespace, service).await? {
        if let Some(status) = svc.status.as_mut() {
            let before = status.bound_apps.len();
            status.bound_apps.retain(|a| a != app);
            if status.bound_apps.len() != before {
                store.update_status(&svc).await?;
            }
        }
    }
    info!(%namespace, %service, %app, "binding.unbound");
    Ok(())
}
