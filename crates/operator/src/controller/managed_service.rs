//! ManagedService control loop. A finalizer keeps the object (and, through owner
//! references, its database) alive while applications are still bound to it.
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{apply::apply, Context};
use crate::{
    builders::database,
    crd::{ManagedService, ManagedServiceStatus, ServicePhase},
    error::{Error, Result},
    external::cnpg::Cluster,
    extract::{self, DatabaseObservation},
    store::ObjectStore,
};

pub const FINALIZER: &str = "launchpad.dev/bound-apps-protection";
pub const PROVISION_REQUEUE: Duration = Duration::from_secs(10);

fn has_finalizer(svc: &ManagedService) -> bool { svc.finalizers().iter().any(|f| f == FINALIZER) }

#[instrument(skip(ctx), fields(controller = "managed_service"))]
pub async fn reconcile<S: ObjectStore>(ctx: &Context<S>, namespace: &str, name: &str) -> Result<Action> {
    let Some(svc) = ctx.store.get::<ManagedService>(namespace, name).await? else {
        debug!("managed_service.gone");
        return Ok(Action::await_change());
    };
    if svc.meta().deletion_timestamp.is_some() {
        return finalize(ctx, svc).await;
    }
    // The finalizer goes in on its own pass so convergence never runs on a copy that predates the write.
    if !has_finalizer(&svc) {
        let mut next = svc.clone();
        next.finalizers_mut().push(FINALIZER.to_string());
        ctx.store.replace(&next).await?;
        info!("managed_service.finalizer.added");
        return Ok(Action::requeue(Duration::ZERO));
    }

    apply(&ctx.store, database::database_cluster(&svc)?).await?;
    apply(&ctx.store, database::network_policy(&svc)?).await?;

    let observed = match ctx.store.get::<Cluster>(namespace, name).await {
        Ok(Some(cluster)) => extract::database_readiness(&cluster),
        Ok(None) => DatabaseObservation { ready: false, connection_secret: None },
        Err(e) => {
            warn!(error=%e, "database.status.unreadable");
            DatabaseObservation { ready: false, connection_secret: None }
        }
    };

    let previous = svc.status.clone().unwrap_or_default();
    let mut status = previous.clone();
    let action = match observed.connection_secret.filter(|_| observed.ready) {
        Some(secret) => {
            status.phase = ServicePhase::Ready;
            status.message = Some(format!("database is ready; credentials are in secret {secret}"));
            status.connection_secret = Some(secret);
            Action::await_change()
        }
        None => {
            status.phase = ServicePhase::Provisioning;
            status.message = Some("database cluster is being provisioned".into());
            status.connection_secret = None;
            Action::requeue(PROVISION_REQUEUE)
        }
    };
    if status.phase != previous.phase {
        info!(from=?previous.phase, to=?status.phase, "managed_service.phase");
    }
    persist_status(ctx, &svc, status).await?;
    Ok(action)
}

async fn finalize<S: ObjectStore>(ctx: &Context<S>, svc: ManagedService) -> Result<Action> {
    let bound = svc.status.as_ref().map(|s| s.bound_apps.clone()).unwrap_or_default();
    if !bound.is_empty() {
        let mut status = svc.status.clone().unwrap_or_default();
        status.phase = ServicePhase::Failed;
        status.message = Some(format!(
            "deletion blocked: still bound to {}; unbind these applications before deleting",
            bound.join(", ")
        ));
        persist_status(ctx, &svc, status).await?;
        warn!(bound=?bound, "managed_service.deletion.blocked");
        return Err(Error::ServiceBound { name: svc.name_any(), apps: bound });
    }
    if has_finalizer(&svc) {
        let mut next = svc;
        next.finalizers_mut().retain(|f| f != FINALIZER);
        ctx.store.replace(&next).await?;
        info!("managed_service.finalizer.removed");
    }
    Ok(Action::await_change())
}

async fn persist_status<S: ObjectStore>(ctx: &Context<S>, svc: &ManagedService, status: ManagedServiceStatus) -> Result<ManagedService> {
    if svc.status.as_ref() == Some(&status) {
        return Ok(svc.clone());
    }
    let mut next = svc.clone();
    next.status = Some(status);
    ctx.store.update_status(&next).await
}
