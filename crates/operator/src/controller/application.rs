//! Application control loop: `Pending -> Building -> Deploying -> Running`, falling
//! back to `Deploying` when the workload loses all available replicas.
use chrono::Utc;
use k8s_openapi::api::core::v1::EnvVar;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::{apply::apply, Context};
use crate::{
    builders::{image, routing, workload},
    crd::{Application, ApplicationPhase, ApplicationStatus, BuildStatus, DataSource, READY_CONDITION},
    error::{Error, Result},
    external::kpack::Image,
    extract::{self, BuildObservation},
    store::ObjectStore,
};

pub const BUILD_REQUEUE: Duration = Duration::from_secs(5);
pub const ROLLOUT_REQUEUE: Duration = Duration::from_secs(10);

#[instrument(skip(ctx), fields(controller = "application"))]
pub async fn reconcile<S: ObjectStore>(ctx: &Context<S>, namespace: &str, name: &str) -> Result<Action> {
    let Some(app) = ctx.store.get::<Application>(namespace, name).await? else {
        debug!("application.gone");
        return Ok(Action::await_change());
    };
    if app.meta().deletion_timestamp.is_some() {
        debug!("application.deleting");
        return Ok(Action::await_change());
    }
    let previous = app.status.clone().unwrap_or_default();

    let build = match resolve_image(ctx, &app).await {
        Err(Error::NoImageSource(n)) => {
            let mut status = previous.clone();
            status.conditions.upsert(
                READY_CONDITION,
                false,
                "InvalidSpec",
                "no usable image source: set spec.image, spec.git.url or spec.blob.url",
                Utc::now(),
            );
            persist_status(ctx, &app, status).await?;
            return Err(Error::NoImageSource(n));
        }
        other => other?,
    };

    let Some(image) = build.image else {
        let mut status = previous.clone();
        status.phase = ApplicationPhase::Building;
        status.build_status = Some(build.status);
        let message = match build.status {
            BuildStatus::Failed => "image build failed; waiting for a new build",
            _ => "waiting for image build",
        };
        status.conditions.upsert(READY_CONDITION, false, "Building", message, Utc::now());
        persist_status(ctx, &app, status).await?;
        return Ok(Action::requeue(BUILD_REQUEUE));
    };

    // Record Deploying before any replica-derived field is recomputed.
    let mut app = app;
    if matches!(previous.phase, ApplicationPhase::Pending | ApplicationPhase::Building) {
        let mut status = previous.clone();
        status.phase = ApplicationPhase::Deploying;
        status.build_status = Some(build.status);
        status.latest_image = Some(image.clone());
        status.conditions.upsert(READY_CONDITION, false, "Deploying", "rolling out image", Utc::now());
        app = persist_status(ctx, &app, status).await?;
        info!(%image, "application.phase.deploying");
    }

    let issuer = ctx.config.tls_issuer.as_deref().filter(|_| app.spec.tls);
    let tls = issuer.is_some();
    let host = routing::host(&app, &ctx.config.base_domain);
    let env = container_env(ctx, &app).await?;

    let deployment = apply(&ctx.store, workload::deployment(&app, &image, env)?).await?;
    apply(&ctx.store, workload::service(&app)?).await?;
    if let Some(issuer) = issuer {
        apply(&ctx.store, routing::certificate(&app, &host, issuer)?).await?;
    }
    apply(&ctx.store, routing::ingress_route(&app, &host, tls)?).await?;

    let available = extract::available_replicas(&deployment);
    let mut status = app.status.clone().unwrap_or_default();
    status.build_status = Some(build.status);
    status.latest_image = Some(image);
    status.available_replicas = available;
    status.url = Some(routing::url(&host, tls));
    let action = if available >= 1 {
        status.phase = ApplicationPhase::Running;
        status.conditions.upsert(READY_CONDITION, true, "Available", format!("{available} replica(s) available"), Utc::now());
        Action::await_change()
    } else {
        status.phase = ApplicationPhase::Deploying;
        status.conditions.upsert(READY_CONDITION, false, "Deploying", "waiting for an available replica", Utc::now());
        Action::requeue(ROLLOUT_REQUEUE)
    };
    if status.phase != previous.phase {
        info!(from=?previous.phase, to=?status.phase, available, "application.phase");
    }
    persist_status(ctx, &app, status).await?;
    Ok(action)
}

/// Literal image, or the state of the kpack Image building it.
async fn resolve_image<S: ObjectStore>(ctx: &Context<S>, app: &Application) -> Result<BuildObservation> {
    if let Some(literal) = image::literal_image(&app.spec) {
        return Ok(BuildObservation { status: BuildStatus::NotRequired, image: Some(literal.to_string()) });
    }
    let source = image::build_source(&app.spec).ok_or_else(|| Error::NoImageSource(app.name_any()))?;
    let desired = image::image_build(app, &ctx.config, source)?;
    let namespace = app.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
    let building = BuildObservation { status: BuildStatus::Building, image: None };

    let Some(mut existing) = ctx.store.get::<Image>(&namespace, &app.name_any()).await? else {
        match ctx.store.create(&desired).await {
            Ok(_) => info!(tag=%desired.spec.tag, "build.requested"),
            Err(Error::AlreadyExists { .. }) => debug!("build.create.raced"),
            Err(e) => return Err(e),
        }
        return Ok(building);
    };
    // A new git revision or a re-pushed blob URL triggers a rebuild in place.
    if existing.spec.source != desired.spec.source {
        existing.spec.source = desired.spec.source;
        ctx.store.replace(&existing).await?;
        info!("build.source.updated");
        return Ok(building);
    }
    Ok(extract::build_outcome(&existing))
}

/// Inline vars, then DataSource references, then bound-service credentials.
async fn container_env<S: ObjectStore>(ctx: &Context<S>, app: &Application) -> Result<Vec<EnvVar>> {
    let namespace = app.namespace().ok_or(Error::MissingField("metadata.namespace"))?;
    let mut refs = Vec::new();
    for ds_name in &app.spec.data_sources {
        let Some(ds) = ctx.store.get::<DataSource>(&namespace, ds_name).await? else {
            warn!(datasource=%ds_name, "datasource.skipped.missing");
            continue;
        };
        let (accepted, rejected) = workload::data_source_env(&ds);
        for env_name in rejected {
            warn!(datasource=%ds_name, env=%env_name, "datasource.skipped.invalid_env_name");
        }
        refs.extend(accepted);
    }
    for service in &app.spec.services {
        refs.extend(workload::service_env(service));
    }
    Ok(workload::container_env(&app.spec, &refs))
}

async fn persist_status<S: ObjectStore>(ctx: &Context<S>, app: &Application, status: ApplicationStatus) -> Result<Application> {
    if app.status.as_ref() == Some(&status) {
        return Ok(app.clone());
    }
    let mut next = app.clone();
    next.status = Some(status);
    ctx.store.update_status(&next).await
}
