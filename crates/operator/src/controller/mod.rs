//! Control loops for `Application` and `ManagedService`, plus their kube-runtime wiring.
pub mod application;
pub mod apply;
pub mod managed_service;

use futures_util::StreamExt;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service, networking::v1::NetworkPolicy};
use kube::{api::DynamicObject, Api, Client, ResourceExt};
use kube_runtime::{
    controller::{Action, Error as ControllerError},
    reflector::ObjectRef,
    watcher, Controller,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::{
    config::OperatorConfig,
    crd::{Application, ManagedService},
    error::Error,
    external::{certmanager::Certificate, cnpg::Cluster, kpack::Image, traefik::IngressRoute},
    store::{KubeStore, ObjectStore},
    telemetry::{RECONCILE_DURATION, RECONCILE_ERRORS, RECONCILE_TOTAL},
};

/// Shared, read-only inputs for every pass. Holds no custom-resource state: each
/// pass re-reads what it needs from the store.
pub struct Context<S> {
    pub store: S,
    pub config: OperatorConfig,
    backoff: Backoff,
}

impl<S: ObjectStore> Context<S> {
    pub fn new(store: S, config: OperatorConfig) -> Self { Self { store, config, backoff: Backoff::default() } }
}

/// Per-key retry delays for failed passes: 1s doubling to a 5 minute cap, reset on success.
#[derive(Default)]
pub struct Backoff {
    attempts: Mutex<HashMap<String, u32>>,
}

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(300);

impl Backoff {
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = backoff_delay(*attempt);
        *attempt = attempt.saturating_add(1);
        let jitter = fastrand::u64(..(delay.as_millis() as u64 / 10 + 1));
        delay + Duration::from_millis(jitter)
    }

    pub fn reset(&self, key: &str) { self.attempts.lock().unwrap_or_else(|e| e.into_inner()).remove(key); }

    pub fn is_tracking(&self, key: &str) -> bool { self.attempts.lock().unwrap_or_else(|e| e.into_inner()).contains_key(key) }
}

fn backoff_key(controller: &str, ns: &str, name: &str) -> String { format!("{controller}/{ns}/{name}") }

pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt.min(16)));
    exp.min(BACKOFF_MAX)
}

fn object_ref<K: ResourceExt>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_else(|| "default".into()), obj.name_any())
}

fn record(controller: &str, started: Instant, result: &Result<Action, Error>) {
    RECONCILE_DURATION.with_label_values(&[controller]).observe(started.elapsed().as_secs_f64());
    match result {
        Ok(_) => RECONCILE_TOTAL.with_label_values(&[controller, "ok"]).inc(),
        Err(e) => {
            RECONCILE_TOTAL.with_label_values(&[controller, "error"]).inc();
            RECONCILE_ERRORS.with_label_values(&[controller, e.metric_label()]).inc();
        }
    }
}

/// kube-runtime entry point; the watched copy is only used for its key.
pub async fn reconcile_application<S: ObjectStore>(obj: Arc<Application>, ctx: Arc<Context<S>>) -> Result<Action, Error> {
    let (ns, name) = object_ref(obj.as_ref());
    let started = Instant::now();
    let result = application::reconcile(&ctx, &ns, &name).await;
    record("application", started, &result);
    if result.is_ok() { ctx.backoff.reset(&backoff_key("application", &ns, &name)); }
    result
}

pub async fn reconcile_managed_service<S: ObjectStore>(obj: Arc<ManagedService>, ctx: Arc<Context<S>>) -> Result<Action, Error> {
    let (ns, name) = object_ref(obj.as_ref());
    let started = Instant::now();
    let result = managed_service::reconcile(&ctx, &ns, &name).await;
    record("managed_service", started, &result);
    if result.is_ok() { ctx.backoff.reset(&backoff_key("managed_service", &ns, &name)); }
    result
}

pub fn application_error_policy<S: ObjectStore>(obj: Arc<Application>, err: &Error, ctx: Arc<Context<S>>) -> Action {
    let (ns, name) = object_ref(obj.as_ref());
    let delay = ctx.backoff.next_delay(&backoff_key("application", &ns, &name));
    warn!(%ns, %name, error=%err, retry_in=?delay, "application.reconcile.failed");
    Action::requeue(delay)
}

pub fn managed_service_error_policy<S: ObjectStore>(obj: Arc<ManagedService>, err: &Error, ctx: Arc<Context<S>>) -> Action {
    let (ns, name) = object_ref(obj.as_ref());
    let delay = ctx.backoff.next_delay(&backoff_key("managed_service", &ns, &name));
    warn!(%ns, %name, error=%err, retry_in=?delay, "managed_service.reconcile.failed");
    Action::requeue(delay)
}

/// A retry scheduled by the error policy fires after the object is gone: kube-runtime
/// reports it as `ObjectNotFound` without calling the reconciler, so the entry is dropped here.
pub fn forget_deleted<S>(ctx: &Context<S>, controller: &str, obj: &ObjectRef<DynamicObject>) {
    let ns = obj.namespace.as_deref().unwrap_or("default");
    ctx.backoff.reset(&backoff_key(controller, ns, &obj.name));
}

/// Runs both control loops until a shutdown signal arrives.
pub async fn run(client: Client, config: OperatorConfig) {
    let tls = config.tls_issuer.is_some();
    let ctx = Arc::new(Context::new(KubeStore::new(client.clone()), config));
    let wc = watcher::Config::default();

    let mut apps = Controller::new(Api::<Application>::all(client.clone()), wc.clone())
        .owns(Api::<Deployment>::all(client.clone()), wc.clone())
        .owns(Api::<Service>::all(client.clone()), wc.clone())
        .owns(Api::<IngressRoute>::all(client.clone()), wc.clone())
        .owns(Api::<Image>::all(client.clone()), wc.clone());
    if tls {
        apps = apps.owns(Api::<Certificate>::all(client.clone()), wc.clone());
    }
    let apps = apps
        .shutdown_on_signal()
        .run(reconcile_application, application_error_policy, ctx.clone())
        .for_each(|res| {
            let ctx = ctx.clone();
            async move {
                match res {
                    Ok((obj, action)) => tracing::debug!(object=%obj, ?action, "application.reconciled"),
                    Err(ControllerError::ObjectNotFound(obj)) => forget_deleted(&ctx, "application", &obj),
                    Err(e) => warn!(error=%e, "application.controller.error"),
                }
            }
        });

    let services = Controller::new(Api::<ManagedService>::all(client.clone()), wc.clone())
        .owns(Api::<Cluster>::all(client.clone()), wc.clone())
        .owns(Api::<NetworkPolicy>::all(client), wc)
        .shutdown_on_signal()
        .run(reconcile_managed_service, managed_service_error_policy, ctx.clone())
        .for_each(|res| {
            let ctx = ctx.clone();
            async move {
                match res {
                    Ok((obj, action)) => tracing::debug!(object=%obj, ?action, "managed_service.reconciled"),
                    Err(ControllerError::ObjectNotFound(obj)) => forget_deleted(&ctx, "managed_service", &obj),
                    Err(e) => warn!(error=%e, "managed_service.controller.error"),
                }
            }
        });

    info!(tls, "controllers.started");
    tokio::join!(apps, services);
    info!("controllers.stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(9), BACKOFF_MAX);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_MAX);
    }

    #[test]
    fn backoff_grows_per_key_and_resets() {
        let b = Backoff::default();
        let first = b.next_delay("application/ns/a");
        let second = b.next_delay("application/ns/a");
        assert!(first < Duration::from_millis(1200), "{first:?}");
        assert!(second >= Duration::from_secs(2), "{second:?}");
        assert!(b.next_delay("application/ns/b") < Duration::from_millis(1200));
        b.reset("application/ns/a");
        assert!(b.next_delay("application/ns/a") < Duration::from_millis(1200));
    }

    #[tokio::test]
    async fn deleted_failing_object_leaves_no_backoff_entry() {
        let ctx = Arc::new(crate::test_support::context(crate::test_support::test_config()));
        let mut app = Application::new("web", crate::crd::ApplicationSpec::default());
        app.metadata.namespace = Some("test-ns".into());
        ctx.store.create(&app).await.unwrap();
        let app = Arc::new(app);

        let err = reconcile_application(app.clone(), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, Error::NoImageSource(_)), "{err:?}");
        application_error_policy(app.clone(), &err, ctx.clone());
        application_error_policy(app, &err, ctx.clone());
        assert!(ctx.backoff.is_tracking("application/test-ns/web"));

        ctx.store.delete::<Application>("test-ns", "web").await.unwrap();
        forget_deleted(&ctx, "application", &ObjectRef::<Application>::new("web").within("test-ns").erase());
        assert!(!ctx.backoff.is_tracking("application/test-ns/web"));
    }

    #[tokio::test]
    async fn absent_object_pass_clears_its_backoff() {
        let ctx = Arc::new(crate::test_support::context(crate::test_support::test_config()));
        let mut svc = ManagedService::new(
            "pgdb",
            crate::crd::ManagedServiceSpec { service_type: crate::crd::ServiceType::Postgres, plan: crate::crd::Plan::Small },
        );
        svc.metadata.namespace = Some("test-ns".into());
        ctx.backoff.next_delay("managed_service/test-ns/pgdb");

        reconcile_managed_service(Arc::new(svc), ctx.clone()).await.unwrap();
        assert!(!ctx.backoff.is_tracking("managed_service/test-ns/pgdb"));
    }
}
