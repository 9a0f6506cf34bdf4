use crate::{
    admission::Admission,
    bootstrap,
    core::{SecurityContextPreset, Strategy},
    k8s::{
        self, reflector, watcher, AutomountMode, GlobalPolicy, GlobalPolicySpec, Namespace,
        NetworkPolicy,
    },
    reconcile::{
        self, ConfigReconciler, Controller, ControllerMetrics, NetworkPolicyReconciler, Reconcile,
        Templates, WorkQueue,
    },
    templates,
    webhook::{AdmissionMetrics, AdmissionService},
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::WatchStreamExt;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc};
use tokio::time::Duration;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "podguard", about = "A pod security policy controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "podguard=info,warn",
        env = "PODGUARD_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// The name of the GlobalPolicy resource that configures the controller.
    #[clap(long, default_value = "cluster")]
    global_policy_name: String,

    /// The automount mode used when the GlobalPolicy must be created.
    #[clap(long, default_value = "no-change")]
    default_automount_mode: AutomountMode,

    /// The seccomp profile used when the GlobalPolicy must be created.
    #[clap(long, default_value = "")]
    default_seccomp_profile: String,

    /// The pod security context preset used when the GlobalPolicy must be
    /// created.
    #[clap(long, default_value = "")]
    default_pod_security_context: SecurityContextPreset,

    /// The network policy template, as `<namespace>:<name>`, used when the
    /// GlobalPolicy must be created.
    #[clap(long, default_value = "")]
    default_network_policy: String,

    /// A multi-document YAML file of NetworkPolicy templates.
    #[clap(long)]
    network_policy_templates: Option<PathBuf>,

    /// Namespaces that never receive a default network policy.
    #[clap(long, default_value = "kube-system,kube-public", value_delimiter = ',')]
    excluded_namespaces: Vec<String>,

    /// How namespace annotations are combined with the GlobalPolicy.
    #[clap(long, default_value = "layered")]
    policy_strategy: Strategy,

    #[clap(long, default_value = "5000")]
    namespace_lookup_timeout_ms: u64,

    #[clap(long, default_value = "1")]
    config_workers: usize,

    #[clap(long, default_value = "2")]
    network_policy_workers: usize,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            server,
            admission_controller_disabled,
            global_policy_name,
            default_automount_mode,
            default_seccomp_profile,
            default_pod_security_context,
            default_network_policy,
            network_policy_templates,
            excluded_namespaces,
            policy_strategy,
            namespace_lookup_timeout_ms,
            config_workers,
            network_policy_workers,
        } = self;

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let admission_metrics =
            AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let reconcile_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("reconcile"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        let templates = match network_policy_templates {
            Some(path) => templates::load(&path)?,
            None => Templates::new(),
        };
        info!(
            templates = templates.len(),
            "Loaded network policy templates"
        );

        let defaults = GlobalPolicySpec {
            automount_mode: default_automount_mode,
            seccomp_profile: default_seccomp_profile,
            pod_security_context_preset: default_pod_security_context.to_string(),
            network_policy_selector: default_network_policy,
            enforcement: false,
        };
        let client = runtime.client();
        let policy = bootstrap::ensure_global_policy(client, &global_policy_name, defaults).await?;

        // Build the reflector caches that the reconcilers read from.
        let (policies, policies_writer) = reflector::store::<GlobalPolicy>();
        let (namespaces, namespaces_writer) = reflector::store::<Namespace>();
        let (network_policies, network_policies_writer) = reflector::store::<NetworkPolicy>();

        let config_queue = Arc::new(WorkQueue::default());
        let namespace_queue = Arc::new(WorkQueue::default());
        let network_policy_queue = Arc::new(WorkQueue::default());

        let admission = Arc::new(Admission::new(
            k8s::Api::<Namespace>::all(runtime.client()),
            policy.spec.clone(),
            policy_strategy,
            Duration::from_millis(namespace_lookup_timeout_ms),
        ));

        let network_policy_reconciler = Arc::new(
            NetworkPolicyReconciler::new(
                Arc::new(namespaces.clone()),
                Arc::new(network_policies.clone()),
                Arc::new(reconcile::Namespaced(runtime.client())),
                templates,
                excluded_namespaces,
            )
            .with_resync(namespace_queue.clone()),
        );

        let config = Arc::new(
            ConfigReconciler::new(
                Arc::new(policies.clone()),
                Arc::new(reconcile::ClusterScoped(runtime.client())),
            )
            .with_subscriber(admission.clone())
            .with_subscriber(network_policy_reconciler.clone()),
        );
        if let Err(error) = config.update_config(policy) {
            warn!(%error, "Failed to apply global policy");
        }

        // Spawn resource watches.

        let global_policies = runtime.watch_all::<GlobalPolicy>(
            watcher::Config::default().fields(&format!("metadata.name={global_policy_name}")),
        );
        tokio::spawn(
            reconcile::enqueue(
                config_queue.clone(),
                reflector(policies_writer, global_policies.map(Ok)).touched_objects(),
            )
            .instrument(info_span!("globalpolicies")),
        );

        let ns_events = runtime.watch_all::<Namespace>(watcher::Config::default());
        tokio::spawn(
            reconcile::enqueue(
                namespace_queue.clone(),
                reflector(namespaces_writer, ns_events.map(Ok)).touched_objects(),
            )
            .instrument(info_span!("namespaces")),
        );

        let netpol_events = runtime.watch_all::<NetworkPolicy>(watcher::Config::default());
        tokio::spawn(
            reconcile::enqueue(
                network_policy_queue.clone(),
                reflector(network_policies_writer, netpol_events.map(Ok)).touched_objects(),
            )
            .instrument(info_span!("networkpolicies")),
        );

        // Spawn the reconcilers once their caches have synced.

        let controller = Controller::new("config", config_queue, config, reconcile_metrics.clone());
        tokio::spawn(
            run_when_synced(
                controller,
                config_workers,
                async move { policies.wait_until_ready().await },
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("config")),
        );

        let controller = Controller::new(
            "namespaces",
            namespace_queue,
            Arc::new(reconcile::network_policy::NamespaceSync(
                network_policy_reconciler.clone(),
            )),
            reconcile_metrics.clone(),
        );
        let synced = {
            let namespaces = namespaces.clone();
            let network_policies = network_policies.clone();
            async move {
                namespaces.wait_until_ready().await?;
                network_policies.wait_until_ready().await
            }
        };
        tokio::spawn(
            run_when_synced(
                controller,
                network_policy_workers,
                synced,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("namespace_network_policies")),
        );

        let controller = Controller::new(
            "networkpolicies",
            network_policy_queue,
            Arc::new(reconcile::network_policy::PolicySync(network_policy_reconciler)),
            reconcile_metrics,
        );
        let synced = async move {
            namespaces.wait_until_ready().await?;
            network_policies.wait_until_ready().await
        };
        tokio::spawn(
            run_when_synced(
                controller,
                network_policy_workers,
                synced,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("network_policies")),
        );

        let webhook = AdmissionService::new(admission, admission_metrics);
        let runtime = runtime.spawn_server(move || webhook.clone());

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Waits for a controller's caches to sync before running it. Returns early if
/// shutdown begins first.
async fn run_when_synced<R, E>(
    controller: Controller<R>,
    workers: usize,
    synced: impl Future<Output = Result<(), E>>,
    drain: drain::Watch,
) where
    R: Reconcile,
    E: std::fmt::Display,
{
    tokio::select! {
        res = synced => {
            if let Err(error) = res {
                warn!(%error, "Cache closed before syncing");
                return;
            }
        }
        _ = drain.clone().signaled() => return,
    }

    info!("Caches synced");
    controller.run(workers, drain).await;
}
