use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    syncs: Family<SyncLabels, Counter>,
    queue_depth: Family<QueueLabels, Gauge>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SyncResult {
    Ok,
    Error,
    Dropped,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SyncLabels {
    controller: String,
    result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QueueLabels {
    controller: String,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let syncs = Family::default();
        prom.register(
            "syncs",
            "Count of reconcile attempts by controller and result",
            syncs.clone(),
        );

        let queue_depth = Family::default();
        prom.register(
            "queue_depth",
            "Gauge of the number of keys waiting to be reconciled",
            queue_depth.clone(),
        );

        Self { syncs, queue_depth }
    }

    pub(crate) fn sync(&self, controller: &str, result: SyncResult) {
        let result = match result {
            SyncResult::Ok => "ok",
            SyncResult::Error => "error",
            SyncResult::Dropped => "dropped",
        };
        self.syncs
            .get_or_create(&SyncLabels {
                controller: controller.to_string(),
                result: result.to_string(),
            })
            .inc();
    }

    pub(crate) fn queue_depth(&self, controller: &str, depth: usize) {
        self.queue_depth
            .get_or_create(&QueueLabels {
                controller: controller.to_string(),
            })
            .set(depth.try_into().unwrap_or(i64::MAX));
    }
}
