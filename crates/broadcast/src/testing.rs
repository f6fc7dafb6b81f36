//! Fakes shared by the crate's tests.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    Error, Result,
    delivery::DeliveryAdapter,
    types::{BroadcastPayload, TargetId},
};

/// Records every delivery; fails for the configured targets.
#[derive(Default)]
pub struct RecordingDelivery {
    pub calls: Mutex<Vec<(TargetId, String)>>,
    pub failing: HashSet<TargetId>,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_for(targets: impl IntoIterator<Item = TargetId>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::default(),
            failing: targets.into_iter().collect(),
        })
    }

    pub fn calls_for(&self, target: TargetId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == target)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryAdapter for RecordingDelivery {
    async fn deliver(&self, target: TargetId, payload: &BroadcastPayload) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((target, payload.text.clone()));
        if self.failing.contains(&target) {
            return Err(Error::delivery_failure(target, "chat unavailable"));
        }
        Ok(())
    }
}
