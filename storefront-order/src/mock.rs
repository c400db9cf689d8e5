use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use storefront_core::{ConsignmentSpec, CourierError, CourierGateway, ResolvedLocation};

/// One recorded call against [`ScriptedCourier`].
#[derive(Debug, Clone, PartialEq)]
pub enum CourierCall {
    ResolveAddress { query: String },
    CreateConsignment { spec: ConsignmentSpec },
    CancelConsignment { consignment_id: String, reason: String },
}

#[derive(Default)]
struct Script {
    resolve: VecDeque<Result<ResolvedLocation, CourierError>>,
    create: VecDeque<Result<String, CourierError>>,
    cancel: VecDeque<Result<(), CourierError>>,
    calls: Vec<CourierCall>,
    created: usize,
}

/// Courier double that replays queued outcomes and records every call.
///
/// With nothing queued, address resolution returns city 1 / zone 1,
/// consignments are numbered `CB-1`, `CB-2`, ... and cancellations succeed.
pub struct ScriptedCourier {
    provider: String,
    script: Mutex<Script>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ScriptedCourier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCourier {
    pub fn new() -> Self {
        Self {
            provider: "carrybee".to_string(),
            script: Mutex::new(Script::default()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    pub fn push_resolve(&self, outcome: Result<ResolvedLocation, CourierError>) {
        self.script().resolve.push_back(outcome);
    }

    pub fn push_create(&self, outcome: Result<String, CourierError>) {
        self.script().create.push_back(outcome);
    }

    pub fn push_cancel(&self, outcome: Result<(), CourierError>) {
        self.script().cancel.push_back(outcome);
    }

    pub fn calls(&self) -> Vec<CourierCall> {
        self.script().calls.clone()
    }

    pub fn create_calls(&self) -> Vec<ConsignmentSpec> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                CourierCall::CreateConsignment { spec } => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cancel_calls(&self) -> Vec<(String, String)> {
        self.script()
            .calls
            .iter()
            .filter_map(|call| match call {
                CourierCall::CancelConsignment { consignment_id, reason } => {
                    Some((consignment_id.clone(), reason.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and mark it in flight until the returned guard drops,
    /// which also covers calls abandoned by a timeout.
    async fn enter(&self, call: CourierCall) -> InFlight<'_> {
        self.script().calls.push(call);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        guard
    }

    /// Calls currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CourierGateway for ScriptedCourier {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn resolve_address(&self, free_text: &str) -> Result<ResolvedLocation, CourierError> {
        let _in_flight = self.enter(CourierCall::ResolveAddress { query: free_text.to_string() }).await;
        self.script()
            .resolve
            .pop_front()
            .unwrap_or(Ok(ResolvedLocation { city_id: 1, zone_id: 1 }))
    }

    async fn create_consignment(&self, spec: &ConsignmentSpec) -> Result<String, CourierError> {
        let _in_flight = self.enter(CourierCall::CreateConsignment { spec: spec.clone() }).await;
        let mut script = self.script();
        let outcome = script
            .create
            .pop_front()
            .unwrap_or_else(|| Ok(format!("CB-{}", script.created + 1)));
        if outcome.is_ok() {
            script.created += 1;
        }
        outcome
    }

    async fn cancel_consignment(&self, consignment_id: &str, reason: &str) -> Result<(), CourierError> {
        let _in_flight = self
            .enter(CourierCall::CancelConsignment {
                consignment_id: consignment_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        self.script().cancel.pop_front().unwrap_or(Ok(()))
    }
}
