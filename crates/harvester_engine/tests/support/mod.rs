//! In-memory vendor and worker doubles shared by the engine tests.
#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant};

use harvester_core::{BudgetLimits, Outcome, RotationPolicy};
use harvester_engine::{
    AddressLookup, ControlPlane, ControlPlaneError, ControlPlaneFailure, HarvestLoop,
    IdentityLeaseManager, LoopSettings, NetworkIdentity, ProgressStore, ProxyEndpoint,
    ResumeMode, Worker,
};
use serde_json::json;

pub const EGRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
pub const CONTROL_PLANE_INTERVAL: Duration = Duration::from_secs(35);
pub const TARGET_INTERVAL: Duration = Duration::from_millis(1_500);

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

pub fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|key| key.to_string()).collect()
}

pub fn success(key: &str) -> Outcome {
    Outcome::Success(json!({ "shop": key }))
}

pub fn settings(output_path: &Path) -> LoopSettings {
    LoopSettings {
        budget: BudgetLimits {
            elapsed_limit: Duration::from_secs(4 * 3600),
            query_limit: 5_000,
            failure_limit: 10,
        },
        rotation: RotationPolicy {
            interval: Duration::from_secs(300),
            max_queries: None,
            failure_limit: 3,
            lease_ttl: Duration::from_secs(1800),
            rotate_on_rate_limit: false,
        },
        control_plane_min_interval: CONTROL_PLANE_INTERVAL,
        target_min_interval: TARGET_INTERVAL,
        inter_item_delay: Duration::ZERO,
        checkpoint_every: 0,
        resume_mode: ResumeMode::Checkpoint,
        output_path: output_path.to_path_buf(),
    }
}

pub type TestLoop = HarvestLoop<ScriptedWorker, FakeVendor, FakeVendor>;

pub fn harvest_loop(
    settings: LoopSettings,
    worker: &ScriptedWorker,
    vendor: &FakeVendor,
    store: ProgressStore,
) -> TestLoop {
    let leases =
        IdentityLeaseManager::new(vendor.clone(), vendor.clone(), settings.rotation.lease_ttl);
    HarvestLoop::new(settings, worker.clone(), leases, store)
}

/// Asserts every neighbouring pair is at least `min` apart.
pub fn assert_spaced(times: &[Instant], min: Duration) {
    for pair in times.windows(2) {
        let gap = pair[1].saturating_duration_since(pair[0]);
        assert!(gap >= min, "calls only {gap:?} apart, expected at least {min:?}");
    }
}

#[derive(Debug, Clone)]
pub struct WorkerCall {
    pub key: String,
    pub proxy: ProxyEndpoint,
    pub at: Instant,
}

type Script = dyn Fn(&str) -> Outcome + Send + Sync;

/// Worker whose answers come from a closure over the key.
#[derive(Clone)]
pub struct ScriptedWorker {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<WorkerCall>>>,
}

impl ScriptedWorker {
    pub fn new(script: impl Fn(&str) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(success)
    }

    pub fn always(outcome: Outcome) -> Self {
        Self::new(move |_| outcome.clone())
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.key).collect()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.calls().into_iter().map(|call| call.proxy.port).collect()
    }
}

#[async_trait::async_trait]
impl Worker for ScriptedWorker {
    async fn query(&self, key: &str, identity: &NetworkIdentity) -> Outcome {
        self.calls.lock().unwrap().push(WorkerCall {
            key: key.to_string(),
            proxy: identity.proxy.clone(),
            at: harvester_engine::now(),
        });
        (self.script)(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorCall {
    Lookup,
    AddWhitelist(IpAddr),
    DelWhitelist(IpAddr),
    GetProxy,
}

#[derive(Debug, Default)]
struct VendorState {
    calls: Vec<(VendorCall, Instant)>,
    addresses: VecDeque<IpAddr>,
    whitelist: BTreeSet<IpAddr>,
    reject_whitelist: Option<String>,
    proxy_plan: VecDeque<bool>,
    proxies_fail: bool,
    issued: u16,
}

/// Vendor control plane and address lookup in one, recording every call.
#[derive(Debug, Clone, Default)]
pub struct FakeVendor {
    state: Arc<Mutex<VendorState>>,
}

impl FakeVendor {
    pub fn new() -> Self {
        Self::with_addresses(vec![EGRESS])
    }

    /// Successive lookups return these in order; the last one repeats.
    pub fn with_addresses(addresses: Vec<IpAddr>) -> Self {
        let vendor = Self::default();
        vendor.state.lock().unwrap().addresses = addresses.into();
        vendor
    }

    pub fn reject_whitelist(&self, message: &str) {
        self.state.lock().unwrap().reject_whitelist = Some(message.to_string());
    }

    /// `true` issues a proxy, `false` fails the request. Once the plan runs
    /// out every request succeeds.
    pub fn plan_proxy_requests(&self, plan: &[bool]) {
        self.state.lock().unwrap().proxy_plan = plan.iter().copied().collect();
    }

    pub fn fail_proxy_requests(&self) {
        self.state.lock().unwrap().proxies_fail = true;
    }

    pub fn calls(&self) -> Vec<VendorCall> {
        let state = self.state.lock().unwrap();
        state.calls.iter().map(|(call, _)| call.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        let state = self.state.lock().unwrap();
        state.calls.iter().map(|(_, at)| *at).collect()
    }

    pub fn count(&self, wanted: &VendorCall) -> usize {
        self.calls().iter().filter(|call| *call == wanted).count()
    }

    pub fn proxies_requested(&self) -> usize {
        self.count(&VendorCall::GetProxy)
    }

    pub fn whitelist(&self) -> Vec<IpAddr> {
        self.state.lock().unwrap().whitelist.iter().copied().collect()
    }

    fn log(&self, call: VendorCall) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push((call, harvester_engine::now()));
    }
}

#[async_trait::async_trait]
impl AddressLookup for FakeVendor {
    async fn public_address(&self) -> Result<IpAddr, ControlPlaneError> {
        self.log(VendorCall::Lookup);
        let mut state = self.state.lock().unwrap();
        let address = if state.addresses.len() > 1 {
            state.addresses.pop_front()
        } else {
            state.addresses.front().copied()
        };
        address.ok_or_else(|| ControlPlaneError::new(ControlPlaneFailure::Network, "no address"))
    }
}

#[async_trait::async_trait]
impl ControlPlane for FakeVendor {
    async fn add_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError> {
        self.log(VendorCall::AddWhitelist(address));
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.reject_whitelist {
            return Err(ControlPlaneError::new(
                ControlPlaneFailure::Rejected,
                message.clone(),
            ));
        }
        state.whitelist.insert(address);
        Ok(())
    }

    async fn del_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError> {
        self.log(VendorCall::DelWhitelist(address));
        self.state.lock().unwrap().whitelist.remove(&address);
        Ok(())
    }

    async fn get_proxy(&self, count: usize) -> Result<Vec<ProxyEndpoint>, ControlPlaneError> {
        self.log(VendorCall::GetProxy);
        let mut state = self.state.lock().unwrap();
        let planned = state.proxy_plan.pop_front().unwrap_or(true);
        if state.proxies_fail || !planned {
            return Err(ControlPlaneError::new(
                ControlPlaneFailure::NoProxyAvailable,
                "pool empty",
            ));
        }
        let mut proxies = Vec::with_capacity(count);
        for _ in 0..count {
            state.issued += 1;
            proxies.push(ProxyEndpoint {
                scheme: "http".to_string(),
                host: "198.51.100.20".to_string(),
                port: 8000 + state.issued,
            });
        }
        Ok(proxies)
    }
}
