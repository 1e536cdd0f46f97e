mod support;

use std::time::Duration;

use harvester_engine::{
    now, ControlPlaneFailure, EndpointClass, IdentityLeaseManager, LeaseError, RateLimiter,
};

use support::{init_logging, FakeVendor, VendorCall, CONTROL_PLANE_INTERVAL, EGRESS};

const TTL: Duration = Duration::from_secs(1800);

fn limiter() -> RateLimiter {
    RateLimiter::new().with_class(EndpointClass::ControlPlane, CONTROL_PLANE_INTERVAL)
}

#[tokio::test(start_paused = true)]
async fn acquire_then_release_round_trips_the_allow_list() {
    init_logging();
    let vendor = FakeVendor::new();
    let mut limiter = limiter();
    let mut leases = IdentityLeaseManager::new(vendor.clone(), vendor.clone(), TTL);

    let started = now();
    let identity = leases.acquire_lease(&mut limiter).await.unwrap();
    assert_eq!(identity.public_address, EGRESS);
    assert_eq!(identity.proxy.port, 8001);
    assert_eq!(identity.ttl, TTL);
    // Three control-plane calls, two waits.
    assert!(identity.lease_start - started >= 2 * CONTROL_PLANE_INTERVAL);
    assert_eq!(leases.current(), Some(&identity));
    assert_eq!(vendor.whitelist(), vec![EGRESS]);

    leases.release_lease(&mut limiter, &identity).await;
    assert!(leases.current().is_none());
    assert!(leases.registered_addresses().is_empty());
    assert!(vendor.whitelist().is_empty());
    assert_eq!(
        vendor.calls(),
        vec![
            VendorCall::Lookup,
            VendorCall::AddWhitelist(EGRESS),
            VendorCall::GetProxy,
            VendorCall::DelWhitelist(EGRESS),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn partial_acquisition_is_undone_by_release_all() {
    init_logging();
    let vendor = FakeVendor::new();
    vendor.fail_proxy_requests();
    let mut limiter = limiter();
    let mut leases = IdentityLeaseManager::new(vendor.clone(), vendor.clone(), TTL);

    let err = leases.acquire_lease(&mut limiter).await.unwrap_err();
    assert!(matches!(
        err,
        LeaseError::Failed(ref failure) if failure.kind == ControlPlaneFailure::NoProxyAvailable
    ));
    assert!(leases.current().is_none());
    assert_eq!(leases.registered_addresses(), &[EGRESS]);

    leases.release_all(&mut limiter).await;
    assert!(leases.registered_addresses().is_empty());
    assert!(vendor.whitelist().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lease_expires_at_its_ttl() {
    init_logging();
    let vendor = FakeVendor::new();
    let mut limiter = limiter();
    let mut leases = IdentityLeaseManager::new(vendor.clone(), vendor, TTL);

    let identity = leases.acquire_lease(&mut limiter).await.unwrap();
    assert!(!identity.is_expired_at(identity.lease_start + TTL - Duration::from_secs(1)));
    assert!(identity.is_expired_at(identity.lease_start + TTL));
}
