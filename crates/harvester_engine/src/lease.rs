use std::net::IpAddr;
use std::time::{Duration, Instant};

use engine_logging::{engine_info, engine_warn};
use thiserror::Error;

use crate::address::AddressLookup;
use crate::clock;
use crate::control_plane::{ControlPlane, ControlPlaneError, ControlPlaneFailure, ProxyEndpoint};
use crate::rate_limit::{EndpointClass, RateLimiter};

/// An egress address registered with the vendor plus the proxy issued for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub public_address: IpAddr,
    pub proxy: ProxyEndpoint,
    pub lease_start: Instant,
    pub ttl: Duration,
}

impl NetworkIdentity {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.lease_start) >= self.ttl
    }
}

#[derive(Debug, Error)]
pub enum LeaseError {
    /// This attempt failed; a later one may succeed.
    #[error("lease acquisition failed: {0}")]
    Failed(ControlPlaneError),
    /// The vendor refused the caller. Retrying cannot succeed.
    #[error("lease rejected: {0}")]
    Rejected(String),
}

impl From<ControlPlaneError> for LeaseError {
    fn from(err: ControlPlaneError) -> Self {
        if err.is_rejection() {
            LeaseError::Rejected(err.to_string())
        } else {
            LeaseError::Failed(err)
        }
    }
}

/// Owns the single live identity lease and every allow-list entry created on
/// its behalf.
pub struct IdentityLeaseManager<C, A> {
    control_plane: C,
    lookup: A,
    ttl: Duration,
    current: Option<NetworkIdentity>,
    // Kept even when acquisition stops halfway so release can undo it.
    registered: Vec<IpAddr>,
}

impl<C: ControlPlane, A: AddressLookup> IdentityLeaseManager<C, A> {
    pub fn new(control_plane: C, lookup: A, ttl: Duration) -> Self {
        Self {
            control_plane,
            lookup,
            ttl,
            current: None,
            registered: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<&NetworkIdentity> {
        self.current.as_ref()
    }

    pub fn registered_addresses(&self) -> &[IpAddr] {
        &self.registered
    }

    /// Looks up the egress address, allow-lists it, and requests one proxy,
    /// each step spaced by the control-plane rate limit.
    ///
    /// On success the new identity supersedes the current one, and allow-list
    /// entries for addresses other than the new one are removed.
    pub async fn acquire_lease(
        &mut self,
        limiter: &mut RateLimiter,
    ) -> Result<NetworkIdentity, LeaseError> {
        limiter.acquire(EndpointClass::ControlPlane).await;
        let address = self.lookup.public_address().await?;
        if address.is_loopback() || address.is_unspecified() {
            return Err(ControlPlaneError::new(
                ControlPlaneFailure::UnroutableAddress,
                format!("egress address {address}; check the address lookup configuration"),
            )
            .into());
        }

        limiter.acquire(EndpointClass::ControlPlane).await;
        self.control_plane.add_whitelist(address).await?;
        if !self.registered.contains(&address) {
            self.registered.push(address);
        }
        engine_info!("Allow-listed egress address {}", address);

        limiter.acquire(EndpointClass::ControlPlane).await;
        let proxy = self
            .control_plane
            .get_proxy(1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                LeaseError::Failed(ControlPlaneError::new(
                    ControlPlaneFailure::NoProxyAvailable,
                    "vendor returned no proxies",
                ))
            })?;

        let identity = NetworkIdentity {
            public_address: address,
            proxy,
            lease_start: clock::now(),
            ttl: self.ttl,
        };
        if let Some(previous) = self.current.replace(identity.clone()) {
            engine_info!("Identity rotated: {} -> {}", previous.proxy, identity.proxy);
        } else {
            engine_info!("Identity acquired: proxy {}", identity.proxy);
        }

        let stale: Vec<IpAddr> = self
            .registered
            .iter()
            .copied()
            .filter(|registered| *registered != address)
            .collect();
        for old in stale {
            self.deregister(limiter, old).await;
        }

        Ok(identity)
    }

    /// Ends `identity`'s lease and removes its allow-list entry. Failures are
    /// logged only.
    pub async fn release_lease(&mut self, limiter: &mut RateLimiter, identity: &NetworkIdentity) {
        if self.current.as_ref() == Some(identity) {
            self.current = None;
        }
        self.deregister(limiter, identity.public_address).await;
    }

    /// Drops the current lease and every allow-list entry still on record,
    /// including ones left by a half-finished acquisition.
    pub async fn release_all(&mut self, limiter: &mut RateLimiter) {
        self.current = None;
        let addresses = self.registered.clone();
        for address in addresses {
            self.deregister(limiter, address).await;
        }
    }

    async fn deregister(&mut self, limiter: &mut RateLimiter, address: IpAddr) {
        if !self.registered.contains(&address) {
            return;
        }
        limiter.acquire(EndpointClass::ControlPlane).await;
        match self.control_plane.del_whitelist(address).await {
            Ok(()) => {
                self.registered.retain(|registered| *registered != address);
                engine_info!("Removed {} from the allow-list", address);
            }
            Err(err) => {
                engine_warn!("Failed to remove {} from the allow-list: {}", address, err);
            }
        }
    }
}
