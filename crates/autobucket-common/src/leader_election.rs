//! Leader election on a coordination.k8s.io/v1 Lease
//!
//! With several operator replicas only the Lease holder runs the controllers.
//! Every write to the Lease carries the resourceVersion that was read, so two
//! replicas racing for an expired Lease cannot both win: the loser gets 409
//! and tries again later.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name of the Lease shared by all operator replicas
pub const LEADER_LEASE_NAME: &str = "autobucket-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Leader election errors
#[derive(Debug, Error)]
pub enum LeaderElectionError {
    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// What a replica should do with the Lease it just read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// No Lease exists yet
    Create,
    /// We hold it; bump renewTime
    Renew,
    /// Holder stopped renewing; take it over
    TakeOver {
        /// Transition count to write
        transitions: i32,
    },
    /// Another replica holds a live Lease
    Wait,
}

/// Decide how `identity` should treat `lease` at time `now`
pub fn decide(lease: Option<&Lease>, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let Some(lease) = lease else {
        return LeaseDecision::Create;
    };
    let spec = lease.spec.as_ref();

    if spec.and_then(|s| s.holder_identity.as_deref()) == Some(identity) {
        return LeaseDecision::Renew;
    }

    let expired = match (
        spec.and_then(|s| s.renew_time.as_ref()),
        spec.and_then(|s| s.lease_duration_seconds),
    ) {
        (Some(renewed), Some(secs)) => now > renewed.0 + chrono::Duration::seconds(secs.into()),
        _ => true,
    };

    if expired {
        LeaseDecision::TakeOver {
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        }
    } else {
        LeaseDecision::Wait
    }
}

/// Whether a replica that last renewed at `last_renewed` may keep leading
///
/// Renewal errors are retried every [`RETRY_INTERVAL`], so the next attempt
/// must still land before the Lease expires.
pub fn renewal_window_open(last_renewed: Instant, now: Instant) -> bool {
    now.saturating_duration_since(last_renewed) + RETRY_INTERVAL < LEASE_DURATION
}

/// Competes for the operator Lease
pub struct LeaderElector {
    api: Api<Lease>,
    identity: String,
    is_leader: AtomicBool,
}

impl LeaderElector {
    /// Create an elector for `identity` in `namespace`
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity: identity.to_string(),
            is_leader: AtomicBool::new(false),
        }
    }

    /// Whether this replica currently holds the Lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until the Lease is held, then keep renewing it in the background
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(identity = %self.identity, lease = LEADER_LEASE_NAME, "Waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => break,
                Ok(false) => debug!(identity = %self.identity, "Lease held by another replica"),
                Err(e) => warn!(identity = %self.identity, error = %e, "Lease acquisition failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        info!(identity = %self.identity, "Leadership acquired");
        self.is_leader.store(true, Ordering::SeqCst);

        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(&self);
        let renewal = tokio::spawn(async move { elector.renew_until_lost(lost_tx).await });

        LeaderGuard {
            elector: self,
            renewal,
            lost_rx: Some(lost_rx),
        }
    }

    async fn renew_until_lost(&self, lost_tx: oneshot::Sender<()>) {
        let mut last_renewed = Instant::now();
        let mut delay = RENEW_INTERVAL;
        loop {
            tokio::time::sleep(delay).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    debug!(identity = %self.identity, "Lease renewed");
                    last_renewed = Instant::now();
                    delay = RENEW_INTERVAL;
                }
                Ok(false) => {
                    warn!(identity = %self.identity, "Lease taken by another replica");
                    break;
                }
                Err(e) if renewal_window_open(last_renewed, Instant::now()) => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed, retrying");
                    delay = RETRY_INTERVAL;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "Lease renewal failed until expiry");
                    break;
                }
            }
        }
        warn!(identity = %self.identity, "Leadership lost");
        self.is_leader.store(false, Ordering::SeqCst);
        let _ = lost_tx.send(());
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, LeaderElectionError> {
        let now = Utc::now();
        let existing = self.api.get_opt(LEADER_LEASE_NAME).await?;

        let written = match decide(existing.as_ref(), &self.identity, now) {
            LeaseDecision::Wait => return Ok(false),
            LeaseDecision::Create => {
                self.api
                    .create(&PostParams::default(), &self.lease(None, now, now, 0))
                    .await
            }
            LeaseDecision::Renew => {
                let mut lease = existing.unwrap_or_default();
                if let Some(spec) = lease.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.api
                    .replace(LEADER_LEASE_NAME, &PostParams::default(), &lease)
                    .await
            }
            LeaseDecision::TakeOver { transitions } => {
                let rv = existing.and_then(|l| l.metadata.resource_version);
                self.api
                    .replace(
                        LEADER_LEASE_NAME,
                        &PostParams::default(),
                        &self.lease(rv, now, now, transitions),
                    )
                    .await
            }
        };

        match written {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn lease(
        &self,
        resource_version: Option<String>,
        acquired: DateTime<Utc>,
        renewed: DateTime<Utc>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(LEADER_LEASE_NAME.to_string()),
                resource_version,
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                acquire_time: Some(MicroTime(acquired)),
                renew_time: Some(MicroTime(renewed)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    /// Hand the Lease back by expiring it, so a standby takes over immediately
    async fn release(&self) -> Result<(), LeaderElectionError> {
        let Some(mut lease) = self.api.get_opt(LEADER_LEASE_NAME).await? else {
            return Ok(());
        };
        if decide(Some(&lease), &self.identity, Utc::now()) != LeaseDecision::Renew {
            return Ok(());
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
            spec.renew_time = Some(MicroTime(Utc::now() - chrono::Duration::seconds(60)));
        }
        self.api
            .replace(LEADER_LEASE_NAME, &PostParams::default(), &lease)
            .await?;
        info!(identity = %self.identity, "Lease released");
        Ok(())
    }
}

/// Held while this replica is leader
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Resolve once the Lease is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Stop renewing and expire the Lease
    pub async fn release(self) -> Result<(), LeaderElectionError> {
        self.renewal.abort();
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.elector.release().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.renewal.abort();
    }
}
