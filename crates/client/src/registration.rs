//! Version registration and page control.
//!
//! A [`Registration`] owns the active gateway version, at most one waiting
//! version, and the set of open pages. Promoting a version hands every page
//! controlled by the previous active version to the new one; with
//! `clients_claim` it also takes over pages that were opened uncontrolled.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use precache_core::{AppConfig, Error};

use crate::fetch::{Network, Request};
use crate::gateway::{Gateway, GatewayResponse, LifecycleState, ResponseSource};
use crate::precache::InstallReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOptions {
    /// Promote new versions without waiting for controlled pages to close.
    pub skip_waiting: bool,
    /// Take control of uncontrolled pages on promotion.
    pub clients_claim: bool,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self { skip_waiting: true, clients_claim: true }
    }
}

impl From<&AppConfig> for RegistrationOptions {
    fn from(config: &AppConfig) -> Self {
        Self { skip_waiting: config.skip_waiting, clients_claim: config.clients_claim }
    }
}

/// What happened to a registered version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub version: u64,
    pub state: LifecycleState,
    pub install: InstallReport,
    /// Precache entries removed on activation; empty while waiting.
    pub evicted: Vec<String>,
}

/// An installed version held back behind the active one.
struct Waiting {
    gateway: Arc<Gateway>,
    install: InstallReport,
}

#[derive(Default)]
struct Versions {
    active: Option<Arc<Gateway>>,
    waiting: Option<Waiting>,
    /// Open pages and the version controlling each.
    clients: HashMap<u64, Option<Arc<Gateway>>>,
    next_client: u64,
}

impl Versions {
    fn controlled_by_active(&self) -> usize {
        let Some(active) = &self.active else {
            return 0;
        };
        self.clients
            .values()
            .filter(|c| c.as_ref().is_some_and(|g| Arc::ptr_eq(g, active)))
            .count()
    }
}

struct Shared {
    options: RegistrationOptions,
    network: Arc<dyn Network>,
    versions: Mutex<Versions>,
}

/// Owns gateway versions for one origin. Cloning shares the registration.
#[derive(Clone)]
pub struct Registration {
    shared: Arc<Shared>,
}

impl Registration {
    /// `network` serves pages no version controls.
    pub fn new(options: RegistrationOptions, network: Arc<dyn Network>) -> Self {
        Self { shared: Arc::new(Shared { options, network, versions: Mutex::new(Versions::default()) }) }
    }

    pub fn options(&self) -> RegistrationOptions {
        self.shared.options
    }

    fn versions(&self) -> MutexGuard<'_, Versions> {
        self.shared.versions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active(&self) -> Option<Arc<Gateway>> {
        self.versions().active.clone()
    }

    pub fn waiting(&self) -> Option<Arc<Gateway>> {
        self.versions().waiting.as_ref().map(|w| w.gateway.clone())
    }

    /// Install `gateway` and promote it now or park it as the waiting version.
    ///
    /// Asset failures are part of the outcome; only store errors fail the
    /// call, and a failed registration leaves the active version in place.
    pub async fn register(&self, gateway: Gateway) -> Result<RegisterOutcome, Error> {
        let gateway = Arc::new(gateway);
        let install = match gateway.install().await {
            Ok(report) => report,
            Err(e) => {
                retire(&gateway).await;
                return Err(e);
            }
        };

        let promote_now = {
            let versions = self.versions();
            versions.active.is_none() || self.shared.options.skip_waiting || versions.controlled_by_active() == 0
        };

        if promote_now {
            let evicted = match self.promote(&gateway).await {
                Ok(evicted) => evicted,
                Err(e) => {
                    retire(&gateway).await;
                    return Err(e);
                }
            };
            return Ok(RegisterOutcome { version: gateway.version(), state: gateway.state(), install, evicted });
        }

        gateway.set_state(LifecycleState::Waiting);
        let superseded = self
            .versions()
            .waiting
            .replace(Waiting { gateway: gateway.clone(), install: install.clone() });
        if let Some(old) = superseded {
            retire(&old.gateway).await;
        }
        tracing::info!(version = gateway.version(), "gateway installed; waiting for pages to close");

        Ok(RegisterOutcome { version: gateway.version(), state: gateway.state(), install, evicted: Vec::new() })
    }

    /// Activate `gateway`, then make it the active version and hand it the
    /// open pages. Nothing is swapped if activation fails.
    async fn promote(&self, gateway: &Arc<Gateway>) -> Result<Vec<String>, Error> {
        let evicted = gateway.activate().await?;

        let stale = {
            let mut versions = self.versions();
            let previous = versions.active.replace(gateway.clone());
            let stale = versions
                .waiting
                .take()
                .filter(|w| !Arc::ptr_eq(&w.gateway, gateway))
                .map(|w| w.gateway);

            let claim = self.shared.options.clients_claim;
            for controller in versions.clients.values_mut() {
                let hand_over = match (controller.as_ref(), previous.as_ref()) {
                    (Some(current), Some(prev)) => Arc::ptr_eq(current, prev),
                    (None, _) => claim,
                    _ => false,
                };
                if hand_over {
                    *controller = Some(gateway.clone());
                }
            }

            if let Some(prev) = previous {
                prev.set_state(LifecycleState::Redundant);
                tracing::info!(version = prev.version(), "gateway superseded");
            }
            stale
        };

        if let Some(old) = stale {
            retire(&old).await;
        }
        Ok(evicted)
    }

    /// Promote a waiting version whose last blocking page closed. On failure
    /// it goes back to waiting unless a newer version took its place.
    async fn promote_waiting(&self, waiting: Waiting) -> Result<RegisterOutcome, Error> {
        match self.promote(&waiting.gateway).await {
            Ok(evicted) => Ok(RegisterOutcome {
                version: waiting.gateway.version(),
                state: waiting.gateway.state(),
                install: waiting.install,
                evicted,
            }),
            Err(e) => {
                tracing::warn!(version = waiting.gateway.version(), "promotion failed: {e}");
                if let Some(displaced) = self.requeue(waiting) {
                    retire(&displaced).await;
                }
                Err(e)
            }
        }
    }

    /// Put `waiting` back in the waiting slot. Returns its gateway if the
    /// slot is already taken.
    fn requeue(&self, waiting: Waiting) -> Option<Arc<Gateway>> {
        let mut versions = self.versions();
        if versions.waiting.is_some() {
            return Some(waiting.gateway);
        }
        versions.waiting = Some(waiting);
        None
    }

    /// Open a page. It is controlled by the active version, if any.
    pub fn client(&self) -> PageClient {
        let mut versions = self.versions();
        let id = versions.next_client;
        versions.next_client += 1;
        let controller = versions.active.clone();
        versions.clients.insert(id, controller);
        PageClient { id, registration: self.clone() }
    }

    /// Open a page, issue one request, and close the page. Returns the
    /// version that served it, if any.
    ///
    /// A promotion failing on close is logged; the response still stands.
    pub async fn fetch_once(&self, request: &Request) -> Result<(Option<u64>, GatewayResponse), Error> {
        let page = self.client();
        let version = page.controller().map(|g| g.version());
        let result = page.fetch(request).await;
        if let Err(e) = page.close().await {
            tracing::warn!("page close after {} failed: {e}", request.url);
        }
        Ok((version, result?))
    }

    /// Number of open pages.
    pub fn client_count(&self) -> usize {
        self.versions().clients.len()
    }

    fn controller_of(&self, client: u64) -> Option<Arc<Gateway>> {
        self.versions().clients.get(&client).cloned().flatten()
    }

    /// Forget a page. Returns the waiting version if the active one now
    /// controls no pages. A page already forgotten yields nothing.
    fn detach_client(&self, client: u64) -> Option<Waiting> {
        let mut versions = self.versions();
        versions.clients.remove(&client)?;
        if versions.controlled_by_active() == 0 { versions.waiting.take() } else { None }
    }
}

/// Best-effort cleanup of a version that will never serve.
async fn retire(gateway: &Gateway) {
    if let Err(e) = gateway.discard().await {
        tracing::warn!(version = gateway.version(), "staged entries not discarded: {e}");
    }
}

/// An open page issuing requests through the registration.
///
/// Dropping a page without [`PageClient::close`] still releases it; any
/// promotion it unblocks runs on a spawned task.
pub struct PageClient {
    id: u64,
    registration: Registration,
}

impl PageClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Version controlling this page, if any.
    pub fn controller(&self) -> Option<Arc<Gateway>> {
        self.registration.controller_of(self.id)
    }

    /// Issue a request. Uncontrolled pages go straight to the network.
    ///
    /// The controller is captured once, so a promotion mid-request does not
    /// disturb the request in flight.
    pub async fn fetch(&self, request: &Request) -> Result<GatewayResponse, Error> {
        match self.controller() {
            Some(gateway) => gateway.dispatch(request).await,
            None => {
                let response = self.registration.shared.network.fetch(request).await?;
                Ok(GatewayResponse::from_network(response, ResponseSource::Passthrough))
            }
        }
    }

    /// Close the page. Returns the outcome if this promoted a waiting version.
    ///
    /// The promotion runs on its own task, so cancelling this future does
    /// not abandon it halfway.
    pub async fn close(self) -> Result<Option<RegisterOutcome>, Error> {
        let Some(waiting) = self.registration.detach_client(self.id) else {
            return Ok(None);
        };
        let registration = self.registration.clone();
        let outcome = tokio::spawn(async move { registration.promote_waiting(waiting).await })
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))??;
        Ok(Some(outcome))
    }
}

impl Drop for PageClient {
    fn drop(&mut self) {
        let Some(waiting) = self.registration.detach_client(self.id) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registration = self.registration.clone();
                handle.spawn(async move {
                    if let Err(e) = registration.promote_waiting(waiting).await {
                        tracing::warn!("promotion after page drop failed: {e}");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(page = self.id, "page dropped outside a runtime; waiting version not promoted");
                if let Some(displaced) = self.registration.requeue(waiting) {
                    displaced.set_state(LifecycleState::Redundant);
                }
            }
        }
    }
}
