//! State shared by every connection task of one server.

use std::sync::Arc;

use crate::config::TimeoutConfig;
use crate::lifecycle::Shutdown;
use crate::policy::UserProfile;
use crate::proxy::local::{LocalService, Resources};
use crate::proxy::router::{LocalAddress, OriginAddress};

/// Read-only view of the server a handler works for.
#[derive(Clone)]
pub struct ProxyContext {
    pub profile: Arc<UserProfile>,
    pub local: LocalAddress,
    /// Forwarding proxy all origin traffic goes through, if any.
    pub forward: Option<OriginAddress>,
    pub timeouts: TimeoutConfig,
    pub resources: Resources,
    pub service: Arc<dyn LocalService>,
    pub shutdown: Shutdown,
}

impl ProxyContext {
    /// Pool key and dial address for `origin`, honouring the forwarding proxy.
    pub fn dial_address<'a>(&'a self, origin: &'a OriginAddress) -> &'a OriginAddress {
        self.forward.as_ref().unwrap_or(origin)
    }

    /// Base URL of pages served by the proxy.
    pub fn local_url(&self) -> String {
        self.local.url()
    }
}

impl std::fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyContext")
            .field("profile", &self.profile.name())
            .field("local", &self.local)
            .field("forward", &self.forward)
            .finish_non_exhaustive()
    }
}
