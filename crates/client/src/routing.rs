//! Ordered routing table.
//!
//! Routes are tried in declaration order and the first match wins. A route's
//! pattern runs against the full request URL; for cross-origin requests the
//! match has to start at the beginning of the URL, so a same-origin catch-all
//! such as `/.*` never captures third-party hosts.

use regex::Regex;
use reqwest::Method;
use url::Url;

use precache_core::{Error, RouteDecl};

use crate::fetch::{Request, is_same_origin};
use crate::strategy::Strategy;

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct Route {
    pub pattern: Regex,
    pub method: Method,
    pub strategy: Strategy,
}

impl Route {
    /// Compile a declared route.
    pub fn compile(decl: &RouteDecl) -> Result<Self, Error> {
        let pattern =
            Regex::new(&decl.url_pattern).map_err(|e| Error::InvalidRoute(format!("{}: {e}", decl.url_pattern)))?;
        let method = Method::from_bytes(decl.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::InvalidRoute(format!("{}: {e}", decl.method)))?;
        let strategy = Strategy::new(decl.strategy, &decl.options)?;

        Ok(Self { pattern, method, strategy })
    }

    pub fn matches(&self, request: &Request, origin: &Url) -> bool {
        if request.method != self.method {
            return false;
        }

        let Some(found) = self.pattern.find(request.url.as_str()) else {
            return false;
        };

        if found.start() != 0 && !is_same_origin(&request.url, origin) {
            tracing::debug!(
                "{} matched {} at offset {} but is cross-origin; ignoring",
                self.pattern,
                request.url,
                found.start()
            );
            return false;
        }

        true
    }
}

/// Routes in declaration order, bound to the gateway origin.
#[derive(Debug, Clone)]
pub struct RouteTable {
    origin: Url,
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn compile(origin: Url, decls: &[RouteDecl]) -> Result<Self, Error> {
        let routes = decls.iter().map(Route::compile).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { origin, routes })
    }

    /// First route matching `request`, with its position in the table.
    pub fn find(&self, request: &Request) -> Option<(usize, &Route)> {
        self.routes
            .iter()
            .enumerate()
            .find(|(_, route)| route.matches(request, &self.origin))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
