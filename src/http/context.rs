//! Per-call-chain caching and timeout overrides.
//!
//! # Responsibilities
//! - Carry the aggressive-cache window and the disable-caching flag
//! - Let callers override them for a lexical scope and get the old values back
//!
//! # Design Decisions
//! - The context is an explicit value passed to every execution, never a
//!   thread-local, so independent call chains cannot see each other's flags
//! - Scopes restore on drop, which covers early returns, `?` and panics

use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Ambient settings for one logical call chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Serve cached GETs younger than this without contacting the server.
    pub aggressive_cache: Option<Duration>,
    /// Bypass the response cache entirely.
    pub disable_http_caching: bool,
    /// Per-call timeout override.
    pub request_timeout: Option<Duration>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable aggressive caching until the returned scope is dropped.
    pub fn aggressively_cache_for(&mut self, window: Duration) -> ContextScope<'_> {
        ContextScope::enter(self, |ctx| ctx.aggressive_cache = Some(window))
    }

    /// Disable every form of caching until the returned scope is dropped.
    pub fn disable_all_caching(&mut self) -> ContextScope<'_> {
        ContextScope::enter(self, |ctx| {
            ctx.aggressive_cache = None;
            ctx.disable_http_caching = true;
        })
    }

    pub fn with_timeout(&mut self, timeout: Duration) -> ContextScope<'_> {
        ContextScope::enter(self, |ctx| ctx.request_timeout = Some(timeout))
    }
}

/// Guard restoring the previous [`RequestContext`] when dropped.
///
/// Derefs to the context, so scopes nest:
/// `ctx.aggressively_cache_for(d).disable_all_caching()`.
#[derive(Debug)]
pub struct ContextScope<'a> {
    ctx: &'a mut RequestContext,
    previous: RequestContext,
}

impl<'a> ContextScope<'a> {
    fn enter(ctx: &'a mut RequestContext, apply: impl FnOnce(&mut RequestContext)) -> Self {
        let previous = *ctx;
        apply(ctx);
        Self { ctx, previous }
    }
}

impl Deref for ContextScope<'_> {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        *self.ctx = self.previous;
    }
}
