//! Network collaborator contract.
//!
//! The controller never performs wire I/O itself. When the throttle gate
//! permits a fetch it calls [`FetchTransport::request_fetch`] and returns
//! immediately; the transport later feeds the raw response back through
//! `ProductConfigController::ingest_fetch_result` on its own task. Retry
//! and backoff policy belong entirely to the transport.

/// Fire-and-forget fetch dispatch implemented by the embedding host.
pub trait FetchTransport: Send + Sync {
    /// Requests a configuration fetch from the backend.
    fn request_fetch(&self);
}

/// Transport that drops every fetch request.
///
/// Used by identity-less controllers operating as disabled shells and by
/// tests that only exercise local state.
#[derive(Debug, Default)]
pub struct NoopTransport;

impl FetchTransport for NoopTransport {
    fn request_fetch(&self) {}
}
