//! Synchronization primitives.
//!
//! A [`Fence`] lets the CPU wait for one submission; a [`Semaphore`]
//! orders submissions on the GPU, typically across queues.

use crate::api::{GraphicsApi, ObjectKind};
use crate::error::Result;
use crate::repr::{FenceRepr, SemaphoreRepr};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Completion marker shared by everything that tracks one submission.
#[derive(Debug, Default)]
pub(crate) struct SubmissionTicket {
    retired: AtomicBool,
}

impl SubmissionTicket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Set of submissions not yet known to have completed.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    tickets: Mutex<Vec<Arc<SubmissionTicket>>>,
}

impl InFlight {
    pub(crate) fn push(&self, ticket: Arc<SubmissionTicket>) {
        let mut tickets = self.tickets.lock();
        tickets.retain(|t| !t.is_retired());
        tickets.push(ticket);
    }

    pub(crate) fn retire_all(&self) {
        for ticket in self.tickets.lock().drain(..) {
            ticket.retire();
        }
    }

    pub(crate) fn any_pending(&self) -> bool {
        self.tickets.lock().iter().any(|t| !t.is_retired())
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<SubmissionTicket>> {
        self.tickets
            .lock()
            .iter()
            .filter(|t| !t.is_retired())
            .cloned()
            .collect()
    }
}

/// CPU-visible completion signal for a submission.
///
/// Created unsignaled. Attached to at most one unresolved submission at a
/// time, and reusable once [`wait_for`](Self::wait_for) has returned.
#[derive(Debug)]
pub struct Fence {
    repr: FenceRepr,
    in_flight: InFlight,
}

impl Fence {
    /// Create an unsignaled fence.
    pub fn create(api: &GraphicsApi) -> Result<Self> {
        let repr = api.device()?.create_fence()?;
        api.live().acquire(ObjectKind::Fence);
        tracing::debug!("Created fence");
        Ok(Self {
            repr,
            in_flight: InFlight::default(),
        })
    }

    /// Block until the guarded submission has retired, then reset the fence.
    ///
    /// `None` waits indefinitely. On [`GpuError::Timeout`] the fence stays
    /// armed and may be waited on again. A fence that was never submitted
    /// returns immediately.
    ///
    /// [`GpuError::Timeout`]: crate::GpuError::Timeout
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_for(&self, api: &GraphicsApi, timeout: Option<Duration>) -> Result<()> {
        if !self.in_flight.any_pending() {
            return Ok(());
        }
        api.active().wait_fence(&self.repr, timeout)?;
        self.in_flight.retire_all();
        Ok(())
    }

    /// Whether the guarded submission has completed, without blocking.
    pub fn is_signaled(&self, api: &GraphicsApi) -> Result<bool> {
        if !self.in_flight.any_pending() {
            return Ok(false);
        }
        api.active().fence_signaled(&self.repr)
    }

    /// Whether a submission guarded by this fence has not been waited on.
    pub fn is_pending(&self) -> bool {
        self.in_flight.any_pending()
    }

    pub(crate) fn arm(&self, ticket: Arc<SubmissionTicket>) {
        self.in_flight.push(ticket);
    }

    pub(crate) fn tickets(&self) -> Vec<Arc<SubmissionTicket>> {
        self.in_flight.snapshot()
    }

    pub(crate) fn repr(&self) -> &FenceRepr {
        &self.repr
    }

    /// Destroy the fence. It must not guard an unresolved submission.
    pub fn destroy(self, api: &GraphicsApi) {
        debug_assert!(
            !self.in_flight.any_pending(),
            "Fence::destroy: fence still guards a submission that was never waited on"
        );
        api.active().destroy_fence(self.repr);
        api.live().release(ObjectKind::Fence);
    }
}

/// GPU-side ordering between submissions.
#[derive(Debug)]
pub struct Semaphore {
    repr: SemaphoreRepr,
}

impl Semaphore {
    /// Create a semaphore.
    pub fn create(api: &GraphicsApi) -> Result<Self> {
        let repr = api.device()?.create_semaphore()?;
        api.live().acquire(ObjectKind::Semaphore);
        Ok(Self { repr })
    }

    pub(crate) fn repr(&self) -> &SemaphoreRepr {
        &self.repr
    }

    /// Destroy the semaphore. No pending submission may reference it.
    pub fn destroy(self, api: &GraphicsApi) {
        api.active().destroy_semaphore(self.repr);
        api.live().release(ObjectKind::Semaphore);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BackendConfig, BackendKind};

    fn software() -> GraphicsApi {
        GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap()
    }

    #[test]
    fn tickets_retire_together() {
        let a = InFlight::default();
        let b = InFlight::default();
        let ticket = SubmissionTicket::new();
        a.push(ticket.clone());
        b.push(ticket);
        assert!(a.any_pending() && b.any_pending());

        a.retire_all();
        assert!(!a.any_pending());
        assert!(!b.any_pending());
        assert!(b.snapshot().is_empty());
    }

    #[test]
    fn unsubmitted_fence_returns_immediately() {
        let api = software();
        let fence = Fence::create(&api).unwrap();

        fence.wait_for(&api, None).unwrap();
        fence
            .wait_for(&api, Some(Duration::from_millis(1)))
            .unwrap();
        assert!(!fence.is_signaled(&api).unwrap());
        assert!(!fence.is_pending());

        fence.destroy(&api);
        assert!(api.live().outstanding().is_empty());
    }

    #[test]
    fn create_without_backend_fails() {
        let api = GraphicsApi::new();
        assert!(matches!(
            Fence::create(&api),
            Err(crate::GpuError::NoBackend)
        ));
        assert!(matches!(
            Semaphore::create(&api),
            Err(crate::GpuError::NoBackend)
        ));
    }
}
