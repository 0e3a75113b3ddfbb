//! Reconciliation phases
//!
//! A pass walks the phases in order. Each step performs its I/O in the
//! controller, reduces the result to an [`Observed`] value and asks
//! [`transition`] what to do next, so the control flow itself stays free of I/O.

use std::fmt;
use std::time::Duration;

/// Requeue delay after adding the finalizer
pub const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue delay while OLM installs or removes the OpenShift Lightspeed operator
pub const OPERATOR_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay while waiting on OLSConfig or the index discovery pod
pub const DOWNSTREAM_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay while the OLSConfig is being released during deletion
pub const CLEANUP_REQUEUE: Duration = Duration::from_secs(10);

/// Step of a reconciliation pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Instance loaded; deletion and finalizer checks pending
    Initializing,
    /// Installing the OpenShift Lightspeed operator through OLM
    EnsuringOperator,
    /// Resolving RAG sources and writing the OLSConfig
    PatchingDownstream,
    /// Waiting for OpenShift Lightspeed to report the OLSConfig healthy
    AwaitingReadiness,
    /// Everything converged
    Ready,
    /// Instance is being deleted
    Deleting,
    /// Releasing and deleting the OLSConfig
    RemovingDownstreamOwnership,
    /// Removing the instance-owned OpenShift Lightspeed operator
    UninstallingOperator,
    /// Instance finalizer removed; nothing left to do
    FinalizerRemoved,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "Initializing",
            Self::EnsuringOperator => "EnsuringOperator",
            Self::PatchingDownstream => "PatchingDownstream",
            Self::AwaitingReadiness => "AwaitingReadiness",
            Self::Ready => "Ready",
            Self::Deleting => "Deleting",
            Self::RemovingDownstreamOwnership => "RemovingDownstreamOwnership",
            Self::UninstallingOperator => "UninstallingOperator",
            Self::FinalizerRemoved => "FinalizerRemoved",
        };
        f.write_str(name)
    }
}

/// What the I/O for a phase found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observed {
    /// The instance carries a deletion timestamp
    DeletionRequested,
    /// The finalizer was missing and has just been added
    FinalizerAdded,
    /// Finalizer present, not being deleted
    Admitted,
    /// The phase's work is finished
    Complete,
    /// The phase's work is underway; check again later
    InProgress,
    /// The phase cannot proceed until the instance spec changes
    Blocked,
}

/// Next step for the driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Continue the pass in another phase
    Advance(Phase),
    /// End the pass and come back after the delay
    RequeueAfter(Duration),
    /// End the pass and wait for the next watch event
    Done,
}

/// The phase table
pub fn transition(phase: Phase, observed: Observed) -> Outcome {
    use Observed::*;
    use Outcome::*;

    match (phase, observed) {
        (Phase::Initializing, DeletionRequested) => Advance(Phase::Deleting),
        (Phase::Initializing, FinalizerAdded) => RequeueAfter(FINALIZER_REQUEUE),
        (Phase::Initializing, Admitted) => Advance(Phase::EnsuringOperator),

        (Phase::EnsuringOperator, Complete) => Advance(Phase::PatchingDownstream),
        (Phase::EnsuringOperator, InProgress) => RequeueAfter(OPERATOR_REQUEUE),

        (Phase::PatchingDownstream, Complete) => Advance(Phase::AwaitingReadiness),
        (Phase::PatchingDownstream, InProgress) => RequeueAfter(DOWNSTREAM_REQUEUE),

        (Phase::AwaitingReadiness, Complete) => Advance(Phase::Ready),
        (Phase::AwaitingReadiness, InProgress) => RequeueAfter(DOWNSTREAM_REQUEUE),

        (Phase::Deleting, _) => Advance(Phase::RemovingDownstreamOwnership),

        (Phase::RemovingDownstreamOwnership, Complete) => Advance(Phase::UninstallingOperator),
        (Phase::RemovingDownstreamOwnership, InProgress) => RequeueAfter(CLEANUP_REQUEUE),

        (Phase::UninstallingOperator, Complete) => Advance(Phase::FinalizerRemoved),
        (Phase::UninstallingOperator, InProgress) => RequeueAfter(OPERATOR_REQUEUE),

        _ => Done,
    }
}
