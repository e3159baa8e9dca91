//! The job state DAG (spec §4.5.1) and its allowed-transition table, kept
//! separate from `store::models::JobState` only in the sense that this is
//! where the *graph* lives; the enum itself stays in the store so the row
//! decode doesn't need to depend on the job module.

use crate::store::models::JobState;

/// Returns the set of states `from` may transition into. Used both by the
/// worker (to assert it never skips a step) and by the property test in
/// spec §8.1 ("every observed transition is in this table").
pub fn allowed_next(from: &JobState) -> &'static [JobState] {
    use JobState::*;
    match from {
        // Start/Stop/Restart jobs are a single container operation with no
        // intermediate states of their own; they complete directly. Uninstall
        // and stack-uninstall jobs enter at `stopping`, bypassing the install
        // pipeline's validate/allocate/create states entirely.
        Queued => &[Validating, Stopping, Completed, Cancelled, Failed],
        Validating => &[Allocating, Failed, Cancelled],
        Allocating => &[Creating, Failed, Cancelling],
        Creating => &[Configuring, Failed, Cancelling, RollingBack],
        Configuring => &[Starting, Failed, Cancelling, RollingBack],
        Starting => &[WaitingNetwork, Failed, Cancelling, RollingBack],
        WaitingNetwork => &[PushingSdk, Failed, Cancelling, RollingBack],
        PushingSdk => &[Executing, Failed, Cancelling, RollingBack],
        Executing => &[Finalizing, Failed, Cancelling, RollingBack],
        Finalizing => &[Completed, Failed, RollingBack],
        Completed => &[],
        Cancelling => &[Cancelled, RollingBack],
        Cancelled => &[],
        Failing => &[Failed, RollingBack],
        Failed => &[],
        RollingBack => &[Failed, Cancelled],
        // Uninstall short-path (spec §4.5.1): skips validate/allocate/configure
        // entirely since the container already exists.
        Stopping => &[DetachingVolumes, Failed],
        DetachingVolumes => &[Destroying, Failed],
        // A plain uninstall goes Destroying -> Finalizing -> Completed. An
        // Update job re-enters Validating from here to run the install phase
        // of the same job against the manifest's new version (spec §4.5.1).
        Destroying => &[Finalizing, Validating, Failed],
    }
}

pub fn is_allowed_transition(from: &JobState, to: &JobState) -> bool {
    allowed_next(from).contains(to)
}

/// The initial state of the uninstall short-path pipeline (spec §4.5.1),
/// bypassing the install pipeline's `validating`/`allocating` states since
/// the target container already exists.
pub fn uninstall_entry_state() -> JobState {
    JobState::Stopping
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::JobState::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for s in [Completed, Cancelled, Failed] {
            assert!(allowed_next(&s).is_empty(), "{s:?} should be terminal");
        }
    }

    #[test]
    fn install_pipeline_is_linear_happy_path() {
        let happy = [
            Queued, Validating, Allocating, Creating, Configuring, Starting,
            WaitingNetwork, PushingSdk, Executing, Finalizing, Completed,
        ];
        for pair in happy.windows(2) {
            assert!(
                is_allowed_transition(&pair[0], &pair[1]),
                "{:?} -> {:?} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn uninstall_short_path_skips_install_states() {
        assert!(is_allowed_transition(&Stopping, &DetachingVolumes));
        assert!(is_allowed_transition(&DetachingVolumes, &Destroying));
        assert!(is_allowed_transition(&Destroying, &Finalizing));
        assert!(is_allowed_transition(&Finalizing, &Completed));
        assert!(is_allowed_transition(&Queued, &Stopping));
        assert!(!is_allowed_transition(&Allocating, &Stopping));
    }

    #[test]
    fn every_non_terminal_state_can_reach_failed_or_cancelled() {
        for s in [
            Queued, Validating, Allocating, Creating, Configuring, Starting,
            WaitingNetwork, PushingSdk, Executing, Finalizing, Cancelling,
            Failing, RollingBack, Stopping, DetachingVolumes, Destroying,
        ] {
            let next = allowed_next(&s);
            assert!(
                next.iter().any(|n| matches!(n, Failed | Cancelled | RollingBack)),
                "{s:?} has no path toward a terminal/rollback state"
            );
        }
    }
}
