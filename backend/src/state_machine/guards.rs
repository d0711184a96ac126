// Transition guards - business preconditions checked before a job may
// enter a target state.
//
// Pure functions over an already-loaded job row so they can be
// evaluated inside the transition transaction and tested in isolation.

use fieldops_shared::{DepositStatus, Job, JobState, PermitStatus};

/// Reasons the given job may not enter `to` right now. Empty = clear.
pub fn unmet_guards(job: &Job, to: JobState, open_time_entries: i64) -> Vec<String> {
    let mut reasons = Vec::new();

    match to {
        JobState::Scheduled => {
            if job.deposit_required && job.deposit_status == DepositStatus::Unpaid {
                reasons.push("required deposit has not been paid".to_string());
            }
        }
        JobState::InProgress => {
            if job.jha_required && job.jha_acknowledged_at.is_none() {
                reasons.push("job hazard assessment has not been acknowledged".to_string());
            }
            if job.permit_required && job.permit_status != PermitStatus::Approved {
                reasons.push("required permit has not been approved".to_string());
            }
        }
        JobState::Completed => {
            if open_time_entries > 0 {
                reasons.push(format!(
                    "{} open time {} must be closed before completion",
                    open_time_entries,
                    if open_time_entries == 1 { "entry" } else { "entries" }
                ));
            }
        }
        JobState::Draft | JobState::OnHold | JobState::Cancelled => {}
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job(state: JobState) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            quote_id: None,
            title: "Fence install".to_string(),
            description: None,
            status: state,
            scheduled_start: None,
            scheduled_end: None,
            assigned_crew_id: None,
            jha_required: false,
            jha_acknowledged_at: None,
            deposit_required: false,
            deposit_status: DepositStatus::Unpaid,
            permit_required: false,
            permit_status: PermitStatus::Pending,
            last_state_change_at: now,
            created_at: now,
            updated_at: None,
        }
    }

    #[test]
    fn test_jha_blocks_in_progress_until_acknowledged() {
        let mut j = job(JobState::Scheduled);
        j.jha_required = true;

        let reasons = unmet_guards(&j, JobState::InProgress, 0);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("hazard assessment"));

        j.jha_acknowledged_at = Some(Utc::now());
        assert!(unmet_guards(&j, JobState::InProgress, 0).is_empty());
    }

    #[test]
    fn test_unpaid_deposit_blocks_scheduling() {
        let mut j = job(JobState::Draft);
        j.deposit_required = true;

        assert_eq!(unmet_guards(&j, JobState::Scheduled, 0).len(), 1);

        j.deposit_status = DepositStatus::Paid;
        assert!(unmet_guards(&j, JobState::Scheduled, 0).is_empty());

        // a waived deposit also clears the guard
        j.deposit_status = DepositStatus::Waived;
        assert!(unmet_guards(&j, JobState::Scheduled, 0).is_empty());
    }

    #[test]
    fn test_unapproved_permit_blocks_in_progress() {
        let mut j = job(JobState::Scheduled);
        j.permit_required = true;

        assert_eq!(unmet_guards(&j, JobState::InProgress, 0).len(), 1);

        j.permit_status = PermitStatus::Approved;
        assert!(unmet_guards(&j, JobState::InProgress, 0).is_empty());
    }

    #[test]
    fn test_open_time_entries_block_completion() {
        let j = job(JobState::InProgress);

        let reasons = unmet_guards(&j, JobState::Completed, 2);
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("2 open time entries"));

        assert!(unmet_guards(&j, JobState::Completed, 0).is_empty());
    }

    #[test]
    fn test_guards_are_independent() {
        let mut j = job(JobState::Scheduled);
        j.jha_required = true;
        j.permit_required = true;

        let reasons = unmet_guards(&j, JobState::InProgress, 0);
        assert_eq!(reasons.len(), 2);
    }
}
