// src/residency/policy.rs
//! The residency replacement policy.
//!
//! Builds a scratch ordering of every non-`Loading` record by desirability
//! — priority, then recency of use, then confirmed/pending size as
//! tiebreaks — and walks it with two indices: `activate_idx` advances from
//! the front activating absent-but-used assets, `release_idx` retreats from
//! the back evicting residents to make room. `Priority::PERSISTENT` assets
//! are never chosen for eviction and may leave total consumption above the
//! hard budget.

use crate::residency::id::AssetId;
use crate::residency::record::{AssetRecord, Priority, ResidencyState};
use crate::residency::config::ResidencyConfig;

/// The side effects one `iterate` policy pass decided on. The caller
/// (`manager.rs`) applies these against the instantiator outside of the
/// sort/scratch bookkeeping here.
#[derive(Debug, Default)]
pub(crate) struct PolicyOutcome {
    pub activations: Vec<AssetId>,
    pub releases: Vec<AssetId>,
}

fn desirability_order(records: &[AssetRecord]) -> Vec<usize> {
    let mut scratch: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.state != ResidencyState::Loading)
        .map(|(i, _)| i)
        .collect();

    scratch.sort_by(|&a, &b| {
        let ra = &records[a];
        let rb = &records[b];
        rb.priority
            .cmp(&ra.priority)
            .then(rb.last_used.cmp(&ra.last_used))
            .then(ra.consumed.cmp(&rb.consumed))
            .then(rb.pending_consumed.cmp(&ra.pending_consumed))
            .then(ra.id.cmp(&rb.id))
    });
    scratch
}

/// Runs one policy pass. `total_consumed` is the sum of `consumed` across
/// every resident record going in; returns the outcome plus the updated
/// total reflecting the releases and newly-reserved activations this pass
/// decided on.
///
/// `estimate` is called once per activation candidate, in desirability
/// order, mirroring §4.4 step 6's "ask the Instantiator to estimate a cost
/// for the record" — the caller wires this to `Instantiator::estimate_cost`.
/// It is never called for a record the loop skips without considering (e.g.
/// one that's already resident, loading, or unused), so an implementation
/// that reads through a handle stays cheap.
///
/// `PERSISTENT` records may push `total_consumed` above `image_budget` (they
/// hard-pin) and are never release candidates. The hard budget gating
/// ordinary activations is charged only against the *non-persistent* share
/// of `running_total` — otherwise a single oversized persistent resident
/// would permanently lock out every other candidate's admission, which
/// spec.md §8 scenario 2 (a 2000-byte persistent resident at a 1000-byte
/// budget, alongside a 100-byte ordinary candidate) explicitly rules out:
/// both end up resident. See DESIGN.md's Open Question entry for this.
pub(crate) fn run(
    records: &mut [AssetRecord],
    config: &ResidencyConfig,
    total_consumed: u64,
    mut estimate: impl FnMut(&AssetRecord) -> u64,
) -> (PolicyOutcome, u64) {
    let scratch = desirability_order(records);
    let mut activate_idx = 0usize;
    let mut release_idx = scratch.len();
    let mut running_total = total_consumed;
    let mut persistent_total: u64 = records
        .iter()
        .filter(|r| r.priority.is_persistent())
        .map(|r| r.total_cost())
        .sum();
    let mut iteration_used = 0u64;
    let eager_threshold = (config.image_budget / 4) * 3;
    let mut out = PolicyOutcome::default();
    let mut released = vec![false; records.len()];

    while activate_idx < release_idx {
        let idx = scratch[activate_idx];
        if records[idx].state != ResidencyState::Absent
            || records[idx].last_used == 0
            || records[idx].priority.raw() == 0
        {
            activate_idx += 1;
            continue;
        }

        if iteration_used >= config.image_budget_per_iteration {
            break;
        }

        let estimate = estimate(&records[idx]);
        let persistent = records[idx].priority.is_persistent();

        if !persistent && running_total - persistent_total + estimate > config.image_budget {
            while release_idx > activate_idx + 1 {
                let tail = scratch[release_idx - 1];
                let tail_rec = &records[tail];
                if tail_rec.state == ResidencyState::Resident && !tail_rec.priority.is_persistent() {
                    running_total -= tail_rec.consumed;
                    out.releases.push(tail_rec.id);
                    released[tail] = true;
                    release_idx -= 1;
                    if running_total - persistent_total + estimate <= config.image_budget {
                        break;
                    }
                } else {
                    release_idx -= 1;
                }
            }
            if running_total - persistent_total + estimate > config.image_budget {
                // Couldn't free enough room; leave this asset absent for
                // another iteration to retry.
                activate_idx += 1;
                continue;
            }
        }

        running_total += estimate;
        if persistent {
            persistent_total += estimate;
        }
        iteration_used += estimate;
        out.activations.push(records[idx].id);
        records[idx].state = ResidencyState::Loading;
        records[idx].pending_consumed = estimate;
        activate_idx += 1;
    }

    // Step 8: an eager release pass that runs regardless of whether there
    // was an activation candidate to make room for — e.g. a resident's
    // priority just dropped to zero with nothing else pending activation.
    // Scans from the coldest (tail) end of the desirability order so the
    // same LRU-ish ordering governs both why something gets evicted to make
    // room and why it gets evicted to stay under the soft watermark. Judged
    // against the non-persistent share of the total, same as the admission
    // gate above — otherwise an oversized persistent resident would read as
    // permanent memory pressure and evict every ordinary resident behind it
    // even though none of them are actually responsible for the overage.
    for &idx in scratch.iter().rev() {
        if released[idx] {
            continue;
        }
        let rec = &records[idx];
        if rec.state != ResidencyState::Resident || rec.priority.is_persistent() {
            continue;
        }
        let non_persistent_total = running_total - persistent_total;
        let over_hard_budget = non_persistent_total > config.image_budget;
        let cold_above_soft_watermark =
            non_persistent_total > eager_threshold && rec.priority == Priority::new(0);
        if over_hard_budget || cold_above_soft_watermark {
            running_total -= rec.consumed;
            out.releases.push(rec.id);
            released[idx] = true;
        }
    }

    (out, running_total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::residency::handle::SourceHandle;
    use crate::residency::record::ImageClass;
    use std::sync::Arc;

    fn make_record(id: u32, priority: Priority, last_used: u64, consumed: u64, resident: bool) -> AssetRecord {
        let source: SourceHandle = Arc::new(());
        let mut rec = AssetRecord::new(AssetId::new(id), source, ImageClass::Texture2D, priority, 0);
        rec.last_used = last_used;
        rec.consumed = consumed;
        if resident {
            rec.state = ResidencyState::Resident;
        }
        rec
    }

    #[test]
    fn activates_used_absent_records_within_budget() {
        let mut records = vec![make_record(0, Priority::new(1), 10, 0, false)];
        let config = ResidencyConfig::default();
        let (outcome, total) = run(&mut records, &config, 0, |r| r.consumed);
        assert_eq!(outcome.activations, vec![AssetId::new(0)]);
        assert!(outcome.releases.is_empty());
        assert_eq!(total, 0);
        assert_eq!(records[0].state, ResidencyState::Loading);
    }

    #[test]
    fn never_used_records_are_not_activated() {
        let mut records = vec![make_record(0, Priority::new(1), 0, 0, false)];
        let config = ResidencyConfig::default();
        let (outcome, _total) = run(&mut records, &config, 0, |r| r.consumed);
        assert!(outcome.activations.is_empty());
    }

    #[test]
    fn zero_priority_records_are_registered_but_not_demanded() {
        // spec.md §4.4 step 5: priority <= 0 is "registered but not
        // demanded" and must never be activated, even once marked used.
        let mut records = vec![make_record(0, Priority::new(0), 10, 0, false)];
        let config = ResidencyConfig::default();
        let (outcome, _total) = run(&mut records, &config, 0, |r| r.consumed);
        assert!(outcome.activations.is_empty());
    }

    #[test]
    fn evicts_low_priority_resident_to_make_room_for_higher_priority_activation() {
        let mut records = vec![
            make_record(0, Priority::new(0), 5, 1000, true),
            make_record(1, Priority::new(5), 10, 500, false),
        ];
        let config = ResidencyConfig::builder().image_budget(1000).build();
        let (outcome, total) = run(&mut records, &config, 1000, |r| r.consumed);
        assert_eq!(outcome.releases, vec![AssetId::new(0)]);
        assert_eq!(outcome.activations, vec![AssetId::new(1)]);
        assert_eq!(total, 500);
    }

    #[test]
    fn persistent_priority_is_never_evicted() {
        let mut records = vec![
            make_record(0, Priority::PERSISTENT, 5, 1000, true),
            make_record(1, Priority::new(5), 10, 500, false),
        ];
        let config = ResidencyConfig::builder().image_budget(1000).build();
        let (outcome, total) = run(&mut records, &config, 1000, |r| r.consumed);
        // The persistent resident is never a release candidate, but it also
        // doesn't count against the budget the new candidate is admitted
        // against, so the ordinary asset activates alongside it rather than
        // being starved forever.
        assert!(outcome.releases.is_empty());
        assert_eq!(outcome.activations, vec![AssetId::new(1)]);
        assert_eq!(total, 1500);
    }

    #[test]
    fn persistent_overage_does_not_trigger_eager_release_of_an_unrelated_resident() {
        // A persistent resident alone pushes the true total over budget, but
        // that shouldn't read as memory pressure on the unrelated,
        // comfortably-within-budget ordinary resident behind it.
        let mut records = vec![
            make_record(0, Priority::PERSISTENT, 1, 2000, true),
            make_record(1, Priority::new(1), 2, 100, true),
        ];
        let config = ResidencyConfig::builder().image_budget(1000).build();
        let (outcome, total) = run(&mut records, &config, 2100, |r| r.consumed);
        assert!(outcome.releases.is_empty());
        assert!(outcome.activations.is_empty());
        assert_eq!(total, 2100);
    }

    #[test]
    fn soft_budget_stops_activation_mid_iteration() {
        let mut records = vec![
            make_record(0, Priority::new(1), 20, 100, false),
            make_record(1, Priority::new(1), 10, 100, false),
        ];
        let config = ResidencyConfig::builder()
            .image_budget(10_000)
            .image_budget_per_iteration(100)
            .build();
        let (outcome, _total) = run(&mut records, &config, 0, |r| r.consumed);
        assert_eq!(outcome.activations, vec![AssetId::new(0)]);
    }

    #[test]
    fn eager_eviction_pushes_out_priority_zero_residents_above_three_quarters_budget() {
        let mut records = vec![
            make_record(0, Priority::new(0), 1, 800, true),
            make_record(1, Priority::new(3), 5, 0, false),
        ];
        let config = ResidencyConfig::builder().image_budget(1000).build();
        let (outcome, total) = run(&mut records, &config, 800, |r| r.consumed);
        assert_eq!(outcome.releases, vec![AssetId::new(0)]);
        assert_eq!(outcome.activations, vec![AssetId::new(1)]);
        assert_eq!(total, 0);
    }

    #[test]
    fn higher_priority_candidate_wins_the_only_budget_that_fits_one() {
        // budget=100, per-iter=100; A(prio=1,est=60) B(prio=1,est=60) C(prio=2,est=60),
        // all just marked used. Only one of the three fits; the higher-
        // priority one (C) wins, and A/B stay absent rather than both being
        // admitted and then immediately thrashed back out.
        let mut records = vec![
            make_record(0, Priority::new(1), 10, 0, false),
            make_record(1, Priority::new(1), 10, 0, false),
            make_record(2, Priority::new(2), 10, 0, false),
        ];
        let config = ResidencyConfig::builder()
            .image_budget(100)
            .image_budget_per_iteration(100)
            .build();
        let (outcome, total) = run(&mut records, &config, 0, |_| 60);
        assert_eq!(outcome.activations, vec![AssetId::new(2)]);
        assert!(outcome.releases.is_empty());
        assert_eq!(total, 60);
    }

    #[test]
    fn persistent_activates_above_hard_budget_even_at_zero_budget() {
        let mut records = vec![make_record(0, Priority::PERSISTENT, 1, 0, false)];
        let config = ResidencyConfig::builder().image_budget(0).build();
        let (outcome, total) = run(&mut records, &config, 0, |_| 2000);
        assert_eq!(outcome.activations, vec![AssetId::new(0)]);
        assert_eq!(total, 2000);
    }

    #[test]
    fn forward_progress_admits_one_activation_per_iteration_at_minimal_budget() {
        let mut a = vec![make_record(0, Priority::new(1), 1, 0, false)];
        let config = ResidencyConfig::builder()
            .image_budget(1)
            .image_budget_per_iteration(1)
            .build();
        let (outcome, total) = run(&mut a, &config, 0, |_| 1);
        assert_eq!(outcome.activations, vec![AssetId::new(0)]);
        assert_eq!(total, 1);
    }
}
