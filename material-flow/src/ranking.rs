//! Top-contributor ranking
//!
//! Full recomputation of the top-contributor flags for one project: sum each
//! user's weight across every batch linked to the project, rank descending
//! (ties broken by user id ascending), and flag the smallest leading prefix
//! covering the top tenth of contributors, never fewer than one user.
//!
//! Recomputation is idempotent: repeated runs over unchanged contributions
//! converge to identical flag assignments. Callers hold the project's write
//! lock so the recompute cannot interleave with an allocation.

use crate::Result;
use ledger_core::{Contribution, Ledger, ProjectId, StateUpdates, UserId};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// How many contributors get the flag: the top tenth rounded up, at least one
pub fn top_count(contributor_count: usize) -> usize {
    std::cmp::max(1, (contributor_count + 9) / 10)
}

/// Recompute all top-contributor flags for a project.
///
/// Returns the number of flagged users; zero when nobody has contributed.
pub fn recompute(ledger: &Ledger, project_id: &ProjectId) -> Result<usize> {
    let batches = ledger.batches_for_project(project_id)?;

    let mut contributions: Vec<Contribution> = Vec::new();
    let mut totals: HashMap<UserId, Decimal> = HashMap::new();

    for batch in &batches {
        for contribution in ledger.contributions_for_batch(&batch.batch_id)? {
            *totals.entry(contribution.user_id.clone()).or_default() +=
                contribution.weight_grams;
            contributions.push(contribution);
        }
    }

    if contributions.is_empty() {
        return Ok(0);
    }

    let mut ranked: Vec<(UserId, Decimal)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

    let flagged = top_count(ranked.len());
    let top_users: HashSet<UserId> = ranked
        .into_iter()
        .take(flagged)
        .map(|(user_id, _)| user_id)
        .collect();

    let updated: Vec<Contribution> = contributions
        .into_iter()
        .map(|mut c| {
            c.is_top_contributor = top_users.contains(&c.user_id);
            c
        })
        .collect();

    ledger.commit_state(StateUpdates {
        contributions: updated,
        ..Default::default()
    })?;

    tracing::debug!(project_id = %project_id, flagged, "Top contributors recomputed");

    Ok(flagged)
}
