use chrono::NaiveDateTime;

/// Conflict policy for nearest-timestamp assignment.
///
/// `FirstCome`: each secondary row claims the nearest still-unassigned
/// primary row; assignments are never revisited (combination mode).
///
/// `BestReplace`: each secondary row targets the nearest primary row overall
/// and displaces an earlier claim only on strictly smaller distance
/// (injection mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    FirstCome,
    BestReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub secondary: usize,
    pub distance_ms: i64,
}

/// Assign secondary rows to primary rows by absolute time distance. Returns
/// one slot per primary row. Deterministic for a given input order; distance
/// ties resolve to the lowest primary index. O(primary x secondary).
pub fn assign_nearest(
    primary: &[NaiveDateTime],
    secondary: &[NaiveDateTime],
    policy: MatchPolicy,
) -> Vec<Option<Assignment>> {
    let mut assignments: Vec<Option<Assignment>> = vec![None; primary.len()];
    if primary.is_empty() {
        return assignments;
    }

    for (secondary_idx, &secondary_ts) in secondary.iter().enumerate() {
        let mut best: Option<(usize, i64)> = None;
        for (primary_idx, &primary_ts) in primary.iter().enumerate() {
            if policy == MatchPolicy::FirstCome && assignments[primary_idx].is_some() {
                continue;
            }
            let distance = (primary_ts - secondary_ts).num_milliseconds().abs();
            if best.is_none_or(|(_, current)| distance < current) {
                best = Some((primary_idx, distance));
            }
        }

        let Some((primary_idx, distance_ms)) = best else {
            // FirstCome with every primary row taken: remaining secondary
            // rows stay unmatched.
            continue;
        };

        let assignment = Assignment {
            secondary: secondary_idx,
            distance_ms,
        };
        match policy {
            MatchPolicy::FirstCome => assignments[primary_idx] = Some(assignment),
            MatchPolicy::BestReplace => {
                let replace = assignments[primary_idx]
                    .is_none_or(|current| distance_ms < current.distance_ms);
                if replace {
                    assignments[primary_idx] = Some(assignment);
                }
            }
        }
    }

    assignments
}

pub fn matched_count(assignments: &[Option<Assignment>]) -> usize {
    assignments.iter().flatten().count()
}
