//! Merge-candidate selection
//!
//! Planning only; executing a candidate is the merge engine's job. Two
//! pressures produce candidates. Segments accumulate in a size class
//! (each class spans one doubling of the posting-file size) until the
//! class exceeds its fanout and gets collapsed, and tombstones push a
//! segment's dead share past the point where rewriting it to drop the
//! dead documents pays for itself.
//!
//! Candidates are ranked by estimated rewrite cost per input segment, so
//! a cheap collapse of many small segments wins over rewriting one large
//! one.

use std::collections::BTreeMap;

use super::types::SegmentId;

/// What the planner needs to know about a committed segment
#[derive(Clone, Debug)]
pub struct SegmentInfo {
    pub id: SegmentId,
    /// Posting-file size in bytes
    pub size_bytes: u64,
    /// Documents in the segment when it was written
    pub doc_count: u32,
    /// Documents tombstoned since
    pub deleted_docs: u32,
}

impl SegmentInfo {
    /// Share of the segment's documents that are tombstoned
    pub fn dead_ratio(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.deleted_docs as f64 / self.doc_count as f64
        }
    }

    /// Bytes a rewrite of this segment would keep
    pub fn live_bytes(&self) -> u64 {
        (self.size_bytes as f64 * (1.0 - self.dead_ratio())) as u64
    }
}

/// Knobs for the merge planner
#[derive(Clone, Debug)]
pub struct MergePolicyConfig {
    /// Sizes below this share class 0; each class above spans one doubling
    pub min_class_bytes: u64,
    /// Segments a size class may accumulate before it is collapsed
    pub fanout: usize,
    /// Most segments a single merge will read
    pub max_inputs: usize,
    /// Candidates whose estimated output exceeds this are trimmed or dropped
    pub max_output_bytes: u64,
    /// Dead share above which a segment is rewritten to reclaim space
    pub reclaim_dead_ratio: f64,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self {
            min_class_bytes: 4 << 20,
            fanout: 8,
            max_inputs: 12,
            max_output_bytes: 2 << 30,
            reclaim_dead_ratio: 0.25,
        }
    }
}

/// A proposed merge
#[derive(Clone, Debug)]
pub struct MergeCandidate {
    /// Segments to read, unordered; the merge engine orders by recency
    pub inputs: Vec<SegmentId>,
    /// Estimated output size: the live bytes of the inputs
    pub output_bytes: u64,
    /// Estimated bytes rewritten per input segment; lower is better
    pub cost: f64,
    pub kind: MergeKind,
}

/// Why a candidate was proposed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKind {
    /// Tombstone-heavy segments rewritten to drop their dead documents
    Reclaim,
    /// A size class held more segments than its fanout allows
    Collapse,
    /// The caller asked for everything to be folded together
    Forced,
}

/// Plans merges over committed segments
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        Self { config }
    }

    /// Size class of a segment: the number of doublings above the floor
    pub fn size_class(&self, size_bytes: u64) -> u32 {
        let scaled = size_bytes.max(self.config.min_class_bytes) / self.config.min_class_bytes;
        scaled.ilog2()
    }

    /// Propose merges, most attractive first: reclamation ahead of class
    /// collapses, and within collapses the cheapest rewrite first
    pub fn plan(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        let mut plans = Vec::new();

        if let Some(reclaim) = self.plan_reclaim(segments) {
            plans.push(reclaim);
        }
        plans.extend(self.plan_collapses(segments));

        plans
    }

    /// Fold every segment into one, ignoring class boundaries and the
    /// output cap: the caller asked for it explicitly
    pub fn plan_forced(&self, segments: &[SegmentInfo]) -> Option<MergeCandidate> {
        if segments.is_empty() {
            return None;
        }

        Some(MergeCandidate {
            inputs: segments.iter().map(|s| s.id).collect(),
            output_bytes: segments.iter().map(|s| s.live_bytes()).sum(),
            cost: 0.0,
            kind: MergeKind::Forced,
        })
    }

    /// One candidate covering the segments whose dead share crossed the
    /// reclamation threshold. A single such segment is still worth
    /// rewriting alone; the merge engine handles one-input merges.
    fn plan_reclaim(&self, segments: &[SegmentInfo]) -> Option<MergeCandidate> {
        let mut dead_heavy: Vec<&SegmentInfo> = segments
            .iter()
            .filter(|s| s.dead_ratio() >= self.config.reclaim_dead_ratio)
            .collect();

        if dead_heavy.is_empty() {
            return None;
        }

        // when the input cap forces a choice, rewrite the deadest first
        dead_heavy.sort_by(|a, b| b.dead_ratio().total_cmp(&a.dead_ratio()));
        dead_heavy.truncate(self.config.max_inputs);

        self.candidate(&dead_heavy, MergeKind::Reclaim)
    }

    /// Collapse candidates for every size class holding more members than
    /// the fanout, cheapest first
    fn plan_collapses(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        let mut classes: BTreeMap<u32, Vec<&SegmentInfo>> = BTreeMap::new();
        for segment in segments {
            classes
                .entry(self.size_class(segment.size_bytes))
                .or_default()
                .push(segment);
        }

        let mut plans = Vec::new();
        for mut members in classes.into_values() {
            if members.len() <= self.config.fanout {
                continue;
            }

            // fold the smallest members, leaving the class at its fanout
            members.sort_by_key(|s| s.size_bytes);
            let take = (members.len() - self.config.fanout + 1).min(self.config.max_inputs);

            if let Some(candidate) = self.candidate(&members[..take], MergeKind::Collapse) {
                // collapsing fewer than two inputs retires nothing
                if candidate.inputs.len() >= 2 {
                    plans.push(candidate);
                }
            }
        }

        plans.sort_by(|a, b| a.cost.total_cmp(&b.cost));
        plans
    }

    /// Assemble a candidate, shedding the largest inputs until the
    /// estimated output fits under the cap
    fn candidate(&self, inputs: &[&SegmentInfo], kind: MergeKind) -> Option<MergeCandidate> {
        let mut picked = inputs.to_vec();
        picked.sort_by_key(|s| s.live_bytes());

        let mut output_bytes: u64 = picked.iter().map(|s| s.live_bytes()).sum();
        while output_bytes > self.config.max_output_bytes {
            let dropped = picked.pop()?;
            output_bytes -= dropped.live_bytes();
        }

        if picked.is_empty() {
            return None;
        }

        Some(MergeCandidate {
            inputs: picked.iter().map(|s| s.id).collect(),
            output_bytes,
            cost: output_bytes as f64 / picked.len() as f64,
            kind,
        })
    }
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        Self::new(MergePolicyConfig::default())
    }
}
