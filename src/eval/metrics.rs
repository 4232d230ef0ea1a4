//! Trajectory similarity metrics: edit distance, BLEU, Jensen-Shannon distance

use indexmap::{IndexMap, IndexSet};

use crate::infra::{AirlError, LinkId, Result, Trajectory};

/// Order of the longest n-gram scored by BLEU.
pub const BLEU_MAX_ORDER: usize = 4;

/// Added to zero-match precisions before taking logs.
pub const BLEU_EPSILON: f64 = 0.1;

/// Bins of the trajectory-label histograms.
pub const JS_BINS: usize = 10;

/// Token-level Levenshtein distance.
pub fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(x != y);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// `lev(reference, candidate) / len(reference)`, `None` for an empty
/// reference. May exceed 1.
pub fn normalized_edit_distance(reference: &[LinkId], candidate: &[LinkId]) -> Option<f64> {
    if reference.is_empty() {
        return None;
    }
    Some(levenshtein(reference, candidate) as f64 / reference.len() as f64)
}

/// Ground-truth indices grouped by `(origin, destination)` in first-seen
/// order. Empty trajectories share the `None` group.
#[derive(Debug, Clone, Default)]
pub struct OdGroups {
    groups: IndexMap<Option<(LinkId, LinkId)>, Vec<usize>>,
}

impl OdGroups {
    pub fn new(trajectories: &[Trajectory]) -> Self {
        let mut groups: IndexMap<Option<(LinkId, LinkId)>, Vec<usize>> = IndexMap::new();
        for (index, trajectory) in trajectories.iter().enumerate() {
            let key = trajectory.origin().zip(trajectory.destination());
            groups.entry(key).or_default().push(index);
        }
        Self { groups }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<(LinkId, LinkId)>, &[usize])> + '_ {
        self.groups.iter().map(|(&key, indices)| (key, indices.as_slice()))
    }

    /// Distinct references of one group, first-seen order.
    pub fn unique_references<'t>(indices: &[usize], trajectories: &'t [Trajectory]) -> Vec<&'t Trajectory> {
        let unique: IndexSet<&Trajectory> = indices.iter().map(|&i| &trajectories[i]).collect();
        unique.into_iter().collect()
    }
}

fn check_pairs(test: &[Trajectory], learner: &[Trajectory]) -> Result<()> {
    if test.is_empty() {
        return Err(AirlError::EmptyInput("no trajectories to evaluate".to_string()));
    }
    if test.len() != learner.len() {
        return Err(AirlError::shape(format!(
            "{} ground-truth trajectories but {} learner trajectories",
            test.len(),
            learner.len()
        )));
    }
    Ok(())
}

/// Mean over learner trajectories of the smallest normalized edit distance
/// to any distinct reference of the same OD pair, capped at 1.
pub fn evaluate_edit_distance(test: &[Trajectory], learner: &[Trajectory]) -> Result<f64> {
    check_pairs(test, learner)?;

    let groups = OdGroups::new(test);
    let mut total = 0.0;
    for (_, indices) in groups.iter() {
        let references = OdGroups::unique_references(indices, test);
        for &i in indices {
            let mut best = 1.0f64;
            for reference in &references {
                let distance = match normalized_edit_distance(reference.links(), learner[i].links()) {
                    Some(distance) => distance,
                    None => {
                        tracing::warn!("Empty reference trajectory for learner trajectory {}", i);
                        1.0
                    }
                };
                best = best.min(distance);
            }
            total += best;
        }
    }

    Ok(total / test.len() as f64)
}

/// Modified n-gram precision `(clipped matches, max(1, hypothesis n-grams))`.
fn modified_precision(references: &[&[LinkId]], hypothesis: &[LinkId], n: usize) -> (usize, usize) {
    let counts = ngram_counts(hypothesis, n);

    let mut max_reference_counts: IndexMap<&[LinkId], usize> = IndexMap::new();
    for reference in references {
        let reference_counts = ngram_counts(reference, n);
        for ngram in counts.keys() {
            let seen = reference_counts.get(ngram).copied().unwrap_or(0);
            let entry = max_reference_counts.entry(*ngram).or_insert(0);
            *entry = (*entry).max(seen);
        }
    }

    let clipped: usize = counts
        .iter()
        .map(|(ngram, &count)| count.min(max_reference_counts.get(ngram).copied().unwrap_or(0)))
        .sum();
    let total: usize = counts.values().sum();
    (clipped, total.max(1))
}

fn ngram_counts(tokens: &[LinkId], n: usize) -> IndexMap<&[LinkId], usize> {
    let mut counts = IndexMap::new();
    if tokens.len() >= n {
        for ngram in tokens.windows(n) {
            *counts.entry(ngram).or_insert(0) += 1;
        }
    }
    counts
}

/// Reference length closest to the hypothesis length, shorter on ties.
fn closest_reference_length(references: &[&[LinkId]], hypothesis_len: usize) -> usize {
    references
        .iter()
        .map(|reference| reference.len())
        .min_by_key(|&len| (len.abs_diff(hypothesis_len), len))
        .unwrap_or(0)
}

fn brevity_penalty(reference_len: usize, hypothesis_len: usize) -> f64 {
    if hypothesis_len > reference_len {
        1.0
    } else if hypothesis_len == 0 {
        0.0
    } else {
        (1.0 - reference_len as f64 / hypothesis_len as f64).exp()
    }
}

/// Sentence BLEU with uniform weights up to 4-grams and epsilon smoothing
/// of zero-match precisions. 0 when no unigram matches.
pub fn sentence_bleu(references: &[&[LinkId]], hypothesis: &[LinkId]) -> f64 {
    let precisions: Vec<(usize, usize)> = (1..=BLEU_MAX_ORDER)
        .map(|n| modified_precision(references, hypothesis, n))
        .collect();
    if precisions[0].0 == 0 {
        return 0.0;
    }

    let weight = 1.0 / BLEU_MAX_ORDER as f64;
    let log_sum: f64 = precisions
        .iter()
        .map(|&(matches, total)| {
            let precision = if matches == 0 {
                BLEU_EPSILON / total as f64
            } else {
                matches as f64 / total as f64
            };
            weight * precision.ln()
        })
        .sum();

    let reference_len = closest_reference_length(references, hypothesis.len());
    brevity_penalty(reference_len, hypothesis.len()) * log_sum.exp()
}

/// Mean sentence BLEU of each learner trajectory against the distinct
/// references of its OD pair.
pub fn evaluate_bleu(test: &[Trajectory], learner: &[Trajectory]) -> Result<f64> {
    check_pairs(test, learner)?;

    let groups = OdGroups::new(test);
    let mut total = 0.0;
    for (_, indices) in groups.iter() {
        let references = OdGroups::unique_references(indices, test);
        let references: Vec<&[LinkId]> = references.iter().map(|t| t.links()).collect();
        for &i in indices {
            total += sentence_bleu(&references, learner[i].links());
        }
    }

    Ok(total / test.len() as f64)
}

/// Equal-width histogram over the value range of `values`, last bin closed.
///
/// A constant input is spread over `value - 0.5 ..= value + 0.5`.
pub fn histogram(values: &[f64], bins: usize) -> Vec<usize> {
    let mut counts = vec![0; bins];
    if values.is_empty() || bins == 0 {
        return counts;
    }

    let mut low = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mut high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if low == high {
        low -= 0.5;
        high += 0.5;
    }

    let edges: Vec<f64> = (0..=bins)
        .map(|i| low + (high - low) * i as f64 / bins as f64)
        .collect();
    let norm = bins as f64 / (high - low);
    for &value in values {
        let mut index = (((value - low) * norm) as usize).min(bins - 1);
        // float rounding can put a value one bin off its edges
        if value < edges[index] && index > 0 {
            index -= 1;
        } else if index + 1 < bins && value >= edges[index + 1] {
            index += 1;
        }
        counts[index] += 1;
    }
    counts
}

fn relative_entropy(x: f64, y: f64) -> f64 {
    if x > 0.0 && y > 0.0 {
        x * (x / y).ln()
    } else if x == 0.0 && y >= 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

/// Jensen-Shannon distance (natural log), inputs normalized to sum 1.
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> Result<f64> {
    if p.len() != q.len() {
        return Err(AirlError::shape(format!(
            "distributions have {} and {} entries",
            p.len(),
            q.len()
        )));
    }
    let p_sum: f64 = p.iter().sum();
    let q_sum: f64 = q.iter().sum();
    if p_sum <= 0.0 || q_sum <= 0.0 {
        return Err(AirlError::EmptyInput("distribution has no mass".to_string()));
    }

    let mut divergence = 0.0;
    for (&a, &b) in p.iter().zip(q.iter()) {
        let a = a / p_sum;
        let b = b / q_sum;
        let m = (a + b) / 2.0;
        divergence += (relative_entropy(a, m) + relative_entropy(b, m)) / 2.0;
    }
    Ok(divergence.max(0.0).sqrt())
}

/// Distance between the ground-truth and learner distributions over
/// distinct trajectories.
///
/// Ground-truth trajectories are labelled in first-seen order; learner
/// trajectories never seen in the ground truth share one extra label.
pub fn evaluate_dataset_distance(test: &[Trajectory], learner: &[Trajectory]) -> Result<f64> {
    if test.is_empty() || learner.is_empty() {
        return Err(AirlError::EmptyInput("no trajectories to compare".to_string()));
    }

    let mut labels: IndexMap<&Trajectory, usize> = IndexMap::new();
    for trajectory in test {
        let next = labels.len();
        labels.entry(trajectory).or_insert(next);
    }
    let unseen = labels.len();

    let mut test_labels: Vec<f64> = test.iter().map(|t| labels[t] as f64).collect();
    test_labels.push(0.0);
    let learner_labels: Vec<f64> = learner
        .iter()
        .map(|t| labels.get(t).copied().unwrap_or(unseen) as f64)
        .collect();

    let test_p = normalized_histogram(&test_labels);
    let learner_p = normalized_histogram(&learner_labels);
    jensen_shannon_distance(&test_p, &learner_p)
}

fn normalized_histogram(labels: &[f64]) -> Vec<f64> {
    histogram(labels, JS_BINS)
        .into_iter()
        .map(|count| count as f64 / labels.len() as f64)
        .collect()
}

/// Edit distance, BLEU and dataset JS distance of one evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrajectoryMetrics {
    pub edit_distance: f64,
    pub bleu: f64,
    pub js_distance: f64,
}

impl TrajectoryMetrics {
    pub fn compute(test: &[Trajectory], learner: &[Trajectory]) -> Result<Self> {
        Ok(Self {
            edit_distance: evaluate_edit_distance(test, learner)?,
            bleu: evaluate_bleu(test, learner)?,
            js_distance: evaluate_dataset_distance(test, learner)?,
        })
    }
}
