//! Recurrence detection
//!
//! Mines a user's transaction history for periodic payment patterns:
//! groups transactions by description/amount similarity, validates each
//! group's periodicity statistically, and emits candidates for human
//! confirmation.

use std::collections::HashSet;

use chrono::Datelike;
use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::models::{
    DetectionResult, Frequency, RecurrenceCandidate, RecurrenceStatus, Transaction,
};
use crate::stats;

/// Tokens excluded from description similarity, on top of the <=2 char rule.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "les", "des", "une", "sur", "par", "pour", "avec",
];

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum transaction history before detection is attempted
    pub min_history: usize,
    /// Occurrences required for a full-confidence detection
    pub min_support: usize,
    /// Occurrence floor for weak detections (surfaced with halved confidence)
    pub weak_support: usize,
    /// Relative amount difference allowed within a group (e.g. 0.05 = 5%)
    pub amount_tolerance: f64,
    /// Minimum Jaccard similarity of normalized token sets (e.g. 0.70)
    pub token_similarity: f64,
    /// Maximum coefficient of variation of day gaps before a group is
    /// considered irregular
    pub max_interval_cv: f64,
    /// Labels this long or longer fall back to the normalized form
    pub max_label_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_history: 3,
            min_support: 3,
            weak_support: 2,
            amount_tolerance: 0.05,
            token_similarity: 0.70,
            max_interval_cv: 0.30,
            max_label_len: 50,
        }
    }
}

/// Detects recurring payment patterns in transaction history.
///
/// Pure over its input: no I/O, no side effects, and deterministic —
/// transactions are processed in canonical `(date, id)` order so the greedy
/// grouping does not depend on caller ordering.
pub struct RecurrenceDetector {
    config: DetectorConfig,
    date_re: Regex,
    digits_re: Regex,
    symbol_re: Regex,
}

impl RecurrenceDetector {
    pub fn new() -> Result<Self> {
        Self::with_config(DetectorConfig::default())
    }

    pub fn with_config(config: DetectorConfig) -> Result<Self> {
        Ok(Self {
            config,
            // Embedded dates like 12/03/2024 or 3-1-24
            date_re: Regex::new(r"\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}")?,
            digits_re: Regex::new(r"\d+")?,
            symbol_re: Regex::new(r"[^\w\s]")?,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run detection over a user's transaction history.
    pub fn detect(&self, transactions: &[Transaction]) -> DetectionResult {
        if transactions.len() < self.config.min_history {
            return DetectionResult {
                detections: vec![],
                message: format!(
                    "Not enough transaction history ({} of {} required)",
                    transactions.len(),
                    self.config.min_history
                ),
            };
        }

        // Canonical order makes the greedy grouping reproducible
        let mut sorted: Vec<&Transaction> = transactions.iter().collect();
        sorted.sort_by_key(|t| (t.date, t.id));

        let groups = self.group_transactions(&sorted);
        debug!(groups = groups.len(), "Transaction grouping complete");

        let mut detections: Vec<RecurrenceCandidate> = groups
            .iter()
            .filter(|g| g.members.len() >= self.config.weak_support)
            .filter_map(|g| self.analyze_group(g))
            .collect();

        // The application lists pending detections by descending confidence
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.label.cmp(&b.label))
        });

        let message = if detections.is_empty() {
            "No recurring patterns detected".to_string()
        } else {
            format!("{} recurring pattern(s) detected", detections.len())
        };

        DetectionResult {
            detections,
            message,
        }
    }

    /// Greedy grouping: each transaction joins the first group whose
    /// representative (first member) it matches, else starts a new group.
    fn group_transactions<'a>(&self, sorted: &[&'a Transaction]) -> Vec<Group<'a>> {
        let mut groups: Vec<Group<'a>> = Vec::new();

        for &tx in sorted {
            let tokens = self.token_set(&tx.description);
            let joined = groups.iter_mut().find(|g| {
                g.representative.kind == tx.kind
                    && amounts_similar(
                        g.representative.amount,
                        tx.amount,
                        self.config.amount_tolerance,
                    )
                    && jaccard(&g.tokens, &tokens) >= self.config.token_similarity
            });

            match joined {
                Some(group) => group.members.push(tx),
                None => groups.push(Group {
                    representative: tx,
                    tokens,
                    members: vec![tx],
                }),
            }
        }

        groups
    }

    /// Periodicity test and statistics for one group; `None` discards it.
    fn analyze_group(&self, group: &Group<'_>) -> Option<RecurrenceCandidate> {
        // Members are already date-ordered (canonical input order)
        let members = &group.members;

        let gaps: Vec<f64> = members
            .windows(2)
            .map(|w| (w[1].date - w[0].date).num_days() as f64)
            .collect();

        let gap_mean = stats::mean(&gaps);
        if gap_mean <= 0.0 {
            // Same-day repeats carry no periodicity signal
            return None;
        }
        let gap_stddev = stats::std_dev(&gaps);
        let cv = gap_stddev / gap_mean;

        if cv > self.config.max_interval_cv {
            debug!(cv, "Group discarded as irregular");
            return None;
        }

        let frequency = classify_frequency(gap_mean)?;

        let amounts: Vec<f64> = members.iter().map(|t| t.amount.abs()).collect();
        let amount_mean = stats::mean(&amounts);
        let amount_stddev = stats::std_dev(&amounts);
        let amount_min = amounts.iter().cloned().fold(f64::INFINITY, f64::min);
        let amount_max = amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let mut confidence = stats::clamp(1.0 - cv, 0.0, 1.0);
        if members.len() < self.config.min_support {
            // Two occurrences could be coincidence; surface at half confidence
            confidence /= 2.0;
        }

        let candidate = RecurrenceCandidate {
            id: 0,
            user_id: group.representative.user_id,
            label: self.derive_label(members),
            kind: group.representative.kind,
            amount_mean,
            amount_stddev,
            amount_min,
            amount_max,
            frequency,
            reference_day: reference_day(members, frequency),
            interval_mean_days: gap_mean,
            interval_stddev_days: gap_stddev,
            coefficient_variation: cv,
            confidence,
            occurrence_count: members.len(),
            transaction_ids: members.iter().map(|t| t.id).collect(),
            first_occurrence: members[0].date,
            last_occurrence: members[members.len() - 1].date,
            status: RecurrenceStatus::Pending,
        };

        debug!(
            label = %candidate.label,
            frequency = %candidate.frequency,
            confidence = candidate.confidence,
            "Recurrence candidate"
        );

        Some(candidate)
    }

    /// Shortest non-empty original description wins (first-seen tie-break);
    /// overly long labels fall back to the title-cased normalized form.
    fn derive_label(&self, members: &[&Transaction]) -> String {
        let shortest = members
            .iter()
            .map(|t| t.description.trim())
            .filter(|d| !d.is_empty())
            .min_by_key(|d| d.len());

        match shortest {
            Some(desc) if desc.len() < self.config.max_label_len => desc.to_string(),
            _ => {
                let normalized = self.normalize_description(&members[0].description);
                let titled: String = normalized
                    .split_whitespace()
                    .map(|word| {
                        let mut chars = word.chars();
                        match chars.next() {
                            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                            None => String::new(),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                titled.chars().take(self.config.max_label_len).collect()
            }
        }
    }

    /// Lowercase, strip embedded dates and digit runs, strip symbols,
    /// collapse whitespace.
    pub fn normalize_description(&self, description: &str) -> String {
        let lowered = description.to_lowercase();
        let no_dates = self.date_re.replace_all(&lowered, " ");
        let no_digits = self.digits_re.replace_all(&no_dates, " ");
        let no_symbols = self.symbol_re.replace_all(&no_digits, " ");
        no_symbols.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Whether two descriptions would land in the same group, by the same
    /// token-set similarity rule grouping uses.
    pub fn descriptions_similar(&self, a: &str, b: &str) -> bool {
        jaccard(&self.token_set(a), &self.token_set(b)) >= self.config.token_similarity
    }

    /// Normalized tokens, excluding stop-words and tokens of <=2 characters.
    fn token_set(&self, description: &str) -> HashSet<String> {
        self.normalize_description(description)
            .split_whitespace()
            .filter(|t| t.len() > 2 && !STOP_WORDS.contains(t))
            .map(|t| t.to_string())
            .collect()
    }
}

struct Group<'a> {
    representative: &'a Transaction,
    tokens: HashSet<String>,
    members: Vec<&'a Transaction>,
}

/// Absolute amounts differ by no more than `tolerance` of their average.
fn amounts_similar(a: f64, b: f64, tolerance: f64) -> bool {
    let (a, b) = (a.abs(), b.abs());
    (a - b).abs() <= tolerance * ((a + b) / 2.0)
}

/// Token-set (Jaccard) similarity. Two empty sets are not similar: a
/// description that normalizes to nothing matches nothing.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Classify a mean day-gap into the first matching canonical band.
pub fn classify_frequency(mean_gap_days: f64) -> Option<Frequency> {
    const BANDS: &[(Frequency, f64, f64)] = &[
        (Frequency::Weekly, 7.0, 1.0),
        (Frequency::Biweekly, 14.0, 3.0),
        (Frequency::Monthly, 30.0, 5.0),
        (Frequency::Quarterly, 90.0, 15.0),
        (Frequency::Yearly, 365.0, 30.0),
    ];

    BANDS
        .iter()
        .find(|(_, center, tolerance)| (mean_gap_days - center).abs() <= *tolerance)
        .map(|(frequency, _, _)| *frequency)
}

/// Most frequent day anchor for the frequency class, first-seen tie-break.
/// Interval-stepped frequencies (biweekly, quarterly) carry no anchor.
fn reference_day(members: &[&Transaction], frequency: Frequency) -> Option<u32> {
    let days: Vec<u32> = match frequency {
        Frequency::Weekly => members
            .iter()
            .map(|t| t.date.weekday().number_from_monday())
            .collect(),
        Frequency::Monthly => members.iter().map(|t| t.date.day()).collect(),
        Frequency::Yearly => members.iter().map(|t| t.date.ordinal()).collect(),
        Frequency::Biweekly | Frequency::Quarterly => return None,
    };

    stats::most_common(&days)
}
