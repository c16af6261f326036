use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use shared::domain::{Money, PhasePlan};

use crate::calendar::add_months;

/// The year range commitments may land in. The legacy portal hard-coded
/// 2024-2035 and silently dropped anything outside it; the range is now
/// explicit configuration and out-of-window cents are accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentWindow {
    pub first_year: i32,
    pub last_year: i32,
}

impl Default for CommitmentWindow {
    fn default() -> Self {
        Self {
            first_year: 2024,
            last_year: 2035,
        }
    }
}

impl CommitmentWindow {
    pub fn new(first_year: i32, last_year: i32) -> Self {
        if first_year <= last_year {
            Self {
                first_year,
                last_year,
            }
        } else {
            Self {
                first_year: last_year,
                last_year: first_year,
            }
        }
    }

    pub fn contains(&self, year: i32) -> bool {
        (self.first_year..=self.last_year).contains(&year)
    }
}

/// Month-by-month commitment amounts, in cents, keyed by calendar year.
/// `truncated_cents` collects everything that fell outside the window, so
/// the invariant `in_window + truncated == input total` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    pub years: BTreeMap<i32, [i64; 12]>,
    pub truncated_cents: i64,
}

impl Distribution {
    pub fn is_empty(&self) -> bool {
        self.years.is_empty() && self.truncated_cents == 0
    }

    /// Sum of all in-window monthly amounts.
    pub fn window_total_cents(&self) -> i64 {
        self.years
            .values()
            .map(|months| months.iter().sum::<i64>())
            .sum()
    }

    pub fn total_cents(&self) -> i64 {
        self.window_total_cents() + self.truncated_cents
    }

    /// Folds another distribution into this one, month by month. Used to
    /// overlay the Projeto and Obra phases of the same request.
    pub fn merge(&mut self, other: &Distribution) {
        for (year, months) in &other.years {
            let slot = self.years.entry(*year).or_insert([0; 12]);
            for (i, amount) in months.iter().enumerate() {
                slot[i] += amount;
            }
        }
        self.truncated_cents += other.truncated_cents;
    }
}

/// Spreads a phase's value evenly across its duration, one calendar month at
/// a time starting at the phase's start month. Works in integer cents:
/// every month gets `total / n`, and the first `total % n` months get one
/// extra cent, so the schedule sums to the input exactly.
///
/// A non-positive value, a missing start date, or a zero duration is a
/// defined no-op, not an error: the phase simply contributes nothing.
pub fn distribute(phase: &PhasePlan, window: CommitmentWindow) -> Distribution {
    let total = phase.value.cents();
    let Some(start) = phase.start else {
        return Distribution::default();
    };
    if total <= 0 || phase.duration_months == 0 {
        return Distribution::default();
    }

    let n = i64::from(phase.duration_months);
    let base = total / n;
    let remainder = total % n;

    let mut dist = Distribution::default();
    for i in 0..phase.duration_months {
        let amount = base + i64::from(i64::from(i) < remainder);
        let month = add_months(start, i as i32);
        if window.contains(month.year()) {
            dist.years.entry(month.year()).or_insert([0; 12])[month.month0() as usize] += amount;
        } else {
            dist.truncated_cents += amount;
        }
    }
    dist
}

/// Distributes both phases of a request and overlays them.
pub fn distribute_phases(
    projeto: &PhasePlan,
    obra: &PhasePlan,
    window: CommitmentWindow,
) -> Distribution {
    let mut dist = distribute(projeto, window);
    dist.merge(&distribute(obra, window));
    dist
}

/// Informational check of the distributed grand total against the
/// externally supplied homologated value. A mismatch is flagged, never
/// raised: the screens show it as a warning next to the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub distributed: Money,
    pub homologated: Money,
    pub matches: bool,
}

pub fn reconcile(distribution: &Distribution, homologated: Money) -> Reconciliation {
    let distributed = Money(distribution.total_cents());
    Reconciliation {
        distributed,
        homologated,
        matches: distributed == homologated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use shared::domain::Money;

    fn phase(value: &str, start: Option<(i32, u32, u32)>, months: u32) -> PhasePlan {
        PhasePlan {
            start: start.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).expect("date")),
            duration_months: months,
            value: Money::parse_brl(value),
        }
    }

    #[test]
    fn zero_value_yields_empty_schedule() {
        let dist = distribute(
            &phase("R$ 0,00", Some((2025, 1, 1)), 6),
            CommitmentWindow::default(),
        );
        assert!(dist.is_empty());
    }

    #[test]
    fn missing_start_yields_empty_schedule() {
        let dist = distribute(&phase("R$ 100,00", None, 6), CommitmentWindow::default());
        assert!(dist.is_empty());
    }

    #[test]
    fn zero_duration_yields_empty_schedule() {
        let dist = distribute(
            &phase("R$ 100,00", Some((2025, 1, 1)), 0),
            CommitmentWindow::default(),
        );
        assert!(dist.is_empty());
    }

    #[test]
    fn remainder_goes_to_earliest_months() {
        let dist = distribute(
            &phase("R$ 100,01", Some((2025, 1, 1)), 3),
            CommitmentWindow::default(),
        );
        let months = dist.years.get(&2025).expect("2025 populated");
        assert_eq!(months[0], 3_334);
        assert_eq!(months[1], 3_334);
        assert_eq!(months[2], 3_333);
        assert_eq!(dist.total_cents(), 10_001);
    }

    #[test]
    fn sum_matches_input_for_many_shapes() {
        let window = CommitmentWindow::default();
        for total in [1_i64, 7, 99, 100, 10_001, 999_999, 123_456_789] {
            for months in [1_u32, 2, 3, 7, 12, 29, 60] {
                let dist = distribute(
                    &PhasePlan {
                        start: NaiveDate::from_ymd_opt(2024, 6, 1),
                        duration_months: months,
                        value: Money(total),
                    },
                    window,
                );
                assert_eq!(dist.total_cents(), total, "{total} over {months} months");

                let amounts: Vec<i64> = dist
                    .years
                    .values()
                    .flat_map(|m| m.iter().copied())
                    .filter(|v| *v > 0)
                    .collect();
                let min = amounts.iter().min().expect("nonempty");
                let max = amounts.iter().max().expect("nonempty");
                assert!(max - min <= 1, "uneven split: {total} over {months}");
            }
        }
    }

    #[test]
    fn walk_crosses_year_boundary() {
        let dist = distribute(
            &phase("R$ 120,00", Some((2025, 11, 1)), 4),
            CommitmentWindow::default(),
        );
        assert_eq!(dist.years.get(&2025).expect("2025")[10], 3_000);
        assert_eq!(dist.years.get(&2025).expect("2025")[11], 3_000);
        assert_eq!(dist.years.get(&2026).expect("2026")[0], 3_000);
        assert_eq!(dist.years.get(&2026).expect("2026")[1], 3_000);
    }

    #[test]
    fn out_of_window_months_are_accounted_not_dropped() {
        let window = CommitmentWindow::new(2024, 2025);
        let dist = distribute(&phase("R$ 120,00", Some((2025, 11, 1)), 4), window);
        assert_eq!(dist.window_total_cents(), 6_000);
        assert_eq!(dist.truncated_cents, 6_000);
        assert_eq!(dist.total_cents(), 12_000);
        assert!(dist.years.get(&2026).is_none());
    }

    #[test]
    fn phases_overlay_on_shared_months() {
        let window = CommitmentWindow::default();
        let projeto = phase("R$ 60,00", Some((2025, 1, 1)), 3);
        let obra = phase("R$ 30,00", Some((2025, 3, 1)), 3);
        let dist = distribute_phases(&projeto, &obra, window);
        let months = dist.years.get(&2025).expect("2025");
        assert_eq!(months[0], 2_000);
        assert_eq!(months[1], 2_000);
        assert_eq!(months[2], 3_000); // projeto + obra overlap in March
        assert_eq!(months[3], 1_000);
        assert_eq!(months[4], 1_000);
        assert_eq!(dist.total_cents(), 9_000);
    }

    #[test]
    fn reconciliation_flags_mismatch_without_failing() {
        let dist = distribute(
            &phase("R$ 100,00", Some((2025, 1, 1)), 4),
            CommitmentWindow::default(),
        );
        let ok = reconcile(&dist, Money(10_000));
        assert!(ok.matches);
        let off = reconcile(&dist, Money(10_100));
        assert!(!off.matches);
        assert_eq!(off.distributed, Money(10_000));
    }
}
