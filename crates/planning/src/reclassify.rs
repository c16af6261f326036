use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::domain::{InvestmentCategory, PhasePlan, WorkRequest};

use crate::calendar::add_months;

/// Gap between the end of the design phase and the start of construction
/// when a cascade derives Obra from Projeto: tender + contracting time.
pub const OBRA_GAP_MONTHS: i32 = 6;

/// Outcome of a category change. Derived fields are always recomputed from
/// scratch; a second reclassification never sees stale values from the
/// first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclassifiedPlan {
    pub category: InvestmentCategory,
    pub projeto: PhasePlan,
    pub obra: PhasePlan,
    pub projeto_end: Option<NaiveDate>,
    pub obra_end: Option<NaiveDate>,
}

/// End date of a phase: start plus duration in calendar months. `None` when
/// the phase has no start or no duration.
pub fn phase_end(phase: &PhasePlan) -> Option<NaiveDate> {
    if phase.duration_months == 0 {
        return None;
    }
    phase
        .start
        .map(|start| add_months(start, phase.duration_months as i32))
}

/// Applies the investment-category rule set:
///
/// - "Baixa Complexidade" has no design phase. Projeto is cleared entirely;
///   Obra keeps whatever the user entered and only its end date is derived.
/// - Any other category keeps Projeto as entered and derives Obra from it:
///   Obra starts a fixed gap after Projeto ends and inherits Projeto's
///   duration and value as editable defaults. If Projeto's end cannot be
///   derived, Obra's derived fields are cleared rather than half-patched.
///
/// Absent or invalid inputs never error; they propagate as empty fields for
/// the user to fill in.
pub fn reclassify(request: &WorkRequest, new_category: InvestmentCategory) -> ReclassifiedPlan {
    match new_category {
        InvestmentCategory::BaixaComplexidade => ReclassifiedPlan {
            category: new_category,
            projeto: PhasePlan::cleared(),
            obra: request.obra,
            projeto_end: None,
            obra_end: phase_end(&request.obra),
        },
        _ => {
            let projeto = request.projeto;
            let projeto_end = phase_end(&projeto);
            let obra = match projeto_end {
                Some(end) => PhasePlan {
                    start: Some(add_months(end, OBRA_GAP_MONTHS)),
                    duration_months: projeto.duration_months,
                    value: projeto.value,
                },
                None => PhasePlan::cleared(),
            };
            let obra_end = phase_end(&obra);
            ReclassifiedPlan {
                category: new_category,
                projeto,
                obra,
                projeto_end,
                obra_end,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::domain::{
        Money, RequestId, RequestStatus, TipoLocalId, TipologiaId, UnitId,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn request(projeto: PhasePlan, obra: PhasePlan) -> WorkRequest {
        WorkRequest {
            request_id: RequestId(1),
            codigo: uuid_nil(),
            unit_id: UnitId(1),
            tipologia_id: TipologiaId(1),
            tipo_local_id: TipoLocalId(1),
            category: InvestmentCategory::MediaComplexidade,
            titulo: "Reforma do bloco B".into(),
            descricao: String::new(),
            situacao_projeto: "Em elaboração".into(),
            situacao_obra: "Não iniciada".into(),
            status: RequestStatus::Aberta,
            projeto,
            obra,
            observacao: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn uuid_nil() -> uuid::Uuid {
        uuid::Uuid::nil()
    }

    #[test]
    fn baixa_complexidade_clears_projeto_and_keeps_obra() {
        let obra = PhasePlan {
            start: Some(date(2025, 6, 1)),
            duration_months: 8,
            value: Money(500_000),
        };
        let req = request(
            PhasePlan {
                start: Some(date(2025, 1, 1)),
                duration_months: 3,
                value: Money(100_000),
            },
            obra,
        );

        let plan = reclassify(&req, InvestmentCategory::BaixaComplexidade);
        assert!(plan.projeto.is_empty());
        assert_eq!(plan.projeto_end, None);
        assert_eq!(plan.obra, obra);
        assert_eq!(plan.obra_end, Some(date(2026, 2, 1)));
    }

    #[test]
    fn baixa_complexidade_with_empty_obra_stays_empty() {
        let req = request(
            PhasePlan {
                start: Some(date(2025, 1, 1)),
                duration_months: 3,
                value: Money(100_000),
            },
            PhasePlan::cleared(),
        );
        let plan = reclassify(&req, InvestmentCategory::BaixaComplexidade);
        assert!(plan.projeto.is_empty());
        assert!(plan.obra.is_empty());
        assert_eq!(plan.obra_end, None);
    }

    #[test]
    fn cascade_shifts_obra_past_the_gap() {
        let req = request(
            PhasePlan {
                start: Some(date(2025, 1, 1)),
                duration_months: 3,
                value: Money(250_000),
            },
            PhasePlan::cleared(),
        );

        let plan = reclassify(&req, InvestmentCategory::MediaComplexidade);
        assert_eq!(plan.projeto_end, Some(date(2025, 4, 1)));
        assert_eq!(plan.obra.start, Some(date(2025, 10, 1)));
        assert_eq!(plan.obra.duration_months, 3);
        assert_eq!(plan.obra.value, Money(250_000));
        assert_eq!(plan.obra_end, Some(date(2026, 1, 1)));
    }

    #[test]
    fn cascade_without_derivable_projeto_end_clears_obra() {
        let req = request(
            PhasePlan {
                start: None,
                duration_months: 3,
                value: Money(250_000),
            },
            PhasePlan {
                start: Some(date(2026, 1, 1)),
                duration_months: 12,
                value: Money(900_000),
            },
        );

        let plan = reclassify(&req, InvestmentCategory::AltaComplexidade);
        assert_eq!(plan.projeto_end, None);
        assert!(plan.obra.is_empty());
        assert_eq!(plan.obra_end, None);
    }

    #[test]
    fn zero_duration_projeto_does_not_cascade() {
        let req = request(
            PhasePlan {
                start: Some(date(2025, 1, 1)),
                duration_months: 0,
                value: Money(250_000),
            },
            PhasePlan::cleared(),
        );
        let plan = reclassify(&req, InvestmentCategory::MediaComplexidade);
        assert_eq!(plan.projeto_end, None);
        assert!(plan.obra.is_empty());
    }
}
