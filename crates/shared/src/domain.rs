use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(ProfileId);
id_newtype!(UnitId);
id_newtype!(TipologiaId);
id_newtype!(TipoLocalId);
id_newtype!(RequestId);

/// Activation toggle used by the reference tables (tipologias, tipo-locais).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ativo,
    Inativo,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Ativo => "ativo",
            RecordStatus::Inativo => "inativo",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "inativo" => RecordStatus::Inativo,
            _ => RecordStatus::Ativo,
        }
    }
}

/// Investment category of a work request. "Baixa Complexidade" is the one
/// the reclassification cascade treats specially: it has no design phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvestmentCategory {
    #[serde(rename = "Baixa Complexidade")]
    BaixaComplexidade,
    #[serde(rename = "Média Complexidade")]
    MediaComplexidade,
    #[serde(rename = "Alta Complexidade")]
    AltaComplexidade,
}

impl InvestmentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            InvestmentCategory::BaixaComplexidade => "Baixa Complexidade",
            InvestmentCategory::MediaComplexidade => "Média Complexidade",
            InvestmentCategory::AltaComplexidade => "Alta Complexidade",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "Baixa Complexidade" => InvestmentCategory::BaixaComplexidade,
            "Alta Complexidade" => InvestmentCategory::AltaComplexidade,
            _ => InvestmentCategory::MediaComplexidade,
        }
    }
}

/// Lifecycle bucket of a request. Requests are never deleted, only moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Aberta,
    EmAnalise,
    Aprovada,
    Reprovada,
    Concluida,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Aberta => "aberta",
            RequestStatus::EmAnalise => "em_analise",
            RequestStatus::Aprovada => "aprovada",
            RequestStatus::Reprovada => "reprovada",
            RequestStatus::Concluida => "concluida",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "em_analise" => RequestStatus::EmAnalise,
            "aprovada" => RequestStatus::Aprovada,
            "reprovada" => RequestStatus::Reprovada,
            "concluida" => RequestStatus::Concluida,
            _ => RequestStatus::Aberta,
        }
    }
}

/// Monetary amount in integer centavos. The legacy portal shuffled
/// locale-formatted strings ("R$ 1.234,56", "3,5 mi", "300 mil") between
/// screens; here every amount is centavos at the model boundary and locale
/// formatting only happens at the presentation edge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Parses a Brazilian-locale amount. Accepted shapes, in reais:
    /// `"R$ 1.234,56"`, `"1234,56"`, `"3,5 mi"` (millions), `"300 mil"`
    /// (thousands). Anything unparseable yields zero; the schedule math
    /// relies on zero meaning "contributes nothing".
    pub fn parse_brl(input: &str) -> Money {
        let lower = input.trim().to_lowercase();
        let body = lower.strip_prefix("r$").unwrap_or(&lower).trim();

        // "mil" must be checked before "mi": the suffixes overlap.
        let (body, cents_per_unit) = if let Some(rest) = body.strip_suffix("mil") {
            (rest.trim_end(), 100_000_i64)
        } else if let Some(rest) = body.strip_suffix("mi") {
            (rest.trim_end(), 100_000_000_i64)
        } else {
            (body, 100_i64)
        };

        let normalized: String = body.chars().filter(|c| *c != '.').collect();
        let mut parts = normalized.splitn(2, ',');
        let int_part = parts.next().unwrap_or("");
        let frac_part = parts.next().unwrap_or("");

        if int_part.is_empty() && frac_part.is_empty() {
            return Money::ZERO;
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Money::ZERO;
        }

        let units: i64 = match int_part {
            "" => 0,
            digits => match digits.parse() {
                Ok(v) => v,
                Err(_) => return Money::ZERO,
            },
        };

        let mut total = units.saturating_mul(cents_per_unit);
        if !frac_part.is_empty() {
            let numerator: i64 = match frac_part.parse() {
                Ok(v) => v,
                Err(_) => return Money::ZERO,
            };
            let denominator = 10_i64.saturating_pow(frac_part.len() as u32);
            // Round half up, matching the legacy preview arithmetic.
            let frac_cents =
                (numerator.saturating_mul(cents_per_unit) + denominator / 2) / denominator;
            total = total.saturating_add(frac_cents);
        }
        Money(total)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let units = abs / 100;
        let frac = abs % 100;

        let digits = units.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push('.');
            }
            grouped.push(c);
        }
        write!(f, "{sign}R$ {grouped},{frac:02}")
    }
}

/// One phase of a request (Projeto or Obra): when it starts, how long it
/// runs, and what it costs. A phase with `duration_months == 0` does not
/// exist and contributes nothing to any commitment schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhasePlan {
    pub start: Option<NaiveDate>,
    pub duration_months: u32,
    pub value: Money,
}

impl PhasePlan {
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.duration_months == 0 && self.value == Money::ZERO
    }
}

/// A capital-works request as tracked by the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub request_id: RequestId,
    pub codigo: uuid::Uuid,
    pub unit_id: UnitId,
    pub tipologia_id: TipologiaId,
    pub tipo_local_id: TipoLocalId,
    pub category: InvestmentCategory,
    pub titulo: String,
    pub descricao: String,
    pub situacao_projeto: String,
    pub situacao_obra: String,
    pub status: RequestStatus,
    pub projeto: PhasePlan,
    pub obra: PhasePlan,
    pub observacao: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// What a signed-in user may do. Resolved once at login from the user's
/// flags and profile categories, then carried in the session token; handlers
/// never compare profile-name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_approve: bool,
    pub can_request: bool,
    pub manage_registry: bool,
}

/// Parses `dd/mm/yyyy`. The legacy data uses `"N/A"` as a free-text sentinel
/// for "no date"; that and anything else unparseable map to `None`.
pub fn parse_br_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%d/%m/%Y").ok()
}

/// Parses `dd/mm/yyyy hh:mm`, falling back to date-only at midnight. Legacy
/// exports carry creation timestamps in both shapes.
pub fn parse_br_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%d/%m/%Y %H:%M") {
        return Some(dt);
    }
    parse_br_date(trimmed).map(|d| d.and_time(NaiveTime::MIN))
}
