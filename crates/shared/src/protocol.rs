use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Capabilities, InvestmentCategory, Money, PhasePlan, ProfileId, RecordStatus, RequestId,
    RequestStatus, TipoLocalId, TipologiaId, UnitId, UserId, WorkRequest,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserSummary,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub nome: String,
    pub login: String,
    pub email: String,
    pub is_approver: bool,
    pub is_requester: bool,
    pub sigo_profiles: Vec<ProfileId>,
    pub linked_units: Vec<UnitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub nome: String,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub is_approver: bool,
    #[serde(default)]
    pub is_requester: bool,
    #[serde(default)]
    pub sigo_profiles: Vec<ProfileId>,
    #[serde(default)]
    pub linked_units: Vec<UnitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub user_id: UserId,
    pub nome: String,
    pub email: String,
    pub is_approver: bool,
    pub is_requester: bool,
    pub sigo_profiles: Vec<ProfileId>,
    pub linked_units: Vec<UnitId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub profile_id: ProfileId,
    pub nome: String,
    pub category: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileRequest {
    pub nome: String,
    pub category: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipologiaSummary {
    pub tipologia_id: TipologiaId,
    pub nome: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTipologiaRequest {
    pub nome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTipologiaRequest {
    pub tipologia_id: TipologiaId,
    pub nome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipoLocalSummary {
    pub tipo_local_id: TipoLocalId,
    pub nome: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTipoLocalRequest {
    pub nome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTipoLocalRequest {
    pub tipo_local_id: TipoLocalId,
    pub nome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRecordStatusRequest {
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_id: UnitId,
    pub nome: String,
    pub sigla: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRequestRequest {
    pub unit_id: UnitId,
    pub tipologia_id: TipologiaId,
    pub tipo_local_id: TipoLocalId,
    pub category: InvestmentCategory,
    pub titulo: String,
    #[serde(default)]
    pub descricao: String,
    #[serde(default)]
    pub projeto: PhasePlan,
    #[serde(default)]
    pub obra: PhasePlan,
}

/// Partial update; the legacy `PUT /api/requests` only ever touches the
/// free-text `observacao` on maintenance items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequestBody {
    pub request_id: RequestId,
    pub observacao: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclassifyBody {
    pub category: InvestmentCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalBody {
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestListResponse {
    pub requests: Vec<WorkRequest>,
    /// Keyset cursor: pass back as `before` to fetch the next (older) page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_before: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub decided_at: DateTime<Utc>,
}

/// One commitment-schedule row: a calendar year with twelve monthly amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleYear {
    pub year: i32,
    pub months: [Money; 12],
    pub total: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentScheduleResponse {
    pub request_id: RequestId,
    pub years: Vec<ScheduleYear>,
    /// Cents that fell outside the configured commitment window. Always
    /// reported, never silently dropped.
    pub truncated: Money,
    pub distributed_total: Money,
    pub homologated_total: Money,
    /// Informational only: distributed totals (window + truncated) match the
    /// homologated value.
    pub reconciled: bool,
}
