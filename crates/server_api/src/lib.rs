use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use planning::{distribute_phases, reconcile, CommitmentWindow, PlanningStore, ReclassifiedPlan};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{
        Capabilities, InvestmentCategory, Money, RecordStatus, RequestId, RequestStatus,
        TipoLocalId, TipologiaId, UserId, WorkRequest,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        ApproveResponse, CommitmentScheduleResponse, CreateProfileRequest, CreateUserRequest,
        OpenRequestRequest, ProfileSummary, ScheduleYear, SessionResponse, TipoLocalSummary,
        TipologiaSummary, UnitSummary, UpdateUserRequest, UserSummary,
    },
};
use storage::{NewRequest, NewUser, Storage, StoredProfile, StoredUser, UserUpdate};

/// Permission strings the legacy profiles carry; capability resolution is
/// the only place that ever looks at them.
const PERM_APPROVE: &str = "aprovar";
const PERM_OPEN_REQUEST: &str = "abrir_solicitacao";
const PERM_REGISTRY: &str = "cadastros";

/// Upper bound on a phase duration. 50 years is already far beyond the
/// commitment window; anything larger is a typo, and the schedule walk must
/// not iterate over it.
const MAX_PHASE_MONTHS: u32 = 600;

#[derive(Clone)]
pub struct AuthConfig {
    pub token_secret: String,
    pub token_ttl_seconds: i64,
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub auth: AuthConfig,
    pub window: CommitmentWindow,
}

/// A verified session: who is calling and what they may do.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub user_id: UserId,
    pub capabilities: Capabilities,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i64,
    caps: Capabilities,
    exp: i64,
}

// ---- session ---------------------------------------------------------------

/// Resolves the user's capability set from their flags and profile
/// permissions. Done once per login; nothing downstream compares profile
/// names.
pub fn resolve_capabilities(user: &StoredUser, profiles: &[StoredProfile]) -> Capabilities {
    let has_perm = |perm: &str| {
        profiles
            .iter()
            .any(|p| p.permissions.iter().any(|candidate| candidate == perm))
    };
    Capabilities {
        can_approve: user.is_approver || has_perm(PERM_APPROVE),
        can_request: user.is_requester || has_perm(PERM_OPEN_REQUEST),
        manage_registry: has_perm(PERM_REGISTRY),
    }
}

/// Credential verification is delegated to the corporate SSO upstream; this
/// endpoint resolves capabilities for a known login and issues the session
/// token.
pub async fn login(ctx: &ApiContext, login: &str) -> Result<SessionResponse, ApiError> {
    let user = ctx
        .storage
        .find_user_by_login(login.trim())
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "unknown login"))?;

    let profiles = ctx
        .storage
        .list_profiles_for_user(user.user_id)
        .await
        .map_err(internal)?;
    let capabilities = resolve_capabilities(&user, &profiles);

    let claims = Claims {
        sub: user.user_id.0,
        caps: capabilities,
        exp: Utc::now().timestamp() + ctx.auth.token_ttl_seconds,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(ctx.auth.token_secret.as_bytes()),
    )
    .map_err(|e| ApiError::new(ErrorCode::Internal, format!("token issue failed: {e}")))?;

    Ok(SessionResponse {
        token,
        user: user_summary(user),
        capabilities,
    })
}

pub fn verify_token(ctx: &ApiContext, token: &str) -> Result<Session, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(ctx.auth.token_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::new(ErrorCode::Unauthorized, "invalid or expired session token"))?;

    Ok(Session {
        user_id: UserId(data.claims.sub),
        capabilities: data.claims.caps,
    })
}

// ---- users & profiles ------------------------------------------------------

pub async fn list_users(ctx: &ApiContext, session: &Session) -> Result<Vec<UserSummary>, ApiError> {
    ensure_manage_registry(session)?;
    let users = ctx.storage.list_users().await.map_err(internal)?;
    Ok(users.into_iter().map(user_summary).collect())
}

pub async fn create_user(
    ctx: &ApiContext,
    session: &Session,
    req: CreateUserRequest,
) -> Result<UserSummary, ApiError> {
    ensure_manage_registry(session)?;
    let login = req.login.trim();
    if login.is_empty() || req.nome.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "nome and login are required",
        ));
    }

    let user_id = ctx
        .storage
        .create_user(&NewUser {
            nome: req.nome.trim().to_string(),
            login: login.to_string(),
            email: req.email.trim().to_string(),
            is_approver: req.is_approver,
            is_requester: req.is_requester,
            profiles: req.sigo_profiles,
            units: req.linked_units,
        })
        .await
        .map_err(|e| ApiError::new(ErrorCode::Validation, e.to_string()))?;

    let user = ctx
        .storage
        .get_user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "user vanished after insert"))?;
    Ok(user_summary(user))
}

pub async fn update_user(
    ctx: &ApiContext,
    session: &Session,
    req: UpdateUserRequest,
) -> Result<UserSummary, ApiError> {
    ensure_manage_registry(session)?;
    let updated = ctx
        .storage
        .update_user(
            req.user_id,
            &UserUpdate {
                nome: req.nome.trim().to_string(),
                email: req.email.trim().to_string(),
                is_approver: req.is_approver,
                is_requester: req.is_requester,
                profiles: req.sigo_profiles,
                units: req.linked_units,
            },
        )
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "user not found"));
    }

    let user = ctx
        .storage
        .get_user(req.user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "user vanished after update"))?;
    Ok(user_summary(user))
}

pub async fn list_profiles(
    ctx: &ApiContext,
    session: &Session,
) -> Result<Vec<ProfileSummary>, ApiError> {
    ensure_manage_registry(session)?;
    let profiles = ctx.storage.list_profiles().await.map_err(internal)?;
    Ok(profiles.into_iter().map(profile_summary).collect())
}

pub async fn create_profile(
    ctx: &ApiContext,
    session: &Session,
    req: CreateProfileRequest,
) -> Result<ProfileSummary, ApiError> {
    ensure_manage_registry(session)?;
    if req.nome.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "nome is required"));
    }
    let profile_id = ctx
        .storage
        .create_profile(req.nome.trim(), req.category.trim(), &req.permissions)
        .await
        .map_err(internal)?;
    Ok(ProfileSummary {
        profile_id,
        nome: req.nome.trim().to_string(),
        category: req.category.trim().to_string(),
        permissions: req.permissions,
    })
}

// ---- reference tables ------------------------------------------------------

pub async fn list_units(ctx: &ApiContext, _session: &Session) -> Result<Vec<UnitSummary>, ApiError> {
    let units = ctx.storage.list_units().await.map_err(internal)?;
    Ok(units
        .into_iter()
        .map(|u| UnitSummary {
            unit_id: u.unit_id,
            nome: u.nome,
            sigla: u.sigla,
        })
        .collect())
}

pub async fn list_tipologias(
    ctx: &ApiContext,
    _session: &Session,
    only_active: bool,
) -> Result<Vec<TipologiaSummary>, ApiError> {
    let tipologias = ctx
        .storage
        .list_tipologias(only_active)
        .await
        .map_err(internal)?;
    Ok(tipologias
        .into_iter()
        .map(|t| TipologiaSummary {
            tipologia_id: t.tipologia_id,
            nome: t.nome,
            status: t.status,
        })
        .collect())
}

pub async fn create_tipologia(
    ctx: &ApiContext,
    session: &Session,
    nome: &str,
) -> Result<TipologiaSummary, ApiError> {
    ensure_manage_registry(session)?;
    let nome = nome.trim();
    if nome.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "nome is required"));
    }
    let tipologia_id = ctx
        .storage
        .create_tipologia(nome)
        .await
        .map_err(internal)?;
    Ok(TipologiaSummary {
        tipologia_id,
        nome: nome.to_string(),
        status: RecordStatus::Ativo,
    })
}

pub async fn rename_tipologia(
    ctx: &ApiContext,
    session: &Session,
    tipologia_id: TipologiaId,
    nome: &str,
) -> Result<(), ApiError> {
    ensure_manage_registry(session)?;
    let renamed = ctx
        .storage
        .rename_tipologia(tipologia_id, nome.trim())
        .await
        .map_err(internal)?;
    if !renamed {
        return Err(ApiError::new(ErrorCode::NotFound, "tipologia not found"));
    }
    Ok(())
}

pub async fn set_tipologia_status(
    ctx: &ApiContext,
    session: &Session,
    tipologia_id: TipologiaId,
    status: RecordStatus,
) -> Result<(), ApiError> {
    ensure_manage_registry(session)?;
    let toggled = ctx
        .storage
        .set_tipologia_status(tipologia_id, status)
        .await
        .map_err(internal)?;
    if !toggled {
        return Err(ApiError::new(ErrorCode::NotFound, "tipologia not found"));
    }
    Ok(())
}

pub async fn list_tipo_locais(
    ctx: &ApiContext,
    _session: &Session,
    only_active: bool,
) -> Result<Vec<TipoLocalSummary>, ApiError> {
    let tipo_locais = ctx
        .storage
        .list_tipo_locais(only_active)
        .await
        .map_err(internal)?;
    Ok(tipo_locais
        .into_iter()
        .map(|t| TipoLocalSummary {
            tipo_local_id: t.tipo_local_id,
            nome: t.nome,
            status: t.status,
        })
        .collect())
}

pub async fn create_tipo_local(
    ctx: &ApiContext,
    session: &Session,
    nome: &str,
) -> Result<TipoLocalSummary, ApiError> {
    ensure_manage_registry(session)?;
    let nome = nome.trim();
    if nome.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "nome is required"));
    }
    let tipo_local_id = ctx
        .storage
        .create_tipo_local(nome)
        .await
        .map_err(internal)?;
    Ok(TipoLocalSummary {
        tipo_local_id,
        nome: nome.to_string(),
        status: RecordStatus::Ativo,
    })
}

pub async fn rename_tipo_local(
    ctx: &ApiContext,
    session: &Session,
    tipo_local_id: TipoLocalId,
    nome: &str,
) -> Result<(), ApiError> {
    ensure_manage_registry(session)?;
    let renamed = ctx
        .storage
        .rename_tipo_local(tipo_local_id, nome.trim())
        .await
        .map_err(internal)?;
    if !renamed {
        return Err(ApiError::new(ErrorCode::NotFound, "tipo-local not found"));
    }
    Ok(())
}

pub async fn set_tipo_local_status(
    ctx: &ApiContext,
    session: &Session,
    tipo_local_id: TipoLocalId,
    status: RecordStatus,
) -> Result<(), ApiError> {
    ensure_manage_registry(session)?;
    let toggled = ctx
        .storage
        .set_tipo_local_status(tipo_local_id, status)
        .await
        .map_err(internal)?;
    if !toggled {
        return Err(ApiError::new(ErrorCode::NotFound, "tipo-local not found"));
    }
    Ok(())
}

// ---- work requests ---------------------------------------------------------

pub async fn open_request(
    ctx: &ApiContext,
    session: &Session,
    req: OpenRequestRequest,
) -> Result<WorkRequest, ApiError> {
    ensure_can_request(session)?;
    if req.titulo.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "titulo is required"));
    }
    if req.projeto.duration_months > MAX_PHASE_MONTHS || req.obra.duration_months > MAX_PHASE_MONTHS
    {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("phase duration must not exceed {MAX_PHASE_MONTHS} months"),
        ));
    }

    let (request_id, _codigo) = ctx
        .storage
        .create_request(&NewRequest {
            unit_id: req.unit_id,
            tipologia_id: req.tipologia_id,
            tipo_local_id: req.tipo_local_id,
            category: req.category,
            titulo: req.titulo.trim().to_string(),
            descricao: req.descricao,
            projeto: req.projeto,
            obra: req.obra,
            created_at: None,
        })
        .await
        .map_err(|e| ApiError::new(ErrorCode::Validation, e.to_string()))?;

    ctx.storage
        .get_request(request_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "request vanished after insert"))
}

pub async fn list_requests(
    ctx: &ApiContext,
    _session: &Session,
    status: Option<RequestStatus>,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<WorkRequest>, ApiError> {
    ctx.storage
        .list_requests(status, limit, before)
        .await
        .map_err(internal)
}

pub async fn update_observacao(
    ctx: &ApiContext,
    _session: &Session,
    request_id: RequestId,
    observacao: Option<&str>,
) -> Result<WorkRequest, ApiError> {
    let updated = ctx
        .storage
        .update_observacao(request_id, observacao)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(ApiError::new(ErrorCode::NotFound, "request not found"));
    }
    ctx.storage
        .get_request(request_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "request vanished after update"))
}

pub async fn approve_request(
    ctx: &ApiContext,
    session: &Session,
    request_id: RequestId,
    approved: bool,
) -> Result<ApproveResponse, ApiError> {
    ensure_can_approve(session)?;
    let status = if approved {
        RequestStatus::Aprovada
    } else {
        RequestStatus::Reprovada
    };
    let moved = ctx
        .storage
        .set_request_status(request_id, status)
        .await
        .map_err(internal)?;
    if !moved {
        return Err(ApiError::new(ErrorCode::NotFound, "request not found"));
    }
    Ok(ApproveResponse {
        request_id,
        status,
        decided_at: Utc::now(),
    })
}

/// Runs the investment-category cascade over the stored plans and persists
/// the outcome atomically.
pub async fn reclassify_request(
    ctx: &ApiContext,
    session: &Session,
    request_id: RequestId,
    category: InvestmentCategory,
) -> Result<ReclassifiedPlan, ApiError> {
    ensure_can_approve(session)?;
    let request = ctx
        .storage
        .get_request(request_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "request not found"))?;

    let plan = planning::reclassify(&request, category);
    let saved = ctx
        .storage
        .save_reclassified(request_id, &plan)
        .await
        .map_err(internal)?;
    if !saved {
        return Err(ApiError::new(ErrorCode::NotFound, "request not found"));
    }
    Ok(plan)
}

/// Distributes both phases across the commitment window and reconciles the
/// grand total against the homologated value (sum of the two phase totals).
/// A mismatch is reported in the response, never raised.
pub async fn commitment_schedule(
    ctx: &ApiContext,
    _session: &Session,
    request_id: RequestId,
) -> Result<CommitmentScheduleResponse, ApiError> {
    let request = ctx
        .storage
        .get_request(request_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "request not found"))?;

    let distribution = distribute_phases(&request.projeto, &request.obra, ctx.window);
    let homologated = Money(request.projeto.value.cents() + request.obra.value.cents());
    let reconciliation = reconcile(&distribution, homologated);
    if !reconciliation.matches {
        tracing::warn!(
            request_id = request_id.0,
            distributed = reconciliation.distributed.cents(),
            homologated = homologated.cents(),
            "commitment schedule does not reconcile with homologated value"
        );
    }

    let years = distribution
        .years
        .iter()
        .map(|(year, months)| {
            let mut row = [Money::ZERO; 12];
            for (i, cents) in months.iter().enumerate() {
                row[i] = Money(*cents);
            }
            ScheduleYear {
                year: *year,
                months: row,
                total: Money(months.iter().sum()),
            }
        })
        .collect();

    Ok(CommitmentScheduleResponse {
        request_id,
        years,
        truncated: Money(distribution.truncated_cents),
        distributed_total: reconciliation.distributed,
        homologated_total: homologated,
        reconciled: reconciliation.matches,
    })
}

// ---- guards & helpers ------------------------------------------------------

fn ensure_can_approve(session: &Session) -> Result<(), ApiError> {
    if session.capabilities.can_approve {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::Forbidden,
            "approver capability required",
        ))
    }
}

fn ensure_can_request(session: &Session) -> Result<(), ApiError> {
    if session.capabilities.can_request {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::Forbidden,
            "requester capability required",
        ))
    }
}

fn ensure_manage_registry(session: &Session) -> Result<(), ApiError> {
    if session.capabilities.manage_registry {
        Ok(())
    } else {
        Err(ApiError::new(
            ErrorCode::Forbidden,
            "registry capability required",
        ))
    }
}

fn user_summary(user: StoredUser) -> UserSummary {
    UserSummary {
        user_id: user.user_id,
        nome: user.nome,
        login: user.login,
        email: user.email,
        is_approver: user.is_approver,
        is_requester: user.is_requester,
        sigo_profiles: user.profiles,
        linked_units: user.units,
    }
}

fn profile_summary(profile: StoredProfile) -> ProfileSummary {
    ProfileSummary {
        profile_id: profile.profile_id,
        nome: profile.nome,
        category: profile.category,
        permissions: profile.permissions,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
