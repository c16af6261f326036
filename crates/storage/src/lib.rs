use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use planning::{PlanningStore, ReclassifiedPlan};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{
    InvestmentCategory, Money, PhasePlan, ProfileId, RecordStatus, RequestId, RequestStatus,
    TipoLocalId, TipologiaId, UnitId, UserId, WorkRequest,
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUnit {
    pub unit_id: UnitId,
    pub nome: String,
    pub sigla: String,
}

#[derive(Debug, Clone)]
pub struct StoredProfile {
    pub profile_id: ProfileId,
    pub nome: String,
    pub category: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub nome: String,
    pub login: String,
    pub email: String,
    pub is_approver: bool,
    pub is_requester: bool,
    pub profiles: Vec<ProfileId>,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub nome: String,
    pub login: String,
    pub email: String,
    pub is_approver: bool,
    pub is_requester: bool,
    pub profiles: Vec<ProfileId>,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub nome: String,
    pub email: String,
    pub is_approver: bool,
    pub is_requester: bool,
    pub profiles: Vec<ProfileId>,
    pub units: Vec<UnitId>,
}

#[derive(Debug, Clone)]
pub struct StoredTipologia {
    pub tipologia_id: TipologiaId,
    pub nome: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone)]
pub struct StoredTipoLocal {
    pub tipo_local_id: TipoLocalId,
    pub nome: String,
    pub status: RecordStatus,
}

#[derive(Debug, Clone)]
pub struct NewRequest {
    pub unit_id: UnitId,
    pub tipologia_id: TipologiaId,
    pub tipo_local_id: TipoLocalId,
    pub category: InvestmentCategory,
    pub titulo: String,
    pub descricao: String,
    pub projeto: PhasePlan,
    pub obra: PhasePlan,
    /// Legacy creation timestamp carried over by the seed tool; `None` means
    /// "now".
    pub created_at: Option<NaiveDateTime>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    // ---- units -----------------------------------------------------------

    pub async fn create_unit(&self, nome: &str, sigla: &str) -> Result<UnitId> {
        let rec = sqlx::query(
            "INSERT INTO units (nome, sigla) VALUES (?, ?)
             ON CONFLICT(nome) DO UPDATE SET sigla=excluded.sigla
             RETURNING id",
        )
        .bind(nome)
        .bind(sigla)
        .fetch_one(&self.pool)
        .await?;
        Ok(UnitId(rec.get::<i64, _>(0)))
    }

    pub async fn list_units(&self) -> Result<Vec<StoredUnit>> {
        let rows = sqlx::query("SELECT id, nome, sigla FROM units ORDER BY lower(nome) ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredUnit {
                unit_id: UnitId(r.get::<i64, _>(0)),
                nome: r.get::<String, _>(1),
                sigla: r.get::<String, _>(2),
            })
            .collect())
    }

    // ---- access profiles -------------------------------------------------

    pub async fn create_profile(
        &self,
        nome: &str,
        category: &str,
        permissions: &[String],
    ) -> Result<ProfileId> {
        let permissions_json =
            serde_json::to_string(permissions).context("failed to encode permissions")?;
        let rec = sqlx::query(
            "INSERT INTO profiles (nome, category, permissions) VALUES (?, ?, ?)
             ON CONFLICT(nome) DO UPDATE SET category=excluded.category, permissions=excluded.permissions
             RETURNING id",
        )
        .bind(nome)
        .bind(category)
        .bind(permissions_json)
        .fetch_one(&self.pool)
        .await?;
        Ok(ProfileId(rec.get::<i64, _>(0)))
    }

    pub async fn list_profiles(&self) -> Result<Vec<StoredProfile>> {
        let rows = sqlx::query(
            "SELECT id, nome, category, permissions FROM profiles ORDER BY lower(nome) ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_profile_row).collect()
    }

    pub async fn list_profiles_for_user(&self, user_id: UserId) -> Result<Vec<StoredProfile>> {
        let rows = sqlx::query(
            "SELECT p.id, p.nome, p.category, p.permissions
             FROM profiles p
             INNER JOIN user_profiles up ON up.profile_id = p.id
             WHERE up.user_id = ?
             ORDER BY p.id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_profile_row).collect()
    }

    // ---- users -----------------------------------------------------------

    /// Upsert by login, so bulk seeding can be re-run against an existing
    /// database. Link tables are replaced, not appended to.
    pub async fn create_user(&self, new_user: &NewUser) -> Result<UserId> {
        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO users (nome, login, email, is_approver, is_requester)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(login) DO UPDATE SET
                nome=excluded.nome, email=excluded.email,
                is_approver=excluded.is_approver, is_requester=excluded.is_requester
             RETURNING id",
        )
        .bind(&new_user.nome)
        .bind(&new_user.login)
        .bind(&new_user.email)
        .bind(new_user.is_approver)
        .bind(new_user.is_requester)
        .fetch_one(&mut *tx)
        .await?;
        let user_id = UserId(rec.get::<i64, _>(0));

        sqlx::query("DELETE FROM user_profiles WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_units WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

        for profile_id in &new_user.profiles {
            sqlx::query("INSERT OR IGNORE INTO user_profiles (user_id, profile_id) VALUES (?, ?)")
                .bind(user_id.0)
                .bind(profile_id.0)
                .execute(&mut *tx)
                .await?;
        }
        for unit_id in &new_user.units {
            sqlx::query("INSERT OR IGNORE INTO user_units (user_id, unit_id) VALUES (?, ?)")
                .bind(user_id.0)
                .bind(unit_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(user_id)
    }

    /// Replaces the user row and both link tables in a single transaction,
    /// so a half-applied profile change is never observable.
    pub async fn update_user(&self, user_id: UserId, update: &UserUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE users SET nome = ?, email = ?, is_approver = ?, is_requester = ? WHERE id = ?",
        )
        .bind(&update.nome)
        .bind(&update.email)
        .bind(update.is_approver)
        .bind(update.is_requester)
        .bind(user_id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM user_profiles WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
        for profile_id in &update.profiles {
            sqlx::query("INSERT OR IGNORE INTO user_profiles (user_id, profile_id) VALUES (?, ?)")
                .bind(user_id.0)
                .bind(profile_id.0)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM user_units WHERE user_id = ?")
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;
        for unit_id in &update.units {
            sqlx::query("INSERT OR IGNORE INTO user_units (user_id, unit_id) VALUES (?, ?)")
                .bind(user_id.0)
                .bind(unit_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, nome, login, email, is_approver, is_requester FROM users WHERE id = ?",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(self.hydrate_user(row).await?))
    }

    pub async fn find_user_by_login(&self, login: &str) -> Result<Option<StoredUser>> {
        let row = sqlx::query(
            "SELECT id, nome, login, email, is_approver, is_requester FROM users WHERE login = ?",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(self.hydrate_user(row).await?))
    }

    pub async fn list_users(&self) -> Result<Vec<StoredUser>> {
        let rows = sqlx::query(
            "SELECT id, nome, login, email, is_approver, is_requester
             FROM users
             ORDER BY lower(nome) ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(self.hydrate_user(row).await?);
        }
        Ok(users)
    }

    async fn hydrate_user(&self, row: SqliteRow) -> Result<StoredUser> {
        let user_id = UserId(row.get::<i64, _>(0));
        let profiles = sqlx::query(
            "SELECT profile_id FROM user_profiles WHERE user_id = ? ORDER BY profile_id ASC",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| ProfileId(r.get::<i64, _>(0)))
        .collect();
        let units =
            sqlx::query("SELECT unit_id FROM user_units WHERE user_id = ? ORDER BY unit_id ASC")
                .bind(user_id.0)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|r| UnitId(r.get::<i64, _>(0)))
                .collect();

        Ok(StoredUser {
            user_id,
            nome: row.get::<String, _>(1),
            login: row.get::<String, _>(2),
            email: row.get::<String, _>(3),
            is_approver: row.get::<bool, _>(4),
            is_requester: row.get::<bool, _>(5),
            profiles,
            units,
        })
    }

    // ---- tipologias ------------------------------------------------------

    pub async fn create_tipologia(&self, nome: &str) -> Result<TipologiaId> {
        let rec = sqlx::query(
            "INSERT INTO tipologias (nome) VALUES (?)
             ON CONFLICT(nome) DO UPDATE SET nome=excluded.nome
             RETURNING id",
        )
        .bind(nome)
        .fetch_one(&self.pool)
        .await?;
        Ok(TipologiaId(rec.get::<i64, _>(0)))
    }

    pub async fn rename_tipologia(&self, tipologia_id: TipologiaId, nome: &str) -> Result<bool> {
        let updated = sqlx::query("UPDATE tipologias SET nome = ? WHERE id = ?")
            .bind(nome)
            .bind(tipologia_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn set_tipologia_status(
        &self,
        tipologia_id: TipologiaId,
        status: RecordStatus,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE tipologias SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(tipologia_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_tipologias(&self, only_active: bool) -> Result<Vec<StoredTipologia>> {
        let rows = sqlx::query(
            "SELECT id, nome, status FROM tipologias
             WHERE (? = 0 OR status = 'ativo')
             ORDER BY lower(nome) ASC",
        )
        .bind(only_active)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredTipologia {
                tipologia_id: TipologiaId(r.get::<i64, _>(0)),
                nome: r.get::<String, _>(1),
                status: RecordStatus::from_str_lossy(&r.get::<String, _>(2)),
            })
            .collect())
    }

    // ---- tipo-locais -----------------------------------------------------

    pub async fn create_tipo_local(&self, nome: &str) -> Result<TipoLocalId> {
        let rec = sqlx::query(
            "INSERT INTO tipo_locais (nome) VALUES (?)
             ON CONFLICT(nome) DO UPDATE SET nome=excluded.nome
             RETURNING id",
        )
        .bind(nome)
        .fetch_one(&self.pool)
        .await?;
        Ok(TipoLocalId(rec.get::<i64, _>(0)))
    }

    pub async fn rename_tipo_local(&self, tipo_local_id: TipoLocalId, nome: &str) -> Result<bool> {
        let updated = sqlx::query("UPDATE tipo_locais SET nome = ? WHERE id = ?")
            .bind(nome)
            .bind(tipo_local_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn set_tipo_local_status(
        &self,
        tipo_local_id: TipoLocalId,
        status: RecordStatus,
    ) -> Result<bool> {
        let updated = sqlx::query("UPDATE tipo_locais SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(tipo_local_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    pub async fn list_tipo_locais(&self, only_active: bool) -> Result<Vec<StoredTipoLocal>> {
        let rows = sqlx::query(
            "SELECT id, nome, status FROM tipo_locais
             WHERE (? = 0 OR status = 'ativo')
             ORDER BY lower(nome) ASC",
        )
        .bind(only_active)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredTipoLocal {
                tipo_local_id: TipoLocalId(r.get::<i64, _>(0)),
                nome: r.get::<String, _>(1),
                status: RecordStatus::from_str_lossy(&r.get::<String, _>(2)),
            })
            .collect())
    }

    // ---- work requests ---------------------------------------------------

    pub async fn create_request(&self, new_request: &NewRequest) -> Result<(RequestId, Uuid)> {
        let codigo = Uuid::new_v4();
        let rec = sqlx::query(
            "INSERT INTO requests (
                codigo, unit_id, tipologia_id, tipo_local_id, category, titulo, descricao,
                projeto_inicio, projeto_duracao_meses, projeto_valor_centavos,
                obra_inicio, obra_duracao_meses, obra_valor_centavos,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP))
             RETURNING id",
        )
        .bind(codigo.to_string())
        .bind(new_request.unit_id.0)
        .bind(new_request.tipologia_id.0)
        .bind(new_request.tipo_local_id.0)
        .bind(new_request.category.as_str())
        .bind(&new_request.titulo)
        .bind(&new_request.descricao)
        .bind(new_request.projeto.start)
        .bind(new_request.projeto.duration_months)
        .bind(new_request.projeto.value.cents())
        .bind(new_request.obra.start)
        .bind(new_request.obra.duration_months)
        .bind(new_request.obra.value.cents())
        .bind(new_request.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok((RequestId(rec.get::<i64, _>(0)), codigo))
    }

    pub async fn get_request(&self, request_id: RequestId) -> Result<Option<WorkRequest>> {
        let row = sqlx::query("SELECT * FROM requests WHERE id = ?")
            .bind(request_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_request_row).transpose()
    }

    /// Newest-first keyset pagination over the request table, optionally
    /// narrowed to one status bucket. `before` is the id of the oldest row
    /// the caller already has.
    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<WorkRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM requests
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )
        .bind(status.map(RequestStatus::as_str))
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_request_row).collect()
    }

    pub async fn update_observacao(
        &self,
        request_id: RequestId,
        observacao: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE requests SET observacao = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(observacao)
        .bind(request_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn set_request_status(
        &self,
        request_id: RequestId,
        status: RequestStatus,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE requests SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(request_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    pub async fn save_planning(
        &self,
        request_id: RequestId,
        category: InvestmentCategory,
        projeto: &PhasePlan,
        obra: &PhasePlan,
    ) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE requests SET
                category = ?,
                projeto_inicio = ?, projeto_duracao_meses = ?, projeto_valor_centavos = ?,
                obra_inicio = ?, obra_duracao_meses = ?, obra_valor_centavos = ?,
                updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
        )
        .bind(category.as_str())
        .bind(projeto.start)
        .bind(projeto.duration_months)
        .bind(projeto.value.cents())
        .bind(obra.start)
        .bind(obra.duration_months)
        .bind(obra.value.cents())
        .bind(request_id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}

fn map_profile_row(row: SqliteRow) -> Result<StoredProfile> {
    let permissions_json = row.get::<String, _>(3);
    let permissions: Vec<String> = serde_json::from_str(&permissions_json)
        .context("profile permissions column is not a JSON string array")?;
    Ok(StoredProfile {
        profile_id: ProfileId(row.get::<i64, _>(0)),
        nome: row.get::<String, _>(1),
        category: row.get::<String, _>(2),
        permissions,
    })
}

fn map_request_row(row: SqliteRow) -> Result<WorkRequest> {
    let codigo_raw = row.get::<String, _>("codigo");
    let codigo = Uuid::parse_str(&codigo_raw)
        .with_context(|| format!("request codigo '{codigo_raw}' is not a uuid"))?;
    Ok(WorkRequest {
        request_id: RequestId(row.get::<i64, _>("id")),
        codigo,
        unit_id: UnitId(row.get::<i64, _>("unit_id")),
        tipologia_id: TipologiaId(row.get::<i64, _>("tipologia_id")),
        tipo_local_id: TipoLocalId(row.get::<i64, _>("tipo_local_id")),
        category: InvestmentCategory::from_str_lossy(&row.get::<String, _>("category")),
        titulo: row.get::<String, _>("titulo"),
        descricao: row.get::<String, _>("descricao"),
        situacao_projeto: row.get::<String, _>("situacao_projeto"),
        situacao_obra: row.get::<String, _>("situacao_obra"),
        status: RequestStatus::from_str_lossy(&row.get::<String, _>("status")),
        projeto: PhasePlan {
            start: row.get::<Option<NaiveDate>, _>("projeto_inicio"),
            duration_months: row.get::<i64, _>("projeto_duracao_meses") as u32,
            value: Money(row.get::<i64, _>("projeto_valor_centavos")),
        },
        obra: PhasePlan {
            start: row.get::<Option<NaiveDate>, _>("obra_inicio"),
            duration_months: row.get::<i64, _>("obra_duracao_meses") as u32,
            value: Money(row.get::<i64, _>("obra_valor_centavos")),
        },
        observacao: row.get::<Option<String>, _>("observacao"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl PlanningStore for Storage {
    async fn load_phase_plans(
        &self,
        request_id: RequestId,
    ) -> Result<Option<(InvestmentCategory, PhasePlan, PhasePlan)>> {
        let request = self.get_request(request_id).await?;
        Ok(request.map(|r| (r.category, r.projeto, r.obra)))
    }

    async fn save_reclassified(
        &self,
        request_id: RequestId,
        plan: &ReclassifiedPlan,
    ) -> Result<bool> {
        self.save_planning(request_id, plan.category, &plan.projeto, &plan.obra)
            .await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
