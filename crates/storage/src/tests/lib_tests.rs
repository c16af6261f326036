use super::*;
use planning::reclassify;

async fn mem() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

fn new_user(login: &str, profiles: Vec<ProfileId>, units: Vec<UnitId>) -> NewUser {
    NewUser {
        nome: format!("User {login}"),
        login: login.to_string(),
        email: format!("{login}@example.org"),
        is_approver: false,
        is_requester: true,
        profiles,
        units,
    }
}

async fn seed_request(storage: &Storage) -> RequestId {
    let unit = storage.create_unit("Unidade Centro", "UC").await.expect("unit");
    let tipologia = storage.create_tipologia("Escola").await.expect("tipologia");
    let tipo_local = storage.create_tipo_local("Sala de aula").await.expect("tipo local");
    let (request_id, _) = storage
        .create_request(&NewRequest {
            unit_id: unit,
            tipologia_id: tipologia,
            tipo_local_id: tipo_local,
            category: InvestmentCategory::MediaComplexidade,
            titulo: "Reforma do telhado".into(),
            descricao: "Troca completa da cobertura".into(),
            projeto: PhasePlan {
                start: chrono::NaiveDate::from_ymd_opt(2025, 1, 1),
                duration_months: 3,
                value: Money(250_000),
            },
            obra: PhasePlan::cleared(),
            created_at: None,
        })
        .await
        .expect("request");
    request_id
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    mem().await.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("portal_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("portal.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn unit_upsert_is_idempotent_by_name() {
    let storage = mem().await;
    let first = storage.create_unit("Unidade Norte", "UN").await.expect("unit");
    let second = storage.create_unit("Unidade Norte", "UNO").await.expect("unit");
    assert_eq!(first, second);

    let units = storage.list_units().await.expect("units");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].sigla, "UNO");
}

#[tokio::test]
async fn profile_permissions_round_trip_as_string_list() {
    let storage = mem().await;
    let permissions = vec!["abrir_solicitacao".to_string(), "aprovar".to_string()];
    storage
        .create_profile("Gestor", "gestao", &permissions)
        .await
        .expect("profile");

    let profiles = storage.list_profiles().await.expect("profiles");
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].category, "gestao");
    assert_eq!(profiles[0].permissions, permissions);
}

#[tokio::test]
async fn user_links_profiles_and_units() {
    let storage = mem().await;
    let profile = storage
        .create_profile("Solicitante", "operacao", &[])
        .await
        .expect("profile");
    let unit = storage.create_unit("Unidade Sul", "US").await.expect("unit");

    let user_id = storage
        .create_user(&new_user("maria.silva", vec![profile], vec![unit]))
        .await
        .expect("user");

    let user = storage
        .get_user(user_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(user.profiles, vec![profile]);
    assert_eq!(user.units, vec![unit]);
    assert!(user.is_requester);
}

#[tokio::test]
async fn user_upsert_is_idempotent_by_login() {
    let storage = mem().await;
    let old_profile = storage.create_profile("Antigo", "", &[]).await.expect("p1");
    let new_profile = storage.create_profile("Novo", "", &[]).await.expect("p2");

    let first = storage
        .create_user(&new_user("maria.silva", vec![old_profile], vec![]))
        .await
        .expect("first pass");
    let second = storage
        .create_user(&new_user("maria.silva", vec![new_profile], vec![]))
        .await
        .expect("second pass");
    assert_eq!(first, second);

    let users = storage.list_users().await.expect("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].profiles, vec![new_profile]);
}

#[tokio::test]
async fn user_update_replaces_link_tables() {
    let storage = mem().await;
    let old_profile = storage.create_profile("Antigo", "", &[]).await.expect("p1");
    let new_profile = storage.create_profile("Novo", "", &[]).await.expect("p2");
    let unit = storage.create_unit("Unidade Leste", "UL").await.expect("unit");

    let user_id = storage
        .create_user(&new_user("joao.souza", vec![old_profile], vec![]))
        .await
        .expect("user");

    let updated = storage
        .update_user(
            user_id,
            &UserUpdate {
                nome: "João Souza".into(),
                email: "joao.souza@example.org".into(),
                is_approver: true,
                is_requester: false,
                profiles: vec![new_profile],
                units: vec![unit],
            },
        )
        .await
        .expect("update");
    assert!(updated);

    let user = storage
        .get_user(user_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(user.profiles, vec![new_profile]);
    assert_eq!(user.units, vec![unit]);
    assert!(user.is_approver);
    assert!(!user.is_requester);
}

#[tokio::test]
async fn updating_missing_user_reports_false() {
    let storage = mem().await;
    let updated = storage
        .update_user(
            UserId(999),
            &UserUpdate {
                nome: "Ninguém".into(),
                email: String::new(),
                is_approver: false,
                is_requester: false,
                profiles: vec![],
                units: vec![],
            },
        )
        .await
        .expect("update");
    assert!(!updated);
}

#[tokio::test]
async fn finds_user_by_login() {
    let storage = mem().await;
    storage
        .create_user(&new_user("ana.santos", vec![], vec![]))
        .await
        .expect("user");

    let found = storage
        .find_user_by_login("ana.santos")
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(found.login, "ana.santos");

    let missing = storage
        .find_user_by_login("nao.existe")
        .await
        .expect("find");
    assert!(missing.is_none());
}

#[tokio::test]
async fn tipologia_status_toggle_filters_active_listing() {
    let storage = mem().await;
    let escola = storage.create_tipologia("Escola").await.expect("t1");
    storage.create_tipologia("Ginásio").await.expect("t2");

    storage
        .set_tipologia_status(escola, RecordStatus::Inativo)
        .await
        .expect("toggle");

    let all = storage.list_tipologias(false).await.expect("all");
    assert_eq!(all.len(), 2);

    let active = storage.list_tipologias(true).await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].nome, "Ginásio");
}

#[tokio::test]
async fn tipo_local_rename_and_toggle() {
    let storage = mem().await;
    let id = storage.create_tipo_local("Laboratorio").await.expect("tl");
    assert!(storage
        .rename_tipo_local(id, "Laboratório")
        .await
        .expect("rename"));
    assert!(storage
        .set_tipo_local_status(id, RecordStatus::Inativo)
        .await
        .expect("toggle"));

    let all = storage.list_tipo_locais(false).await.expect("all");
    assert_eq!(all[0].nome, "Laboratório");
    assert_eq!(all[0].status, RecordStatus::Inativo);
}

#[tokio::test]
async fn request_round_trips_phases_and_codigo() {
    let storage = mem().await;
    let request_id = seed_request(&storage).await;

    let request = storage
        .get_request(request_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.titulo, "Reforma do telhado");
    assert_eq!(request.status, RequestStatus::Aberta);
    assert_eq!(request.projeto.duration_months, 3);
    assert_eq!(request.projeto.value, Money(250_000));
    assert_eq!(
        request.projeto.start,
        chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
    );
    assert!(request.obra.is_empty());
    assert!(!request.codigo.is_nil());
}

#[tokio::test]
async fn request_keeps_supplied_creation_timestamp() {
    let storage = mem().await;
    let unit = storage.create_unit("Unidade Centro", "UC").await.expect("unit");
    let tipologia = storage.create_tipologia("Escola").await.expect("tipologia");
    let tipo_local = storage.create_tipo_local("Quadra").await.expect("tipo local");

    let criado_em = chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
        .expect("date")
        .and_hms_opt(13, 45, 0)
        .expect("time");
    let (request_id, _) = storage
        .create_request(&NewRequest {
            unit_id: unit,
            tipologia_id: tipologia,
            tipo_local_id: tipo_local,
            category: InvestmentCategory::MediaComplexidade,
            titulo: "Registro migrado".into(),
            descricao: String::new(),
            projeto: PhasePlan::cleared(),
            obra: PhasePlan::cleared(),
            created_at: Some(criado_em),
        })
        .await
        .expect("request");

    let request = storage
        .get_request(request_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.created_at.naive_utc(), criado_em);
}

#[tokio::test]
async fn paginates_requests_newest_first() {
    let storage = mem().await;
    let first = seed_request(&storage).await;
    let second = seed_request(&storage).await;
    let third = seed_request(&storage).await;

    let newest_two = storage
        .list_requests(None, 2, None)
        .await
        .expect("requests");
    assert_eq!(newest_two.len(), 2);
    assert_eq!(newest_two[0].request_id, third);
    assert_eq!(newest_two[1].request_id, second);

    let older = storage
        .list_requests(None, 2, Some(second.0))
        .await
        .expect("requests");
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].request_id, first);
}

#[tokio::test]
async fn filters_requests_by_status_bucket() {
    let storage = mem().await;
    let first = seed_request(&storage).await;
    let second = seed_request(&storage).await;

    assert!(storage
        .set_request_status(first, RequestStatus::Aprovada)
        .await
        .expect("move"));

    let approved = storage
        .list_requests(Some(RequestStatus::Aprovada), 10, None)
        .await
        .expect("approved");
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].request_id, first);

    let open = storage
        .list_requests(Some(RequestStatus::Aberta), 10, None)
        .await
        .expect("open");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].request_id, second);
}

#[tokio::test]
async fn observacao_partial_update_only_touches_observacao() {
    let storage = mem().await;
    let request_id = seed_request(&storage).await;

    assert!(storage
        .update_observacao(request_id, Some("Aguardando vistoria"))
        .await
        .expect("update"));

    let request = storage
        .get_request(request_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(request.observacao.as_deref(), Some("Aguardando vistoria"));
    assert_eq!(request.titulo, "Reforma do telhado");
    assert_eq!(request.projeto.value, Money(250_000));
}

#[tokio::test]
async fn reclassification_persists_through_planning_store() {
    let storage = mem().await;
    let request_id = seed_request(&storage).await;

    let request = storage
        .get_request(request_id)
        .await
        .expect("get")
        .expect("exists");
    let plan = reclassify(&request, InvestmentCategory::BaixaComplexidade);
    assert!(storage
        .save_reclassified(request_id, &plan)
        .await
        .expect("save"));

    let reloaded = storage
        .get_request(request_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(reloaded.category, InvestmentCategory::BaixaComplexidade);
    assert!(reloaded.projeto.is_empty());

    let (category, projeto, _obra) = storage
        .load_phase_plans(request_id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(category, InvestmentCategory::BaixaComplexidade);
    assert!(projeto.is_empty());
}
