use std::{collections::HashMap, fs, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use shared::domain::{parse_br_date, parse_br_datetime, InvestmentCategory, Money, PhasePlan};
use storage::{NewRequest, NewUser, Storage};

/// Same phase-duration ceiling the API enforces; fixture rows past it are
/// data errors, not schedules.
const MAX_PHASE_MONTHS: u32 = 600;

#[derive(Parser, Debug)]
#[command(name = "portal-tools")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/portal.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a JSON fixture exported from the legacy spreadsheet. Amounts and
    /// dates stay in their Brazilian formats in the file and are normalized
    /// here, at the boundary.
    Seed {
        #[arg(long)]
        fixture: PathBuf,
    },
    CreateUnit {
        nome: String,
        sigla: String,
    },
    CreateProfile {
        nome: String,
        category: String,
        /// Comma-separated permission names.
        #[arg(long, default_value = "")]
        permissions: String,
    },
}

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    units: Vec<FixtureUnit>,
    #[serde(default)]
    profiles: Vec<FixtureProfile>,
    #[serde(default)]
    users: Vec<FixtureUser>,
    #[serde(default)]
    tipologias: Vec<String>,
    #[serde(default)]
    tipo_locais: Vec<String>,
    #[serde(default)]
    requests: Vec<FixtureRequest>,
}

#[derive(Debug, Deserialize)]
struct FixtureUnit {
    nome: String,
    sigla: String,
}

#[derive(Debug, Deserialize)]
struct FixtureProfile {
    nome: String,
    category: String,
    #[serde(default)]
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureUser {
    nome: String,
    login: String,
    email: String,
    #[serde(default)]
    is_approver: bool,
    #[serde(default)]
    is_requester: bool,
    #[serde(default)]
    profiles: Vec<String>,
    #[serde(default)]
    units: Vec<String>,
}

/// Phase fields exactly as the legacy sheet carries them: `"N/A"` dates and
/// locale-formatted amounts ("R$ 1.234,56", "3,5 mi").
#[derive(Debug, Default, Deserialize)]
struct FixturePhase {
    #[serde(default)]
    inicio: String,
    #[serde(default)]
    duracao_meses: u32,
    #[serde(default)]
    valor: String,
}

#[derive(Debug, Deserialize)]
struct FixtureRequest {
    unit: String,
    tipologia: String,
    tipo_local: String,
    category: String,
    titulo: String,
    #[serde(default)]
    descricao: String,
    #[serde(default)]
    projeto: FixturePhase,
    #[serde(default)]
    obra: FixturePhase,
    /// Legacy creation timestamp, `dd/mm/yyyy` or `dd/mm/yyyy hh:mm`.
    /// Absent or unparseable means "now".
    #[serde(default)]
    criado_em: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::Seed { fixture } => {
            let raw = fs::read_to_string(&fixture)
                .with_context(|| format!("failed to read fixture '{}'", fixture.display()))?;
            let fixture: Fixture =
                serde_json::from_str(&raw).context("fixture is not valid JSON")?;
            seed(&storage, fixture).await?;
        }
        Command::CreateUnit { nome, sigla } => {
            let unit_id = storage.create_unit(&nome, &sigla).await?;
            println!("created unit_id={}", unit_id.0);
        }
        Command::CreateProfile {
            nome,
            category,
            permissions,
        } => {
            let permissions: Vec<String> = permissions
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            let profile_id = storage
                .create_profile(&nome, &category, &permissions)
                .await?;
            println!("created profile_id={}", profile_id.0);
        }
    }

    Ok(())
}

async fn seed(storage: &Storage, fixture: Fixture) -> Result<()> {
    let mut unit_ids = HashMap::new();
    for unit in &fixture.units {
        let id = storage.create_unit(&unit.nome, &unit.sigla).await?;
        unit_ids.insert(unit.nome.clone(), id);
    }
    println!("seeded {} units", unit_ids.len());

    let mut profile_ids = HashMap::new();
    for profile in &fixture.profiles {
        let id = storage
            .create_profile(&profile.nome, &profile.category, &profile.permissions)
            .await?;
        profile_ids.insert(profile.nome.clone(), id);
    }
    println!("seeded {} profiles", profile_ids.len());

    for user in &fixture.users {
        let profiles = user
            .profiles
            .iter()
            .map(|nome| {
                profile_ids
                    .get(nome)
                    .copied()
                    .with_context(|| format!("user '{}' references unknown profile '{nome}'", user.login))
            })
            .collect::<Result<Vec<_>>>()?;
        let units = user
            .units
            .iter()
            .map(|nome| {
                unit_ids
                    .get(nome)
                    .copied()
                    .with_context(|| format!("user '{}' references unknown unit '{nome}'", user.login))
            })
            .collect::<Result<Vec<_>>>()?;
        storage
            .create_user(&NewUser {
                nome: user.nome.clone(),
                login: user.login.clone(),
                email: user.email.clone(),
                is_approver: user.is_approver,
                is_requester: user.is_requester,
                profiles,
                units,
            })
            .await?;
    }
    println!("seeded {} users", fixture.users.len());

    let mut tipologia_ids = HashMap::new();
    for nome in &fixture.tipologias {
        let id = storage.create_tipologia(nome).await?;
        tipologia_ids.insert(nome.clone(), id);
    }
    let mut tipo_local_ids = HashMap::new();
    for nome in &fixture.tipo_locais {
        let id = storage.create_tipo_local(nome).await?;
        tipo_local_ids.insert(nome.clone(), id);
    }
    println!(
        "seeded {} tipologias, {} tipo-locais",
        tipologia_ids.len(),
        tipo_local_ids.len()
    );

    for request in &fixture.requests {
        let Some(unit_id) = unit_ids.get(&request.unit).copied() else {
            bail!("request '{}' references unknown unit '{}'", request.titulo, request.unit);
        };
        let Some(tipologia_id) = tipologia_ids.get(&request.tipologia).copied() else {
            bail!(
                "request '{}' references unknown tipologia '{}'",
                request.titulo,
                request.tipologia
            );
        };
        let Some(tipo_local_id) = tipo_local_ids.get(&request.tipo_local).copied() else {
            bail!(
                "request '{}' references unknown tipo-local '{}'",
                request.titulo,
                request.tipo_local
            );
        };
        if request.projeto.duracao_meses > MAX_PHASE_MONTHS
            || request.obra.duracao_meses > MAX_PHASE_MONTHS
        {
            bail!(
                "request '{}' has a phase longer than {MAX_PHASE_MONTHS} months",
                request.titulo
            );
        }

        storage
            .create_request(&NewRequest {
                unit_id,
                tipologia_id,
                tipo_local_id,
                category: InvestmentCategory::from_str_lossy(&request.category),
                titulo: request.titulo.clone(),
                descricao: request.descricao.clone(),
                projeto: phase_plan(&request.projeto),
                obra: phase_plan(&request.obra),
                created_at: parse_br_datetime(&request.criado_em),
            })
            .await?;
    }
    println!("seeded {} requests", fixture.requests.len());

    Ok(())
}

fn phase_plan(phase: &FixturePhase) -> PhasePlan {
    PhasePlan {
        start: parse_br_date(&phase.inicio),
        duration_months: phase.duracao_meses,
        value: Money::parse_brl(&phase.valor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_phase_normalizes_legacy_formats() {
        let phase = FixturePhase {
            inicio: "01/04/2025".into(),
            duracao_meses: 6,
            valor: "R$ 1.234,56".into(),
        };
        let plan = phase_plan(&phase);
        assert_eq!(
            plan.start,
            chrono::NaiveDate::from_ymd_opt(2025, 4, 1)
        );
        assert_eq!(plan.value, Money(123_456));
    }

    #[test]
    fn sentinel_dates_and_garbage_amounts_become_empty() {
        let phase = FixturePhase {
            inicio: "N/A".into(),
            duracao_meses: 0,
            valor: "a combinar".into(),
        };
        let plan = phase_plan(&phase);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn seed_can_be_re_run_against_an_existing_database() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let raw = r#"{
            "units": [{"nome": "Unidade Centro", "sigla": "UC"}],
            "profiles": [{"nome": "Gestao", "category": "administracao", "permissions": ["cadastros"]}],
            "users": [{
                "nome": "Maria Silva",
                "login": "maria.silva",
                "email": "maria@example.org",
                "is_approver": true,
                "profiles": ["Gestao"],
                "units": ["Unidade Centro"]
            }]
        }"#;

        let first: Fixture = serde_json::from_str(raw).expect("fixture json");
        seed(&storage, first).await.expect("first pass");
        let second: Fixture = serde_json::from_str(raw).expect("fixture json");
        seed(&storage, second).await.expect("second pass");

        let users = storage.list_users().await.expect("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].profiles.len(), 1);
        assert_eq!(users[0].units.len(), 1);
    }

    #[tokio::test]
    async fn seed_links_requests_through_natural_keys() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let fixture: Fixture = serde_json::from_str(
            r#"{
                "units": [{"nome": "Unidade Centro", "sigla": "UC"}],
                "tipologias": ["Escola"],
                "tipo_locais": ["Quadra"],
                "requests": [{
                    "unit": "Unidade Centro",
                    "tipologia": "Escola",
                    "tipo_local": "Quadra",
                    "category": "Média Complexidade",
                    "titulo": "Cobertura da quadra",
                    "projeto": {"inicio": "01/01/2025", "duracao_meses": 3, "valor": "R$ 100,01"},
                    "criado_em": "15/03/2024 13:45"
                }]
            }"#,
        )
        .expect("fixture json");

        seed(&storage, fixture).await.expect("seed");

        let requests = storage
            .list_requests(None, 10, None)
            .await
            .expect("list");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].projeto.value, Money(10_001));
        assert_eq!(requests[0].projeto.duration_months, 3);
        assert_eq!(
            requests[0].created_at.naive_utc(),
            chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
                .expect("date")
                .and_hms_opt(13, 45, 0)
                .expect("time")
        );
    }
}
