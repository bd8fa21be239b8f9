use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use rollout_common::upgrade::{
    create_sequence, ClusterTopology, Direction, UpgradeContext, UpgradeGroupHolder, UpgradePack,
};
use rollout_common::{
    AbortResponse, AgentInfo, Request, RequestStatusSummary, Stage, SubmitUpgradeRequest,
    SubmitUpgradeResponse,
};
use serde::de::DeserializeOwned;
use std::env;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Igual que en el worker:
/// - En Docker: MASTER_URL=http://master:8080
/// - Local: default http://localhost:8080
fn master_base_url() -> String {
    env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "CLI para compilar planes de upgrade y hablar con el master")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compila el plan localmente y lo muestra, sin enviarlo
    Plan {
        #[arg(value_name = "PACK_JSON")]
        pack: PathBuf,
        #[arg(value_name = "TOPOLOGY_JSON")]
        topology: PathBuf,
        #[arg(long)]
        downgrade: bool,
    },
    /// Envía un upgrade (o downgrade) al master
    Submit {
        #[arg(value_name = "PACK_JSON")]
        pack: PathBuf,
        #[arg(value_name = "TOPOLOGY_JSON")]
        topology: PathBuf,
        #[arg(long)]
        downgrade: bool,
    },
    /// Lista los requests conocidos
    Requests,
    /// Estado agregado de un request
    Status {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
    },
    /// Stages de un request con el estado de cada comando
    Stages {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
    },
    /// Aborta todo lo pendiente de un request
    Abort {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
    },
    /// Confirma un stage manual
    Confirm {
        #[arg(value_name = "REQUEST_ID")]
        id: i64,
        #[arg(value_name = "STAGE_ID")]
        stage: i64,
    },
    /// Agentes registrados
    Agents,
}

fn direction(downgrade: bool) -> Direction {
    if downgrade {
        Direction::Downgrade
    } else {
        Direction::Upgrade
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("JSON inválido en {}", path.display()))
}

async fn json_or_error<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("el master respondió {}: {}", status, body);
    }
    Ok(resp.json().await?)
}

fn render_plan(groups: &[UpgradeGroupHolder]) -> String {
    let mut out = String::new();
    let mut n = 0;
    for group in groups {
        let flags = match (group.skippable, group.allow_retry) {
            (true, true) => " [skippable, retry]",
            (true, false) => " [skippable]",
            (false, true) => " [retry]",
            (false, false) => "",
        };
        let _ = writeln!(out, "{} ({}){}", group.title, group.name, flags);
        for item in &group.items {
            n += 1;
            let _ = writeln!(out, "  {:>3}. {:?}: {}", n, item.stage_type, item.text);
        }
    }
    out
}

fn render_stage(stage: &Stage) -> String {
    let mut out = format!(
        "stage {}: {}\n",
        stage.stage_id().map_or("?".to_string(), |id| id.to_string()),
        stage.request_context
    );
    for cmd in stage.commands() {
        let _ = writeln!(out, "    {:<24} {:<12} {}", cmd.role, cmd.host, cmd.status);
    }
    out
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = master_base_url();

    match cli.command {
        Commands::Plan {
            pack,
            topology,
            downgrade,
        } => {
            let pack: UpgradePack = load_json(&pack)?;
            let topology: ClusterTopology = load_json(&topology)?;
            let ctx = UpgradeContext::new(&pack, topology, direction(downgrade))?;
            let groups = create_sequence(&pack, &ctx)?;
            print!("{}", render_plan(&groups));
        }
        Commands::Submit {
            pack,
            topology,
            downgrade,
        } => {
            let url = format!("{}/api/v1/requests", base_url);
            let req = SubmitUpgradeRequest {
                pack: load_json(&pack)?,
                topology: load_json(&topology)?,
                direction: direction(downgrade),
            };

            let resp = client.post(&url).json(&req).send().await?;
            let submitted: SubmitUpgradeResponse = json_or_error(resp).await?;

            println!("Request creado:");
            println!("  id: {}", submitted.request_id);
            println!("  stages: {}", submitted.stage_count);
            println!("  grupos: {}", submitted.groups.join(", "));
        }
        Commands::Requests => {
            let url = format!("{}/api/v1/requests", base_url);
            let requests: Vec<Request> = json_or_error(client.get(&url).send().await?).await?;
            if requests.is_empty() {
                println!("No hay requests.");
            }
            for r in requests {
                println!("{:>5}  {:<12} {}", r.request_id, r.status, r.context);
            }
        }
        Commands::Status { id } => {
            let url = format!("{}/api/v1/requests/{id}", base_url);
            let summary: RequestStatusSummary = json_or_error(client.get(&url).send().await?).await?;

            println!("Request {}:", summary.request_id);
            println!("  estado: {}", summary.status);
            println!("  progreso: {:.1}%", summary.progress_percent);
            println!(
                "  comandos: {} total, {} completados, {} fallidos, {} timeout, {} abortados, {} en curso",
                summary.total,
                summary.completed,
                summary.failed,
                summary.timed_out,
                summary.aborted,
                summary.in_progress
            );
        }
        Commands::Stages { id } => {
            let url = format!("{}/api/v1/requests/{id}/stages", base_url);
            let stages: Vec<Stage> = json_or_error(client.get(&url).send().await?).await?;
            for stage in &stages {
                print!("{}", render_stage(stage));
            }
        }
        Commands::Abort { id } => {
            let url = format!("{}/api/v1/requests/{id}/abort", base_url);
            let resp: AbortResponse = json_or_error(client.post(&url).send().await?).await?;
            println!("Request {} abortado: {}", resp.request_id, resp.aborted);
        }
        Commands::Confirm { id, stage } => {
            let url = format!("{}/api/v1/requests/{id}/stages/{stage}/confirm", base_url);
            let confirmed: Stage = json_or_error(client.post(&url).send().await?).await?;
            print!("{}", render_stage(&confirmed));
        }
        Commands::Agents => {
            let url = format!("{}/api/v1/agents", base_url);
            let agents: Vec<AgentInfo> = json_or_error(client.get(&url).send().await?).await?;

            if agents.is_empty() {
                println!("No hay agentes registrados.");
            }
            for a in agents {
                println!(
                    "{} ({}) último heartbeat hace {}s{}, {} comandos, {} reportes",
                    a.hostname,
                    a.agent_id,
                    a.last_heartbeat_secs_ago,
                    if a.lost { " [perdido]" } else { "" },
                    a.commands_dispatched,
                    a.reports_received
                );
            }
        }
    }

    Ok(())
}
