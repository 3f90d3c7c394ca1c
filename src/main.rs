//! Console front end for the coaching core.
//!
//! Reads one turn per line from stdin. Plain lines are chat turns (or
//! answers to the active flow); slash commands drive flows directly:
//!
//! - `/start <kind>` - start or resume `onboarding`, `weekly_plan`, `check_in`
//! - `/status <kind>` - show the latest instance of a kind
//! - `/skip <kind>` - skip the current step
//! - `/chat <text>` - free chat, bypassing any active flow
//! - `/quit`

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use coach_core::adapters::postgres::apply_schema;
use coach_core::adapters::{
    AnthropicConfig, AnthropicProvider, InMemoryConversationRepository, InMemoryFlowRepository,
    OpenAIConfig, OpenAIProvider, PostgresConversationRepository, PostgresFlowRepository,
};
use coach_core::application::{
    CoreError, FlowEngine, Orchestrator, ProviderRouter, TurnNotice, TurnOutcome,
};
use coach_core::config::{AiConfig, AiProvider, AppConfig, DatabaseConfig, LoggingConfig};
use coach_core::domain::flow::{FlowCatalog, FlowKind, FlowView, RawInput};
use coach_core::domain::foundation::{ConversationId, UserId};
use coach_core::domain::skills::SkillRegistry;
use coach_core::ports::{ConversationRepository, FlowRepository, ProviderAdapter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.logging)?;

    let orchestrator = build_orchestrator(&config).await?;

    let user = UserId::new(std::env::var("COACH_USER").unwrap_or_else(|_| "local-user".into()))?;
    let conversation = ConversationId::new();

    eprintln!("coach-core v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Commands: /start <kind>, /status <kind>, /skip <kind>, /chat <text>, /quit\n");

    if orchestrator.flow_status(&user, FlowKind::Onboarding).await?.is_none() {
        let outcome = orchestrator
            .start_flow(&user, conversation, FlowKind::Onboarding)
            .await?;
        render(&outcome);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let result = match Command::parse(line) {
            Ok(command) => run(&orchestrator, &user, conversation, command).await,
            Err(usage) => {
                eprintln!("{usage}");
                continue;
            }
        };
        if let Err(e) = result {
            eprintln!("! {} ({})", e, e.code());
        }
    }

    info!("session closed");
    Ok(())
}

enum Command<'a> {
    Turn(&'a str),
    Chat(&'a str),
    Start(FlowKind),
    Status(FlowKind),
    Skip(FlowKind),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Result<Self, String> {
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Command::Turn(line));
        };
        let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim();
        let kind = || {
            arg.parse::<FlowKind>()
                .map_err(|_| format!("unknown flow kind '{arg}'; try onboarding, weekly_plan, check_in"))
        };
        match name {
            "start" => Ok(Command::Start(kind()?)),
            "status" => Ok(Command::Status(kind()?)),
            "skip" => Ok(Command::Skip(kind()?)),
            "chat" if !arg.is_empty() => Ok(Command::Chat(arg)),
            _ => Err(format!("unknown command '/{name}'")),
        }
    }
}

async fn run(
    orchestrator: &Orchestrator,
    user: &UserId,
    conversation: ConversationId,
    command: Command<'_>,
) -> Result<(), CoreError> {
    match command {
        Command::Turn(text) => {
            let outcome = orchestrator
                .handle_turn(user, conversation, RawInput::from(text), None)
                .await?;
            render(&outcome);
        }
        Command::Chat(text) => render(&orchestrator.chat_turn(user, conversation, text).await?),
        Command::Start(kind) => render(&orchestrator.start_flow(user, conversation, kind).await?),
        Command::Skip(kind) => render(&orchestrator.skip_step(user, conversation, kind).await?),
        Command::Status(kind) => match orchestrator.flow_status(user, kind).await? {
            Some(view) => render_status(&view),
            None => println!("No {kind} yet."),
        },
    }
    Ok(())
}

fn render(outcome: &TurnOutcome) {
    if let Some(reply) = outcome.reply() {
        println!("{}\n", reply.content());
    }
    for notice in &outcome.notices {
        match notice {
            TurnNotice::Degraded { reason } => eprintln!("   (offline reply: {reason})"),
            TurnNotice::SkillError { skill, reason } => eprintln!("   ({skill} failed: {reason})"),
            TurnNotice::Internal { code } => eprintln!("   (internal error: {code})"),
            TurnNotice::ValidationError { .. } => {}
        }
    }
}

fn render_status(view: &FlowView) {
    println!(
        "{} {}: step {} ({}%), version {}",
        view.kind, view.status, view.current_step, view.progress_percent, view.version
    );
    if let Some(skill) = &view.pending_skill {
        println!("   waiting on {skill}");
    }
}

async fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, BoxError> {
    let adapters = build_providers(&config.ai)?;
    if adapters.is_empty() {
        warn!("no AI provider configured; replies come from the local fallback");
    }
    let router = ProviderRouter::new(adapters, config.ai.router_config());
    info!(providers = ?router.provider_names(), "provider router ready");

    let (flows, conversations) = build_repositories(&config.database).await?;

    let catalog = config.flows.apply(FlowCatalog::builtin()?);
    let engine = FlowEngine::new(flows, Arc::new(catalog)).with_max_idle(config.flows.max_idle());
    let skills = SkillRegistry::with_builtin()?;

    Ok(
        Orchestrator::new(engine, conversations, Arc::new(router), Arc::new(skills))
            .with_prompts(config.chat.prompt_builder())
            .with_options(config.ai.completion_options()),
    )
}

fn build_providers(config: &AiConfig) -> Result<Vec<Arc<dyn ProviderAdapter>>, BoxError> {
    let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
    for provider in config.enabled_providers()? {
        let settings = config.settings(provider);
        let Some(key) = settings.api_key().cloned() else {
            continue;
        };
        let adapter: Arc<dyn ProviderAdapter> = match provider {
            AiProvider::OpenAI => {
                let mut cfg = OpenAIConfig::from_secret(key);
                if let Some(model) = &settings.model {
                    cfg = cfg.with_model(model);
                }
                if let Some(url) = &settings.base_url {
                    cfg = cfg.with_base_url(url);
                }
                Arc::new(OpenAIProvider::new(cfg))
            }
            AiProvider::Anthropic => {
                let mut cfg = AnthropicConfig::from_secret(key);
                if let Some(model) = &settings.model {
                    cfg = cfg.with_model(model);
                }
                if let Some(url) = &settings.base_url {
                    cfg = cfg.with_base_url(url);
                }
                Arc::new(AnthropicProvider::new(cfg))
            }
        };
        adapters.push(adapter);
    }
    Ok(adapters)
}

async fn build_repositories(
    config: &DatabaseConfig,
) -> Result<(Arc<dyn FlowRepository>, Arc<dyn ConversationRepository>), BoxError> {
    let Some(url) = config.url() else {
        info!("no database configured; using in-memory storage");
        return Ok((
            Arc::new(InMemoryFlowRepository::new()),
            Arc::new(InMemoryConversationRepository::new()),
        ));
    };

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect(url)
        .await?;
    if config.apply_schema {
        apply_schema(&pool).await?;
    }
    info!("connected to PostgreSQL");

    Ok((
        Arc::new(PostgresFlowRepository::new(pool.clone())),
        Arc::new(PostgresConversationRepository::new(pool)),
    ))
}

/// `RUST_LOG` overrides the configured filter.
fn init_tracing(config: &LoggingConfig) -> Result<(), BoxError> {
    let filter = config.env_filter()?;
    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
