// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! MedAdvisor CLI
//!
//! Answers a medication question against Neo4j (or a replay fixture) and
//! prints the retrieved facts as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medadvisor_core::{ConversationContext, EngineConfig, EntityKind};
use medadvisor_query::{
    MedAdvisor, Neo4jHttpStore, ReplayFixture, ReplayGraphStore, TemplateLibrary,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "medadvisor")]
#[command(about = "Grounded medication facts for patient questions", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "MEDADVISOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct QuestionArgs {
    /// The patient's question
    question: String,

    /// Patient the question is about (e.g. P001)
    #[arg(long)]
    patient: Option<String>,

    /// Answer from a replay fixture instead of Neo4j
    #[arg(long, env = "MEDADVISOR_FIXTURE")]
    fixture: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question and print the facts
    Ask(QuestionArgs),

    /// Show the bound query for a question without running it
    Explain(QuestionArgs),

    /// List the query templates
    Templates,
}

#[derive(Serialize)]
struct TemplateSummary<'a> {
    id: &'a str,
    version: u32,
    intent: String,
    slots: Vec<String>,
    columns: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medadvisor=info,medadvisor_query=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = EngineConfig::load(cli.config).context("Failed to load configuration")?;

    match cli.command {
        Commands::Templates => {
            let templates = TemplateLibrary::builtin()?.templates();
            let summaries: Vec<_> = templates
                .iter()
                .map(|t| TemplateSummary {
                    id: &t.id,
                    version: t.version,
                    intent: t.intent.to_string(),
                    slots: t
                        .slots
                        .iter()
                        .map(|s| {
                            let marker = if s.required { "" } else { "?" };
                            format!("{}{} -> ${}", s.name, marker, s.param)
                        })
                        .collect(),
                    columns: t.column_names(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        Commands::Ask(args) => {
            let advisor = build_engine(&config, args.fixture.as_ref())?;
            let context = args.patient.map(ConversationContext::for_patient);

            match advisor.answer_facts(&args.question, context.as_ref()).await {
                Ok(answer) => println!("{}", serde_json::to_string_pretty(&answer)?),
                Err(e) if e.is_recoverable() => {
                    eprintln!("Could not answer ({:?}): {}", e.kind(), e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e).context("Query failed"),
            }
        }
        Commands::Explain(args) => {
            let advisor = build_engine(&config, args.fixture.as_ref())?;
            let context = args.patient.map(ConversationContext::for_patient);
            let plan = advisor.plan(&args.question, context.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
    }

    Ok(())
}

fn build_engine(config: &EngineConfig, fixture: Option<&PathBuf>) -> Result<MedAdvisor> {
    let builder = MedAdvisor::builder(config.clone());

    let advisor = match fixture {
        Some(path) => {
            let fixture = ReplayFixture::from_path(path)?;
            let catalog = fixture.catalog();
            let store = Arc::new(ReplayGraphStore::new(&fixture));
            tracing::info!(path = %path.display(), entities = catalog.len(), "Using replay fixture");

            builder
                .store(store.clone())
                .version_source(store)
                .vocabulary(
                    catalog.names(EntityKind::Medication),
                    catalog.names(EntityKind::Diagnosis),
                )
                .entity_resolver(Arc::new(catalog))
                .build()?
        }
        None => {
            let store = Arc::new(Neo4jHttpStore::new(&config.neo4j)?);
            tracing::info!(endpoint = store.endpoint(), "Using Neo4j");

            builder.store(store.clone()).version_source(store).build()?
        }
    };

    Ok(advisor)
}
