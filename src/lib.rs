use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_error::ExtractSpanTrace;
use tracing_error::SpanTrace;

use self::cli::{Cli, Command};
use self::taskmaster::TaskmasterContext;
use self::taskmaster::error::TaskRunError;
use self::taskmaster::payload::TaskmasterPayload;
use self::tes::TesListTasksResponse;
use self::view::{KubePodLogs, project};

pub mod assembly;
pub mod cli;
pub mod config;
pub mod error;
pub mod kubernetes_objects;
pub(crate) mod taskmaster;
pub mod tes;
pub mod view;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to load config.\n{0}")]
    ConfigError(#[from] config::ConfigLoadError),

    #[error("Failed to initialize kubernetes client.\n{0}")]
    KubeClientError(#[from] kube::Error),

    #[error("Failed to load the task document.\n{0}")]
    PayloadError(#[from] taskmaster::payload::PayloadError),

    #[error("Task stopped due to following error:\n{0}")]
    TaskRunError(#[from] TaskRunError),

    #[error("Failed to reassemble tasks from the cluster.\n{0}")]
    AssemblyError(#[from] assembly::AssemblyError),

    #[error("Failed to render the response.\n{0}")]
    RenderError(#[from] serde_json::Error),
}

impl ExtractSpanTrace for AppError {
    fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            AppError::TaskRunError(e) => e.span_trace(),
            AppError::AssemblyError(e) => e.span_trace(),
            _ => None,
        }
    }
}

pub async fn app() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = config::Config::new_from_file(&cli.config).await?;

    info!("Config Loaded.");

    let client = kube::Client::try_default().await?;

    info!("Kubernetes Client Initialized.");

    match cli.command {
        Command::Run { payload } => {
            let payload = TaskmasterPayload::load(&payload).await?;
            let context = TaskmasterContext::new(config, payload)?;
            match context.run(client).await {
                // A cancelled task is a settled task, not a failure.
                Err(TaskRunError::Cancelled) => {
                    info!("The task was cancelled. Nothing left to do.")
                }
                result => result?,
            }
        }
        Command::Get { id, view } => {
            let task = assembly::get_task(client.clone(), &config.namespace, &id).await?;
            let logs = KubePodLogs::new(client, &config.namespace);
            let rendered = project(&task, view, &logs).await;
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Command::List {
            page_size,
            page_token,
            view,
        } => {
            let page =
                assembly::list_tasks(client.clone(), &config.namespace, page_size, page_token)
                    .await?;
            let logs = KubePodLogs::new(client, &config.namespace);
            let mut tasks = Vec::with_capacity(page.tasks.len());
            for task in &page.tasks {
                tasks.push(project(task, view, &logs).await);
            }
            let response = TesListTasksResponse {
                tasks,
                next_page_token: page.next_page_token,
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
