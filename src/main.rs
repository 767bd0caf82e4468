use std::sync::Arc;

use reviewer_job::config::JobConfig;
use reviewer_job::git::GitRepoFactory;
use reviewer_job::process::ShellRunner;
use reviewer_job::scheduler::TaskScheduler;
use reviewer_job::server::{AppState, build_router};
use reviewer_job::store::{DocumentStore, FsDocumentStore};
use reviewer_job::tasks::{CiTask, MetadataTask, SubmitterTask, Task, Workspace};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reviewer_job=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = JobConfig::from_env()?;
    tracing::info!(
        work_dir = %config.work_dir.display(),
        store_dir = %config.store_dir.display(),
        "starting reviewer job"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(FsDocumentStore::open(config.store_dir.clone())?);
    let repos = Arc::new(GitRepoFactory::new(config.identity.clone()));

    let mut tasks: Vec<Arc<dyn Task>> = Vec::new();
    if let Some(repo) = config.metadata_repo.clone() {
        tasks.push(Arc::new(MetadataTask::new(
            Arc::clone(&store),
            Workspace::new(config.metadata_dir(), repos.clone()),
            repo,
        )));
    } else {
        tracing::info!("no metadata repository configured, metadata task disabled");
    }
    tasks.push(Arc::new(CiTask::new(
        Arc::clone(&store),
        Workspace::new(config.ci_dir(), repos.clone()),
        Arc::new(ShellRunner),
    )));
    tasks.push(Arc::new(SubmitterTask::new(
        Arc::clone(&store),
        Workspace::new(config.submitter_dir(), repos),
    )));

    let shutdown = CancellationToken::new();
    let scheduler = TaskScheduler::new(tasks.clone(), config.scheduler.clone());
    let scheduler_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let app = build_router(AppState::new(store, tasks));
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("listening on {}", config.listen_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    scheduler_handle.await?;
    Ok(())
}
