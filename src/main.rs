use std::time::Duration;

use anyhow::bail;
use queuectl::{Queue, QueueOptions};
use queuectl_shutdown_signal::{cancel_on_shutdown, shutdown_signal};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod cli;
mod logging;

use cli::{CliArgs, Command, ConfigCommand, DlqCommand, WorkerCommand};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("queuectl error: {err:#}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    let queue = open_queue(&args).await?;
    run(queue, args.command).await
}

async fn open_queue(args: &CliArgs) -> anyhow::Result<Queue> {
    let mut options = QueueOptions::default();
    if let Some(db) = &args.db {
        options = options.database_url(db);
    }
    if let Some(state_file) = &args.state_file {
        options = options.state_file(state_file);
    }
    Ok(options.init().await?)
}

async fn run(queue: Queue, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Enqueue { payload } => {
            let id = queue.enqueue(&payload).await?;
            print_json(&json!({ "id": id }))
        }
        Command::Worker { command } => run_worker_command(queue, command).await,
        Command::Status => {
            let summary = queue.summary().await?;
            let workers = queue.supervisor().read_state()?;
            print_json(&json!({ "jobs": summary, "workers": workers }))
        }
        Command::List { state, ready } => {
            let jobs = if ready {
                queue.list_ready().await?
            } else {
                queue.list_jobs(state).await?
            };
            print_json(&jobs)
        }
        Command::Dlq { command } => match command {
            DlqCommand::List => print_json(&queue.dlq_list().await?),
            DlqCommand::Retry { job_id } => {
                if !queue.dlq_retry(&job_id).await? {
                    bail!("job '{job_id}' is not in the dead letter queue");
                }
                print_json(&json!({ "id": job_id, "requeued": true }))
            }
        },
        Command::Config { command } => match command {
            ConfigCommand::Get { key } => {
                let value = queue.config_get(&key).await?;
                print_json(&json!({ "key": queuectl::normalize_key(&key), "value": value }))
            }
            ConfigCommand::Set { key, value } => {
                queue.config_set(&key, &value).await?;
                print_json(&json!({ "key": queuectl::normalize_key(&key), "value": value }))
            }
        },
        Command::Logs { job_id } => print_json(&queue.logs(&job_id).await?),
        Command::Unlock { older_than_secs } => {
            let released = queue
                .unlock_stale(Duration::from_secs(older_than_secs))
                .await?;
            print_json(&json!({ "released": released }))
        }
        Command::Clear => {
            queue.clear().await?;
            print_json(&json!({ "cleared": true }))
        }
    }
}

async fn run_worker_command(queue: Queue, command: WorkerCommand) -> anyhow::Result<()> {
    match command {
        WorkerCommand::Start { count } => {
            if count == 0 {
                bail!("--count must be at least 1");
            }
            let state = queue.start_workers(count)?;
            print_json(&state)
        }
        WorkerCommand::Stop => {
            let signalled = queue.stop_workers()?;
            print_json(&json!({ "signalled": signalled }))
        }
        WorkerCommand::Run { count } => {
            if count == 0 {
                bail!("--count must be at least 1");
            }
            let token = CancellationToken::new();
            let bridge = cancel_on_shutdown(shutdown_signal(), token.clone());

            let pool = queue.start_pool(count, token.clone());
            pool.join().await;

            token.cancel();
            bridge.await?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
