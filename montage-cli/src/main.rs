mod cache;
mod ui;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use cache::{CachedMedia, MediaCache};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use indicatif::{MultiProgress, ProgressBar};
use montage_core::{
    BatchContext, BatchStatus, ClientConfig, MediaRecord, MediaStore, MongoStore, TaskId,
    TaskPhase, Uploader,
};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use ui::*;

#[derive(Parser)]
#[command(name = "montage")]
#[command(about = "Collaborative slideshow media uploader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload media files into a project chapter
    Upload {
        /// Files to upload
        paths: Vec<PathBuf>,
        #[arg(long, env = "MONTAGE_PROJECT")]
        project: String,
        #[arg(long, env = "MONTAGE_EMAIL")]
        email: Option<String>,
        #[arg(long)]
        chapter: Option<String>,
        /// Chapter style payload as a JSON object
        #[arg(long)]
        style: Option<String>,
        #[arg(
            long,
            env = "MONTAGE_ENDPOINT",
            default_value = "http://127.0.0.1:8787/upload"
        )]
        endpoint: String,
    },
    /// List a project's uploaded media
    List {
        #[arg(long)]
        project: String,
        #[arg(long, env = "MONGO_URI")]
        mongo_uri: Option<String>,
    },
    /// Delete one media record by id
    Delete {
        id: String,
        #[arg(long, env = "MONGO_URI")]
        mongo_uri: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Cli::parse();
    print_banner();

    match args.command {
        Commands::Upload {
            paths,
            project,
            email,
            chapter,
            style,
            endpoint,
        } => upload(paths, project, email, chapter, style, endpoint).await,
        Commands::List { project, mongo_uri } => list(project, mongo_uri).await,
        Commands::Delete { id, mongo_uri } => delete(id, mongo_uri).await,
    }
}

// =======================================================================
// Upload
// =======================================================================

async fn upload(
    paths: Vec<PathBuf>,
    project: String,
    email: Option<String>,
    chapter: Option<String>,
    style: Option<String>,
    endpoint: String,
) -> anyhow::Result<()> {
    if paths.is_empty() {
        print_error("no files given");
        return Ok(());
    }
    let style = style
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("--style must be a JSON object")?;

    let uploader = Uploader::new(ClientConfig::new(endpoint)).context("invalid endpoint")?;

    let (accepted, rejections) = uploader.validate_paths(&paths);
    for rejection in &rejections {
        print_error(&format!("{}: {}", rejection.file_name, rejection.reason));
    }
    if accepted.is_empty() {
        print_error("no valid files to upload");
        return Ok(());
    }

    println!(
        "🚀 Uploading {} file(s) to project {}",
        accepted.len().to_string().cyan(),
        project.cyan()
    );

    let (tx, mut rx) = mpsc::channel(256);
    let ctx = BatchContext {
        project_id: project.clone(),
        user_email: email,
        chapter: chapter.clone(),
        chapter_style: style,
    };
    let mut handle = uploader.start_batch(accepted, ctx, Some(tx));

    let names: HashMap<TaskId, String> = handle
        .tasks()
        .iter()
        .map(|t| (t.id.clone(), t.file_name.clone()))
        .collect();

    let mp = MultiProgress::new();
    let mut bars: HashMap<TaskId, ProgressBar> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event.phase {
            TaskPhase::Started { total_bytes } => {
                let name = names.get(&event.task).cloned().unwrap_or_default();
                bars.insert(event.task.clone(), create_task_bar(&mp, &name, total_bytes));
            }
            TaskPhase::Progress(update) => {
                if let Some(bar) = bars.get(&event.task) {
                    bar.set_position(update.bytes_sent);
                }
            }
            TaskPhase::Completed(_) => {
                if let Some(bar) = bars.remove(&event.task) {
                    bar.finish_with_message("done");
                }
            }
            TaskPhase::Failed { error, .. } => {
                if let Some(bar) = bars.remove(&event.task) {
                    bar.abandon_with_message(error.chars().take(48).collect::<String>());
                }
            }
        }
    }

    let outcome = handle.join().await?;

    println!();
    for success in &outcome.successes {
        if let Some(file) = success.outcome.files.first() {
            print_success(&format!("{} → {}", success.task.file_name, file.url));
        }
    }
    for failure in &outcome.failures {
        print_error(&format!("{}: {}", failure.task.file_name, failure.error));
    }
    match outcome.status {
        BatchStatus::Completed => print_success(&format!(
            "{} of {} uploads completed",
            outcome.successes.len(),
            outcome.successes.len() + outcome.failures.len()
        )),
        BatchStatus::Error => print_error("no uploads completed"),
        _ => {}
    }

    if let Some(media_cache) = MediaCache::open() {
        let entries: Vec<CachedMedia> = outcome
            .successes
            .iter()
            .flat_map(|success| {
                let task = &success.task;
                let chapter = chapter.clone();
                success.outcome.files.iter().map(move |file| CachedMedia {
                    file_name: file
                        .original_name
                        .clone()
                        .unwrap_or_else(|| task.file_name.clone()),
                    url: file.url.clone(),
                    file_type: file.file_type.clone().unwrap_or_else(|| "video".to_string()),
                    file_size: file.file_size.unwrap_or(task.size),
                    chapter: chapter.clone(),
                    record_id: file.record_id.clone(),
                    created_at: chrono::Utc::now(),
                })
            })
            .collect();
        media_cache.append(&project, entries);
    }

    Ok(())
}

// =======================================================================
// List / Delete
// =======================================================================

fn record_to_cached(record: &MediaRecord) -> CachedMedia {
    CachedMedia {
        file_name: record.file_name.clone(),
        url: record.cloudinary_url.clone(),
        file_type: record.file_type.as_str().to_string(),
        file_size: record.file_size,
        chapter: record.chapter.clone(),
        record_id: record.id.as_ref().map(|id| id.to_hex()),
        created_at: record.created_at,
    }
}

async fn list(project: String, mongo_uri: Option<String>) -> anyhow::Result<()> {
    let media_cache = MediaCache::open();

    if let Some(uri) = mongo_uri {
        let spinner = create_spinner("Fetching media list...");
        let listing = match MongoStore::new(&uri).await {
            Ok(store) => store.list_project(&project).await,
            Err(err) => Err(err),
        };
        spinner.finish_and_clear();

        match listing {
            Ok(records) => {
                if records.is_empty() {
                    println!("No media in project {}", project);
                    return Ok(());
                }
                let entries: Vec<CachedMedia> = records.iter().map(record_to_cached).collect();
                if let Some(media_cache) = &media_cache {
                    media_cache.store(&project, &entries);
                }
                print_media_table(&entries);
                return Ok(());
            }
            Err(err) => print_error(&format!("store unreachable: {}", err)),
        }
    } else {
        print_error("MONGO_URI not set");
    }

    // Not authoritative, but better than nothing while offline.
    if let Some(media_cache) = &media_cache {
        let entries = media_cache.load(&project);
        if entries.is_empty() {
            println!("No cached media for project {}", project);
        } else {
            println!("{}", "showing cached copy".dimmed());
            print_media_table(&entries);
        }
    }

    Ok(())
}

async fn delete(id: String, mongo_uri: Option<String>) -> anyhow::Result<()> {
    let uri = mongo_uri.context("MONGO_URI must be set")?;
    let store = MongoStore::new(&uri).await?;

    let spinner = create_spinner(&format!("Deleting record {}...", id));
    let result = store.delete(&id).await;
    spinner.finish_and_clear();

    match result {
        Ok(()) => print_success(&format!("Deleted record {}", id)),
        Err(err) => print_error(&format!("Delete failed: {}", err)),
    }

    Ok(())
}
