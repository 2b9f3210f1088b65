use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

mod app;
mod cli;
mod config;
mod documents;
mod eid;
mod lock;
mod semantic;
mod store;
#[cfg(test)]
mod tests;
mod web;

use config::Config;
use documents::DocumentCreate;
use semantic::{BatchOptions, BatchOutcome, ProgressObserver};

pub fn parse_list(values: Option<String>) -> Vec<String> {
    values
        .map(|values| documents::split_list(&values))
        .unwrap_or_default()
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    init_logging();

    let base_path = app::base_path()?;
    let config = Config::load_with(&base_path)?;
    let app_mgr = app::App::open(config)?;

    match args.command {
        cli::Command::Daemon {} => web::start_daemon(app_mgr),

        cli::Command::Add {
            word,
            description,
            explanation,
            tags,
            synonyms,
            antonyms,
            remark,
        } => {
            let doc = app_mgr.add(DocumentCreate {
                kind: None,
                word,
                description,
                explanation,
                tags: parse_list(tags),
                synonyms: parse_list(synonyms),
                antonyms: parse_list(antonyms),
                remark,
            })?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }

        cli::Command::Search {
            query,
            mode,
            limit,
            threshold,
        } => {
            if limit == Some(0) {
                bail!("limit must be positive");
            }
            let results = app_mgr.search(mode.mode(), &query, limit, threshold);
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Embed { batch_size, model } => {
            let app_mgr = Arc::new(app_mgr);

            ctrlc::set_handler({
                let app_mgr = app_mgr.clone();
                move || {
                    if app_mgr.cancel_embeddings() {
                        eprintln!("cancelling after the current page...");
                    }
                }
            })?;

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} words (page {msg})")?
                    .progress_chars("#>-"),
            );

            let observer: ProgressObserver = Arc::new({
                let pb = pb.clone();
                move |progress| {
                    pb.set_length(progress.total as u64);
                    pb.set_position(progress.processed as u64);
                    pb.set_message(format!("{}/{}", progress.page, progress.total_pages));
                }
            });

            let report = app_mgr.run_embeddings(BatchOptions { batch_size, model }, Some(observer))?;
            pb.finish_and_clear();

            println!("{}", serde_json::to_string_pretty(&report)?);
            match report.outcome {
                BatchOutcome::Completed | BatchOutcome::Cancelled => Ok(()),
                BatchOutcome::Failed => bail!(
                    "embedding failed after {} of {} words: {}",
                    report.processed,
                    report.total_words,
                    report.error.unwrap_or_default()
                ),
            }
        }

        cli::Command::Reindex {} => {
            let report = app_mgr.reindex_lexical()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        cli::Command::Stats {} => {
            let stats = app_mgr.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}
