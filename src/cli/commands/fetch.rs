//! One-shot timeline fetch.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use console::style;

use crate::cli::progress::JobSpinner;
use crate::config::Settings;
use crate::job::{JobOptions, JobPipeline, JobResult, JobStatus};

/// Command-line overrides of the configured job defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchOverrides {
    pub limit: Option<usize>,
    pub delay_ms: Option<u64>,
    pub retries: Option<u32>,
}

impl FetchOverrides {
    fn apply(&self, settings: &Settings) -> JobOptions {
        let mut options = JobOptions::from(&settings.defaults);
        if let Some(limit) = self.limit {
            options.posts_limit = limit;
        }
        if let Some(delay) = self.delay_ms {
            options.delay_between_pages = Duration::from_millis(delay);
        }
        if let Some(retries) = self.retries {
            options.max_retries = retries;
        }
        options
    }
}

/// Run one job through the same pipeline the server uses.
pub async fn cmd_fetch(
    settings: &Settings,
    username: &str,
    overrides: FetchOverrides,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let username = username.trim_start_matches('@');
    let options = overrides.apply(settings);
    let pipeline = JobPipeline::from_settings(settings);

    let spinner = JobSpinner::new(username);
    let outcome = pipeline
        .run_with_progress(username, options, &spinner)
        .await;
    spinner.finish();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!(
                "{} @{}: {} ({})",
                style("✗").red(),
                username,
                e,
                e.code()
            );
            return Err(e.into());
        }
    };

    if let Some(path) = output {
        let json = serde_json::to_vec_pretty(&result)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    print_summary(username, &result, settings, output);
    Ok(())
}

fn print_summary(username: &str, result: &JobResult, settings: &Settings, output: Option<&Path>) {
    let marker = match result.status() {
        JobStatus::Complete => style("✓").green(),
        JobStatus::Partial => style("!").yellow(),
        JobStatus::Error => style("✗").red(),
    };
    println!(
        "{} @{}: {}/{} item(s), {}",
        marker,
        username,
        result.metadata.collected,
        result.metadata.requested,
        result.status().as_str()
    );
    if let Some(profile) = &result.profile {
        println!("  {} {}", style("Name:").dim(), profile.name);
    }
    if let Some(stats) = &result.stats {
        println!(
            "  {} {} tweets, {} followers",
            style("Profile:").dim(),
            stats.tweets,
            stats.followers
        );
    }
    if let Some(instance) = &result.metadata.instance {
        println!("  {} {}", style("Instance:").dim(), instance);
    }
    println!(
        "  {} {}",
        style("Attempts:").dim(),
        result.metadata.attempts
    );
    println!(
        "  {} {}",
        style("Saved:").dim(),
        settings.out_dir.join(format!("{}.json", username)).display()
    );
    if let Some(path) = output {
        println!("  {} {}", style("Output:").dim(), path.display());
    }
}
