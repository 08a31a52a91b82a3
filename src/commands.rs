//! CLI Command Handlers
//!
//! Implements all CLI commands by calling the appropriate backend services.
//! Each handler takes CLI args, the loaded config and Output, returns ExitCode.

use std::sync::Arc;

use crate::api::{select_candidate, SourceResolver};
use crate::cli::{
    validate_imdb_id, ConfigCmd, ExitCode, Output, PrepareCmd, PrepareResponse, ProgressLine,
    SourcesCmd, SourcesResponse,
};
use crate::config::Config;
use crate::models::TaskStatus;
use crate::stream::{Engine, SetupEvent, SimulatedDiscovery};

// =============================================================================
// Sources Command
// =============================================================================

pub async fn sources_cmd(cmd: SourcesCmd, config: &Config, output: &Output) -> ExitCode {
    let imdb_id = match validate_imdb_id(&cmd.imdb_id) {
        Ok(id) => id,
        Err(e) => return output.error(e, ExitCode::InvalidArgs),
    };

    let resolver =
        SourceResolver::with_base_urls(&config.sources.yts_url, &config.sources.bay_url);
    output.info(format!("Looking up torrents for {}...", imdb_id));

    let candidates = match resolver.candidates(imdb_id).await {
        Ok(candidates) => candidates,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::NetworkError),
    };
    let selected = select_candidate(candidates.clone());
    let no_seeds = selected.is_none();

    let response = SourcesResponse {
        imdb_id: imdb_id.to_string(),
        candidates,
        selected,
    };
    if let Err(e) = output.print(&response) {
        return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
    }

    if no_seeds {
        return output.error("No torrents with seeders", ExitCode::NoSeeds);
    }
    ExitCode::Success
}

// =============================================================================
// Prepare Command
// =============================================================================

pub async fn prepare_cmd(cmd: PrepareCmd, config: &Config, output: &Output) -> ExitCode {
    let imdb_id = match validate_imdb_id(&cmd.imdb_id) {
        Ok(id) => id.to_string(),
        Err(e) => return output.error(e, ExitCode::InvalidArgs),
    };
    if !cmd.simulate {
        return output.error(
            "No peer-wire backend is bundled; run with --simulate",
            ExitCode::InvalidArgs,
        );
    }

    let mut config = config.clone();
    if let Some(languages) = cmd.languages() {
        config.subtitles.languages = languages;
    }

    let engine = Engine::from_config(&config, Arc::new(SimulatedDiscovery::default()));
    let mut observer = match engine.prepare(&imdb_id) {
        Ok(observer) => observer,
        Err(e) => return output.setup_error(&e),
    };
    output.info(format!("Preparing {}...", imdb_id));

    let code = loop {
        let event = tokio::select! {
            event = observer.next() => event,
            _ = tokio::signal::ctrl_c() => {
                engine.cancel_setup(&imdb_id);
                break output.error("Interrupted", ExitCode::Error);
            }
        };

        match event {
            Some(SetupEvent::Task(task)) => {
                if output.json {
                    if let Err(e) = output.print_line(&ProgressLine::Task(task)) {
                        break output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
                    }
                } else {
                    let mark = match task.status {
                        TaskStatus::Done => "✓",
                        TaskStatus::Error => "✗",
                    };
                    output.info(format!("  {} {}", mark, task.task));
                }
            }
            Some(SetupEvent::MovieHash(hash)) => {
                if output.json {
                    let line = ProgressLine::MovieHash {
                        hash: hash.to_string(),
                    };
                    if let Err(e) = output.print_line(&line) {
                        break output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
                    }
                } else {
                    output.info(format!("  # moviehash {}", hash));
                }
            }
            Some(SetupEvent::Subtitles(subtitles)) => {
                if output.json {
                    if let Err(e) = output.print_line(&ProgressLine::Subtitles { subtitles }) {
                        break output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
                    }
                } else {
                    output.info(format!("  # subtitles {}", subtitles.join(", ")));
                }
            }
            Some(SetupEvent::Ready(movie)) => {
                let response = PrepareResponse {
                    status: "ready",
                    movie,
                };
                break match output.print(&response) {
                    Ok(()) => ExitCode::Success,
                    Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
                };
            }
            Some(SetupEvent::Failed(err)) => break output.setup_error(&err),
            None => break output.error("Setup ended without an outcome", ExitCode::Error),
        }
    };

    engine.shutdown();
    code
}

// =============================================================================
// Config Command
// =============================================================================

pub fn config_cmd(cmd: ConfigCmd, config: &Config, output: &Output) -> ExitCode {
    if cmd.path {
        return match Config::path() {
            Some(path) => {
                println!("{}", path.display());
                ExitCode::Success
            }
            None => output.error("Could not determine config path", ExitCode::Error),
        };
    }

    if cmd.init {
        return match config.save() {
            Ok(()) => {
                output.info("Configuration written");
                ExitCode::Success
            }
            Err(e) => output.error(format!("{:#}", e), ExitCode::Error),
        };
    }

    if output.json {
        if let Err(e) = output.print(config) {
            return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
        }
        return ExitCode::Success;
    }

    match toml::to_string_pretty(config) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::Success
        }
        Err(e) => output.error(format!("Failed to serialize: {}", e), ExitCode::Error),
    }
}
