use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use music_dashboard_session as lib;
use lib::config::Config;
use lib::fetch::{FetchProgress, PaginatedFetchEngine};
use lib::models::{PlaylistCreationResult, PlaylistSource, TimeRange, TrackSelection};
use lib::session::Session;
use std::collections::HashMap;
use std::path::PathBuf;
use url::Url;

#[derive(Parser)]
#[command(name = "music-dashboard", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the in-memory demo backend instead of the Spotify API
    #[arg(long)]
    demo: bool,

    /// Also write logs to the configured log directory
    #[arg(long)]
    log_to_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate config file and exit
    ConfigValidate,
    /// Log in and list all playlists of the account
    Playlists,
    /// Log in and list top tracks, optionally saving them as a new playlist
    TopTracks {
        /// short_term, medium_term or long_term
        #[arg(long, default_value = "medium_term")]
        range: TimeRange,
        /// Create a playlist from the fetched tracks
        #[arg(long)]
        create: bool,
        /// Playlist name; defaults to "My Top Tracks"
        #[arg(long)]
        name: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().or_else(Config::default_path);
    let cfg = match path {
        Some(p) if p.exists() => Config::from_path(&p)
            .with_context(|| format!("loading config from {}", p.display()))?,
        Some(p) if cli.config.is_some() => {
            return Err(anyhow!("config file {} does not exist", p.display()))
        }
        _ => Config::default(),
    };
    Ok(cfg.with_env_overrides())
}

/// Query fields of a pasted redirect URL.
fn redirect_fields(input: &str) -> Result<HashMap<String, String>> {
    let parsed = Url::parse(input.trim()).map_err(|e| anyhow!("invalid url pasted: {}", e))?;
    Ok(parsed.query_pairs().into_owned().collect())
}

async fn login(session: &Session, demo: bool) -> Result<()> {
    let url = session.begin_authorization()?;
    let fields = if demo {
        // the demo backend accepts any code; echo the state back
        let mut fields = redirect_fields(url.as_str())?;
        fields.retain(|k, _| k == "state");
        fields.insert("code".into(), "demo-code".into());
        fields
    } else {
        println!(
            "Open this URL in your browser and authorize the application:\n\n{}\n",
            url
        );
        println!("After authorizing, copy the full redirect URL and paste it here:");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        redirect_fields(&input)?
    };
    let state = session.complete_authorization(&fields).await?;
    tracing::info!(?state, "logged in");
    Ok(())
}

async fn follow<T: Clone + Send + Sync + 'static>(engine: &PaginatedFetchEngine<T>, what: &str) -> FetchProgress {
    let mut rx = engine.subscribe();
    loop {
        let p = rx.borrow_and_update().clone();
        if !p.running {
            return p;
        }
        println!("... {} {} so far", p.fetched, what);
        if rx.changed().await.is_err() {
            return p;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    let _guard = lib::logging::init(cli.log_to_file.then_some(cfg.log_dir.as_path()))?;

    if let Commands::ConfigValidate = cli.command {
        match cfg.validate() {
            Ok(()) => println!("OK"),
            Err(e) => {
                eprintln!("Config validation failed: {}", e);
                std::process::exit(2);
            }
        }
        return Ok(());
    }

    let session = if cli.demo {
        Session::demo(&cfg)
    } else {
        cfg.validate().context("invalid configuration")?;
        Session::spotify(&cfg)?
    };
    login(&session, cli.demo).await?;

    match cli.command {
        Commands::ConfigValidate => {}
        Commands::Playlists => {
            session.refresh_playlists();
            let done = follow(session.playlists(), "playlists").await;
            if let Some(e) = session.playlists().take_error() {
                eprintln!("Fetching playlists stopped early: {}", e);
            }
            for pl in session.playlists().result() {
                println!("- {} ({} tracks) {}", pl.name, pl.track_count, pl.url);
            }
            println!("{} playlists, complete: {}", done.fetched, done.done);
        }
        Commands::TopTracks { range, create, name } => {
            session.load_top_tracks(range);
            follow(session.top_tracks(), "tracks").await;
            if let Some(e) = session.top_tracks().take_error() {
                return Err(anyhow!("fetching top tracks failed: {}", e));
            }
            let tracks = session.top_tracks().result();
            for (i, t) in tracks.iter().enumerate() {
                println!("{:>3}. {} - {}", i + 1, t.artists.join(", "), t.name);
            }
            if create {
                let selection = TrackSelection::from_tracks(&tracks);
                let result = session
                    .create_playlist_today(&selection, name.as_deref(), PlaylistSource::TopTracks)
                    .await;
                match result {
                    PlaylistCreationResult::Created { url, .. } => {
                        println!("Playlist created: {}", url)
                    }
                    PlaylistCreationResult::CreatedTracksFailed { url, reason, .. } => {
                        println!("Playlist created but tracks could not be added ({}): {}", reason, url)
                    }
                    PlaylistCreationResult::Failed { reason } => {
                        return Err(anyhow!("playlist creation failed: {}", reason));
                    }
                }
            }
        }
    }
    Ok(())
}
