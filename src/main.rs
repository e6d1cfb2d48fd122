mod config;
mod db;
mod exercises;
mod lifecycle;
mod monitor;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use config::Config;
use db::Database;
use exercises::ExerciseService;
use lifecycle::{InstanceGuard, LifecycleTracker};
use monitor::MemoryMonitor;
use net::{ApiClient, HttpTransport, NetworkSimulator, NoopStore, ResponseStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "pulselog")]
#[command(about = "A fitness log with a resilient, cached exercise API client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pulselog/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Artificial latency injected before every network attempt (milliseconds)
  #[arg(long)]
  simulate_latency_ms: Option<u64>,

  /// Probability in [0, 1] that a network attempt fails with a simulated error
  #[arg(long)]
  simulate_failure_rate: Option<f64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one page of the exercise catalog
  Exercises {
    #[arg(long, default_value_t = 0)]
    page: u32,

    #[arg(long, default_value_t = 30)]
    page_size: u32,

    /// Bypass the caches and fetch fresh data
    #[arg(long)]
    refresh: bool,
  },

  /// List exercise categories
  Categories {
    /// Bypass the caches and fetch fresh data
    #[arg(long)]
    refresh: bool,
  },

  /// Clear the cached API responses
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },

  /// Manage local workout records
  Workout {
    #[command(subcommand)]
    action: WorkoutAction,
  },

  /// Show or edit the user profile
  Profile {
    #[command(subcommand)]
    action: ProfileAction,
  },

  /// Sample process memory usage for a while and print the readings
  Memwatch {
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Also export the samples to a CSV file in the temp directory
    #[arg(long)]
    csv: bool,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop every cached response from both cache tiers
  Clear,
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
  /// Print the profile
  Show,

  /// Update one or more profile fields
  Edit {
    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    body_weight: Option<f64>,

    #[arg(long)]
    goal: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum WorkoutAction {
  /// Create a new workout
  Add {
    #[arg(long, default_value = "")]
    notes: String,
  },

  /// List workouts with their sets
  List,

  /// Replace the notes on a workout
  Edit { id: i64, notes: String },

  /// Append a set to a workout
  AddSet {
    id: i64,
    exercise: String,
    reps: u32,
    weight_kg: f64,
  },

  /// Delete a workout and its sets
  Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_tracing(config.log_file.as_deref())?;

  let simulator = Arc::new(NetworkSimulator::new());
  if args.simulate_latency_ms.is_some() || args.simulate_failure_rate.is_some() {
    simulator.configure(
      true,
      args.simulate_latency_ms.unwrap_or(0),
      args.simulate_failure_rate.unwrap_or(0.0),
    );
    let profile = simulator.snapshot();
    info!(
      latency_ms = profile.latency_ms,
      failure_rate = profile.failure_rate,
      "network simulation enabled"
    );
  }

  let tracker = Arc::new(LifecycleTracker::new());

  match args.command {
    Command::Workout { action } => run_workout(action),
    Command::Profile { action } => run_profile(action),
    Command::Memwatch { seconds, csv } => run_memwatch(seconds, csv, &tracker).await,
    command => {
      let base_url = Url::parse(&config.api.base_url)
        .map_err(|e| eyre!("Invalid base URL {}: {}", config.api.base_url, e))?;

      if config.cache.disk {
        let client = ApiClient::with_parts(
          base_url,
          HttpTransport::new(),
          SqliteStore::open()?,
          simulator,
          config.cache.capacity,
        );
        run_catalog(command, client, &tracker).await
      } else {
        let client = ApiClient::with_parts(
          base_url,
          HttpTransport::new(),
          NoopStore,
          simulator,
          config.cache.capacity,
        );
        run_catalog(command, client, &tracker).await
      }
    }
  }
}

async fn run_catalog<S: ResponseStore>(
  command: Command,
  client: ApiClient<HttpTransport, S>,
  tracker: &Arc<LifecycleTracker>,
) -> Result<()> {
  if let Command::Cache {
    action: CacheAction::Clear,
  } = command
  {
    client.clear_caches()?;
    println!("Cached responses cleared");
    return Ok(());
  }

  let _guard = InstanceGuard::new(Arc::clone(tracker), "ExerciseService");
  let service = ExerciseService::new(client);

  match command {
    Command::Exercises {
      page,
      page_size,
      refresh,
    } => {
      let (items, has_more) = service.fetch_exercises(page, page_size, refresh).await?;
      for item in &items {
        println!("{:>6}  [{}]  {}", item.id, item.category_id, item.name);
      }
      println!(
        "{} exercises on page {}{}",
        items.len(),
        page,
        if has_more { " (more available)" } else { "" }
      );
    }
    Command::Categories { refresh } => {
      let categories = service.fetch_categories(refresh).await?;
      for category in &categories {
        println!("{:>4}  {}", category.id, category.name);
      }
    }
    // The remaining commands are dispatched before we get here.
    Command::Cache { .. }
    | Command::Workout { .. }
    | Command::Profile { .. }
    | Command::Memwatch { .. } => unreachable!(),
  }

  if let Some(warning) = tracker.warning() {
    warn!("{warning}");
  }

  Ok(())
}

fn run_workout(action: WorkoutAction) -> Result<()> {
  let db = Database::open()?;

  match action {
    WorkoutAction::Add { notes } => {
      let workout = db.create_workout(chrono::Utc::now(), &notes)?;
      println!("Created workout {}", workout.id);
    }
    WorkoutAction::List => {
      for workout in db.list_workouts()? {
        println!(
          "#{}  {}  {}",
          workout.id,
          workout.started_at.format("%Y-%m-%d %H:%M"),
          workout.notes
        );
        for set in db.list_sets(workout.id)? {
          println!("    {} x{} @ {}kg", set.exercise, set.reps, set.weight_kg);
        }
      }
    }
    WorkoutAction::Edit { id, notes } => {
      if db.update_workout_notes(id, &notes)? {
        println!("Updated workout {}", id);
      } else {
        println!("No workout with id {}", id);
      }
    }
    WorkoutAction::AddSet {
      id,
      exercise,
      reps,
      weight_kg,
    } => {
      if db.get_workout(id)?.is_none() {
        return Err(eyre!("No workout with id {}", id));
      }
      db.add_set(id, &exercise, reps, weight_kg)?;
      println!("Added set to workout {}", id);
    }
    WorkoutAction::Delete { id } => {
      if db.delete_workout(id)? {
        println!("Deleted workout {}", id);
      } else {
        println!("No workout with id {}", id);
      }
    }
  }

  Ok(())
}

fn run_profile(action: ProfileAction) -> Result<()> {
  let db = Database::open()?;
  let profile = db.load_or_create_profile()?;

  match action {
    ProfileAction::Show => {
      println!("Name:        {}", profile.name);
      println!("Body weight: {} kg", profile.body_weight);
      println!("Goal:        {}", profile.fitness_goal);
      println!("Updated:     {}", profile.updated_at.format("%Y-%m-%d %H:%M"));
    }
    ProfileAction::Edit {
      name,
      body_weight,
      goal,
    } => {
      let updated = db.save_profile(&db::UserProfile {
        name: name.unwrap_or(profile.name),
        body_weight: body_weight.unwrap_or(profile.body_weight),
        fitness_goal: goal.unwrap_or(profile.fitness_goal),
        updated_at: profile.updated_at,
      })?;
      println!(
        "Profile updated: {} ({} kg, {})",
        updated.name, updated.body_weight, updated.fitness_goal
      );
    }
  }

  Ok(())
}

async fn run_memwatch(seconds: u64, csv: bool, tracker: &Arc<LifecycleTracker>) -> Result<()> {
  let _guard = InstanceGuard::new(Arc::clone(tracker), "MemoryMonitor");

  let mut monitor = MemoryMonitor::new();
  monitor.start();

  for _ in 0..seconds {
    tokio::time::sleep(Duration::from_secs(1)).await;
    if let Some(sample) = monitor.latest() {
      println!(
        "rss={:>8} KiB  peak={:>8} KiB  vm={:>8} KiB",
        sample.rss_bytes / 1024,
        sample.peak_rss_bytes / 1024,
        sample.vm_bytes / 1024
      );
    }
  }

  monitor.stop();

  if csv {
    let path = monitor.export_csv()?;
    println!("Samples written to {}", path.display());
  }

  Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  if let Some(path) = log_file {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let filename = path
      .file_name()
      .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

    let appender = tracing_appender::rolling::never(dir, filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();
    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    Ok(None)
  }
}
