//! Local storage for user-authored workout records.
//!
//! Plain create/read/update/delete over SQLite. No caching, no concurrency
//! machinery: records are owned by this process and edited one at a time.

pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

/// One logged workout session.
#[derive(Debug, Clone, PartialEq)]
pub struct Workout {
  pub id: i64,
  pub started_at: DateTime<Utc>,
  pub notes: String,
}

/// One set within a workout.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSet {
  pub id: i64,
  pub workout_id: i64,
  pub exercise: String,
  pub reps: u32,
  pub weight_kg: f64,
}

/// The single local user profile.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
  pub name: String,
  pub body_weight: f64,
  pub fitness_goal: String,
  pub updated_at: DateTime<Utc>,
}

/// Database connection wrapper for the workout log.
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create the database at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Wrap an existing connection (in-memory in tests).
  pub fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute("PRAGMA foreign_keys = ON", [])
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    let db = Self { conn };
    db.run_migrations()?;
    Ok(db)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pulselog").join("workouts.db"))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Create a workout and return it with its assigned id.
  pub fn create_workout(&self, started_at: DateTime<Utc>, notes: &str) -> Result<Workout> {
    self
      .conn
      .execute(
        "INSERT INTO workouts (started_at, notes) VALUES (?, ?)",
        params![started_at.to_rfc3339(), notes],
      )
      .map_err(|e| eyre!("Failed to create workout: {}", e))?;

    Ok(Workout {
      id: self.conn.last_insert_rowid(),
      started_at,
      notes: notes.to_string(),
    })
  }

  /// All workouts, most recent first.
  pub fn list_workouts(&self) -> Result<Vec<Workout>> {
    let mut stmt = self
      .conn
      .prepare("SELECT id, started_at, notes FROM workouts ORDER BY started_at DESC")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let workouts = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query workouts: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|(id, started_at, notes)| {
        let started_at = DateTime::parse_from_rfc3339(&started_at)
          .ok()?
          .with_timezone(&Utc);
        Some(Workout {
          id,
          started_at,
          notes,
        })
      })
      .collect();

    Ok(workouts)
  }

  /// Fetch a single workout by id.
  pub fn get_workout(&self, id: i64) -> Result<Option<Workout>> {
    let row: Option<(String, String)> = self
      .conn
      .query_row(
        "SELECT started_at, notes FROM workouts WHERE id = ?",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query workout: {}", e))?;

    match row {
      Some((started_at, notes)) => {
        let started_at = DateTime::parse_from_rfc3339(&started_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse started_at '{}': {}", started_at, e))?;
        Ok(Some(Workout {
          id,
          started_at,
          notes,
        }))
      }
      None => Ok(None),
    }
  }

  /// Replace a workout's notes.
  pub fn update_workout_notes(&self, id: i64, notes: &str) -> Result<bool> {
    let changed = self
      .conn
      .execute("UPDATE workouts SET notes = ? WHERE id = ?", params![notes, id])
      .map_err(|e| eyre!("Failed to update workout: {}", e))?;
    Ok(changed > 0)
  }

  /// Delete a workout and its sets. Returns whether anything was deleted.
  pub fn delete_workout(&self, id: i64) -> Result<bool> {
    let changed = self
      .conn
      .execute("DELETE FROM workouts WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete workout: {}", e))?;
    Ok(changed > 0)
  }

  /// Append a set to a workout.
  pub fn add_set(
    &self,
    workout_id: i64,
    exercise: &str,
    reps: u32,
    weight_kg: f64,
  ) -> Result<WorkoutSet> {
    self
      .conn
      .execute(
        "INSERT INTO workout_sets (workout_id, exercise, reps, weight_kg)
         VALUES (?, ?, ?, ?)",
        params![workout_id, exercise, reps, weight_kg],
      )
      .map_err(|e| eyre!("Failed to add set: {}", e))?;

    Ok(WorkoutSet {
      id: self.conn.last_insert_rowid(),
      workout_id,
      exercise: exercise.to_string(),
      reps,
      weight_kg,
    })
  }

  /// Fetch the user profile, creating a blank one on first access.
  pub fn load_or_create_profile(&self) -> Result<UserProfile> {
    let row: Option<(String, f64, String, String)> = self
      .conn
      .query_row(
        "SELECT name, body_weight, fitness_goal, updated_at FROM user_profile WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query profile: {}", e))?;

    if let Some((name, body_weight, fitness_goal, updated_at)) = row {
      let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| eyre!("Failed to parse updated_at '{}': {}", updated_at, e))?;
      return Ok(UserProfile {
        name,
        body_weight,
        fitness_goal,
        updated_at,
      });
    }

    let profile = UserProfile {
      name: String::new(),
      body_weight: 0.0,
      fitness_goal: String::new(),
      updated_at: Utc::now(),
    };
    self.write_profile(&profile)?;
    Ok(profile)
  }

  /// Persist the profile, stamping `updated_at` with the current time.
  pub fn save_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
    let stamped = UserProfile {
      updated_at: Utc::now(),
      ..profile.clone()
    };
    self.write_profile(&stamped)?;
    Ok(stamped)
  }

  fn write_profile(&self, profile: &UserProfile) -> Result<()> {
    self
      .conn
      .execute(
        "INSERT OR REPLACE INTO user_profile (id, name, body_weight, fitness_goal, updated_at)
         VALUES (1, ?, ?, ?, ?)",
        params![
          profile.name,
          profile.body_weight,
          profile.fitness_goal,
          profile.updated_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to save profile: {}", e))?;
    Ok(())
  }

  /// All sets of a workout, in insertion order.
  pub fn list_sets(&self, workout_id: i64) -> Result<Vec<WorkoutSet>> {
    let mut stmt = self
      .conn
      .prepare(
        "SELECT id, exercise, reps, weight_kg FROM workout_sets
         WHERE workout_id = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let sets = stmt
      .query_map(params![workout_id], |row| {
        Ok(WorkoutSet {
          id: row.get(0)?,
          workout_id,
          exercise: row.get(1)?,
          reps: row.get(2)?,
          weight_kg: row.get(3)?,
        })
      })
      .map_err(|e| eyre!("Failed to query sets: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(sets)
  }
}
