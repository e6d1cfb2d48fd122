//! Schema for the local workout log.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workouts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS workout_sets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workout_id INTEGER NOT NULL,
    exercise TEXT NOT NULL,
    reps INTEGER NOT NULL,
    weight_kg REAL NOT NULL,
    FOREIGN KEY (workout_id) REFERENCES workouts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_workout_sets_workout ON workout_sets(workout_id);

CREATE TABLE IF NOT EXISTS user_profile (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    name TEXT NOT NULL DEFAULT '',
    body_weight REAL NOT NULL DEFAULT 0,
    fitness_goal TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL
);
"#;
