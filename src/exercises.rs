//! Exercise catalog service backed by a wger-style API.
//!
//! Thin typed layer over [`ApiClient`]: defines the catalog endpoints,
//! decodes the paged wire format, and filters out unusable rows.

use serde::Deserialize;

use crate::net::{ApiClient, CachePolicy, Endpoint, NetworkError, ResponseStore, Transport};

/// One exercise from the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseItem {
  pub id: u64,
  pub name: String,
  pub category_id: u64,
  pub description: String,
}

/// An exercise category (e.g., "Legs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseCategoryItem {
  pub id: u64,
  pub name: String,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExercisePageResponse {
  count: u64,
  next: Option<String>,
  results: Vec<ExerciseRow>,
}

#[derive(Debug, Deserialize)]
struct ExerciseRow {
  id: u64,
  name: Option<String>,
  category: Option<u64>,
  description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExerciseCategoryResponse {
  results: Vec<CategoryRow>,
}

#[derive(Debug, Deserialize)]
struct CategoryRow {
  id: u64,
  name: String,
}

// ============================================================================
// Endpoints
// ============================================================================

struct ExerciseEndpoint {
  page: u32,
  page_size: u32,
  refresh: bool,
}

impl Endpoint for ExerciseEndpoint {
  fn path(&self) -> String {
    "api/v2/exercise/".to_string()
  }

  fn query(&self) -> Vec<(String, String)> {
    vec![
      ("language".to_string(), "2".to_string()),
      ("limit".to_string(), self.page_size.to_string()),
      (
        "offset".to_string(),
        (u64::from(self.page) * u64::from(self.page_size)).to_string(),
      ),
    ]
  }

  fn cache_policy(&self) -> CachePolicy {
    if self.refresh {
      CachePolicy::Reload
    } else {
      CachePolicy::UseCache
    }
  }
}

struct ExerciseCategoryEndpoint {
  refresh: bool,
}

impl Endpoint for ExerciseCategoryEndpoint {
  fn path(&self) -> String {
    "api/v2/exercisecategory/".to_string()
  }

  fn cache_policy(&self) -> CachePolicy {
    if self.refresh {
      CachePolicy::Reload
    } else {
      CachePolicy::UseCache
    }
  }
}

// ============================================================================
// Service
// ============================================================================

/// Typed access to the exercise catalog.
pub struct ExerciseService<T: Transport, S: ResponseStore> {
  client: ApiClient<T, S>,
}

impl<T: Transport, S: ResponseStore> ExerciseService<T, S> {
  pub fn new(client: ApiClient<T, S>) -> Self {
    Self { client }
  }

  /// Fetch one page of exercises. Returns the usable items and whether more
  /// pages remain. `refresh` bypasses both cache tiers.
  pub async fn fetch_exercises(
    &self,
    page: u32,
    page_size: u32,
    refresh: bool,
  ) -> Result<(Vec<ExerciseItem>, bool), NetworkError> {
    let response: ExercisePageResponse = self
      .client
      .request(&ExerciseEndpoint {
        page,
        page_size,
        refresh,
      })
      .await?;

    let items = response
      .results
      .into_iter()
      .filter_map(|row| {
        // Rows without a usable name or category are catalog noise.
        let name = row.name?;
        if name.trim().is_empty() {
          return None;
        }
        let category_id = row.category?;

        Some(ExerciseItem {
          id: row.id,
          name,
          category_id,
          description: row.description.unwrap_or_default(),
        })
      })
      .collect();

    // Widen before multiplying; large page numbers overflow u32.
    let has_more = response.next.is_some()
      || (u64::from(page) + 1) * u64::from(page_size) < response.count;

    Ok((items, has_more))
  }

  /// Fetch all exercise categories, sorted case-insensitively by name.
  pub async fn fetch_categories(
    &self,
    refresh: bool,
  ) -> Result<Vec<ExerciseCategoryItem>, NetworkError> {
    let response: ExerciseCategoryResponse = self
      .client
      .request(&ExerciseCategoryEndpoint { refresh })
      .await?;

    let mut categories: Vec<ExerciseCategoryItem> = response
      .results
      .into_iter()
      .map(|row| ExerciseCategoryItem {
        id: row.id,
        name: row.name,
      })
      .collect();

    categories.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(categories)
  }
}
