use chrono::Utc;
use dashmap::DashMap;
use gridsync_engine::engine::CellRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Backend, CellChange, GridId, GridMeta};
use crate::document::{
    DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, Dimensions, GridSnapshot, GridStore, StructuralOutcome,
    Timestamp,
};
use crate::error::{GridsyncError, Result};
use crate::presence::ConnectionId;

struct LocalGrid {
    meta: GridMeta,
    store: Mutex<GridStore>,
}

/// In-process stand-in for the persistent store and compute service.
///
/// Keeps one [`GridStore`] per grid and answers with the same evaluator the
/// server uses. [`set_available`](LocalBackend::set_available) simulates an
/// outage.
pub struct LocalBackend {
    grids: DashMap<GridId, LocalGrid>,
    default_dimensions: Dimensions,
    recompute_limit: usize,
    limits: Dimensions,
    available: AtomicBool,
}

impl Default for LocalBackend {
    fn default() -> Self {
        LocalBackend::new(Dimensions::default(), crate::document::DEFAULT_RECOMPUTE_LIMIT)
    }
}

impl LocalBackend {
    pub fn new(default_dimensions: Dimensions, recompute_limit: usize) -> Self {
        LocalBackend {
            grids: DashMap::new(),
            default_dimensions,
            recompute_limit,
            limits: Dimensions::new(DEFAULT_MAX_ROWS, DEFAULT_MAX_COLS),
            available: AtomicBool::new(true),
        }
    }

    /// Cap how far grids created from now on may grow.
    pub fn with_limits(mut self, limits: Dimensions) -> Self {
        self.limits = limits;
        self
    }

    /// When false every call fails with `UpstreamUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GridsyncError::UpstreamUnavailable(
                "local backend is offline".to_string(),
            ))
        }
    }

    fn with_store<T>(
        &self,
        grid: &GridId,
        f: impl FnOnce(&mut GridStore) -> Result<T>,
    ) -> Result<T> {
        self.check_available()?;
        let entry = self
            .grids
            .get(grid)
            .ok_or_else(|| GridsyncError::UnknownGrid(grid.to_string()))?;
        let mut store = lock(&entry.store)?;
        f(&mut store)
    }

    fn structural(
        &self,
        grid: &GridId,
        f: impl FnOnce(&mut GridStore) -> Result<StructuralOutcome>,
    ) -> Result<Dimensions> {
        let dimensions = self.with_store(grid, |store| f(store).map(|outcome| outcome.dimensions))?;
        if let Some(mut entry) = self.grids.get_mut(grid) {
            entry.meta.dimensions = dimensions;
        }
        Ok(dimensions)
    }
}

fn lock(store: &Mutex<GridStore>) -> Result<MutexGuard<'_, GridStore>> {
    store
        .lock()
        .map_err(|_| GridsyncError::UpstreamUnavailable("grid store lock poisoned".to_string()))
}

impl Backend for LocalBackend {
    async fn list_grids(&self) -> Result<Vec<GridMeta>> {
        self.check_available()?;
        let mut grids: Vec<GridMeta> = self.grids.iter().map(|g| g.meta.clone()).collect();
        grids.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(grids)
    }

    async fn create_grid(&self, name: &str) -> Result<GridMeta> {
        self.check_available()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(GridsyncError::InvalidGridName);
        }

        let meta = GridMeta {
            id: GridId::new(Uuid::new_v4().to_string()),
            name: name.to_string(),
            created_at: Utc::now(),
            dimensions: self.default_dimensions,
        };
        let store = GridStore::new(self.default_dimensions)
            .with_recompute_limit(self.recompute_limit)
            .with_limits(self.limits);
        self.grids.insert(
            meta.id.clone(),
            LocalGrid {
                meta: meta.clone(),
                store: Mutex::new(store),
            },
        );
        info!(grid = %meta.id, name = %meta.name, "created grid");
        Ok(meta)
    }

    async fn get_grid_data(&self, grid: &GridId) -> Result<GridSnapshot> {
        self.with_store(grid, |store| Ok(store.snapshot()))
    }

    async fn update_cell(
        &self,
        grid: &GridId,
        cell_ref: &str,
        raw_value: &str,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> Result<Vec<CellChange>> {
        let cell: CellRef = cell_ref.parse()?;
        let (outcome, dimensions) = self.with_store(grid, |store| {
            if !store.within_limits(cell.row, cell.col) {
                return Err(GridsyncError::CellOutOfRange {
                    row: cell.row,
                    col: cell.col,
                });
            }
            let outcome = store.write_cell(cell, raw_value, timestamp, writer);
            Ok((outcome, store.dimensions()))
        })?;
        if outcome.dimensions_changed
            && let Some(mut entry) = self.grids.get_mut(grid)
        {
            entry.meta.dimensions = dimensions;
        }
        if !outcome.applied {
            debug!(%grid, cell_ref, "stale write ignored");
        }

        Ok(outcome
            .changed
            .into_iter()
            .map(|change| CellChange {
                cell_ref: change.cell.to_string(),
                raw_value: change.record.raw_value,
                computed_value: change.record.computed_value,
            })
            .collect())
    }

    async fn add_row(&self, grid: &GridId) -> Result<Dimensions> {
        self.structural(grid, GridStore::insert_row)
    }

    async fn delete_row(&self, grid: &GridId) -> Result<Dimensions> {
        self.structural(grid, GridStore::delete_row)
    }

    async fn add_column(&self, grid: &GridId) -> Result<Dimensions> {
        self.structural(grid, GridStore::insert_column)
    }

    async fn delete_column(&self, grid: &GridId) -> Result<Dimensions> {
        self.structural(grid, GridStore::delete_column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_engine::engine::Value;

    fn backend() -> LocalBackend {
        LocalBackend::new(Dimensions::new(3, 3), 100)
    }

    #[tokio::test]
    async fn test_create_and_list_grids() {
        let backend = backend();
        let first = backend.create_grid("Budget").await.unwrap();
        let second = backend.create_grid("  Plan ").await.unwrap();
        assert_eq!(second.name, "Plan");
        assert_eq!(first.dimensions, Dimensions::new(3, 3));

        let ids: Vec<GridId> = backend
            .list_grids()
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id) && ids.contains(&second.id));
    }

    #[tokio::test]
    async fn test_create_grid_rejects_blank_name() {
        let err = backend().create_grid("   ").await.unwrap_err();
        assert!(matches!(err, GridsyncError::InvalidGridName));
    }

    #[tokio::test]
    async fn test_update_cell_returns_dependents() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        backend.update_cell(&grid, "A1", "2", 1, None).await.unwrap();
        backend.update_cell(&grid, "B1", "=A1*3", 2, None).await.unwrap();

        let changes = backend.update_cell(&grid, "A1", "5", 3, None).await.unwrap();
        let pairs: Vec<(&str, Value)> = changes
            .iter()
            .map(|c| (c.cell_ref.as_str(), c.computed_value.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![("A1", Value::Text("5".into())), ("B1", Value::Number(15.0))]
        );

        let snapshot = backend.get_grid_data(&grid).await.unwrap();
        assert_eq!(snapshot.cells.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_update_changes_nothing() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        backend.update_cell(&grid, "A1", "new", 10, None).await.unwrap();
        let changes = backend.update_cell(&grid, "A1", "old", 9, None).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_bad_reference_and_unknown_grid() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        assert!(matches!(
            backend.update_cell(&grid, "1A", "x", 1, None).await,
            Err(GridsyncError::Reference(_))
        ));
        assert!(matches!(
            backend.get_grid_data(&GridId::new("nope")).await,
            Err(GridsyncError::UnknownGrid(_))
        ));
    }

    #[tokio::test]
    async fn test_structural_ops_update_metadata() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        assert_eq!(backend.add_row(&grid).await.unwrap(), Dimensions::new(4, 3));
        assert_eq!(backend.add_column(&grid).await.unwrap(), Dimensions::new(4, 4));
        assert_eq!(backend.delete_row(&grid).await.unwrap(), Dimensions::new(3, 4));
        assert_eq!(
            backend.list_grids().await.unwrap()[0].dimensions,
            Dimensions::new(3, 4)
        );

        let single = LocalBackend::new(Dimensions::new(1, 1), 100);
        let grid = single.create_grid("tiny").await.unwrap().id;
        assert!(matches!(
            single.delete_column(&grid).await,
            Err(GridsyncError::DimensionUnderflow(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_outside_bounds_grow_metadata() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        backend.update_cell(&grid, "E7", "x", 1, None).await.unwrap();
        assert_eq!(
            backend.list_grids().await.unwrap()[0].dimensions,
            Dimensions::new(7, 5)
        );
    }

    #[tokio::test]
    async fn test_limits_bound_writes_and_inserts() {
        let backend = backend().with_limits(Dimensions::new(4, 3));
        let grid = backend.create_grid("g").await.unwrap().id;
        assert!(matches!(
            backend.update_cell(&grid, "A5", "x", 1, None).await,
            Err(GridsyncError::CellOutOfRange { row: 4, col: 0 })
        ));
        assert_eq!(backend.add_row(&grid).await.unwrap(), Dimensions::new(4, 3));
        assert!(matches!(
            backend.add_row(&grid).await,
            Err(GridsyncError::DimensionLimit(_))
        ));
        assert!(backend.get_grid_data(&grid).await.unwrap().cells.is_empty());
    }

    #[tokio::test]
    async fn test_offline_backend_fails_every_call() {
        let backend = backend();
        let grid = backend.create_grid("g").await.unwrap().id;
        backend.set_available(false);
        assert!(matches!(
            backend.update_cell(&grid, "A1", "x", 1, None).await,
            Err(GridsyncError::UpstreamUnavailable(_))
        ));
        assert!(backend.list_grids().await.is_err());
        backend.set_available(true);
        assert!(backend.get_grid_data(&grid).await.unwrap().cells.is_empty());
    }
}
