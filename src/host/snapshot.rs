//! Snapshot-backed host.
//!
//! [`HostSnapshot`] is a plain, serializable copy of everything
//! [`HostGraphReader`] exposes. [`SharedHost`] wraps one behind a lock so a
//! driver thread can swap in a new state while channel workers read it.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    Container, GameData, HostGraphReader, ProductBatch, ProductListing, BOXES_LOCATION,
    PRODUCT_KEY_PREFIX, SHELVES_LOCATION, STORAGE_SHELVES_LOCATION,
};

/// Point-in-time copy of the host graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSnapshot {
    pub game_data: Option<GameData>,
    pub product_listing: Option<ProductListing>,
    pub containers: Option<Vec<Container>>,
    pub employees: Option<Vec<Option<ProductBatch>>>,
    pub players: Option<Vec<Option<ProductBatch>>>,
    /// Localization table, e.g. `"product7" -> "Pasta"`
    pub localization: HashMap<String, String>,
}

impl HostSnapshot {
    /// A loaded, empty store: all host objects present, nothing stocked.
    pub fn empty_store() -> Self {
        Self {
            game_data: Some(GameData::default()),
            product_listing: Some(ProductListing::default()),
            containers: Some(vec![
                Container::slots(SHELVES_LOCATION, Vec::new()),
                Container::slots(STORAGE_SHELVES_LOCATION, Vec::new()),
                Container::boxes(BOXES_LOCATION, Vec::new()),
            ]),
            employees: Some(Vec::new()),
            players: Some(Vec::new()),
            localization: HashMap::new(),
        }
    }

    /// Register the display name of a product
    pub fn with_product_name(mut self, product_id: i32, name: impl Into<String>) -> Self {
        self.localization
            .insert(format!("{}{}", PRODUCT_KEY_PREFIX, product_id), name.into());
        self
    }

    /// Mutable access to the container named `name`, if present
    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers
            .as_mut()?
            .iter_mut()
            .find(|container| container.name == name)
    }
}

impl HostGraphReader for HostSnapshot {
    fn game_data(&self) -> Option<GameData> {
        self.game_data
    }

    fn product_listing(&self) -> Option<ProductListing> {
        self.product_listing.clone()
    }

    fn containers(&self) -> Option<Vec<Container>> {
        self.containers.clone()
    }

    fn employee_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
        self.employees.clone()
    }

    fn player_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
        self.players.clone()
    }

    fn localize(&self, key: &str) -> String {
        self.localization
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// Replaceable host state shared between the driver and channel workers.
#[derive(Debug, Default)]
pub struct SharedHost {
    state: RwLock<HostSnapshot>,
}

impl SharedHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Swap in a new state
    pub fn replace(&self, snapshot: HostSnapshot) {
        *self.state.write() = snapshot;
    }

    /// Edit the state in place
    pub fn modify<F>(&self, edit: F)
    where
        F: FnOnce(&mut HostSnapshot),
    {
        edit(&mut self.state.write());
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> HostSnapshot {
        self.state.read().clone()
    }
}

impl HostGraphReader for SharedHost {
    fn game_data(&self) -> Option<GameData> {
        self.state.read().game_data()
    }

    fn product_listing(&self) -> Option<ProductListing> {
        self.state.read().product_listing()
    }

    fn containers(&self) -> Option<Vec<Container>> {
        self.state.read().containers()
    }

    fn employee_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
        self.state.read().employee_loads()
    }

    fn player_loads(&self) -> Option<Vec<Option<ProductBatch>>> {
        self.state.read().player_loads()
    }

    fn localize(&self, key: &str) -> String {
        self.state.read().localize(key)
    }
}
