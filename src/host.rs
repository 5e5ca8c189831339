//! Read-only projection of the host simulation.
//!
//! The collector never touches game objects directly. Everything it needs is
//! behind [`HostGraphReader`], one accessor per concept. Accessors return
//! `None` when the underlying object does not exist (e.g. outside of a
//! loaded store); the reader is queried concurrently with host mutation, so
//! values only need to be individually plausible, not mutually consistent.

pub mod snapshot;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use snapshot::{HostSnapshot, SharedHost};

/// Location label of carried batches and of the box container
pub const BOXES_LOCATION: &str = "Boxes";

/// Location label of the sales floor shelves
pub const SHELVES_LOCATION: &str = "Shelves";

/// Location label of the back-room storage shelves
pub const STORAGE_SHELVES_LOCATION: &str = "StorageShelves";

/// Number of container categories a store always has
pub const CONTAINER_CATEGORY_COUNT: usize = 3;

/// Prefix of product localization keys
pub const PRODUCT_KEY_PREFIX: &str = "product";

/// Store-wide values held by the game data singleton
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameData {
    pub funds: f64,
    pub franchise_experience: f64,
    pub franchise_points: f64,
    pub supermarket_open: bool,
}

/// Products currently sold and their player-facing prices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductListing {
    pub available_products: Vec<i32>,
    pub player_prices: HashMap<i32, f64>,
}

/// A stack of one product
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductBatch {
    pub product_id: i32,
    pub count: i32,
}

impl ProductBatch {
    pub fn new(product_id: i32, count: i32) -> Self {
        Self { product_id, count }
    }
}

/// Children of one container category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerItems {
    /// Shelves: each child holds `[id0, count0, id1, count1, ...]`
    Slots(Vec<Vec<i32>>),
    /// Boxes: each child holds exactly one batch
    Boxes(Vec<ProductBatch>),
}

/// One container category and everything placed in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Category name, used as the `location` label
    pub name: String,
    pub items: ContainerItems,
}

impl Container {
    pub fn slots(name: impl Into<String>, items: Vec<Vec<i32>>) -> Self {
        Self {
            name: name.into(),
            items: ContainerItems::Slots(items),
        }
    }

    pub fn boxes(name: impl Into<String>, items: Vec<ProductBatch>) -> Self {
        Self {
            name: name.into(),
            items: ContainerItems::Boxes(items),
        }
    }
}

/// Typed, read-only access to the host object graph.
pub trait HostGraphReader: Send + Sync {
    /// Game data singleton
    fn game_data(&self) -> Option<GameData>;

    /// Product listing of the store
    fn product_listing(&self) -> Option<ProductListing>;

    /// All container categories, in host order
    fn containers(&self) -> Option<Vec<Container>>;

    /// What each employee is carrying, one entry per active employee
    fn employee_loads(&self) -> Option<Vec<Option<ProductBatch>>>;

    /// What each connected player is carrying
    fn player_loads(&self) -> Option<Vec<Option<ProductBatch>>>;

    /// Localized string for `key`
    fn localize(&self, key: &str) -> String;
}

/// Display name of a product, as shown in game.
pub fn product_name(host: &dyn HostGraphReader, product_id: i32) -> String {
    host.localize(&format!("{}{}", PRODUCT_KEY_PREFIX, product_id))
}
