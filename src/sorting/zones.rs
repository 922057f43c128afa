use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::{validate_zone_name, Position};

/// A target location on the floor with a fixed capacity.
///
/// Fields are private: occupancy only changes through `ZoneManager::add_object`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Zone {
    name: String,
    position: Position,
    capacity: u32,
    occupied_count: u32,
}

impl Zone {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn occupied_count(&self) -> u32 {
        self.occupied_count
    }

    pub fn is_full(&self) -> bool {
        self.occupied_count >= self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied_count)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZoneError {
    AlreadyExists(String),
    NotFound(String),
    CapacityExceeded { zone: String, capacity: u32 },
    InvalidCapacity(String),
    InvalidName(String),
}

impl std::fmt::Display for ZoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneError::AlreadyExists(name) => write!(f, "zone '{}' already exists", name),
            ZoneError::NotFound(name) => write!(f, "zone '{}' not found", name),
            ZoneError::CapacityExceeded { zone, capacity } => {
                write!(f, "zone '{}' is at capacity ({})", zone, capacity)
            }
            ZoneError::InvalidCapacity(name) => {
                write!(f, "zone '{}' must have a capacity greater than zero", name)
            }
            ZoneError::InvalidName(reason) => write!(f, "{}", reason),
        }
    }
}
impl std::error::Error for ZoneError {}

/// Owner of every zone and the single writer of occupancy.
///
/// Not internally synchronized: at most one `SortingController` may drive a
/// given manager at a time.
#[derive(Clone, Debug, Default)]
pub struct ZoneManager {
    zones: HashMap<String, Zone>,
}

impl ZoneManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_zone(
        &mut self,
        name: &str,
        position: Position,
        capacity: u32,
    ) -> Result<(), ZoneError> {
        validate_zone_name(name).map_err(|e| ZoneError::InvalidName(e.to_string()))?;
        if capacity == 0 {
            return Err(ZoneError::InvalidCapacity(name.to_string()));
        }
        if self.zones.contains_key(name) {
            return Err(ZoneError::AlreadyExists(name.to_string()));
        }
        self.zones.insert(
            name.to_string(),
            Zone {
                name: name.to_string(),
                position,
                capacity,
                occupied_count: 0,
            },
        );
        Ok(())
    }

    pub fn get_zone(&self, name: &str) -> Option<&Zone> {
        self.zones.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zones.contains_key(name)
    }

    /// Record one placed object. Refused when the zone is already full;
    /// the count is left unchanged in that case.
    pub fn add_object(&mut self, name: &str) -> Result<u32, ZoneError> {
        let zone = self
            .zones
            .get_mut(name)
            .ok_or_else(|| ZoneError::NotFound(name.to_string()))?;
        if zone.is_full() {
            return Err(ZoneError::CapacityExceeded {
                zone: name.to_string(),
                capacity: zone.capacity,
            });
        }
        zone.occupied_count += 1;
        Ok(zone.occupied_count)
    }

    pub fn occupancy_snapshot(&self) -> BTreeMap<String, u32> {
        self.zones
            .values()
            .map(|z| (z.name.clone(), z.occupied_count))
            .collect()
    }

    pub fn zone_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.zones.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
