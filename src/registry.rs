use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::engine::EngineFactory;
use crate::error::BoxfishError;
use crate::player::PlayerComponent;

/// Lifecycle of zero-or-more concurrent player components, keyed by identifier.
///
/// Closing the last player is the application shutdown trigger; `close` reports
/// whether the registry became empty so the root can act on it.
pub struct PlayerRegistry {
    players: HashMap<Uuid, PlayerComponent>,
    order: Vec<Uuid>,
    engine_factory: EngineFactory,
}

impl PlayerRegistry {
    pub fn new(engine_factory: EngineFactory) -> Self {
        Self {
            players: HashMap::new(),
            order: Vec::new(),
            engine_factory,
        }
    }

    /// Create a new player with a fresh identifier.
    pub fn open(&mut self) -> Uuid {
        self.open_with_id(None)
    }

    /// Create a player, reusing an existing one when `id` is already live.
    pub fn open_with_id(&mut self, id: Option<Uuid>) -> Uuid {
        if let Some(id) = id
            && self.players.contains_key(&id)
        {
            return id;
        }

        let id = id.unwrap_or_else(Uuid::new_v4);
        debug!("open() -> {}", id);
        self.players.insert(id, PlayerComponent::new(id, (self.engine_factory)()));
        self.order.push(id);
        id
    }

    /// Tear down a player, releasing its engine. Returns whether the registry
    /// became empty.
    pub fn close(&mut self, id: Uuid) -> Result<bool, BoxfishError> {
        debug!("close(id={})", id);
        let mut player = self.players.remove(&id).ok_or(BoxfishError::PlayerNotFound(id))?;
        player.release();
        self.order.retain(|other| *other != id);
        Ok(self.players.is_empty())
    }

    pub fn get(&self, id: Uuid) -> Result<&PlayerComponent, BoxfishError> {
        self.players.get(&id).ok_or(BoxfishError::PlayerNotFound(id))
    }

    pub fn get_mut(&mut self, id: Uuid) -> Result<&mut PlayerComponent, BoxfishError> {
        self.players.get_mut(&id).ok_or(BoxfishError::PlayerNotFound(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.players.contains_key(&id)
    }

    /// Live player identifiers in creation order.
    pub fn ids(&self) -> &[Uuid] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerComponent> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlayerComponent> {
        self.players.values_mut()
    }

    /// Release every player's engine. Used at shutdown.
    pub fn release_all(&mut self) {
        for player in self.players.values_mut() {
            player.release();
        }
        self.players.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedEngine;

    fn registry() -> PlayerRegistry {
        PlayerRegistry::new(SimulatedEngine::factory())
    }

    #[test]
    fn open_assigns_fresh_unique_identifiers() {
        let mut registry = registry();
        let first = registry.open();
        let second = registry.open();
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), &[first, second]);
    }

    #[test]
    fn open_with_existing_id_reuses_the_player() {
        let mut registry = registry();
        let id = registry.open();
        assert_eq!(registry.open_with_id(Some(id)), id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_unknown_player_is_not_found() {
        let mut registry = registry();
        let id = Uuid::new_v4();
        assert!(matches!(registry.get(id), Err(BoxfishError::PlayerNotFound(_))));
        assert!(matches!(registry.get_mut(id), Err(BoxfishError::PlayerNotFound(_))));
        assert!(matches!(registry.close(id), Err(BoxfishError::PlayerNotFound(_))));
    }

    #[test]
    fn closing_the_last_player_reports_empty() {
        let mut registry = registry();
        let first = registry.open();
        let second = registry.open();

        assert!(!registry.close(first).unwrap());
        assert!(registry.close(second).unwrap());
        assert!(registry.is_empty());
    }
}
