//! Ordered, uniquely named collection of tunnel records
//!
//! Records are kept sorted by name and `record.index` always equals the
//! record's position. The table also remembers the single engaged tunnel.

use std::collections::HashSet;

use super::record::{TunnelId, TunnelRecord};
use crate::error::{TunnelError, TunnelResult};

#[derive(Default)]
pub(crate) struct TunnelTable {
    tunnels: Vec<TunnelRecord>,
    names: HashSet<String>,
    /// The one tunnel allowed to be engaged
    pub current: Option<TunnelId>,
}

impl TunnelTable {
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TunnelRecord> {
        self.tunnels.iter()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn at(&self, index: usize) -> Option<&TunnelRecord> {
        self.tunnels.get(index)
    }

    pub fn position(&self, id: TunnelId) -> Option<usize> {
        self.tunnels.iter().position(|t| t.id == id)
    }

    pub fn get(&self, id: TunnelId) -> TunnelResult<&TunnelRecord> {
        self.tunnels
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TunnelError::NotFound(id.to_string()))
    }

    pub fn get_mut(&mut self, id: TunnelId) -> TunnelResult<&mut TunnelRecord> {
        self.tunnels
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TunnelError::NotFound(id.to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TunnelRecord> {
        if !self.names.contains(name) {
            return None;
        }
        self.tunnels.iter().find(|t| t.name == name)
    }

    fn insertion_index(&self, name: &str) -> usize {
        self.tunnels.partition_point(|t| t.name.as_str() < name)
    }

    /// Insert at the sorted position, shifting later indices by +1
    pub fn insert(&mut self, mut record: TunnelRecord) -> TunnelResult<usize> {
        if self.names.contains(&record.name) {
            return Err(TunnelError::DuplicateName(record.name));
        }

        let index = self.insertion_index(&record.name);
        record.index = index;
        self.names.insert(record.name.clone());
        self.tunnels.insert(index, record);
        for tunnel in &mut self.tunnels[index + 1..] {
            tunnel.index += 1;
        }
        Ok(index)
    }

    /// Remove the record at `index`, shifting later indices by -1
    pub fn remove_at(&mut self, index: usize) -> TunnelRecord {
        let record = self.tunnels.remove(index);
        for tunnel in &mut self.tunnels[index..] {
            tunnel.index -= 1;
        }
        self.names.remove(&record.name);
        if self.current == Some(record.id) {
            self.current = None;
        }
        record
    }

    /// Rename a record and move it to its new sorted position
    ///
    /// Returns `(from, to)`. Only indices between the two positions change.
    pub fn rename(&mut self, id: TunnelId, new_name: &str) -> TunnelResult<(usize, usize)> {
        let from = self.position(id).ok_or_else(|| TunnelError::NotFound(id.to_string()))?;
        if self.tunnels[from].name == new_name {
            return Ok((from, from));
        }
        if self.names.contains(new_name) {
            return Err(TunnelError::DuplicateName(new_name.to_string()));
        }

        let current = self.current;
        let mut record = self.remove_at(from);
        record.name = new_name.to_string();
        // The record keeps its engaged role across the move
        self.current = current;
        let to = self.insert(record)?;
        Ok((from, to))
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (i, t) in self.tunnels.iter().enumerate() {
            assert_eq!(t.index, i, "index of '{}'", t.name);
            assert!(self.names.contains(&t.name));
        }
        for pair in self.tunnels.windows(2) {
            assert!(pair[0].name < pair[1].name, "'{}' !< '{}'", pair[0].name, pair[1].name);
        }
        assert_eq!(self.names.len(), self.tunnels.len());
        let engaged = self.tunnels.iter().filter(|t| t.status.is_engaged()).count();
        assert!(engaged <= 1, "{} tunnels engaged", engaged);
    }
}
