use std::sync::{Arc, RwLock};

use crate::stream::object::ObjectPtr;
use crate::{Result, Status};

pub type ObjectFactory = Arc<dyn Fn() -> ObjectPtr + Send + Sync>;

/// Type id to constructor mapping used when decoding objects. Kept as a
/// sorted vector and searched with binary search, like every other type id
/// table in the protocol.
#[derive(Default)]
pub struct FactoryRegistry {
    entries: RwLock<Vec<(String, ObjectFactory)>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, type_id: &str, factory: F) -> Result<()>
        where F: Fn() -> ObjectPtr + Send + Sync + 'static {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => return Err(Status::UnknownLocalException("factory registry poisoned".into())),
        };
        match entries.binary_search_by(|(id, _)| id.as_str().cmp(type_id)) {
            Ok(_) => Err(Status::DuplicateDefinition(format!("factory for {} already registered", type_id))),
            Err(pos) => {
                entries.insert(pos, (type_id.to_string(), Arc::new(factory)));
                Ok(())
            }
        }
    }

    pub fn remove(&self, type_id: &str) -> bool {
        match self.entries.write() {
            Ok(mut entries) => match entries.binary_search_by(|(id, _)| id.as_str().cmp(type_id)) {
                Ok(pos) => {
                    entries.remove(pos);
                    true
                }
                Err(_) => false,
            },
            Err(_) => false,
        }
    }

    pub fn find(&self, type_id: &str) -> Option<ObjectFactory> {
        let entries = self.entries.read().ok()?;
        entries.binary_search_by(|(id, _)| id.as_str().cmp(type_id))
            .ok()
            .map(|pos| entries[pos].1.clone())
    }

    pub fn type_ids(&self) -> Vec<String> {
        match self.entries.read() {
            Ok(entries) => entries.iter().map(|(id, _)| id.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }
}
