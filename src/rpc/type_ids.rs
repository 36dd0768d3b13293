use crate::base::{binary_search_str, find_duplicate, is_strictly_sorted};
use crate::{Result, Status};

/// Type id every object and servant supports.
pub const ROOT_TYPE_ID: &str = "::Object";

/// Sorted, duplicate-free list of the interfaces a type supports, built once
/// per concrete type. `most_derived` is the position of the type's own id,
/// which is generally not the last one after sorting.
#[derive(Debug, Clone, Copy)]
pub struct TypeIds {
    ids: &'static [&'static str],
    most_derived: usize,
}

impl TypeIds {
    pub const fn new(ids: &'static [&'static str], most_derived: usize) -> Self {
        Self { ids, most_derived }
    }

    /// Locates `own` in `ids` and validates the table.
    pub fn checked(ids: &'static [&'static str], own: &str) -> Result<Self> {
        let most_derived = match binary_search_str(ids, own) {
            Some(i) => i,
            None => return Err(Status::DuplicateDefinition(format!("{} missing from its own type id table", own))),
        };
        let type_ids = Self::new(ids, most_derived);
        type_ids.validate()?;
        Ok(type_ids)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(dup) = find_duplicate(self.ids) {
            return Err(Status::DuplicateDefinition(format!("type id {} listed twice", dup)));
        }
        if !is_strictly_sorted(self.ids) {
            return Err(Status::DuplicateDefinition(format!("type ids not sorted: {:?}", self.ids)));
        }
        if self.most_derived >= self.ids.len() {
            return Err(Status::DuplicateDefinition(format!("most derived index {} out of range", self.most_derived)));
        }
        if !self.is_a(ROOT_TYPE_ID) {
            return Err(Status::DuplicateDefinition(format!("{} must be listed", ROOT_TYPE_ID)));
        }
        Ok(())
    }

    pub fn is_a(&self, type_id: &str) -> bool {
        binary_search_str(self.ids, type_id).is_some()
    }

    pub fn ids(&self) -> &'static [&'static str] { self.ids }

    pub fn most_derived(&self) -> &'static str { self.ids[self.most_derived] }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READER_IDS: TypeIds = TypeIds::new(&["::Object", "::formats::IFormatReader"], 1);

    #[test]
    fn sanity() {
        assert!(READER_IDS.validate().is_ok());
        assert!(READER_IDS.is_a("::Object"));
        assert!(READER_IDS.is_a("::formats::IFormatReader"));
        assert!(!READER_IDS.is_a("::formats::IFormatWriter"));
        assert!(!READER_IDS.is_a("::formats::IFormatReader "));
        assert_eq!("::formats::IFormatReader", READER_IDS.most_derived());
        assert_eq!(2, READER_IDS.ids().len());
    }

    #[test]
    fn most_derived_by_position() {
        // "::Object" sorts after "::Metadata" so the own id is not last
        let ids = TypeIds::checked(&["::Metadata", "::Object"], "::Metadata").unwrap();
        assert_eq!("::Metadata", ids.most_derived());
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(TypeIds::new(&["::b", "::a", "::Object"], 0).validate().is_err());
        assert!(TypeIds::new(&["::Object", "::Object"], 0).validate().is_err());
        assert!(TypeIds::new(&["::Object", "::a"], 2).validate().is_err());
        assert!(TypeIds::new(&["::a", "::b"], 0).validate().is_err());
        assert!(TypeIds::checked(&["::Object", "::a"], "::b").is_err());
    }
}
